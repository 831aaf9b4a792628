//! The main rewrite: every declared name is re-homed into a scope-qualified history slot on
//! the context, namespace calls get normalised arguments and call-site ids, and returns are
//! finalised per enclosing scope.
//!
//! The traversal is purely functional: each node is rebuilt from its children, and the
//! syntactic position of a sub-expression travels down as a [`Position`] tag.

use std::rc::Rc;

use tracing::{trace, warn};

use crate::ast::*;
use crate::config::{CompilerOptions, UnsupportedPolicy};
use crate::error::CompileError;
use crate::scope::{Binding, Mutability, Resolution, ScopeKind, ScopeManager};

/// Where a sub-expression sits relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// Read for its current value.
    Value,
    /// Base of an `x[k]` access; the subscript supplies the offset.
    IndexBase,
    /// Callee of a non-namespace call.
    CallTarget,
    /// Left-hand side of an assignment or update.
    AssignTarget,
}

/// Identifiers that name values rather than bindings.
const RESERVED_VALUES: &[&str] = &["NaN", "Infinity"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformStats {
    pub slot_declarations: usize,
    pub slot_reads: usize,
    pub namespace_calls: usize,
    pub passed_through: usize,
}

pub struct Transformer<'a> {
    scopes: &'a mut ScopeManager,
    options: &'a CompilerOptions,
    root: String,
    stats: TransformStats,
}

type TResult<T> = Result<T, CompileError>;

impl<'a> Transformer<'a> {
    pub fn new(scopes: &'a mut ScopeManager, options: &'a CompilerOptions) -> Self {
        let root = scopes.root_param().to_string();
        Self {
            scopes,
            options,
            root,
            stats: TransformStats::default(),
        }
    }

    pub fn stats(&self) -> TransformStats {
        self.stats
    }

    pub fn program(&mut self, program: Program) -> TResult<Program> {
        let root = program.root.as_ref().clone();
        self.scopes.push_scope(ScopeKind::Global);
        let body = match root.body {
            FunctionBody::Block(stmts) => FunctionBody::Block(self.block(stmts)?),
            FunctionBody::Expr(e) => FunctionBody::Expr(Box::new(self.expr(*e, Position::Value)?)),
        };
        self.scopes.pop_scope();
        Ok(Program {
            root: Rc::new(Function { body, ..root }),
        })
    }

    // ---------- helpers ----------

    fn root_ident(&self) -> Expr {
        Expr::ident(self.root.clone())
    }

    fn context_call(&self, name: &str, args: Vec<Expr>) -> Expr {
        Expr::call(Expr::member(self.root_ident(), name), args)
    }

    /// `root.<bucket>.<scoped>`: the slot's whole history.
    fn slot(&self, binding: &Binding) -> Expr {
        Expr::member(
            Expr::member(self.root_ident(), binding.mutability.bucket()),
            binding.scoped.clone(),
        )
    }

    /// `root.<bucket>.<scoped>[0]`: the slot's current value.
    fn current(&mut self, binding: &Binding) -> Expr {
        self.stats.slot_reads += 1;
        Expr::index(self.slot(binding), Expr::Number(0.0))
    }

    fn unsupported<T>(&mut self, construct: &str, span: Span, original: T) -> TResult<T> {
        match self.options.unsupported {
            UnsupportedPolicy::Strict => Err(CompileError::unsupported(construct, span)),
            UnsupportedPolicy::PassThrough => {
                warn!(construct, line = span.line, column = span.column, "passing construct through untransformed");
                self.stats.passed_through += 1;
                Ok(original)
            }
        }
    }

    fn resolve(&self, id: &Ident) -> TResult<Resolution> {
        match self.scopes.resolve(&id.name, id.span) {
            Ok(r) => Ok(r),
            Err(_) if self.options.is_analysis_namespace(&id.name) => Ok(Resolution::ContextBound),
            Err(e) => Err(e),
        }
    }

    // ---------- statements ----------

    fn block(&mut self, stmts: Vec<Stmt>) -> TResult<Vec<Stmt>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            out.extend(self.stmt(stmt)?);
        }
        Ok(out)
    }

    /// Body of a branch or loop inside a scope that has already been pushed.
    fn inner_body(&mut self, body: Stmt) -> TResult<Box<Stmt>> {
        let stmts = match body {
            Stmt::Block(stmts) => self.block(stmts)?,
            other => self.stmt(other)?,
        };
        Ok(Box::new(Stmt::Block(stmts)))
    }

    fn scoped_body(&mut self, kind: ScopeKind, body: Stmt) -> TResult<Box<Stmt>> {
        self.scopes.push_scope(kind);
        let body = self.inner_body(body);
        self.scopes.pop_scope();
        body
    }

    fn stmt(&mut self, stmt: Stmt) -> TResult<Vec<Stmt>> {
        Ok(match stmt {
            Stmt::Decl(decl) => self.declaration(decl)?,
            Stmt::Expr(e) => vec![Stmt::Expr(self.expr(e, Position::Value)?)],
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                let test = self.expr(test, Position::Value)?;
                let consequent = self.scoped_body(ScopeKind::If, *consequent)?;
                let alternate = match alternate {
                    Some(alt) => Some(self.scoped_body(ScopeKind::Else, *alt)?),
                    None => None,
                };
                vec![Stmt::If {
                    test,
                    consequent,
                    alternate,
                }]
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                self.scopes.push_scope(ScopeKind::For);
                let result = self.for_loop(init, test, update, *body);
                self.scopes.pop_scope();
                vec![result?]
            }
            Stmt::While { test, body } => {
                self.scopes.push_scope(ScopeKind::While);
                let result = self.while_loop(test, *body);
                self.scopes.pop_scope();
                vec![result?]
            }
            Stmt::Block(stmts) => vec![Stmt::Block(self.block(stmts)?)],
            Stmt::Return(arg) => vec![self.return_stmt(arg)?],
            Stmt::Function(f) => vec![Stmt::Function(Rc::new(self.nested_function(&f)?))],
            Stmt::Break | Stmt::Continue | Stmt::Empty => vec![stmt],
        })
    }

    fn for_loop(
        &mut self,
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Stmt,
    ) -> TResult<Stmt> {
        let destructured = match &init {
            Some(ForInit::Decl(decl)) => decl
                .declarators
                .iter()
                .find(|d| !matches!(d.target, Pattern::Ident(_)))
                .map(|d| d.span),
            _ => None,
        };
        if let Some(span) = destructured {
            let original = Stmt::For {
                init,
                test,
                update,
                body: Box::new(body),
            };
            return self.unsupported("destructuring in a loop header", span, original);
        }
        let init = match init {
            Some(ForInit::Decl(decl)) => {
                let mut declarators = Vec::with_capacity(decl.declarators.len());
                for dec in decl.declarators {
                    let init = match dec.init {
                        Some(e) => Some(self.expr(e, Position::Value)?),
                        None => None,
                    };
                    for id in dec.target.bound_names() {
                        trace!(name = %id.name, "loop variable");
                        self.scopes.add_loop_variable(&id.name);
                    }
                    declarators.push(Declarator {
                        target: dec.target,
                        init,
                        span: dec.span,
                    });
                }
                Some(ForInit::Decl(VarDecl {
                    kind: decl.kind,
                    declarators,
                }))
            }
            Some(ForInit::Expr(e)) => Some(ForInit::Expr(self.expr(e, Position::Value)?)),
            None => None,
        };
        let test = match test {
            Some(e) => Some(self.expr(e, Position::Value)?),
            None => None,
        };
        let update = match update {
            Some(e) => Some(self.expr(e, Position::Value)?),
            None => None,
        };
        let body = self.inner_body(body)?;
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn while_loop(&mut self, test: Expr, body: Stmt) -> TResult<Stmt> {
        let test = self.expr(test, Position::Value)?;
        let body = self.inner_body(body)?;
        Ok(Stmt::While { test, body })
    }

    fn declaration(&mut self, decl: VarDecl) -> TResult<Vec<Stmt>> {
        let mutability = match decl.kind {
            DeclKind::Const => Mutability::SingleAssignment,
            DeclKind::Let | DeclKind::Var => Mutability::Reassignable,
        };
        let mut out = Vec::with_capacity(decl.declarators.len());
        for dec in decl.declarators {
            if dec.init.as_ref().is_some_and(|e| e.is_context_read(&self.root)) {
                // Read straight off the context: kept as a plain local of this block.
                for id in dec.target.bound_names() {
                    self.scopes.add_context_bound_var(&id.name, false);
                }
                out.push(Stmt::Decl(VarDecl {
                    kind: decl.kind,
                    declarators: vec![dec],
                }));
                continue;
            }
            let name = match &dec.target {
                Pattern::Ident(id) => id.clone(),
                Pattern::Object(_) | Pattern::Array(_) => {
                    let kept = Stmt::Decl(VarDecl {
                        kind: decl.kind,
                        declarators: vec![dec.clone()],
                    });
                    out.push(self.unsupported(
                        "destructuring of a value not read from the context",
                        dec.span,
                        kept,
                    )?);
                    // Passed through untouched: its names are plain locals from here on.
                    for id in dec.target.bound_names() {
                        self.scopes.add_context_bound_var(&id.name, false);
                    }
                    continue;
                }
            };
            let init = match dec.init {
                Some(init) => self.declaration_init(&name, init)?,
                None => Expr::Undefined,
            };
            let binding = self.scopes.add_variable(&name.name, mutability);
            self.stats.slot_declarations += 1;
            let slot = self.slot(&binding);
            out.push(Stmt::Expr(Expr::assign(
                slot.clone(),
                self.context_call("init", vec![slot, init]),
            )));
        }
        Ok(out)
    }

    /// Destructured elements read element `i` of the temp tuple's *current* value, so each
    /// element gets its own slot history.
    fn declaration_init(&mut self, name: &Ident, init: Expr) -> TResult<Expr> {
        if self.scopes.is_array_pattern_element(&name.name) {
            if let Expr::Index { object, index } = &init {
                if let (Expr::Ident(temp), Expr::Number(_)) = (object.as_ref(), index.as_ref()) {
                    if self.scopes.is_temp_var(&temp.name) {
                        let binding = self.scopes.get_variable(&temp.name, temp.span)?;
                        let tuple = self.current(&binding);
                        return Ok(Expr::index(tuple, index.as_ref().clone()));
                    }
                }
            }
        }
        self.expr(init, Position::Value)
    }

    fn return_stmt(&mut self, arg: Option<Expr>) -> TResult<Stmt> {
        let Some(arg) = arg else {
            return Ok(Stmt::Return(None));
        };
        let value = self.expr(arg, Position::Value)?;
        if !self.scopes.in_function() {
            Ok(Stmt::Return(Some(value)))
        } else {
            Ok(Stmt::Return(Some(self.context_call("precision", vec![value]))))
        }
    }

    fn nested_function(&mut self, f: &Function) -> TResult<Function> {
        self.scopes.push_scope(ScopeKind::Function);
        for p in &f.params {
            self.scopes.add_context_bound_var(&p.name, false);
        }
        let body = match &f.body {
            FunctionBody::Block(stmts) => self.block(stmts.clone()).map(FunctionBody::Block),
            FunctionBody::Expr(e) => self
                .expr(e.as_ref().clone(), Position::Value)
                .map(|v| FunctionBody::Expr(Box::new(self.context_call("precision", vec![v])))),
        };
        self.scopes.pop_scope();
        Ok(Function {
            body: body?,
            ..f.clone()
        })
    }

    // ---------- expressions ----------

    pub fn expr(&mut self, expr: Expr, pos: Position) -> TResult<Expr> {
        Ok(match expr {
            Expr::Ident(id) => self.identifier(id, pos)?,
            Expr::Member { object, property } => {
                Expr::member(self.expr(*object, Position::Value)?, property)
            }
            Expr::Index { object, index } => self.index_access(*object, *index)?,
            Expr::Call { callee, args } => self.call(*callee, args)?,
            Expr::Unary { op, arg } => Expr::Unary {
                op,
                arg: Box::new(self.expr(*arg, Position::Value)?),
            },
            Expr::Update { op, prefix, target } => Expr::Update {
                op,
                prefix,
                target: Box::new(self.assign_target(*target)?),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.expr(*left, Position::Value)?),
                right: Box::new(self.expr(*right, Position::Value)?),
            },
            Expr::Logical { op, left, right } => Expr::Logical {
                op,
                left: Box::new(self.expr(*left, Position::Value)?),
                right: Box::new(self.expr(*right, Position::Value)?),
            },
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => Expr::Conditional {
                test: Box::new(self.expr(*test, Position::Value)?),
                consequent: Box::new(self.expr(*consequent, Position::Value)?),
                alternate: Box::new(self.expr(*alternate, Position::Value)?),
            },
            Expr::Assign { op, target, value } => {
                let target = self.assign_target(*target)?;
                let value = self.expr(*value, Position::Value)?;
                Expr::Assign {
                    op,
                    target: Box::new(target),
                    value: Box::new(value),
                }
            }
            Expr::Array(items) => Expr::Array(
                items
                    .into_iter()
                    .map(|e| self.expr(e, Position::Value))
                    .collect::<TResult<_>>()?,
            ),
            Expr::Object(props) => Expr::Object(
                props
                    .into_iter()
                    .map(|(k, v)| Ok((k, self.expr(v, Position::Value)?)))
                    .collect::<TResult<_>>()?,
            ),
            Expr::Function(f) => Expr::Function(Rc::new(self.nested_function(&f)?)),
            Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::This => expr,
        })
    }

    fn identifier(&mut self, id: Ident, pos: Position) -> TResult<Expr> {
        if RESERVED_VALUES.contains(&id.name.as_str()) {
            return Ok(Expr::Ident(id));
        }
        match self.resolve(&id)? {
            Resolution::Slot(binding) => {
                trace!(name = %id.name, scoped = %binding.scoped, ?pos, "rewrite identifier");
                Ok(match pos {
                    Position::IndexBase => self.slot(&binding),
                    Position::Value | Position::CallTarget | Position::AssignTarget => {
                        self.current(&binding)
                    }
                })
            }
            Resolution::Loop
            | Resolution::ContextBound
            | Resolution::Root
            | Resolution::Function => Ok(Expr::Ident(id)),
        }
    }

    fn assign_target(&mut self, target: Expr) -> TResult<Expr> {
        match target {
            Expr::Ident(id) => match self.resolve(&id)? {
                Resolution::Slot(_) | Resolution::Loop => {
                    self.identifier(id, Position::AssignTarget)
                }
                Resolution::ContextBound | Resolution::Root | Resolution::Function => {
                    let span = id.span;
                    let construct = format!("assignment to context-bound name `{}`", id.name);
                    self.unsupported(&construct, span, Expr::Ident(id))
                }
            },
            Expr::Member { object, property } => Ok(Expr::member(
                self.expr(*object, Position::Value)?,
                property,
            )),
            Expr::Index { object, index } => self.index_access(*object, *index),
            other => {
                let span = other.span().unwrap_or_default();
                self.unsupported("assignment target", span, other)
            }
        }
    }

    /// `x[k]`: a slot base keeps the subscript as its historical offset.
    fn index_access(&mut self, object: Expr, index: Expr) -> TResult<Expr> {
        let index = self.expr(index, Position::Value)?;
        let object = match object {
            Expr::Ident(id) => self.identifier(id, Position::IndexBase)?,
            other => self.expr(other, Position::Value)?,
        };
        Ok(Expr::index(object, index))
    }

    /// Namespace name when `callee` is `<namespace>.<fn>` on a context-supplied namespace.
    fn namespace_of(&self, callee: &Expr) -> Option<String> {
        let Expr::Member { object, .. } = callee else {
            return None;
        };
        match object.as_ref() {
            Expr::Ident(id) => match self.scopes.resolve(&id.name, id.span) {
                Ok(Resolution::ContextBound) => Some(id.name.clone()),
                Err(_) if self.options.is_analysis_namespace(&id.name) => Some(id.name.clone()),
                _ => None,
            },
            Expr::Member { object, property } => match object.as_ref() {
                Expr::Ident(id) if id.name == self.root => Some(property.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    fn call(&mut self, callee: Expr, args: Vec<Expr>) -> TResult<Expr> {
        if let Some(namespace) = self.namespace_of(&callee) {
            self.stats.namespace_calls += 1;
            let mut normalized = Vec::with_capacity(args.len() + 1);
            for arg in args {
                normalized.push(self.namespace_arg(arg)?);
            }
            if namespace == self.options.primary_namespace {
                normalized.push(Expr::Str(self.scopes.next_ta_call_id()));
            }
            return Ok(Expr::call(callee, normalized));
        }
        let callee = match callee {
            Expr::Ident(id) => self.identifier(id, Position::CallTarget)?,
            other => self.expr(other, Position::Value)?,
        };
        let args = args
            .into_iter()
            .map(|a| self.expr(a, Position::Value))
            .collect::<TResult<Vec<_>>>()?;
        Ok(Expr::call(callee, args))
    }

    /// Wrap one namespace-call argument as `root.param(series, offset, id)`.
    fn namespace_arg(&mut self, arg: Expr) -> TResult<Expr> {
        let (series, offset) = match arg {
            Expr::Function(f) => return Ok(Expr::Function(Rc::new(self.nested_function(&f)?))),
            Expr::Ident(id) => match self.resolve(&id)? {
                Resolution::Function => return Ok(Expr::Ident(id)),
                Resolution::Slot(binding) => (self.slot(&binding), Expr::Undefined),
                _ => (self.identifier(id, Position::Value)?, Expr::Undefined),
            },
            Expr::Index { object, index } => match *object {
                Expr::Ident(id) if !RESERVED_VALUES.contains(&id.name.as_str()) => {
                    let offset = self.expr(*index, Position::Value)?;
                    let base = self.identifier(id, Position::IndexBase)?;
                    (base, offset)
                }
                object => (self.index_access(object, *index)?, Expr::Undefined),
            },
            other => (self.expr(other, Position::Value)?, Expr::Undefined),
        };
        let id = self.scopes.next_param_id();
        Ok(self.context_call("param", vec![series, offset, Expr::Str(id)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::generate;
    use crate::parser::parse;
    use crate::preprocess::preprocess;

    fn compile_with(src: &str, options: &CompilerOptions) -> Result<String, CompileError> {
        let mut scopes = ScopeManager::new();
        let (program, _) = preprocess(parse(src)?, &mut scopes);
        let program = Transformer::new(&mut scopes, options).program(program)?;
        Ok(generate(&program))
    }

    fn compile(src: &str) -> String {
        compile_with(src, &CompilerOptions::default()).unwrap()
    }

    #[test]
    fn declarations_become_slot_inits() {
        let out = compile("(context) => { const a = 1; let b = a + 2; b = b * a }");
        assert!(out.contains("context.const.glb1_a = context.init(context.const.glb1_a, 1);"), "{out}");
        assert!(
            out.contains("context.let.glb1_b = context.init(context.let.glb1_b, context.const.glb1_a[0] + 2);"),
            "{out}"
        );
        assert!(out.contains("context.let.glb1_b[0] = context.let.glb1_b[0] * context.const.glb1_a[0];"), "{out}");
    }

    #[test]
    fn historical_reads_keep_their_offset() {
        let out = compile("(context) => { const a = 1; const n = 2; const p = a[1] + a[n] }");
        assert!(out.contains("context.const.glb1_a[1] + context.const.glb1_a[context.const.glb1_n[0]]"), "{out}");
    }

    #[test]
    fn sibling_branches_get_distinct_slots() {
        let out = compile("(context) => { if (1) { let x = 1 } else { let x = 2 } if (0) { let x = 3 } }");
        assert!(out.contains("context.let.if1_x"), "{out}");
        assert!(out.contains("context.let.els1_x"), "{out}");
        assert!(out.contains("context.let.if2_x"), "{out}");
    }

    #[test]
    fn context_bound_names_are_read_through() {
        let out = compile(
            "(context) => { const { close } = context.data; const c = context.data.open; let d = close + c }",
        );
        assert!(out.contains("const { close } = context.data;"), "{out}");
        assert!(out.contains("const c = context.data.open;"), "{out}");
        assert!(out.contains("context.init(context.let.glb1_d, close + c)"), "{out}");
    }

    #[test]
    fn namespace_arguments_are_normalised() {
        let out = compile(
            "(context) => { const { close } = context.data; const n = 3; const e = ta.ema(close, n); const m = math.abs(close[1] - e) }",
        );
        assert!(
            out.contains(
                "ta.ema(context.param(close, undefined, \"p0\"), context.param(context.const.glb1_n, undefined, \"p1\"), \"_ta0\")"
            ),
            "{out}"
        );
        assert!(
            out.contains("math.abs(context.param(close[1] - context.const.glb1_e[0], undefined, \"p2\"))"),
            "{out}"
        );
    }

    #[test]
    fn explicit_offsets_move_into_param() {
        let out = compile("(context) => { const { close } = context.data; const s = ta.sma(close[2], 5) }");
        assert!(out.contains("ta.sma(context.param(close, 2, \"p0\"), context.param(5, undefined, \"p1\"), \"_ta0\")"), "{out}");
    }

    #[test]
    fn identical_calls_get_distinct_call_ids() {
        let out = compile("(context) => { const a = ta.ema(1, 9); const b = ta.ema(1, 9) }");
        assert!(out.contains("\"_ta0\""), "{out}");
        assert!(out.contains("\"_ta1\""), "{out}");
    }

    #[test]
    fn loop_variables_stay_plain() {
        let out = compile("(context) => { let s = 0; for (let i = 0; i < 3; i++) { s += i } }");
        assert!(out.contains("for (let i = 0; i < 3; i++) {"), "{out}");
        assert!(out.contains("context.let.glb1_s[0] += i;"), "{out}");
        assert!(!out.contains("for1_i"), "{out}");
    }

    #[test]
    fn destructured_elements_read_the_tuple() {
        let out = compile("(context) => { const [a, b] = ta.macd(1, 12, 26, 9) }");
        assert!(out.contains("context.const.glb1__tmp0 = context.init(context.const.glb1__tmp0, ta.macd("), "{out}");
        assert!(
            out.contains("context.const.glb1_a = context.init(context.const.glb1_a, context.const.glb1__tmp0[0][0]);"),
            "{out}"
        );
        assert!(out.contains("context.const.glb1__tmp0[0][1]"), "{out}");
    }

    #[test]
    fn nested_functions_wrap_returns_in_precision() {
        let out = compile("(context) => { const f = (x) => x * 2; const y = f(3); return { y } }");
        assert!(out.contains("function f(x) {\n        return context.precision(x * 2);\n    }"), "{out}");
        assert!(out.contains("context.init(context.const.glb1_y, f(3))"), "{out}");
        assert!(out.contains("return { y: context.const.glb1_y[0] };"), "{out}");
    }

    #[test]
    fn function_locals_are_scoped() {
        let out = compile("(context) => { function g(a) { let t = a + 1; return t } return g(1) }");
        assert!(out.contains("context.let.fn1_t = context.init(context.let.fn1_t, a + 1);"), "{out}");
        assert!(out.contains("return context.precision(context.let.fn1_t[0]);"), "{out}");
    }

    #[test]
    fn undeclared_names_fail_with_position() {
        let err = compile_with("(context) => {\n  const a = missing + 1\n}", &CompilerOptions::default())
            .unwrap_err();
        assert_eq!(
            err,
            CompileError::UnresolvedVariable {
                name: "missing".into(),
                line: 2,
                column: 13
            }
        );
    }

    #[test]
    fn unsupported_policy_decides_between_error_and_pass_through() {
        let src = "(context) => { const o = { a: 1 }; const { a } = o }";
        let err = compile_with(src, &CompilerOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));

        let permissive = CompilerOptions::default().with_unsupported(UnsupportedPolicy::PassThrough);
        let out = compile_with(src, &permissive).unwrap();
        assert!(out.contains("const { a } = o;"), "{out}");
    }

    #[test]
    fn context_reads_are_scoped_to_their_block() {
        let src = "(context) => { const { close } = context.data; if (close > 100) { const o = context.data.open; } return { o } }";
        let err = compile_with(src, &CompilerOptions::default()).unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedVariable { ref name, .. } if name == "o"), "{err:?}");

        let inside = compile(
            "(context) => { const { close } = context.data; let x = 0; if (close > 1) { const o = context.data.open; x = o } }",
        );
        assert!(inside.contains("const o = context.data.open;"), "{inside}");
        assert!(inside.contains("context.let.glb1_x[0] = o;"), "{inside}");
    }

    #[test]
    fn destructuring_in_a_loop_header_follows_the_policy() {
        let src = "(context) => { for (let [a, b] = [1, 2]; a < 3; a++) { } }";
        let err = compile_with(src, &CompilerOptions::default()).unwrap_err();
        assert!(
            matches!(err, CompileError::UnsupportedConstruct { ref construct, .. } if construct.contains("loop header")),
            "{err:?}"
        );

        let permissive = CompilerOptions::default().with_unsupported(UnsupportedPolicy::PassThrough);
        let out = compile_with(src, &permissive).unwrap();
        assert!(out.contains("for (let [a, b] = [1, 2]; a < 3; a++) {"), "{out}");
    }

    #[test]
    fn assigning_a_context_name_is_unsupported() {
        let err = compile_with(
            "(context) => { const { close } = context.data; close = 1 }",
            &CompilerOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::UnsupportedConstruct { .. }));
    }
}
