//! Single forward pass run before scoping: context discovery, function hoisting and
//! array-destructuring expansion.

use std::collections::HashSet;
use std::rc::Rc;

use tracing::debug;

use crate::ast::*;
use crate::scope::ScopeManager;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessStats {
    pub context_bound: usize,
    pub hoisted: usize,
    pub expanded: usize,
}

pub fn preprocess(program: Program, scopes: &mut ScopeManager) -> (Program, PreprocessStats) {
    let root_param = program.root_param().to_string();
    scopes.add_context_bound_var(&root_param, true);
    let mut names = HashSet::new();
    function_names(&program.root, &mut names);
    scopes.reserve_names(names);
    let mut pass = PreProcessor {
        scopes,
        root: root_param,
        nesting: 0,
        stats: PreprocessStats::default(),
    };
    let root = pass.function(program.root.as_ref().clone());
    debug!(
        context_bound = pass.stats.context_bound,
        hoisted = pass.stats.hoisted,
        expanded = pass.stats.expanded,
        "pre-processing done"
    );
    let stats = pass.stats;
    (Program { root: Rc::new(root) }, stats)
}

struct PreProcessor<'a> {
    scopes: &'a mut ScopeManager,
    root: String,
    /// Branch, loop and nested-function bodies entered so far; 0 is the root body.
    nesting: usize,
    stats: PreprocessStats,
}

impl PreProcessor<'_> {
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        self.nesting += 1;
        let out = f(self);
        self.nesting -= 1;
        out
    }

    fn function(&mut self, f: Function) -> Function {
        let body = match f.body {
            FunctionBody::Block(stmts) => FunctionBody::Block(self.block(stmts)),
            FunctionBody::Expr(e) => FunctionBody::Expr(Box::new(self.expr(*e))),
        };
        Function { body, ..f }
    }

    fn block(&mut self, stmts: Vec<Stmt>) -> Vec<Stmt> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            self.stmt(stmt, &mut out);
        }
        out
    }

    fn boxed(&mut self, stmt: Stmt) -> Box<Stmt> {
        let mut out = Vec::new();
        self.stmt(stmt, &mut out);
        if out.len() == 1 {
            if let Some(single) = out.pop() {
                return Box::new(single);
            }
        }
        Box::new(Stmt::Block(out))
    }

    fn stmt(&mut self, stmt: Stmt, out: &mut Vec<Stmt>) {
        match stmt {
            Stmt::Decl(decl) => self.declaration(decl, out),
            Stmt::Expr(e) => out.push(Stmt::Expr(self.expr(e))),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                let test = self.expr(test);
                let consequent = self.nested(|p| p.boxed(*consequent));
                let alternate = alternate.map(|a| self.nested(|p| p.boxed(*a)));
                out.push(Stmt::If {
                    test,
                    consequent,
                    alternate,
                });
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let init = init.map(|init| match init {
                    ForInit::Decl(d) => ForInit::Decl(VarDecl {
                        kind: d.kind,
                        declarators: d
                            .declarators
                            .into_iter()
                            .map(|dec| Declarator {
                                init: dec.init.map(|e| self.expr(e)),
                                ..dec
                            })
                            .collect(),
                    }),
                    ForInit::Expr(e) => ForInit::Expr(self.expr(e)),
                });
                let test = test.map(|e| self.expr(e));
                let update = update.map(|e| self.expr(e));
                let body = self.nested(|p| p.boxed(*body));
                out.push(Stmt::For {
                    init,
                    test,
                    update,
                    body,
                });
            }
            Stmt::While { test, body } => {
                let test = self.expr(test);
                let body = self.nested(|p| p.boxed(*body));
                out.push(Stmt::While { test, body });
            }
            Stmt::Block(stmts) => out.push(Stmt::Block(self.block(stmts))),
            Stmt::Return(arg) => out.push(Stmt::Return(arg.map(|e| self.expr(e)))),
            Stmt::Function(f) => {
                if let Some(name) = &f.name {
                    self.scopes.add_function(&name.name);
                }
                let f = f.as_ref().clone();
                out.push(Stmt::Function(Rc::new(self.nested(|p| p.function(f)))));
            }
            Stmt::Break | Stmt::Continue | Stmt::Empty => out.push(stmt),
        }
    }

    fn declaration(&mut self, decl: VarDecl, out: &mut Vec<Stmt>) {
        let kind = decl.kind;
        let mut pending: Vec<Declarator> = Vec::new();
        let flush = |pending: &mut Vec<Declarator>, out: &mut Vec<Stmt>| {
            if !pending.is_empty() {
                out.push(Stmt::Decl(VarDecl {
                    kind,
                    declarators: std::mem::take(pending),
                }));
            }
        };

        for dec in decl.declarators {
            let Declarator { target, init, span } = dec;
            let Some(init) = init else {
                pending.push(Declarator { target, init: None, span });
                continue;
            };

            if init.is_context_read(&self.root) {
                // Reads inside a block are registered on that block's frame by the transformer.
                for id in target.bound_names() {
                    if self.nesting == 0 {
                        self.scopes.add_global_context_bound(&id.name);
                    }
                    self.stats.context_bound += 1;
                }
                pending.push(Declarator {
                    target,
                    init: Some(init),
                    span,
                });
                continue;
            }

            match (target, init) {
                (Pattern::Ident(name), Expr::Function(f)) => {
                    flush(&mut pending, out);
                    self.scopes.add_function(&name.name);
                    self.stats.hoisted += 1;
                    let f = f.as_ref().clone();
                    let body = match f.body {
                        FunctionBody::Block(stmts) => stmts,
                        FunctionBody::Expr(e) => vec![Stmt::Return(Some(*e))],
                    };
                    let hoisted = Function {
                        name: Some(name),
                        params: f.params,
                        body: FunctionBody::Block(body),
                        style: FunctionStyle::Classic,
                        span: f.span,
                    };
                    out.push(Stmt::Function(Rc::new(self.nested(|p| p.function(hoisted)))));
                }
                (Pattern::Array(items), init) => {
                    flush(&mut pending, out);
                    self.stats.expanded += 1;
                    let temp = self.scopes.generate_temp_var();
                    let init = self.expr(init);
                    out.push(Stmt::Decl(VarDecl {
                        kind,
                        declarators: vec![Declarator {
                            target: Pattern::Ident(Ident::new(temp.clone(), span)),
                            init: Some(init),
                            span,
                        }],
                    }));
                    for (index, item) in items.into_iter().enumerate() {
                        let Some(id) = item else { continue };
                        self.scopes.add_array_pattern_element(&id.name);
                        let element = Expr::index(
                            Expr::Ident(Ident::new(temp.clone(), id.span)),
                            Expr::Number(index as f64),
                        );
                        out.push(Stmt::Decl(VarDecl {
                            kind,
                            declarators: vec![Declarator {
                                span: id.span,
                                target: Pattern::Ident(id),
                                init: Some(element),
                            }],
                        }));
                    }
                }
                (target, init) => pending.push(Declarator {
                    target,
                    init: Some(self.expr(init)),
                    span,
                }),
            }
        }
        flush(&mut pending, out);
    }

    fn expr(&mut self, expr: Expr) -> Expr {
        match expr {
            Expr::Function(f) => {
                let f = f.as_ref().clone();
                Expr::Function(Rc::new(self.nested(|p| p.function(f))))
            }
            Expr::Member { object, property } => Expr::Member {
                object: Box::new(self.expr(*object)),
                property,
            },
            Expr::Index { object, index } => Expr::Index {
                object: Box::new(self.expr(*object)),
                index: Box::new(self.expr(*index)),
            },
            Expr::Call { callee, args } => Expr::Call {
                callee: Box::new(self.expr(*callee)),
                args: args.into_iter().map(|a| self.expr(a)).collect(),
            },
            Expr::Unary { op, arg } => Expr::Unary {
                op,
                arg: Box::new(self.expr(*arg)),
            },
            Expr::Update { op, prefix, target } => Expr::Update {
                op,
                prefix,
                target: Box::new(self.expr(*target)),
            },
            Expr::Binary { op, left, right } => Expr::Binary {
                op,
                left: Box::new(self.expr(*left)),
                right: Box::new(self.expr(*right)),
            },
            Expr::Logical { op, left, right } => Expr::Logical {
                op,
                left: Box::new(self.expr(*left)),
                right: Box::new(self.expr(*right)),
            },
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => Expr::Conditional {
                test: Box::new(self.expr(*test)),
                consequent: Box::new(self.expr(*consequent)),
                alternate: Box::new(self.expr(*alternate)),
            },
            Expr::Assign { op, target, value } => Expr::Assign {
                op,
                target: Box::new(self.expr(*target)),
                value: Box::new(self.expr(*value)),
            },
            Expr::Array(items) => Expr::Array(items.into_iter().map(|e| self.expr(e)).collect()),
            Expr::Object(props) => {
                Expr::Object(props.into_iter().map(|(k, v)| (k, self.expr(v))).collect())
            }
            Expr::Number(_)
            | Expr::Str(_)
            | Expr::Bool(_)
            | Expr::Null
            | Expr::Undefined
            | Expr::Ident(_)
            | Expr::This => expr,
        }
    }
}

/// Every identifier the script spells out: declarations, parameters and references.
fn function_names(f: &Function, out: &mut HashSet<String>) {
    if let Some(name) = &f.name {
        out.insert(name.name.clone());
    }
    out.extend(f.params.iter().map(|p| p.name.clone()));
    match &f.body {
        FunctionBody::Block(stmts) => stmts.iter().for_each(|s| stmt_names(s, out)),
        FunctionBody::Expr(e) => expr_names(e, out),
    }
}

fn decl_names(decl: &VarDecl, out: &mut HashSet<String>) {
    for dec in &decl.declarators {
        out.extend(dec.target.bound_names().into_iter().map(|id| id.name.clone()));
        if let Some(init) = &dec.init {
            expr_names(init, out);
        }
    }
}

fn stmt_names(stmt: &Stmt, out: &mut HashSet<String>) {
    match stmt {
        Stmt::Decl(decl) => decl_names(decl, out),
        Stmt::Expr(e) | Stmt::Return(Some(e)) => expr_names(e, out),
        Stmt::If {
            test,
            consequent,
            alternate,
        } => {
            expr_names(test, out);
            stmt_names(consequent, out);
            if let Some(alt) = alternate {
                stmt_names(alt, out);
            }
        }
        Stmt::For {
            init,
            test,
            update,
            body,
        } => {
            match init {
                Some(ForInit::Decl(decl)) => decl_names(decl, out),
                Some(ForInit::Expr(e)) => expr_names(e, out),
                None => {}
            }
            for e in test.iter().chain(update) {
                expr_names(e, out);
            }
            stmt_names(body, out);
        }
        Stmt::While { test, body } => {
            expr_names(test, out);
            stmt_names(body, out);
        }
        Stmt::Block(stmts) => stmts.iter().for_each(|s| stmt_names(s, out)),
        Stmt::Function(f) => function_names(f, out),
        Stmt::Return(None) | Stmt::Break | Stmt::Continue | Stmt::Empty => {}
    }
}

fn expr_names(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Ident(id) => {
            out.insert(id.name.clone());
        }
        Expr::Member { object: e, .. }
        | Expr::Unary { arg: e, .. }
        | Expr::Update { target: e, .. } => expr_names(e, out),
        Expr::Index { object: a, index: b }
        | Expr::Binary { left: a, right: b, .. }
        | Expr::Logical { left: a, right: b, .. }
        | Expr::Assign {
            target: a,
            value: b,
            ..
        } => {
            expr_names(a, out);
            expr_names(b, out);
        }
        Expr::Call { callee, args } => {
            expr_names(callee, out);
            args.iter().for_each(|a| expr_names(a, out));
        }
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            expr_names(test, out);
            expr_names(consequent, out);
            expr_names(alternate, out);
        }
        Expr::Array(items) => items.iter().for_each(|e| expr_names(e, out)),
        Expr::Object(props) => props.iter().for_each(|(_, v)| expr_names(v, out)),
        Expr::Function(f) => function_names(f, out),
        Expr::Number(_)
        | Expr::Str(_)
        | Expr::Bool(_)
        | Expr::Null
        | Expr::Undefined
        | Expr::This => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn run(src: &str) -> (Vec<Stmt>, ScopeManager, PreprocessStats) {
        let mut scopes = ScopeManager::new();
        let (program, stats) = preprocess(parse(src).unwrap(), &mut scopes);
        let FunctionBody::Block(stmts) = &program.root.body else {
            panic!("block body expected");
        };
        (stmts.clone(), scopes, stats)
    }

    #[test]
    fn discovers_context_bound_names() {
        let (_, scopes, stats) = run(
            "(context) => { const { math, array } = context; const { close, open: o } = context.data; const ta = context.ta; const h = context.data.high }",
        );
        assert!(scopes.is_context_bound("close"));
        assert!(scopes.is_context_bound("o"));
        assert!(!scopes.is_context_bound("open"));
        assert!(scopes.is_context_bound("ta"));
        assert!(scopes.is_context_bound("h"));
        assert!(scopes.is_context_bound("math"));
        assert!(scopes.is_context_bound("array"));
        assert!(scopes.is_root_param("context"));
        assert_eq!(stats.context_bound, 6);
    }

    #[test]
    fn hoists_function_expressions() {
        let (stmts, scopes, stats) = run("(c) => { const double = (x) => x * 2; let y = double(1) }");
        assert_eq!(stats.hoisted, 1);
        assert!(scopes.is_function("double"));
        let Stmt::Function(f) = &stmts[0] else {
            panic!("expected function declaration, got {:?}", stmts[0]);
        };
        assert_eq!(f.name.as_ref().map(|n| n.name.as_str()), Some("double"));
        assert!(matches!(&f.body, FunctionBody::Block(b) if matches!(b[0], Stmt::Return(Some(_)))));
    }

    #[test]
    fn expands_array_destructuring() {
        let (stmts, scopes, stats) = run("(c) => { const [m, , h] = ta.macd(1, 12, 26, 9) }");
        assert_eq!(stats.expanded, 1);
        assert_eq!(stmts.len(), 3);
        assert!(scopes.is_array_pattern_element("m"));
        assert!(scopes.is_array_pattern_element("h"));
        let Stmt::Decl(d) = &stmts[2] else { panic!() };
        let Some(Expr::Index { object, index }) = &d.declarators[0].init else {
            panic!("expected temp index");
        };
        assert!(matches!(object.as_ref(), Expr::Ident(id) if id.name == "_tmp0"));
        assert_eq!(**index, Expr::Number(2.0));
    }

    #[test]
    fn temporaries_avoid_script_names() {
        let (stmts, scopes, _) = run("(c) => { const _tmp0 = 1; const [a] = f(_tmp1) }");
        let Stmt::Decl(d) = &stmts[1] else { panic!() };
        assert!(matches!(&d.declarators[0].target, Pattern::Ident(id) if id.name == "_tmp2"));
        assert!(scopes.is_temp_var("_tmp2"));
        assert!(!scopes.is_temp_var("_tmp0"));
    }

    #[test]
    fn block_level_context_reads_stay_out_of_the_global_set() {
        let (_, scopes, stats) = run(
            "(context) => { if (1) { const o = context.data.open } function g() { const { close } = context.data } }",
        );
        assert_eq!(stats.context_bound, 2);
        assert!(!scopes.is_context_bound("o"));
        assert!(!scopes.is_context_bound("close"));
    }

    #[test]
    fn keeps_declarator_order_when_splitting() {
        let (stmts, _, _) = run("(c) => { let a = 1, f = () => 2, b = 3 }");
        assert_eq!(stmts.len(), 3);
        assert!(matches!(&stmts[0], Stmt::Decl(d) if d.declarators.len() == 1));
        assert!(matches!(&stmts[1], Stmt::Function(_)));
        assert!(matches!(&stmts[2], Stmt::Decl(_)));
    }
}
