//! Tree-walking evaluator for generated programs.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::ast::*;
use crate::error::RuntimeError;
use crate::scope::Mutability;

use super::context::Context;
use super::namespaces::{self, MAX_LENGTH};
use super::value::{Closure, ContextFn, Namespace, Value};

pub type Env = Rc<RefCell<Frame>>;

/// One lexical environment.
#[derive(Default)]
pub struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<Env>,
}

fn child(parent: &Env) -> Env {
    Rc::new(RefCell::new(Frame {
        vars: HashMap::new(),
        parent: Some(Rc::clone(parent)),
    }))
}

fn define(env: &Env, name: &str, value: Value) {
    env.borrow_mut().vars.insert(name.to_string(), value);
}

fn lookup(env: &Env, name: &str) -> Option<Value> {
    let frame = env.borrow();
    match frame.vars.get(name) {
        Some(v) => Some(v.clone()),
        None => frame.parent.as_ref().and_then(|p| lookup(p, name)),
    }
}

fn reassign(env: &Env, name: &str, value: Value) -> bool {
    let mut frame = env.borrow_mut();
    if let Some(slot) = frame.vars.get_mut(name) {
        *slot = value;
        return true;
    }
    match frame.parent.clone() {
        Some(parent) => {
            drop(frame);
            reassign(&parent, name, value)
        }
        None => false,
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

type RResult<T> = Result<T, RuntimeError>;

pub struct Interpreter<'a> {
    ctx: &'a mut Context,
    receiver: &'a Value,
    /// Script function calls currently on the stack, the root excluded.
    depth: usize,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a mut Context, receiver: &'a Value) -> Self {
        Self {
            ctx,
            receiver,
            depth: 0,
        }
    }

    /// Run the root function once against the context.
    pub fn run(&mut self, program: &Program) -> RResult<Value> {
        let globals: Env = Rc::new(RefCell::new(Frame::default()));
        self.call_function(&program.root, &globals, vec![Value::Context])
    }

    fn call_function(&mut self, f: &Function, env: &Env, args: Vec<Value>) -> RResult<Value> {
        let scope = child(env);
        let mut args = args.into_iter();
        for p in &f.params {
            define(&scope, &p.name, args.next().unwrap_or(Value::Na));
        }
        match &f.body {
            FunctionBody::Expr(e) => self.eval(e, &scope),
            FunctionBody::Block(stmts) => match self.block(stmts, &scope)? {
                Flow::Normal => Ok(Value::Na),
                Flow::Return(v) => Ok(v),
                Flow::Break => Err(RuntimeError::StrayJump("break")),
                Flow::Continue => Err(RuntimeError::StrayJump("continue")),
            },
        }
    }

    // ---------- statements ----------

    fn block(&mut self, stmts: &[Stmt], env: &Env) -> RResult<Flow> {
        for stmt in stmts {
            if let Stmt::Function(f) = stmt {
                if let Some(name) = &f.name {
                    let closure = Closure {
                        function: Rc::clone(f),
                        env: Rc::clone(env),
                    };
                    define(env, &name.name, Value::Function(Rc::new(closure)));
                }
            }
        }
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt, env: &Env) -> RResult<Flow> {
        match stmt {
            Stmt::Decl(decl) => {
                self.declare(decl, env)?;
                Ok(Flow::Normal)
            }
            Stmt::Expr(e) => {
                self.eval(e, env)?;
                Ok(Flow::Normal)
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.exec(consequent, env)
                } else if let Some(alt) = alternate {
                    self.exec(alt, env)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let scope = child(env);
                match init {
                    Some(ForInit::Decl(d)) => self.declare(d, &scope)?,
                    Some(ForInit::Expr(e)) => {
                        self.eval(e, &scope)?;
                    }
                    None => {}
                }
                let limit = self.ctx.config().max_loop_iterations;
                let mut iterations = 0u64;
                loop {
                    if let Some(test) = test {
                        if !self.eval(test, &scope)?.truthy() {
                            break;
                        }
                    }
                    iterations += 1;
                    if iterations > limit {
                        return Err(RuntimeError::LoopLimit(limit));
                    }
                    match self.exec(body, &scope)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(update) = update {
                        self.eval(update, &scope)?;
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::While { test, body } => {
                let limit = self.ctx.config().max_loop_iterations;
                let mut iterations = 0u64;
                while self.eval(test, env)?.truthy() {
                    iterations += 1;
                    if iterations > limit {
                        return Err(RuntimeError::LoopLimit(limit));
                    }
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Block(stmts) => self.block(stmts, &child(env)),
            Stmt::Return(arg) => {
                let value = match arg {
                    Some(e) => self.eval(e, env)?,
                    None => Value::Na,
                };
                Ok(Flow::Return(value))
            }
            Stmt::Break => Ok(Flow::Break),
            Stmt::Continue => Ok(Flow::Continue),
            // hoisted by `block`
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
        }
    }

    fn declare(&mut self, decl: &VarDecl, env: &Env) -> RResult<()> {
        for d in &decl.declarators {
            let value = match &d.init {
                Some(e) => self.eval(e, env)?,
                None => Value::Na,
            };
            match &d.target {
                Pattern::Ident(id) => define(env, &id.name, value),
                Pattern::Object(props) => {
                    for (key, id) in props {
                        let v = self.member(&value, key)?;
                        define(env, &id.name, v);
                    }
                }
                Pattern::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Some(id) = item {
                            let v = self.element(&value, &Value::Number(i as f64));
                            define(env, &id.name, v);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ---------- expressions ----------

    fn eval(&mut self, expr: &Expr, env: &Env) -> RResult<Value> {
        Ok(match expr {
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::str(s),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Null | Expr::Undefined => Value::Na,
            Expr::Ident(id) => self.identifier(&id.name, env)?,
            Expr::This => self.receiver.clone(),
            Expr::Member { object, property } => {
                let object = self.eval(object, env)?;
                self.member(&object, property)?
            }
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                self.element(&object, &index)
            }
            Expr::Call { callee, args } => self.call(callee, args, env)?,
            Expr::Unary { op, arg } => {
                let v = self.eval(arg, env)?;
                match op {
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Neg => Value::Number(-v.as_number()),
                    UnaryOp::Plus => Value::Number(v.as_number()),
                }
            }
            Expr::Update { op, prefix, target } => {
                let old = self.eval(target, env)?.as_number();
                let new = match op {
                    UpdateOp::Increment => old + 1.0,
                    UpdateOp::Decrement => old - 1.0,
                };
                self.assign(target, Value::Number(new), env)?;
                Value::Number(if *prefix { new } else { old })
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, env)?;
                let r = self.eval(right, env)?;
                binary(*op, &l, &r)
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left, env)?;
                let short = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !matches!(l.current(), Value::Na),
                };
                if short {
                    l
                } else {
                    self.eval(right, env)?
                }
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, env)?.truthy() {
                    self.eval(consequent, env)?
                } else {
                    self.eval(alternate, env)?
                }
            }
            Expr::Assign { op, target, value } => {
                let rhs = self.eval(value, env)?;
                let value = match op.binary() {
                    Some(bop) => {
                        let current = self.eval(target, env)?;
                        binary(bop, &current, &rhs)
                    }
                    None => rhs,
                };
                self.assign(target, value.clone(), env)?;
                value
            }
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?.current());
                }
                Value::array(values)
            }
            Expr::Object(props) => {
                let mut fields = BTreeMap::new();
                for (key, value) in props {
                    fields.insert(key.clone(), self.eval(value, env)?.current());
                }
                Value::object(fields)
            }
            Expr::Function(f) => Value::Function(Rc::new(Closure {
                function: Rc::clone(f),
                env: Rc::clone(env),
            })),
        })
    }

    fn identifier(&self, name: &str, env: &Env) -> RResult<Value> {
        if let Some(v) = lookup(env, name) {
            return Ok(v);
        }
        match name {
            "NaN" => Ok(Value::Number(f64::NAN)),
            "Infinity" => Ok(Value::Number(f64::INFINITY)),
            "undefined" => Ok(Value::Na),
            "na" => Ok(Value::Na),
            other => Namespace::from_name(other)
                .filter(|ns| *ns != Namespace::Data)
                .map(Value::Namespace)
                .ok_or_else(|| RuntimeError::UnknownIdentifier(other.to_string())),
        }
    }

    fn member(&self, object: &Value, property: &str) -> RResult<Value> {
        Ok(match object {
            Value::Context => match property {
                "let" | "const" => Mutability::from_bucket(property).map_or(Value::Na, Value::Bucket),
                "init" => Value::ContextFn(ContextFn::Init),
                "param" => Value::ContextFn(ContextFn::Param),
                "precision" => Value::ContextFn(ContextFn::Precision),
                "idx" => Value::Number(self.ctx.bar_index() as f64),
                other => Namespace::from_name(other).map_or(Value::Na, Value::Namespace),
            },
            Value::Namespace(Namespace::Data) => self
                .ctx
                .data_series(property)
                .map_or(Value::Na, Value::Series),
            Value::Namespace(ns) => Value::Native {
                namespace: *ns,
                name: Rc::from(property),
            },
            Value::Bucket(m) => self.ctx.slot(*m, property).map_or(Value::Na, Value::Series),
            Value::Object(fields) => fields.borrow().get(property).cloned().unwrap_or(Value::Na),
            Value::Array(items) if property == "length" => Value::Number(items.borrow().len() as f64),
            Value::Str(s) if property == "length" => Value::Number(s.chars().count() as f64),
            Value::Series(s) => return self.member(&s.current(), property),
            _ => Value::Na,
        })
    }

    fn element(&self, object: &Value, index: &Value) -> Value {
        let position = || {
            let n = index.as_number();
            (n.is_finite() && n >= 0.0).then_some(n as usize)
        };
        match object {
            Value::Series(s) => position().map_or(Value::Na, |i| s.get(i)),
            Value::Array(items) => position()
                .and_then(|i| items.borrow().get(i).cloned())
                .unwrap_or(Value::Na),
            Value::Object(fields) => {
                let key = index.current().display();
                fields.borrow().get(&key).cloned().unwrap_or(Value::Na)
            }
            Value::Str(s) => position()
                .and_then(|i| s.chars().nth(i))
                .map_or(Value::Na, |c| Value::str(&c.to_string())),
            _ => Value::Na,
        }
    }

    fn assign(&mut self, target: &Expr, value: Value, env: &Env) -> RResult<()> {
        match target {
            Expr::Ident(id) => {
                if reassign(env, &id.name, value) {
                    Ok(())
                } else {
                    Err(RuntimeError::UnknownIdentifier(id.name.clone()))
                }
            }
            Expr::Member { object, property } => match self.eval(object, env)? {
                Value::Bucket(m) => {
                    self.ctx.store_slot(m, property, value);
                    Ok(())
                }
                Value::Object(fields) => {
                    fields.borrow_mut().insert(property.clone(), value.current());
                    Ok(())
                }
                other => Err(RuntimeError::InvalidTarget(format!(
                    "cannot set `{property}` on {}",
                    other.type_name()
                ))),
            },
            Expr::Index { object, index } => {
                let object = self.eval(object, env)?;
                let index = self.eval(index, env)?;
                let n = index.as_number();
                let position = (n.is_finite() && n >= 0.0).then_some(n as usize);
                match (object, position) {
                    (Value::Series(s), Some(i)) => {
                        let mut buf = s.buf.borrow_mut();
                        let bars_ago = s.offset.saturating_add(i);
                        if !buf.set(bars_ago, value.current()) && bars_ago == 0 {
                            buf.set_current(value.current());
                        }
                        Ok(())
                    }
                    (Value::Array(items), Some(i)) => {
                        if i >= MAX_LENGTH {
                            return Err(RuntimeError::InvalidTarget(format!(
                                "array index {n} exceeds the limit of {MAX_LENGTH} elements"
                            )));
                        }
                        let mut items = items.borrow_mut();
                        if i >= items.len() {
                            items.resize(i + 1, Value::Na);
                        }
                        items[i] = value.current();
                        Ok(())
                    }
                    (Value::Object(fields), _) => {
                        fields
                            .borrow_mut()
                            .insert(index.current().display(), value.current());
                        Ok(())
                    }
                    (other, _) => Err(RuntimeError::InvalidTarget(format!(
                        "cannot index-assign into {}",
                        other.type_name()
                    ))),
                }
            }
            other => Err(RuntimeError::InvalidTarget(format!("{other:?}"))),
        }
    }

    fn call(&mut self, callee: &Expr, args: &[Expr], env: &Env) -> RResult<Value> {
        let function = self.eval(callee, env)?;
        let mut values = Vec::with_capacity(args.len());
        for a in args {
            values.push(self.eval(a, env)?);
        }
        match function {
            Value::Function(closure) => {
                let limit = self.ctx.config().max_call_depth;
                if self.depth >= limit {
                    return Err(RuntimeError::CallDepth(limit));
                }
                self.depth += 1;
                let f = Rc::clone(&closure.function);
                let result = self.call_function(&f, &closure.env, values);
                self.depth -= 1;
                result
            }
            Value::Native { namespace, name } => namespaces::call(self.ctx, namespace, &name, &values),
            Value::ContextFn(ContextFn::Init) => {
                let mut values = values.into_iter();
                let slot = values.next().unwrap_or(Value::Na);
                let value = values.next().unwrap_or(Value::Na);
                let offset = values.next().unwrap_or(Value::Na);
                Ok(self.ctx.init(slot, value, offset))
            }
            Value::ContextFn(ContextFn::Param) => {
                let mut values = values.into_iter();
                let value = values.next().unwrap_or(Value::Na);
                let offset = values.next().unwrap_or(Value::Na);
                let id = values
                    .next()
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| RuntimeError::InvalidArgument {
                        function: "param".to_string(),
                        message: "missing argument id".to_string(),
                    })?;
                Ok(self.ctx.param(value, offset, &id))
            }
            Value::ContextFn(ContextFn::Precision) => {
                Ok(self.ctx.precision(values.first().unwrap_or(&Value::Na)))
            }
            other => Err(RuntimeError::NotCallable(format!("{other:?}"))),
        }
    }
}

/// Host-language binary operators over script values.
fn binary(op: BinaryOp, l: &Value, r: &Value) -> Value {
    let (l, r) = (l.current(), r.current());
    match op {
        BinaryOp::Add => match (&l, &r) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Value::str(&format!("{}{}", l.display(), r.display()))
            }
            _ => Value::Number(l.as_number() + r.as_number()),
        },
        BinaryOp::Sub => Value::Number(l.as_number() - r.as_number()),
        BinaryOp::Mul => Value::Number(l.as_number() * r.as_number()),
        BinaryOp::Div => Value::Number(l.as_number() / r.as_number()),
        BinaryOp::Rem => Value::Number(l.as_number() % r.as_number()),
        BinaryOp::Pow => Value::Number(l.as_number().powf(r.as_number())),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => l.as_number().partial_cmp(&r.as_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::Eq | BinaryOp::StrictEq => Value::Bool(loose_eq(&l, &r)),
        BinaryOp::NotEq | BinaryOp::StrictNotEq => Value::Bool(!loose_eq(&l, &r)),
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Na, Value::Na) => true,
        (Value::Na, _) | (_, Value::Na) => false,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        _ => l.as_number() == r.as_number(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextConfig;
    use crate::parser::parse;
    use ts_core::{Candle, TimeFrame};

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            ts,
            timeframe: TimeFrame::Days(1),
            open: close,
            high: close,
            low: close,
            close,
            volume: 0.0,
        }
    }

    fn run_once(src: &str) -> RResult<serde_json::Value> {
        let program = parse(src).map_err(|e| RuntimeError::UnknownIdentifier(e.to_string()))?;
        let mut ctx = Context::default();
        ctx.begin_step(&candle(0, 10.0));
        let out = Interpreter::new(&mut ctx, &Value::Na).run(&program)?;
        Ok(out.materialize().to_json())
    }

    #[test]
    fn evaluates_plain_host_code() {
        let out = run_once(
            "(c) => { let s = 0; for (let i = 0; i < 5; i++) { if (i % 2 == 0) { continue } s += i } return { s, t: 'a' + 1, n: null ?? 3 } }",
        )
        .unwrap();
        assert_eq!(out, serde_json::json!({ "s": 4.0, "t": "a1", "n": 3.0 }));
    }

    #[test]
    fn closures_capture_their_environment() {
        let out = run_once(
            "(c) => { const k = 3; function add(x) { return x + k } const f = (y) => add(y) * 2; return f(1) }",
        )
        .unwrap();
        assert_eq!(out, serde_json::json!(8.0));
    }

    #[test]
    fn reads_context_data_and_index() {
        let out = run_once("(c) => { const { close } = c.data; return [close + 1, c.idx, close[1]] }").unwrap();
        assert_eq!(out, serde_json::json!([11.0, 0.0, null]));
    }

    #[test]
    fn runaway_loops_are_stopped() {
        let program = parse("(c) => { while (true) { } }").unwrap();
        let mut ctx = Context::new(crate::config::ContextConfig::default().with_max_loop_iterations(10));
        ctx.begin_step(&candle(0, 1.0));
        let err = Interpreter::new(&mut ctx, &Value::Na).run(&program).unwrap_err();
        assert_eq!(err, RuntimeError::LoopLimit(10));
    }

    #[test]
    fn runaway_recursion_is_stopped() {
        // debug-build frames are large; give the default limit the stack a main thread has
        let err = std::thread::Builder::new()
            .stack_size(16 << 20)
            .spawn(|| run_once("(c) => { function f(n) { return f(n + 1) } return f(0) }"))
            .unwrap()
            .join()
            .unwrap()
            .unwrap_err();
        assert_eq!(err, RuntimeError::CallDepth(ContextConfig::default().max_call_depth));

        let program = parse("(c) => { function down(n) { return n > 0 ? down(n - 1) : 7 } return down(3) }").unwrap();
        let mut ctx = Context::new(ContextConfig::default().with_max_call_depth(4));
        ctx.begin_step(&candle(0, 1.0));
        assert_eq!(Interpreter::new(&mut ctx, &Value::Na).run(&program).unwrap().as_number(), 7.0);

        let mut shallow = Context::new(ContextConfig::default().with_max_call_depth(3));
        shallow.begin_step(&candle(0, 1.0));
        let err = Interpreter::new(&mut shallow, &Value::Na).run(&program).unwrap_err();
        assert_eq!(err, RuntimeError::CallDepth(3));
    }

    #[test]
    fn huge_indices_fail_instead_of_panicking() {
        let err = run_once("(c) => { function f(a) { a[1e300] = 2 } f([1]) }").unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidTarget(_)), "{err:?}");
        let out = run_once(
            "(c) => { const a = [1]; a[3] = 2; const { close } = c.data; return [a.length, close[1e300], close[Infinity]] }",
        )
        .unwrap();
        assert_eq!(out, serde_json::json!([4.0, null, null]));
    }

    #[test]
    fn receiver_is_visible_as_this() {
        let program = parse("(c) => this.length * 2").unwrap();
        let receiver = Value::from_json(&serde_json::json!({ "length": 7 }));
        let mut ctx = Context::default();
        ctx.begin_step(&candle(0, 1.0));
        let out = Interpreter::new(&mut ctx, &receiver).run(&program).unwrap();
        assert_eq!(out.as_number(), 14.0);
    }

    #[test]
    fn unknown_names_fail_at_runtime() {
        let err = run_once("(c) => { return nope + 1 }").unwrap_err();
        assert_eq!(err, RuntimeError::UnknownIdentifier("nope".into()));
    }
}
