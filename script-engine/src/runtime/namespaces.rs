//! Namespace library reached through `ta.*`, `math.*`, `array.*` and `core.*`.
//!
//! Stateful `ta` functions key their kernels by the trailing call-site id the compiler
//! appends; window functions read the argument series' history directly.

use std::cell::RefCell;
use std::rc::Rc;

use ta_engine::{stats, Cumulative, Ema, Kernel, KernelError, Macd, Rma, Rsi};

use crate::error::RuntimeError;

use super::context::Context;
use super::value::{Namespace, Value};

/// Tolerance used by `math.__eq`.
pub const EQ_TOLERANCE: f64 = 1e-8;

/// Largest array, window or lookback a script may ask for.
pub const MAX_LENGTH: usize = 1 << 20;

/// State behind one stateful `ta` call site.
#[derive(Debug, Clone)]
pub enum TaKernel {
    Ema(Ema),
    Rma(Rma),
    Rsi(Rsi),
    Macd(Macd),
    Cum(Cumulative),
}

impl TaKernel {
    fn next(&mut self, value: f64) -> Value {
        match self {
            TaKernel::Ema(k) => Value::Number(k.next(value)),
            TaKernel::Rma(k) => Value::Number(k.next(value)),
            TaKernel::Rsi(k) => Value::Number(k.next(value)),
            TaKernel::Cum(k) => Value::Number(k.next(value)),
            TaKernel::Macd(k) => {
                let p = k.next(value);
                Value::array(vec![
                    Value::Number(p.macd),
                    Value::Number(p.signal),
                    Value::Number(p.histogram),
                ])
            }
        }
    }
}

type NsResult = Result<Value, RuntimeError>;

pub fn call(ctx: &mut Context, namespace: Namespace, name: &str, args: &[Value]) -> NsResult {
    match namespace {
        Namespace::Ta => ta(ctx, name, args),
        Namespace::Math => math(name, args),
        Namespace::Array => array(name, args),
        Namespace::Core => core(name, args),
        Namespace::Data => Err(unknown(namespace, name)),
    }
}

fn unknown(namespace: Namespace, name: &str) -> RuntimeError {
    RuntimeError::UnknownFunction {
        namespace: namespace.name().to_string(),
        name: name.to_string(),
    }
}

fn invalid(function: &str, message: impl Into<String>) -> RuntimeError {
    RuntimeError::InvalidArgument {
        function: function.to_string(),
        message: message.into(),
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or(Value::Na)
}

fn num(args: &[Value], i: usize) -> f64 {
    args.get(i).map_or(f64::NAN, Value::as_number)
}

fn length(function: &str, args: &[Value], i: usize, default: Option<usize>) -> Result<usize, RuntimeError> {
    let n = num(args, i);
    if n.is_nan() {
        if let Some(d) = default {
            return Ok(d);
        }
    }
    if !n.is_finite() || n < 0.0 {
        return Err(invalid(function, format!("length must be a non-negative number, got {n}")));
    }
    if n > MAX_LENGTH as f64 {
        return Err(invalid(function, format!("length {n} exceeds the limit of {MAX_LENGTH}")));
    }
    Ok(n as usize)
}

/// Newest-first window of `len` values from a series argument; a plain scalar only fills a
/// window of one.
fn window(args: &[Value], i: usize, len: usize) -> Option<Vec<f64>> {
    match args.get(i)? {
        Value::Series(s) => s.window(len),
        other if len == 1 => Some(vec![other.as_number()]),
        _ => None,
    }
}

fn over_window(args: &[Value], i: usize, len: usize, f: impl FnOnce(&[f64]) -> f64) -> Value {
    Value::Number(window(args, i, len).map_or(f64::NAN, |w| f(&w)))
}

// ---------- ta ----------

/// Splits the compiler-appended call-site id off the argument list.
fn split_call_id(args: &[Value]) -> (&[Value], Option<Rc<str>>) {
    match args.split_last() {
        Some((Value::Str(id), rest)) => (rest, Some(Rc::clone(id))),
        _ => (args, None),
    }
}

fn stateful(
    ctx: &mut Context,
    function: &str,
    call_id: Option<Rc<str>>,
    input: f64,
    init: impl FnOnce() -> Result<TaKernel, KernelError>,
) -> NsResult {
    let id = call_id.ok_or_else(|| invalid(function, "missing call-site id"))?;
    let step = ctx.steps();
    Ok(ctx
        .ta_states()
        .update(&id, step, init, |kernel| kernel.next(input))?)
}

fn ta(ctx: &mut Context, name: &str, args: &[Value]) -> NsResult {
    let (args, call_id) = split_call_id(args);
    let f = format!("ta.{name}");
    match name {
        "ema" => {
            let len = length(&f, args, 1, None)?;
            stateful(ctx, &f, call_id, num(args, 0), || Ok(TaKernel::Ema(Ema::new(len)?)))
        }
        "rma" => {
            let len = length(&f, args, 1, None)?;
            stateful(ctx, &f, call_id, num(args, 0), || Ok(TaKernel::Rma(Rma::new(len)?)))
        }
        "rsi" => {
            let len = length(&f, args, 1, None)?;
            stateful(ctx, &f, call_id, num(args, 0), || Ok(TaKernel::Rsi(Rsi::new(len)?)))
        }
        "macd" => {
            let fast = length(&f, args, 1, Some(12))?;
            let slow = length(&f, args, 2, Some(26))?;
            let signal = length(&f, args, 3, Some(9))?;
            stateful(ctx, &f, call_id, num(args, 0), || {
                Ok(TaKernel::Macd(Macd::new(fast, slow, signal)?))
            })
        }
        "cum" => stateful(ctx, &f, call_id, num(args, 0), || {
            Ok(TaKernel::Cum(Cumulative::default()))
        }),
        "sma" => {
            let len = length(&f, args, 1, None)?;
            Ok(over_window(args, 0, len, stats::mean))
        }
        "wma" => {
            let len = length(&f, args, 1, None)?;
            Ok(over_window(args, 0, len, stats::wma))
        }
        "highest" => {
            let len = length(&f, args, 1, None)?;
            Ok(over_window(args, 0, len, stats::highest))
        }
        "lowest" => {
            let len = length(&f, args, 1, None)?;
            Ok(over_window(args, 0, len, stats::lowest))
        }
        "stdev" => {
            let len = length(&f, args, 1, None)?;
            Ok(over_window(args, 0, len, |w| stats::stdev(w, true)))
        }
        "change" => {
            let len = length(&f, args, 1, Some(1))?;
            Ok(match window(args, 0, len + 1) {
                Some(w) => Value::Number(w[0] - w[len]),
                None => Value::Number(f64::NAN),
            })
        }
        "crossover" | "crossunder" => {
            let (Some(a), Some(b)) = (window(args, 0, 2), window(args, 1, 2)) else {
                return Ok(Value::Bool(false));
            };
            let crossed = if name == "crossover" {
                a[0] > b[0] && a[1] <= b[1]
            } else {
                a[0] < b[0] && a[1] >= b[1]
            };
            Ok(Value::Bool(crossed))
        }
        _ => Err(unknown(Namespace::Ta, name)),
    }
}

// ---------- math ----------

/// NaN and `na` never compare equal, not even to themselves.
pub fn tolerant_eq(a: &Value, b: &Value) -> bool {
    match (a.current(), b.current()) {
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(&x, &y),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(&x, &y),
        (x, y) => {
            let (x, y) = (x.as_number(), y.as_number());
            !x.is_nan() && !y.is_nan() && (x == y || (x - y).abs() < EQ_TOLERANCE)
        }
    }
}

fn unary(args: &[Value], f: impl FnOnce(f64) -> f64) -> NsResult {
    Ok(Value::Number(f(num(args, 0))))
}

fn numbers(args: &[Value]) -> Vec<f64> {
    args.iter().map(Value::as_number).collect()
}

fn fold_nan(values: &[f64], f: fn(f64, f64) -> f64) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    values.iter().copied().reduce(f).unwrap_or(f64::NAN)
}

fn math(name: &str, args: &[Value]) -> NsResult {
    match name {
        "__eq" => Ok(Value::Bool(tolerant_eq(&arg(args, 0), &arg(args, 1)))),
        "abs" => unary(args, f64::abs),
        "sqrt" => unary(args, f64::sqrt),
        "log" => unary(args, f64::ln),
        "exp" => unary(args, f64::exp),
        "floor" => unary(args, f64::floor),
        "ceil" => unary(args, f64::ceil),
        "sign" => unary(args, |x| if x.is_nan() || x == 0.0 { x } else { x.signum() }),
        "round" => {
            let x = num(args, 0);
            let digits = num(args, 1);
            if digits.is_nan() {
                return Ok(Value::Number(x.round()));
            }
            let scale = 10f64.powi(digits as i32);
            Ok(Value::Number((x * scale).round() / scale))
        }
        "pow" => Ok(Value::Number(num(args, 0).powf(num(args, 1)))),
        "max" => Ok(Value::Number(fold_nan(&numbers(args), f64::max))),
        "min" => Ok(Value::Number(fold_nan(&numbers(args), f64::min))),
        "avg" => Ok(Value::Number(stats::mean(&numbers(args)))),
        "sum" => {
            let len = length("math.sum", args, 1, None)?;
            Ok(over_window(args, 0, len, stats::sum))
        }
        _ => Err(unknown(Namespace::Math, name)),
    }
}

// ---------- array ----------

fn array_id(function: &str, args: &[Value]) -> Result<Rc<RefCell<Vec<Value>>>, RuntimeError> {
    match arg(args, 0).current() {
        Value::Array(items) => Ok(items),
        other => Err(invalid(function, format!("expected an array, got {}", other.type_name()))),
    }
}

fn element_index(function: &str, args: &[Value], i: usize, len: usize) -> Result<usize, RuntimeError> {
    let n = num(args, i);
    if !n.is_finite() || n < 0.0 || n as usize >= len {
        return Err(invalid(function, format!("index {n} out of bounds for size {len}")));
    }
    Ok(n as usize)
}

fn flag(args: &[Value], i: usize, default: bool) -> bool {
    match args.get(i).map(Value::current) {
        None | Some(Value::Na) => default,
        Some(v) => v.truthy(),
    }
}

fn array(name: &str, args: &[Value]) -> NsResult {
    let f = format!("array.{name}");
    match name {
        "new_float" => {
            let size = length(&f, args, 0, Some(0))?;
            let init = num(args, 1);
            Ok(Value::array(vec![Value::Number(init); size]))
        }
        "from" => Ok(Value::array(args.iter().map(Value::current).collect())),
        _ => {
            let items = array_id(&f, args)?;
            array_method(&f, name, &items, args)
        }
    }
}

fn array_method(f: &str, name: &str, items: &RefCell<Vec<Value>>, args: &[Value]) -> NsResult {
    let values = || numbers(&items.borrow());
    Ok(match name {
        "get" => {
            let items = items.borrow();
            let i = element_index(f, args, 1, items.len())?;
            items[i].clone()
        }
        "set" => {
            let mut items = items.borrow_mut();
            let i = element_index(f, args, 1, items.len())?;
            items[i] = arg(args, 2).current();
            Value::Na
        }
        "push" => {
            items.borrow_mut().push(arg(args, 1).current());
            Value::Na
        }
        "pop" => items.borrow_mut().pop().unwrap_or(Value::Na),
        "clear" => {
            items.borrow_mut().clear();
            Value::Na
        }
        "size" => Value::Number(items.borrow().len() as f64),
        "sum" => Value::Number(stats::sum(&values())),
        "avg" => Value::Number(stats::mean(&values())),
        "min" => Value::Number(stats::lowest(&values())),
        "max" => Value::Number(stats::highest(&values())),
        "variance" => Value::Number(stats::variance(&values(), flag(args, 1, true))),
        "stdev" => Value::Number(stats::stdev(&values(), flag(args, 1, true))),
        _ => return Err(unknown(Namespace::Array, name)),
    })
}

// ---------- core ----------

fn core(name: &str, args: &[Value]) -> NsResult {
    match name {
        "na" => Ok(Value::Bool(arg(args, 0).is_na())),
        "nz" => {
            let value = arg(args, 0).current();
            if value.is_na() {
                Ok(match args.get(1) {
                    Some(replacement) => replacement.current(),
                    None => Value::Number(0.0),
                })
            } else {
                Ok(value)
            }
        }
        _ => Err(unknown(Namespace::Core, name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::{new_series, SeriesRef};

    fn series(newest_first: &[f64]) -> Value {
        let buf = new_series(Value::Number(newest_first[newest_first.len() - 1]), None);
        for v in newest_first.iter().rev().skip(1) {
            buf.borrow_mut().push(Value::Number(*v));
        }
        Value::Series(SeriesRef::new(buf))
    }

    fn n(v: f64) -> Value {
        Value::Number(v)
    }

    #[test]
    fn tolerant_equality() {
        assert!(tolerant_eq(&n(0.1 + 0.2), &n(0.3)));
        assert!(!tolerant_eq(&n(1.0), &n(1.001)));
        assert!(!tolerant_eq(&n(f64::NAN), &n(f64::NAN)));
        assert!(!tolerant_eq(&Value::Na, &Value::Na));
        assert!(tolerant_eq(&Value::str("a"), &Value::str("a")));
        assert!(tolerant_eq(&series(&[2.0, 1.0]), &n(2.0)));
    }

    #[test]
    fn window_functions_read_history() {
        let mut ctx = Context::default();
        let src = series(&[4.0, 3.0, 2.0, 1.0]);
        let sma = call(&mut ctx, Namespace::Ta, "sma", &[src.clone(), n(3.0), Value::str("_ta0")]).unwrap();
        assert_eq!(sma.as_number(), 3.0);
        let hi = call(&mut ctx, Namespace::Ta, "highest", &[src.clone(), n(2.0), Value::str("_ta1")]).unwrap();
        assert_eq!(hi.as_number(), 4.0);
        let change = call(&mut ctx, Namespace::Ta, "change", &[src.clone(), Value::str("_ta2")]).unwrap();
        assert_eq!(change.as_number(), 1.0);
        let short = call(&mut ctx, Namespace::Ta, "sma", &[src, n(5.0), Value::str("_ta3")]).unwrap();
        assert!(short.is_na());
        let sum = call(&mut ctx, Namespace::Math, "sum", &[series(&[1.0, 2.0, 3.0]), n(2.0)]).unwrap();
        assert_eq!(sum.as_number(), 3.0);
    }

    #[test]
    fn crossover_compares_current_and_previous() {
        let mut ctx = Context::default();
        let a = series(&[3.0, 1.0]);
        let b = series(&[2.0, 2.0]);
        let up = call(&mut ctx, Namespace::Ta, "crossover", &[a.clone(), b.clone(), Value::str("_ta0")]).unwrap();
        let down = call(&mut ctx, Namespace::Ta, "crossunder", &[a, b, Value::str("_ta1")]).unwrap();
        assert!(up.truthy());
        assert!(!down.truthy());
    }

    #[test]
    fn stateful_calls_need_a_call_id() {
        let mut ctx = Context::default();
        let err = call(&mut ctx, Namespace::Ta, "ema", &[n(1.0), n(3.0)]).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument { .. }));
        let err = call(&mut ctx, Namespace::Ta, "ema", &[n(1.0), n(0.0), Value::str("_ta0")]).unwrap_err();
        assert_eq!(err, RuntimeError::Kernel(KernelError::InvalidPeriod(0)));
    }

    #[test]
    fn oversized_lengths_are_rejected() {
        let mut ctx = Context::default();
        let src = series(&[2.0, 1.0]);
        let err = call(&mut ctx, Namespace::Ta, "change", &[src.clone(), n(1e300), Value::str("_ta0")]).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument { ref function, .. } if function == "ta.change"));
        let err = call(&mut ctx, Namespace::Ta, "sma", &[src, n(f64::INFINITY), Value::str("_ta1")]).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument { .. }));
        let err = call(&mut ctx, Namespace::Array, "new_float", &[n(1e300), n(0.0)]).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidArgument { ref function, .. } if function == "array.new_float"));
    }

    #[test]
    fn array_statistics() {
        let arr = call(&mut Context::default(), Namespace::Array, "new_float", &[n(4.0), n(2.0)]).unwrap();
        array("set", &[arr.clone(), n(0.0), n(6.0)]).unwrap();
        assert_eq!(array("size", &[arr.clone()]).unwrap().as_number(), 4.0);
        assert_eq!(array("sum", &[arr.clone()]).unwrap().as_number(), 12.0);
        // mean 3, squared deviations 9 + 1 + 1 + 1
        assert_eq!(array("variance", &[arr.clone()]).unwrap().as_number(), 3.0);
        assert_eq!(array("variance", &[arr.clone(), Value::Bool(false)]).unwrap().as_number(), 4.0);
        assert!(array("get", &[arr.clone(), n(4.0)]).is_err());
        array("push", &[arr.clone(), n(1.0)]).unwrap();
        assert_eq!(array("pop", &[arr]).unwrap().as_number(), 1.0);
    }

    #[test]
    fn core_helpers() {
        assert!(core("na", &[n(f64::NAN)]).unwrap().truthy());
        assert_eq!(core("nz", &[Value::Na]).unwrap().as_number(), 0.0);
        assert_eq!(core("nz", &[Value::Na, n(5.0)]).unwrap().as_number(), 5.0);
        assert!(matches!(
            call(&mut Context::default(), Namespace::Core, "bogus", &[]),
            Err(RuntimeError::UnknownFunction { .. })
        ));
    }
}
