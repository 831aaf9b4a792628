use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use ts_core::History;

use crate::ast::Function;
use crate::codegen::format_number;
use crate::scope::Mutability;

use super::interp::Env;

/// Shared history buffer behind a slot, a param id or a data field.
pub type SeriesBuf = Rc<RefCell<History<Value>>>;

pub fn new_series(first: Value, capacity: Option<usize>) -> SeriesBuf {
    Rc::new(RefCell::new(History::with_current(first, capacity)))
}

/// A view onto a history buffer, shifted `offset` bars into the past.
#[derive(Clone)]
pub struct SeriesRef {
    pub buf: SeriesBuf,
    pub offset: usize,
}

impl SeriesRef {
    pub fn new(buf: SeriesBuf) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn get(&self, bars_ago: usize) -> Value {
        self.buf
            .borrow()
            .get(self.offset.saturating_add(bars_ago))
            .cloned()
            .unwrap_or(Value::Na)
    }

    pub fn current(&self) -> Value {
        self.get(0)
    }

    pub fn shifted(&self, bars: usize) -> Self {
        Self {
            buf: Rc::clone(&self.buf),
            offset: self.offset.saturating_add(bars),
        }
    }

    /// Bars visible from this view.
    pub fn len(&self) -> usize {
        self.buf.borrow().len().saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The newest `len` values as numbers, newest first. `None` until enough bars exist.
    pub fn window(&self, len: usize) -> Option<Vec<f64>> {
        if len == 0 || self.len() < len {
            return None;
        }
        Some((0..len).map(|i| self.get(i).as_number()).collect())
    }
}

/// Context-supplied function groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Ta,
    Math,
    Array,
    Core,
    Data,
}

impl Namespace {
    pub fn name(self) -> &'static str {
        match self {
            Namespace::Ta => "ta",
            Namespace::Math => "math",
            Namespace::Array => "array",
            Namespace::Core => "core",
            Namespace::Data => "data",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "ta" => Namespace::Ta,
            "math" => Namespace::Math,
            "array" => Namespace::Array,
            "core" => Namespace::Core,
            "data" => Namespace::Data,
            _ => return None,
        })
    }
}

/// Methods living directly on the context object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFn {
    Init,
    Param,
    Precision,
}

pub struct Closure {
    pub function: Rc<Function>,
    pub env: Env,
}

/// A runtime value. Arrays and objects are shared by reference, as in the host language.
#[derive(Clone)]
pub enum Value {
    /// `na`, `undefined` and `null`.
    Na,
    Number(f64),
    Bool(bool),
    Str(Rc<str>),
    Array(Rc<RefCell<Vec<Value>>>),
    Object(Rc<RefCell<BTreeMap<String, Value>>>),
    Series(SeriesRef),
    Function(Rc<Closure>),
    Native { namespace: Namespace, name: Rc<str> },
    Namespace(Namespace),
    Context,
    Bucket(Mutability),
    ContextFn(ContextFn),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Rc::from(s))
    }

    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn object(fields: BTreeMap<String, Value>) -> Value {
        Value::Object(Rc::new(RefCell::new(fields)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Na => "na",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Series(_) => "series",
            Value::Function(_) | Value::Native { .. } | Value::ContextFn(_) => "function",
            Value::Namespace(_) => "namespace",
            Value::Context => "context",
            Value::Bucket(_) => "bucket",
        }
    }

    /// Series collapse to the value at their offset; everything else is returned as is.
    pub fn current(&self) -> Value {
        match self {
            Value::Series(s) => s.current(),
            other => other.clone(),
        }
    }

    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Str(s) => s.trim().parse().unwrap_or(f64::NAN),
            Value::Series(s) => s.current().as_number(),
            _ => f64::NAN,
        }
    }

    pub fn as_str(&self) -> Option<Rc<str>> {
        match self.current() {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_na(&self) -> bool {
        match self {
            Value::Na => true,
            Value::Number(n) => n.is_nan(),
            Value::Series(s) => s.current().is_na(),
            _ => false,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Na => false,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::Series(s) => s.current().truthy(),
            _ => true,
        }
    }

    /// Deep copy with every series collapsed, so nothing returned to a caller aliases history.
    pub fn materialize(&self) -> Value {
        match self {
            Value::Series(s) => s.current().materialize(),
            Value::Array(items) => {
                Value::array(items.borrow().iter().map(Value::materialize).collect())
            }
            Value::Object(fields) => Value::object(
                fields
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.materialize()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Text used by string concatenation.
    pub fn display(&self) -> String {
        match self {
            Value::Na => "NaN".to_string(),
            // string conversion drops the sign of zero
            Value::Number(n) if *n == 0.0 => "0".to_string(),
            Value::Number(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
            Value::Str(s) => s.to_string(),
            Value::Array(items) => items
                .borrow()
                .iter()
                .map(Value::display)
                .collect::<Vec<_>>()
                .join(","),
            Value::Series(s) => s.current().display(),
            other => format!("[{}]", other.type_name()),
        }
    }

    /// `na` and NaN become `null`; callables and context handles have no JSON form.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as J;
        match self {
            Value::Na => J::Null,
            Value::Number(n) => serde_json::Number::from_f64(*n).map_or(J::Null, J::Number),
            Value::Bool(b) => J::Bool(*b),
            Value::Str(s) => J::String(s.to_string()),
            Value::Array(items) => J::Array(items.borrow().iter().map(Value::to_json).collect()),
            Value::Object(fields) => J::Object(
                fields
                    .borrow()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Series(s) => s.current().to_json(),
            _ => J::Null,
        }
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Na,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            J::String(s) => Value::str(s),
            J::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            J::Object(fields) => Value::object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Na => write!(f, "na"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(fields) => f.debug_map().entries(fields.borrow().iter()).finish(),
            Value::Series(s) => write!(f, "series(len={}, offset={})", s.len(), s.offset),
            Value::Function(c) => match &c.function.name {
                Some(name) => write!(f, "function {}", name.name),
                None => write!(f, "function"),
            },
            Value::Native { namespace, name } => write!(f, "{}.{name}", namespace.name()),
            Value::Namespace(ns) => write!(f, "namespace {}", ns.name()),
            Value::Context => write!(f, "context"),
            Value::Bucket(m) => write!(f, "bucket {}", m.bucket()),
            Value::ContextFn(func) => write!(f, "context.{func:?}"),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_views_shift_into_the_past() {
        let buf = new_series(Value::Number(1.0), None);
        buf.borrow_mut().push(Value::Number(2.0));
        buf.borrow_mut().push(Value::Number(3.0));
        let view = SeriesRef::new(buf);
        assert_eq!(view.current().as_number(), 3.0);
        let back = view.shifted(1);
        assert_eq!(back.current().as_number(), 2.0);
        assert_eq!(back.len(), 2);
        assert!(back.get(2).is_na());
        assert_eq!(view.window(2), Some(vec![3.0, 2.0]));
        assert_eq!(view.window(4), None);
    }

    #[test]
    fn materialize_collapses_nested_series() {
        let buf = new_series(Value::Number(7.0), None);
        let nested = Value::array(vec![Value::Series(SeriesRef::new(buf)), Value::Bool(true)]);
        let json = nested.materialize().to_json();
        assert_eq!(json, serde_json::json!([7.0, true]));
    }

    #[test]
    fn json_round_trip_maps_nan_to_null() {
        assert_eq!(Value::Number(f64::NAN).to_json(), serde_json::Value::Null);
        let v = Value::from_json(&serde_json::json!({ "len": 14, "name": "rsi" }));
        let Value::Object(fields) = v else {
            panic!("expected object");
        };
        assert_eq!(fields.borrow()["len"].as_number(), 14.0);
    }

    #[test]
    fn truthiness_follows_host_rules() {
        assert!(!Value::Number(0.0).truthy());
        assert!(!Value::Number(f64::NAN).truthy());
        assert!(!Value::Na.truthy());
        assert!(!Value::str("").truthy());
        assert!(Value::array(Vec::new()).truthy());
    }
}
