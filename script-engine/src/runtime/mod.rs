//! Execution side of compiled indicators: the context object generated code runs against,
//! the value model, the namespace library and the evaluator.

pub mod context;
pub mod interp;
pub mod namespaces;
pub mod value;

pub use context::{Context, DATA_FIELDS};
pub use interp::Interpreter;
pub use namespaces::{tolerant_eq, EQ_TOLERANCE};
pub use value::{Namespace, SeriesRef, Value};
