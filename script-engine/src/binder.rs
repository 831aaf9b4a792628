use tracing::debug;

use crate::ast::Program;
use crate::error::{CompileError, RuntimeError};
use crate::parser::parse;
use crate::runtime::{Context, Interpreter, Value};

/// Generated source turned back into a callable, tied to a receiver.
///
/// Invoke once per bar against the same [`Context`]; all history lives in the context, so
/// one indicator can drive any number of independent contexts.
///
/// Neither this type nor [`Context`] is `Send`: script values share state through `Rc`.
/// To run on several threads, keep the [`CompiledArtifact`](crate::CompiledArtifact) and
/// bind it once per thread.
#[derive(Debug)]
pub struct BoundIndicator {
    program: Program,
    receiver: Value,
}

impl BoundIndicator {
    pub fn bind(source: &str, receiver: &serde_json::Value) -> Result<Self, CompileError> {
        let program = parse(source)?;
        debug!(root = program.root_param(), "bound indicator");
        Ok(Self {
            program,
            receiver: Value::from_json(receiver),
        })
    }

    pub fn root_param(&self) -> &str {
        self.program.root_param()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Run one step. The result never aliases context history.
    pub fn invoke(&self, ctx: &mut Context) -> Result<Value, RuntimeError> {
        let out = Interpreter::new(ctx, &self.receiver).run(&self.program)?;
        Ok(out.materialize())
    }
}
