use data_feed::FeedError;
use ta_engine::KernelError;
use thiserror::Error;

use crate::ast::Span;

/// Fatal compile-time failure. No partially compiled unit is ever produced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("parse error at {line}:{column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("unresolved variable `{name}` at {line}:{column}")]
    UnresolvedVariable {
        name: String,
        line: usize,
        column: usize,
    },
    #[error("unsupported construct at {line}:{column}: {construct}")]
    UnsupportedConstruct {
        construct: String,
        line: usize,
        column: usize,
    },
}

impl CompileError {
    pub fn parse(message: impl Into<String>, span: Span) -> Self {
        CompileError::Parse {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }

    pub fn unresolved(name: impl Into<String>, span: Span) -> Self {
        CompileError::UnresolvedVariable {
            name: name.into(),
            line: span.line,
            column: span.column,
        }
    }

    pub fn unsupported(construct: impl Into<String>, span: Span) -> Self {
        CompileError::UnsupportedConstruct {
            construct: construct.into(),
            line: span.line,
            column: span.column,
        }
    }

    pub fn span(&self) -> Span {
        match self {
            CompileError::Parse { line, column, .. }
            | CompileError::UnresolvedVariable { line, column, .. }
            | CompileError::UnsupportedConstruct { line, column, .. } => Span::new(*line, *column),
        }
    }
}

/// Failure raised while a bound indicator executes against a context.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    #[error("unknown function `{namespace}.{name}`")]
    UnknownFunction { namespace: String, name: String },
    #[error("value is not callable: {0}")]
    NotCallable(String),
    #[error("invalid argument for `{function}`: {message}")]
    InvalidArgument { function: String, message: String },
    #[error("invalid assignment target: {0}")]
    InvalidTarget(String),
    #[error("loop exceeded {0} iterations")]
    LoopLimit(u64),
    #[error("call depth exceeded {0}")]
    CallDepth(usize),
    #[error("`{0}` outside of a loop")]
    StrayJump(&'static str),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

/// Umbrella error for callers that compile, fetch and run in one go.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Feed(#[from] FeedError),
}
