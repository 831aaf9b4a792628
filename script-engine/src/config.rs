use serde::{Deserialize, Serialize};

/// What the transformer does with a construct it has no rewrite rule for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnsupportedPolicy {
    /// Fail compilation with `CompileError::UnsupportedConstruct`.
    #[default]
    Strict,
    /// Copy the node through untransformed.
    PassThrough,
}

/// Compiler knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerOptions {
    pub unsupported: UnsupportedPolicy,
    /// Namespace whose calls receive a trailing call-site id.
    pub primary_namespace: String,
    /// Namespaces recognised by name even when the script never destructures them.
    pub analysis_namespaces: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            unsupported: UnsupportedPolicy::Strict,
            primary_namespace: "ta".to_string(),
            analysis_namespaces: vec!["ta".to_string(), "math".to_string()],
        }
    }
}

impl CompilerOptions {
    pub fn with_unsupported(mut self, policy: UnsupportedPolicy) -> Self {
        self.unsupported = policy;
        self
    }

    pub fn is_analysis_namespace(&self, name: &str) -> bool {
        self.analysis_namespaces.iter().any(|n| n == name)
    }
}

/// Limits and numeric settings for one execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Decimal places kept by `precision`.
    pub precision_digits: u32,
    /// Bars retained per history buffer; `None` keeps everything.
    pub max_history: Option<usize>,
    /// Iterations a single loop may run within one step.
    pub max_loop_iterations: u64,
    /// Script function calls that may be active at once.
    pub max_call_depth: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            precision_digits: 10,
            max_history: None,
            max_loop_iterations: 100_000,
            max_call_depth: 64,
        }
    }
}

impl ContextConfig {
    pub fn with_max_history(mut self, bars: usize) -> Self {
        self.max_history = Some(bars);
        self
    }

    pub fn with_precision(mut self, digits: u32) -> Self {
        self.precision_digits = digits;
        self
    }

    pub fn with_max_loop_iterations(mut self, limit: u64) -> Self {
        self.max_loop_iterations = limit;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}
