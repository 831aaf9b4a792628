use serde::{Deserialize, Serialize};

use crate::binder::BoundIndicator;
use crate::error::CompileError;

/// Counters gathered across one compilation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileStats {
    pub scopes: usize,
    pub slots: usize,
    pub context_bound: usize,
    pub hoisted_functions: usize,
    pub expanded_patterns: usize,
    pub call_ids: usize,
    pub param_ids: usize,
    pub equality_rewrites: usize,
    pub passed_through: usize,
}

/// Compiled indicator in persistable form: the generated source plus what is needed to
/// bind it again later, possibly on another thread or in another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledArtifact {
    pub source: String,
    pub root_param: String,
    #[serde(default)]
    pub stats: CompileStats,
}

impl CompiledArtifact {
    /// Bind to a receiver visible to the script as `this`.
    pub fn bind(&self, receiver: &serde_json::Value) -> Result<BoundIndicator, CompileError> {
        BoundIndicator::bind(&self.source, receiver)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_survives_json_and_rebinds() {
        let artifact = CompiledArtifact {
            source: "(context) => {\n    return 1;\n}\n".to_string(),
            root_param: "context".to_string(),
            stats: CompileStats {
                scopes: 1,
                ..CompileStats::default()
            },
        };
        let json = artifact.to_json().unwrap();
        let back = CompiledArtifact::from_json(&json).unwrap();
        assert_eq!(back, artifact);
        let bound = back.bind(&serde_json::Value::Null).unwrap();
        assert_eq!(bound.root_param(), "context");
    }

    #[test]
    fn stats_default_when_missing() {
        let back = CompiledArtifact::from_json(r#"{"source":"(c) => 1","root_param":"c"}"#).unwrap();
        assert_eq!(back.stats, CompileStats::default());
    }

    #[test]
    fn artifacts_cross_threads() {
        fn assert_send<T: Send + Sync>() {}
        assert_send::<CompiledArtifact>();
    }
}
