//! Compiler for indicator scripts.
//!
//! A script is a single root function taking the execution context. Compilation rewrites
//! every declared name into a scope-qualified history slot on that context, so that the
//! generated unit can be invoked once per bar and every value reads as a series indexed by
//! bars ago. Pipeline: parse, pre-process, transform, normalise equality, generate, bind.

use std::time::Instant;

use tracing::debug;

pub mod artifact;
pub mod ast;
pub mod binder;
pub mod codegen;
pub mod config;
pub mod equality;
pub mod error;
pub mod parser;
pub mod preprocess;
pub mod runner;
pub mod runtime;
pub mod scope;
pub mod transform;

pub use artifact::{CompileStats, CompiledArtifact};
pub use binder::BoundIndicator;
pub use config::{CompilerOptions, ContextConfig, UnsupportedPolicy};
pub use equality::{normalize_equality, EqualityOutcome};
pub use error::{CompileError, EngineError, RuntimeError};
pub use runner::{IncrementalRunner, IndicatorRunner, RunCheckpoint, RunOutput};
pub use runtime::{Context, Value};
pub use scope::{Binding, Mutability, ScopeKind, ScopeManager};

use crate::codegen::generate;
use crate::parser::parse;
use crate::preprocess::preprocess;
use crate::transform::Transformer;

/// Compiles script text into [`CompiledArtifact`]s. Each call owns its own scope manager,
/// so one compiler may be shared freely.
#[derive(Debug, Clone, Default)]
pub struct ScriptCompiler {
    options: CompilerOptions,
}

impl ScriptCompiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn compile(&self, source: &str) -> Result<CompiledArtifact, CompileError> {
        let started = Instant::now();
        let program = parse(source)?;
        let root_param = program.root_param().to_string();
        debug!(root = %root_param, "parsed");

        let mut scopes = ScopeManager::new();
        let (program, pre) = preprocess(program, &mut scopes);

        let mut transformer = Transformer::new(&mut scopes, &self.options);
        let program = transformer.program(program)?;
        let rewrite = transformer.stats();
        debug!(
            slots = rewrite.slot_declarations,
            reads = rewrite.slot_reads,
            namespace_calls = rewrite.namespace_calls,
            passed_through = rewrite.passed_through,
            "transformed"
        );

        let (program, outcome) = normalize_equality(program, &root_param);
        let source = generate(&program);

        let scope_stats = scopes.stats();
        let stats = CompileStats {
            scopes: scope_stats.scopes,
            slots: scope_stats.bindings,
            context_bound: pre.context_bound,
            hoisted_functions: pre.hoisted,
            expanded_patterns: pre.expanded,
            call_ids: scope_stats.call_ids,
            param_ids: scope_stats.param_ids,
            equality_rewrites: match outcome {
                EqualityOutcome::Skipped => 0,
                EqualityOutcome::Rewritten(n) => n,
            },
            passed_through: rewrite.passed_through,
        };
        debug!(
            scopes = stats.scopes,
            slots = stats.slots,
            call_ids = stats.call_ids,
            equality_rewrites = stats.equality_rewrites,
            bytes = source.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "compiled"
        );
        Ok(CompiledArtifact {
            source,
            root_param,
            stats,
        })
    }

    /// Compile and bind in one go; `receiver` is visible to the script as `this`.
    pub fn compile_and_bind(
        &self,
        source: &str,
        receiver: &serde_json::Value,
    ) -> Result<BoundIndicator, CompileError> {
        self.compile(source)?.bind(receiver)
    }
}

/// Compile with default options.
pub fn compile(source: &str) -> Result<CompiledArtifact, CompileError> {
    ScriptCompiler::default().compile(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"(context) => {
        const { ta, math } = context;
        const { close } = context.data;
        const fast = ta.ema(close, 3);
        let above = 0;
        if (close == fast) {
            above = 1;
        }
        return { fast, above };
    }"#;

    #[test]
    fn pipeline_produces_slot_code() {
        let artifact = compile(SRC).unwrap();
        let out = &artifact.source;
        assert!(out.starts_with("(context) => {\n"), "{out}");
        assert!(out.contains("    const { ta, math } = context;\n"), "{out}");
        assert!(
            out.contains("context.const.glb1_fast = context.init(context.const.glb1_fast, ta.ema(context.param(close, undefined, \"p0\"), context.param(3, undefined, \"p1\"), \"_ta0\"));"),
            "{out}"
        );
        assert!(out.contains("if (context.math.__eq(close, context.const.glb1_fast[0])) {"), "{out}");
        assert!(out.contains("context.let.glb1_above[0] = 1;"), "{out}");
        assert!(
            out.contains("return { fast: context.const.glb1_fast[0], above: context.let.glb1_above[0] };"),
            "{out}"
        );
        assert_eq!(artifact.root_param, "context");
        assert_eq!(artifact.stats.call_ids, 1);
        assert_eq!(artifact.stats.equality_rewrites, 1);
        assert_eq!(artifact.stats.context_bound, 3);
    }

    #[test]
    fn generated_source_reparses_to_itself() {
        let artifact = compile(SRC).unwrap();
        let again = generate(&parse(&artifact.source).unwrap());
        assert_eq!(again, artifact.source);
    }

    #[test]
    fn compile_errors_surface_before_binding() {
        let err = ScriptCompiler::default()
            .compile_and_bind("(context) => { return y }", &serde_json::Value::Null)
            .unwrap_err();
        assert!(matches!(err, CompileError::UnresolvedVariable { ref name, .. } if name == "y"));
    }

    #[test]
    fn compiled_units_run_bar_by_bar() {
        let bound = ScriptCompiler::default()
            .compile_and_bind(SRC, &serde_json::Value::Null)
            .unwrap();
        let candles = data_feed::daily_series(1_706_715_000_000, &[1.0, 1.0, 1.0, 2.0]).unwrap();
        let out = IndicatorRunner::new(bound, ContextConfig::default())
            .run(&candles)
            .unwrap();
        let fast = out.numbers("fast").unwrap();
        assert!(fast[1].is_nan());
        assert_eq!(fast[2], 1.0);
        assert_eq!(fast[3], 1.5);
        assert_eq!(out.numbers("above").unwrap(), vec![0.0, 0.0, 1.0, 0.0]);
    }
}
