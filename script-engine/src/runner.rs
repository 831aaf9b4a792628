use std::collections::BTreeMap;
use std::time::Instant;

use data_feed::CandleProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use ts_core::{Candle, TimeFrame, Timestamp};

use crate::binder::BoundIndicator;
use crate::config::ContextConfig;
use crate::error::{EngineError, RuntimeError};
use crate::runtime::{Context, Value};

/// Column name used when the root function returns a bare value instead of an object.
pub const VALUE_COLUMN: &str = "value";

/// Per-bar results, oldest first. Every column has one entry per timestamp; bars that did
/// not produce a field hold `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOutput {
    pub timestamps: Vec<Timestamp>,
    pub columns: BTreeMap<String, Vec<serde_json::Value>>,
}

impl RunOutput {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[serde_json::Value]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// A column as numbers; `null` becomes NaN and booleans become 0/1.
    pub fn numbers(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name).map(|col| {
            col.iter()
                .map(|v| match v {
                    serde_json::Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
                    serde_json::Value::Bool(b) => f64::from(u8::from(*b)),
                    _ => f64::NAN,
                })
                .collect()
        })
    }

    pub fn bools(&self, name: &str) -> Option<Vec<bool>> {
        self.column(name)
            .map(|col| col.iter().map(|v| v.as_bool().unwrap_or(false)).collect())
    }

    fn record(&mut self, ts: Timestamp, value: &Value) {
        let row = self.timestamps.len();
        self.timestamps.push(ts);
        match value {
            Value::Object(fields) => {
                for (name, v) in fields.borrow().iter() {
                    self.push_cell(name, row, v.to_json());
                }
            }
            Value::Na => {}
            other => self.push_cell(VALUE_COLUMN, row, other.to_json()),
        }
        for column in self.columns.values_mut() {
            column.resize(row + 1, serde_json::Value::Null);
        }
    }

    fn push_cell(&mut self, name: &str, row: usize, cell: serde_json::Value) {
        let column = self
            .columns
            .entry(name.to_string())
            .or_insert_with(|| vec![serde_json::Value::Null; row]);
        column.push(cell);
    }

    fn append(&mut self, other: RunOutput) {
        let offset = self.len();
        let added = other.len();
        self.timestamps.extend(other.timestamps);
        for (name, cells) in other.columns {
            let column = self
                .columns
                .entry(name)
                .or_insert_with(|| vec![serde_json::Value::Null; offset]);
            column.extend(cells);
        }
        for column in self.columns.values_mut() {
            column.resize(offset + added, serde_json::Value::Null);
        }
    }
}

fn step(
    indicator: &BoundIndicator,
    ctx: &mut Context,
    candle: &Candle,
    out: &mut RunOutput,
) -> Result<(), RuntimeError> {
    ctx.begin_step(candle);
    let value = indicator.invoke(ctx)?;
    trace!(ts = candle.ts, ?value, "bar evaluated");
    out.record(candle.ts, &value);
    Ok(())
}

/// Drives a bound indicator over a whole candle series with a fresh context per run.
pub struct IndicatorRunner {
    indicator: BoundIndicator,
    config: ContextConfig,
}

impl IndicatorRunner {
    pub fn new(indicator: BoundIndicator, config: ContextConfig) -> Self {
        Self { indicator, config }
    }

    pub fn run(&self, candles: &[Candle]) -> Result<RunOutput, RuntimeError> {
        self.run_with_context(candles).map(|(out, _)| out)
    }

    /// Like [`IndicatorRunner::run`], also handing back the context for inspecting slots.
    pub fn run_with_context(&self, candles: &[Candle]) -> Result<(RunOutput, Context), RuntimeError> {
        let started = Instant::now();
        debug!(bars = candles.len(), "run started");
        let mut ctx = Context::new(self.config);
        let mut out = RunOutput::default();
        for candle in candles {
            step(&self.indicator, &mut ctx, candle, &mut out)?;
        }
        debug!(
            bars = out.len(),
            columns = out.columns.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "run finished"
        );
        Ok((out, ctx))
    }

    /// Fetch the newest `limit` candles from `provider` and run over them.
    pub fn run_from_provider(
        &self,
        provider: &dyn CandleProvider,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> Result<RunOutput, EngineError> {
        let candles = provider.candles(symbol, timeframe, limit)?;
        Ok(self.run(&candles)?)
    }
}

/// Where an incremental run left off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCheckpoint {
    pub bars_processed: usize,
    pub last_ts: Option<Timestamp>,
}

/// Keeps one context alive across calls and only evaluates bars it has not seen.
///
/// The candles already evaluated are kept so that a failed bar can be rolled back by
/// replaying them into a fresh context.
pub struct IncrementalRunner {
    indicator: BoundIndicator,
    config: ContextConfig,
    context: Context,
    checkpoint: RunCheckpoint,
    output: RunOutput,
    processed: Vec<Candle>,
}

impl IncrementalRunner {
    pub fn new(indicator: BoundIndicator, config: ContextConfig) -> Self {
        Self {
            indicator,
            config,
            context: Context::new(config),
            checkpoint: RunCheckpoint::default(),
            output: RunOutput::default(),
            processed: Vec::new(),
        }
    }

    /// Evaluate only the bars newer than the checkpoint and return their results.
    ///
    /// Callers may pass the full history again or just the appended bars; bars at or before
    /// the last processed timestamp are skipped either way.
    ///
    /// If a bar fails, the bars before it in the delta are kept: their rows are appended to
    /// [`IncrementalRunner::output`] and the checkpoint points at the last of them. The failed
    /// bar leaves no trace in the context, so the next delta starts from it again.
    pub fn apply_delta(&mut self, candles: &[Candle]) -> Result<RunOutput, RuntimeError> {
        let mut fresh = RunOutput::default();
        let mut failure = None;
        for candle in candles {
            if self.checkpoint.last_ts.is_some_and(|last| candle.ts <= last) {
                continue;
            }
            if let Err(err) = step(&self.indicator, &mut self.context, candle, &mut fresh) {
                failure = Some((candle.ts, err));
                break;
            }
            self.processed.push(*candle);
            self.checkpoint.bars_processed += 1;
            self.checkpoint.last_ts = Some(candle.ts);
        }
        debug!(
            new_bars = fresh.len(),
            total = self.checkpoint.bars_processed,
            "delta applied"
        );
        self.output.append(fresh.clone());
        match failure {
            None => Ok(fresh),
            Some((ts, err)) => {
                warn!(ts, error = %err, "bar failed, rolling the context back");
                self.rebuild_context();
                Err(err)
            }
        }
    }

    fn rebuild_context(&mut self) {
        let mut context = Context::new(self.config);
        let mut scratch = RunOutput::default();
        for candle in &self.processed {
            if let Err(err) = step(&self.indicator, &mut context, candle, &mut scratch) {
                warn!(ts = candle.ts, error = %err, "replay diverged");
                break;
            }
        }
        self.context = context;
    }

    /// Drop all state and start over from the next delta.
    pub fn reset(&mut self) {
        self.context = Context::new(self.config);
        self.checkpoint = RunCheckpoint::default();
        self.output = RunOutput::default();
        self.processed.clear();
    }

    pub fn checkpoint(&self) -> RunCheckpoint {
        self.checkpoint
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Everything produced since creation or the last reset.
    pub fn output(&self) -> &RunOutput {
        &self.output
    }
}
