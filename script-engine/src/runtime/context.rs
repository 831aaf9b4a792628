use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use ta_engine::CallSiteStates;
use tracing::trace;
use ts_core::{Candle, History};

use crate::config::ContextConfig;
use crate::scope::Mutability;

use super::namespaces::TaKernel;
use super::value::{new_series, SeriesBuf, SeriesRef, Value};

/// Fields pushed from every candle, in the order they are written.
pub const DATA_FIELDS: &[&str] = &[
    "open", "high", "low", "close", "volume", "hl2", "hlc3", "ohlc4", "openTime", "closeTime",
];

/// Per-run state a compiled indicator reads and writes through its root parameter.
///
/// Every buffer the context owns advances together at [`Context::begin_step`], so a slot that
/// nothing wrote on a step still carries its previous value forward.
///
/// Buffers are `Rc`-shared with the values that read them, so a context stays on the thread
/// that created it.
pub struct Context {
    config: ContextConfig,
    steps: u64,
    data: BTreeMap<String, SeriesBuf>,
    reassignable: HashMap<String, SeriesBuf>,
    single: HashMap<String, SeriesBuf>,
    params: HashMap<String, SeriesBuf>,
    ta: CallSiteStates<TaKernel>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl Context {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            steps: 0,
            data: BTreeMap::new(),
            reassignable: HashMap::new(),
            single: HashMap::new(),
            params: HashMap::new(),
            ta: CallSiteStates::new(),
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Steps begun so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Zero-based index of the current bar; exposed to scripts as `idx`.
    pub fn bar_index(&self) -> u64 {
        self.steps.saturating_sub(1)
    }

    /// Open the next bar: advance every history and publish the candle's fields.
    pub fn begin_step(&mut self, candle: &Candle) {
        if self.steps > 0 {
            let buffers = self
                .data
                .values()
                .chain(self.reassignable.values())
                .chain(self.single.values())
                .chain(self.params.values());
            for buf in buffers {
                buf.borrow_mut().advance();
            }
        }
        self.steps += 1;
        trace!(step = self.steps, ts = candle.ts, "begin step");
        let fields = [
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
            candle.hl2(),
            candle.hlc3(),
            candle.ohlc4(),
            candle.ts as f64,
            candle.close_ts() as f64,
        ];
        for (name, value) in DATA_FIELDS.iter().zip(fields) {
            self.set_data(name, value);
        }
    }

    /// Set the current value of a named data series. Extra series not refreshed on a later
    /// step carry their last value forward.
    pub fn set_data(&mut self, name: &str, value: f64) {
        let capacity = self.config.max_history;
        match self.data.get(name) {
            Some(buf) => buf.borrow_mut().set_current(Value::Number(value)),
            None => {
                self.data
                    .insert(name.to_string(), new_series(Value::Number(value), capacity));
            }
        }
    }

    pub fn data_series(&self, name: &str) -> Option<SeriesRef> {
        self.data.get(name).map(|buf| SeriesRef::new(Rc::clone(buf)))
    }

    fn bucket(&self, mutability: Mutability) -> &HashMap<String, SeriesBuf> {
        match mutability {
            Mutability::Reassignable => &self.reassignable,
            Mutability::SingleAssignment => &self.single,
        }
    }

    fn bucket_mut(&mut self, mutability: Mutability) -> &mut HashMap<String, SeriesBuf> {
        match mutability {
            Mutability::Reassignable => &mut self.reassignable,
            Mutability::SingleAssignment => &mut self.single,
        }
    }

    pub fn slot(&self, mutability: Mutability, name: &str) -> Option<SeriesRef> {
        self.bucket(mutability)
            .get(name)
            .map(|buf| SeriesRef::new(Rc::clone(buf)))
    }

    /// `bucket.name = value`. A series keeps its buffer; anything else starts a fresh one.
    pub fn store_slot(&mut self, mutability: Mutability, name: &str, value: Value) {
        let buf = match value {
            Value::Series(s) if s.offset == 0 => s.buf,
            other => new_series(other.current(), self.config.max_history),
        };
        self.bucket_mut(mutability).insert(name.to_string(), buf);
    }

    /// Newest-first history of a slot, for inspection.
    pub fn history(&self, bucket: &str, name: &str) -> Option<Vec<Value>> {
        let mutability = Mutability::from_bucket(bucket)?;
        self.bucket(mutability)
            .get(name)
            .map(|buf| buf.borrow().iter().cloned().collect())
    }

    pub fn slot_names(&self, bucket: &str) -> Vec<String> {
        let Some(mutability) = Mutability::from_bucket(bucket) else {
            return Vec::new();
        };
        let mut names: Vec<String> = self.bucket(mutability).keys().cloned().collect();
        names.sort();
        names
    }

    /// `init(slot, value, offset?)`: the first call creates the buffer, later calls replace
    /// the current value. Series values are collapsed at `offset` before storing.
    pub fn init(&mut self, slot: Value, value: Value, offset: Value) -> Value {
        let value = match (&value, bars(&offset)) {
            (Value::Series(s), bars) => s.get(bars),
            _ => value,
        };
        match slot {
            Value::Series(s) => {
                s.buf.borrow_mut().set_current(value);
                Value::Series(s)
            }
            _ => Value::Series(SeriesRef::new(new_series(value, self.config.max_history))),
        }
    }

    /// `param(value, offset, id)`: normalise one namespace-call argument into a series view.
    pub fn param(&mut self, value: Value, offset: Value, id: &str) -> Value {
        let shift = bars(&offset);
        match value {
            Value::Series(s) => Value::Series(s.shifted(shift)),
            Value::Function(_) | Value::Native { .. } => value,
            scalar => {
                let capacity = self.config.max_history;
                let buf = self
                    .params
                    .entry(id.to_string())
                    .or_insert_with(|| Rc::new(RefCell::new(History::new(capacity))));
                buf.borrow_mut().set_current(scalar);
                Value::Series(SeriesRef {
                    buf: Rc::clone(buf),
                    offset: shift,
                })
            }
        }
    }

    /// Round to `precision_digits` decimals, element-wise inside arrays.
    pub fn precision(&self, value: &Value) -> Value {
        let scale = 10f64.powi(self.config.precision_digits as i32);
        round_value(&value.current(), scale)
    }

    pub(crate) fn ta_states(&mut self) -> &mut CallSiteStates<TaKernel> {
        &mut self.ta
    }
}

fn round_value(value: &Value, scale: f64) -> Value {
    match value {
        Value::Number(n) if n.is_finite() => Value::Number((n * scale).round() / scale),
        Value::Array(items) => Value::array(
            items
                .borrow()
                .iter()
                .map(|v| round_value(&v.current(), scale))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Offsets arrive as script values; `undefined`, negatives and NaN mean "no shift".
fn bars(offset: &Value) -> usize {
    let n = offset.as_number();
    if n.is_finite() && n > 0.0 {
        n as usize
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_core::TimeFrame;

    fn candle(ts: i64, close: f64) -> Candle {
        Candle {
            ts,
            timeframe: TimeFrame::Days(1),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    #[test]
    fn data_series_index_from_current_bar() {
        let mut ctx = Context::default();
        for (i, c) in [10.0, 11.0, 12.0].into_iter().enumerate() {
            ctx.begin_step(&candle(i as i64, c));
        }
        let close = ctx.data_series("close").unwrap();
        assert_eq!(close.get(0).as_number(), 12.0);
        assert_eq!(close.get(2).as_number(), 10.0);
        assert!(close.get(3).is_na());
        assert_eq!(ctx.data_series("hl2").unwrap().current().as_number(), 12.0);
        assert_eq!(ctx.bar_index(), 2);
    }

    #[test]
    fn slots_carry_forward_when_not_written() {
        let mut ctx = Context::default();
        ctx.begin_step(&candle(0, 1.0));
        let s = ctx.init(Value::Na, Value::Number(5.0), Value::Na);
        ctx.store_slot(Mutability::Reassignable, "glb1_x", s);
        ctx.begin_step(&candle(1, 1.0));
        ctx.begin_step(&candle(2, 1.0));
        let slot = ctx.slot(Mutability::Reassignable, "glb1_x").unwrap();
        let s = ctx.init(Value::Series(slot), Value::Number(6.0), Value::Na);
        ctx.store_slot(Mutability::Reassignable, "glb1_x", s);
        let history: Vec<f64> = ctx
            .history("let", "glb1_x")
            .unwrap()
            .iter()
            .map(Value::as_number)
            .collect();
        assert_eq!(history, vec![6.0, 5.0, 5.0]);
    }

    #[test]
    fn init_collapses_series_at_offset() {
        let mut ctx = Context::default();
        ctx.begin_step(&candle(0, 1.0));
        ctx.begin_step(&candle(1, 2.0));
        let close = Value::Series(ctx.data_series("close").unwrap());
        let s = ctx.init(Value::Na, close, Value::Number(1.0));
        let Value::Series(view) = s else {
            panic!("init returns a series");
        };
        assert_eq!(view.current().as_number(), 1.0);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn scalar_params_get_their_own_history() {
        let mut ctx = Context::default();
        for step in 0..3 {
            ctx.begin_step(&candle(step, 1.0));
            ctx.param(Value::Number(step as f64 * 10.0), Value::Na, "p0");
        }
        let view = ctx.param(Value::Number(99.0), Value::Number(1.0), "p0");
        let Value::Series(view) = view else {
            panic!("param returns a series");
        };
        assert_eq!(view.current().as_number(), 10.0);
        assert_eq!(view.get(1).as_number(), 0.0);
    }

    #[test]
    fn bounded_history_drops_the_oldest_bars() {
        let mut ctx = Context::new(ContextConfig::default().with_max_history(2));
        for step in 0..5 {
            ctx.begin_step(&candle(step, step as f64));
        }
        let close = ctx.data_series("close").unwrap();
        assert_eq!(close.len(), 2);
        assert_eq!(close.get(1).as_number(), 3.0);
    }

    #[test]
    fn precision_rounds_numbers_and_arrays() {
        let ctx = Context::new(ContextConfig::default().with_precision(2));
        assert_eq!(ctx.precision(&Value::Number(1.23456)).as_number(), 1.23);
        let rounded = ctx.precision(&Value::array(vec![Value::Number(0.129), Value::Na]));
        assert_eq!(rounded.to_json(), serde_json::json!([0.13, null]));
    }
}
