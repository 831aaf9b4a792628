use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("period must be at least 1, got {0}")]
    InvalidPeriod(usize),
}

fn check_period(period: usize) -> Result<usize, KernelError> {
    if period == 0 {
        Err(KernelError::InvalidPeriod(period))
    } else {
        Ok(period)
    }
}

/// Incremental single-input smoother. `next` returns NaN until warmed up.
pub trait Kernel {
    fn next(&mut self, value: f64) -> f64;
}

// ---------- moving averages --------------------------------------------------

/// Exponentially weighted average seeded with the simple mean of the first `period` inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ema {
    period: usize,
    alpha: f64,
    seed_sum: f64,
    count: usize,
    value: Option<f64>,
}

impl Ema {
    pub fn new(period: usize) -> Result<Self, KernelError> {
        let period = check_period(period)?;
        Ok(Self::with_alpha(period, 2.0 / (period as f64 + 1.0)))
    }

    fn with_alpha(period: usize, alpha: f64) -> Self {
        Self {
            period,
            alpha,
            seed_sum: 0.0,
            count: 0,
            value: None,
        }
    }
}

impl Kernel for Ema {
    fn next(&mut self, value: f64) -> f64 {
        if value.is_nan() {
            return self.value.unwrap_or(f64::NAN);
        }
        match self.value {
            Some(prev) => {
                let ema = self.alpha * value + (1.0 - self.alpha) * prev;
                self.value = Some(ema);
                ema
            }
            None => {
                self.count += 1;
                self.seed_sum += value;
                if self.count < self.period {
                    return f64::NAN;
                }
                let seed = self.seed_sum / self.period as f64;
                self.value = Some(seed);
                seed
            }
        }
    }
}

/// Wilder's running moving average (alpha = 1 / period).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rma(Ema);

impl Rma {
    pub fn new(period: usize) -> Result<Self, KernelError> {
        let period = check_period(period)?;
        Ok(Self(Ema::with_alpha(period, 1.0 / period as f64)))
    }
}

impl Kernel for Rma {
    fn next(&mut self, value: f64) -> f64 {
        self.0.next(value)
    }
}

// ---------- oscillators ------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rsi {
    prev: Option<f64>,
    gain: Rma,
    loss: Rma,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, KernelError> {
        Ok(Self {
            prev: None,
            gain: Rma::new(period)?,
            loss: Rma::new(period)?,
        })
    }
}

impl Kernel for Rsi {
    fn next(&mut self, value: f64) -> f64 {
        if value.is_nan() {
            return f64::NAN;
        }
        let Some(prev) = self.prev.replace(value) else {
            return f64::NAN;
        };
        let delta = value - prev;
        let avg_gain = self.gain.next(delta.max(0.0));
        let avg_loss = self.loss.next((-delta).max(0.0));
        if avg_gain.is_nan() || avg_loss.is_nan() {
            f64::NAN
        } else if avg_loss == 0.0 {
            100.0
        } else {
            let rs = avg_gain / avg_loss;
            100.0 - (100.0 / (1.0 + rs))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD: fast/slow EMAs and a signal EMA over their difference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macd {
    fast: Ema,
    slow: Ema,
    signal: Ema,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, KernelError> {
        Ok(Self {
            fast: Ema::new(fast)?,
            slow: Ema::new(slow)?,
            signal: Ema::new(signal)?,
        })
    }

    pub fn next(&mut self, value: f64) -> MacdPoint {
        let macd = self.fast.next(value) - self.slow.next(value);
        let signal = self.signal.next(macd);
        MacdPoint {
            macd,
            signal,
            histogram: macd - signal,
        }
    }
}

/// Running total that ignores NaN inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cumulative {
    total: f64,
}

impl Kernel for Cumulative {
    fn next(&mut self, value: f64) -> f64 {
        if !value.is_nan() {
            self.total += value;
        }
        self.total
    }
}

// ---------- window statistics -------------------------------------------------

pub mod stats {
    //! Whole-slice statistics. Empty input and NaN members yield NaN.

    pub fn sum(values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        values.iter().sum()
    }

    pub fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            return f64::NAN;
        }
        values.iter().sum::<f64>() / values.len() as f64
    }

    /// Population variance when `biased`, sample variance (n - 1 divisor) otherwise.
    pub fn variance(values: &[f64], biased: bool) -> f64 {
        let n = values.len();
        let divisor = if biased { n } else { n.saturating_sub(1) };
        if divisor == 0 {
            return f64::NAN;
        }
        let m = mean(values);
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / divisor as f64
    }

    pub fn stdev(values: &[f64], biased: bool) -> f64 {
        variance(values, biased).sqrt()
    }

    pub fn highest(values: &[f64]) -> f64 {
        if values.is_empty() || values.iter().any(|v| v.is_nan()) {
            return f64::NAN;
        }
        values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn lowest(values: &[f64]) -> f64 {
        if values.is_empty() || values.iter().any(|v| v.is_nan()) {
            return f64::NAN;
        }
        values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Linearly weighted mean; `values` is newest first, so index 0 carries the largest weight.
    pub fn wma(values: &[f64]) -> f64 {
        let n = values.len();
        if n == 0 {
            return f64::NAN;
        }
        let mut num = 0.0;
        let mut den = 0.0;
        for (i, v) in values.iter().enumerate() {
            let w = (n - i) as f64;
            num += v * w;
            den += w;
        }
        num / den
    }
}

// ---------- call-site keyed state ----------------------------------------------

#[derive(Debug, Clone)]
struct CallSiteState<K> {
    step: u64,
    before: K,
    after: K,
}

/// Per-call-site kernel state.
///
/// Each compiled call carries a stable id. The first call in a step advances the state
/// from the previous step; further calls with the same id in the same step recompute
/// from the pre-step snapshot instead of advancing twice.
#[derive(Debug, Clone)]
pub struct CallSiteStates<K> {
    states: HashMap<String, CallSiteState<K>>,
}

impl<K> Default for CallSiteStates<K> {
    fn default() -> Self {
        Self {
            states: HashMap::new(),
        }
    }
}

impl<K: Clone> CallSiteStates<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn update<R>(
        &mut self,
        call_id: &str,
        step: u64,
        init: impl FnOnce() -> Result<K, KernelError>,
        apply: impl FnOnce(&mut K) -> R,
    ) -> Result<R, KernelError> {
        let entry = match self.states.entry(call_id.to_string()) {
            Entry::Occupied(slot) => slot.into_mut(),
            Entry::Vacant(slot) => {
                let fresh = init()?;
                slot.insert(CallSiteState {
                    step,
                    before: fresh.clone(),
                    after: fresh,
                })
            }
        };
        if entry.step == step {
            entry.after = entry.before.clone();
        } else {
            entry.before = entry.after.clone();
            entry.step = step;
        }
        Ok(apply(&mut entry.after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed<K: Kernel>(kernel: &mut K, values: &[f64]) -> Vec<f64> {
        values.iter().map(|v| kernel.next(*v)).collect()
    }

    #[test]
    fn ema_seeds_with_simple_mean() {
        let mut ema = Ema::new(3).unwrap();
        let out = feed(&mut ema, &[1.0, 2.0, 3.0, 4.0]);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[3], 0.5 * 4.0 + 0.5 * 2.0);
    }

    #[test]
    fn ema_skips_nan_inputs() {
        let mut ema = Ema::new(1).unwrap();
        assert_eq!(ema.next(5.0), 5.0);
        assert_eq!(ema.next(f64::NAN), 5.0);
    }

    #[test]
    fn zero_period_is_rejected() {
        assert_eq!(Ema::new(0).unwrap_err(), KernelError::InvalidPeriod(0));
        assert!(Rsi::new(0).is_err());
    }

    #[test]
    fn rsi_saturates_on_monotonic_rise() {
        let mut rsi = Rsi::new(3).unwrap();
        let out = feed(&mut rsi, &[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!(out[0].is_nan());
        assert_eq!(*out.last().unwrap(), 100.0);
    }

    #[test]
    fn macd_histogram_is_difference() {
        let mut macd = Macd::new(2, 3, 2).unwrap();
        let mut last = None;
        for v in [10.0, 11.0, 12.0, 13.0, 15.0, 14.0] {
            last = Some(macd.next(v));
        }
        let p = last.unwrap();
        assert!((p.histogram - (p.macd - p.signal)).abs() < 1e-12);
    }

    #[test]
    fn variance_divisors_differ_by_sample_ratio() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let biased = stats::variance(&values, true);
        let unbiased = stats::variance(&values, false);
        assert_eq!(biased, 4.0);
        assert!((unbiased - biased * 8.0 / 7.0).abs() < 1e-12);
        assert!(stats::variance(&[1.0], false).is_nan());
    }

    #[test]
    fn wma_weights_newest_first() {
        assert_eq!(stats::wma(&[3.0, 2.0, 1.0]), (9.0 + 4.0 + 1.0) / 6.0);
    }

    #[test]
    fn call_site_state_advances_once_per_step() {
        let mut states: CallSiteStates<Cumulative> = CallSiteStates::new();
        let mut run = |step| {
            states
                .update("_ta0", step, || Ok(Cumulative::default()), |k| k.next(1.0))
                .unwrap()
        };
        assert_eq!(run(0), 1.0);
        assert_eq!(run(0), 1.0);
        assert_eq!(run(1), 2.0);
        assert_eq!(run(2), 3.0);
    }

    #[test]
    fn call_sites_are_independent() {
        let mut states: CallSiteStates<Cumulative> = CallSiteStates::new();
        let a = states.update("_ta0", 0, || Ok(Cumulative::default()), |k| k.next(2.0));
        let b = states.update("_ta1", 0, || Ok(Cumulative::default()), |k| k.next(5.0));
        assert_eq!(a, Ok(2.0));
        assert_eq!(b, Ok(5.0));
        assert_eq!(states.len(), 2);
    }
}
