use chrono::{TimeZone, Utc};
use data_feed::daily_series;
use script_engine::{ContextConfig, IndicatorRunner, ScriptCompiler, Value};

const SCRIPT: &str = r#"(context) => {
    const { ta } = context;
    const { close } = context.data;
    const ema9 = ta.ema(close, 9);
    const ema18 = ta.ema(close, 18);
    const bull_bias = ema9 > ema18;
    const bear_bias = ema9 < ema18;
    return { bull_bias, bear_bias };
}"#;

fn closes() -> Vec<f64> {
    let mut closes = vec![100.0; 90];
    closes.extend([120.0; 8]);
    closes.extend([50.0; 2]);
    closes
}

fn newest_first(mut column: Vec<bool>, n: usize) -> Vec<bool> {
    column.reverse();
    column.truncate(n);
    column
}

#[test]
fn ema_bias_over_a_fixed_daily_series() {
    let end = Utc
        .with_ymd_and_hms(2024, 3, 29, 0, 0, 0)
        .single()
        .unwrap()
        .timestamp_millis();
    let candles = daily_series(end, &closes()).unwrap();
    assert_eq!(candles.len(), 100);
    assert_eq!(candles.last().unwrap().ts, end);

    let bound = ScriptCompiler::default()
        .compile_and_bind(SCRIPT, &serde_json::Value::Null)
        .unwrap();
    let (out, ctx) = IndicatorRunner::new(bound, ContextConfig::default())
        .run_with_context(&candles)
        .unwrap();

    let expected_bull = vec![false, false, true, true, true, true, true, true, true, true];
    let expected_bear: Vec<bool> = expected_bull.iter().map(|b| !b).collect();
    assert_eq!(newest_first(out.bools("bull_bias").unwrap(), 10), expected_bull);
    assert_eq!(newest_first(out.bools("bear_bias").unwrap(), 10), expected_bear);

    // The slot itself holds the same per-step history, newest first.
    let slot: Vec<bool> = ctx
        .history("const", "glb1_bull_bias")
        .unwrap()
        .iter()
        .take(10)
        .map(Value::truthy)
        .collect();
    assert_eq!(slot, expected_bull);
}
