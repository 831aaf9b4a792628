use data_feed::daily_series;
use script_engine::{ContextConfig, IndicatorRunner, ScriptCompiler};

const SCRIPT: &str = r#"(context) => {
    const { array } = context;
    const { close } = context.data;
    const arr = array.new_float(10, close);
    array.set(arr, 1, 99);
    const biased = array.variance(arr);
    const unbiased = array.variance(arr, false);
    return { biased, unbiased, size: array.size(arr) };
}"#;

// 2024-01-31T00:00:00Z
const END: i64 = 1_706_659_200_000;

const CLOSES: [f64; 7] = [101.0, 97.0, 104.0, 99.5, 110.0, 92.0, 100.0];

// Nine copies of the close and one 99: the biased variance is 0.09 * (close - 99)^2.
const BIASED: [f64; 5] = [2.25, 0.0225, 10.89, 4.41, 0.09];
// Same spread over n - 1: 0.1 * (close - 99)^2.
const UNBIASED: [f64; 5] = [2.5, 0.025, 12.1, 4.9, 0.1];

fn last5(values: Vec<f64>) -> Vec<f64> {
    values[values.len() - 5..].to_vec()
}

fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{actual:?} != {expected:?}");
    }
}

#[test]
fn array_variance_biased_and_unbiased() {
    let bound = ScriptCompiler::default()
        .compile_and_bind(SCRIPT, &serde_json::Value::Null)
        .unwrap();
    let candles = daily_series(END, &CLOSES).unwrap();
    let out = IndicatorRunner::new(bound, ContextConfig::default())
        .run(&candles)
        .unwrap();

    let biased = last5(out.numbers("biased").unwrap());
    let unbiased = last5(out.numbers("unbiased").unwrap());
    assert_close(&biased, &BIASED);
    assert_close(&unbiased, &UNBIASED);
    for (b, u) in biased.iter().zip(&unbiased) {
        assert!((u * 9.0 / 10.0 - b).abs() < 1e-9);
    }
    assert!(out.numbers("size").unwrap().iter().all(|s| *s == 10.0));
}
