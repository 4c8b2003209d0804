//! Trailing-window statistics over bar series.
//!
//! Each helper returns one entry per input value; entries before the first
//! full window are `None`, so comparisons against them never fire.

use super::bar::Bar;

fn rolling<T>(values: &[f64], window: usize, reduce: impl Fn(&[f64]) -> T) -> Vec<Option<T>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                None
            } else {
                Some(reduce(&values[i + 1 - window..=i]))
            }
        })
        .collect()
}

pub fn rolling_max(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

pub fn rolling_min(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling(values, window, |w| w.iter().sum::<f64>() / w.len() as f64)
}

/// Number of `true` flags in each trailing window.
pub fn rolling_count(flags: &[bool], window: usize) -> Vec<Option<usize>> {
    (0..flags.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                None
            } else {
                Some(flags[i + 1 - window..=i].iter().filter(|&&f| f).count())
            }
        })
        .collect()
}

/// Add a simple moving average of close as `ma{period}` for every period the
/// series does not already carry. Existing fields are left untouched.
pub fn ensure_moving_averages(bars: &mut [Bar], periods: &[usize]) {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    for &period in periods {
        let name = format!("ma{period}");
        if period == 0 || bars.iter().any(|b| b.fields.contains_key(&name)) {
            continue;
        }
        for (bar, value) in bars.iter_mut().zip(rolling_mean(&closes, period)) {
            if let Some(v) = value {
                bar.fields.insert(name.clone(), v);
            }
        }
    }
}
