//! Many-ticker drivers around the single-asset engine.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use super::engine::BacktestEngine;
use super::error::TwquantError;
use super::metrics::Metrics;
use super::optimizer::RankMetric;
use super::strategy::Strategy;
use crate::ports::data_port::DataPort;

#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    /// Entries kept after sorting; 0 keeps all.
    pub top_n: usize,
    pub sort_by: RankMetric,
    pub min_trades: usize,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions {
            top_n: 20,
            sort_by: RankMetric::TotalReturn,
            min_trades: 3,
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub ticker: String,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTicker {
    pub ticker: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
    pub skipped: Vec<SkippedTicker>,
}

fn load_and_run(
    engine: &BacktestEngine,
    port: &dyn DataPort,
    ticker: &str,
    strategy: &dyn Strategy,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<Metrics, TwquantError> {
    let bars = port.fetch_bars(ticker, start, end)?;
    if bars.is_empty() {
        return Err(TwquantError::NoData {
            ticker: ticker.to_string(),
        });
    }
    Ok(engine.run(&bars, strategy, 1.0, false)?.metrics)
}

/// Run one strategy over every ticker. A ticker that fails to load or run is
/// reported in `skipped` and does not abort the batch.
pub fn batch_backtest(
    engine: &BacktestEngine,
    port: &dyn DataPort,
    tickers: &[String],
    strategy: &dyn Strategy,
    options: &BatchOptions,
) -> BatchReport {
    let outcomes: Vec<(String, Result<Metrics, TwquantError>)> = tickers
        .par_iter()
        .map(|ticker| {
            let outcome = load_and_run(engine, port, ticker, strategy, options.start, options.end);
            (ticker.clone(), outcome)
        })
        .collect();

    let mut report = BatchReport::default();
    for (ticker, outcome) in outcomes {
        match outcome {
            Ok(metrics) if metrics.trade_count >= options.min_trades => {
                report.entries.push(BatchEntry { ticker, metrics });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "skipping ticker");
                report.skipped.push(SkippedTicker {
                    ticker,
                    reason: e.to_string(),
                });
            }
        }
    }

    let metric = options.sort_by;
    report.entries.sort_by(|a, b| {
        metric
            .value(&b.metrics)
            .total_cmp(&metric.value(&a.metrics))
    });
    if options.top_n > 0 {
        report.entries.truncate(options.top_n);
    }
    info!(
        strategy = %strategy.name(),
        kept = report.entries.len(),
        skipped = report.skipped.len(),
        "batch complete"
    );
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    #[default]
    Mean,
    Median,
    Sum,
}

impl Aggregate {
    /// Zero for an empty slice.
    pub fn apply(self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            Aggregate::Sum => values.iter().sum(),
            Aggregate::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregate::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Aggregate::Mean => "mean",
            Aggregate::Median => "median",
            Aggregate::Sum => "sum",
        })
    }
}

impl FromStr for Aggregate {
    type Err = TwquantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(Aggregate::Mean),
            "median" => Ok(Aggregate::Median),
            "sum" => Ok(Aggregate::Sum),
            other => Err(TwquantError::InvalidParameter {
                name: "aggregate".into(),
                reason: format!("unknown aggregate `{other}`"),
            }),
        }
    }
}

/// One strategy's metrics folded across every ticker it ran on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategySummary {
    pub strategy: String,
    pub aggregate: Aggregate,
    pub tickers_tested: usize,
    pub total_return: f64,
    pub annual_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub trade_count: f64,
}

impl StrategySummary {
    fn fold(strategy: String, aggregate: Aggregate, runs: &[Metrics]) -> Self {
        let agg = |f: fn(&Metrics) -> f64| {
            let values: Vec<f64> = runs.iter().map(f).collect();
            aggregate.apply(&values)
        };
        StrategySummary {
            strategy,
            aggregate,
            tickers_tested: runs.len(),
            total_return: agg(|m| m.total_return),
            annual_return: agg(|m| m.annual_return),
            sharpe_ratio: agg(|m| m.sharpe_ratio),
            max_drawdown: agg(|m| m.max_drawdown),
            win_rate: agg(|m| m.win_rate),
            profit_factor: agg(|m| m.profit_factor),
            trade_count: agg(|m| m.trade_count as f64),
        }
    }
}

/// Run every strategy on every ticker and summarise per strategy, in input
/// order. Each ticker's bars are loaded once.
pub fn compare_strategies(
    engine: &BacktestEngine,
    port: &dyn DataPort,
    tickers: &[String],
    strategies: &[Box<dyn Strategy>],
    aggregate: Aggregate,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<StrategySummary> {
    let per_ticker: Vec<Vec<Option<Metrics>>> = tickers
        .par_iter()
        .map(|ticker| match port.fetch_bars(ticker, start, end) {
            Ok(bars) if !bars.is_empty() => strategies
                .iter()
                .map(|strategy| match engine.run(&bars, strategy.as_ref(), 1.0, false) {
                    Ok(result) => Some(result.metrics),
                    Err(e) => {
                        warn!(ticker = %ticker, strategy = %strategy.name(), error = %e, "run skipped");
                        None
                    }
                })
                .collect(),
            Ok(_) => {
                warn!(ticker = %ticker, "no bars, skipping");
                vec![None; strategies.len()]
            }
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "skipping ticker");
                vec![None; strategies.len()]
            }
        })
        .collect();

    strategies
        .iter()
        .enumerate()
        .map(|(i, strategy)| {
            let runs: Vec<Metrics> = per_ticker
                .iter()
                .filter_map(|row| row[i].clone())
                .collect();
            StrategySummary::fold(strategy.name(), aggregate, &runs)
        })
        .collect()
}
