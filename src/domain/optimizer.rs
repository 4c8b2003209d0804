//! Exhaustive grid search over strategy parameters.

use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use super::bar::Bar;
use super::engine::{BacktestEngine, BacktestResult};
use super::error::TwquantError;
use super::metrics::Metrics;
use super::rolling::ensure_moving_averages;
use super::strategy::{ParamSet, Strategy};

/// Named parameter axes in insertion order. Combinations vary the last axis
/// fastest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamGrid {
    axes: Vec<(String, Vec<f64>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, values: Vec<f64>) -> Self {
        self.axes.push((name.to_string(), values));
        self
    }

    pub fn axes(&self) -> &[(String, Vec<f64>)] {
        &self.axes
    }

    pub fn len(&self) -> usize {
        self.axes.iter().map(|(_, v)| v.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn combinations(&self) -> Vec<ParamSet> {
        self.axes
            .iter()
            .fold(vec![ParamSet::new()], |combos, (name, values)| {
                combos
                    .iter()
                    .flat_map(|combo| {
                        values.iter().map(move |v| {
                            let mut next = combo.clone();
                            next.insert(name.clone(), *v);
                            next
                        })
                    })
                    .collect()
            })
    }

    /// Values of axes that name a moving-average window.
    fn ma_periods(&self) -> Vec<usize> {
        let mut periods: Vec<usize> = self
            .axes
            .iter()
            .filter(|(name, _)| name.contains("period") || name == "short" || name == "long")
            .flat_map(|(_, values)| values.iter())
            .filter(|v| **v >= 1.0 && v.fract() == 0.0)
            .map(|v| *v as usize)
            .collect();
        periods.sort_unstable();
        periods.dedup();
        periods
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RankMetric {
    #[default]
    SharpeRatio,
    TotalReturn,
    AnnualReturn,
    /// Compared like the others: larger, i.e. shallower, is better.
    MaxDrawdown,
    WinRate,
    ProfitFactor,
}

impl RankMetric {
    pub fn value(self, metrics: &Metrics) -> f64 {
        match self {
            RankMetric::SharpeRatio => metrics.sharpe_ratio,
            RankMetric::TotalReturn => metrics.total_return,
            RankMetric::AnnualReturn => metrics.annual_return,
            RankMetric::MaxDrawdown => metrics.max_drawdown,
            RankMetric::WinRate => metrics.win_rate,
            RankMetric::ProfitFactor => metrics.profit_factor,
        }
    }
}

impl fmt::Display for RankMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RankMetric::SharpeRatio => "sharpe_ratio",
            RankMetric::TotalReturn => "total_return",
            RankMetric::AnnualReturn => "annual_return",
            RankMetric::MaxDrawdown => "max_drawdown",
            RankMetric::WinRate => "win_rate",
            RankMetric::ProfitFactor => "profit_factor",
        };
        f.write_str(name)
    }
}

impl FromStr for RankMetric {
    type Err = TwquantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sharpe_ratio" | "sharpe" => Ok(RankMetric::SharpeRatio),
            "total_return" => Ok(RankMetric::TotalReturn),
            "annual_return" => Ok(RankMetric::AnnualReturn),
            "max_drawdown" => Ok(RankMetric::MaxDrawdown),
            "win_rate" => Ok(RankMetric::WinRate),
            "profit_factor" => Ok(RankMetric::ProfitFactor),
            other => Err(TwquantError::InvalidParameter {
                name: "metric".into(),
                reason: format!("unknown metric `{other}`"),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationRecord {
    pub params: ParamSet,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCombination {
    pub params: ParamSet,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub metric: RankMetric,
    /// `None` when every combination was skipped.
    pub best_params: Option<ParamSet>,
    pub best_score: f64,
    pub best_result: Option<BacktestResult>,
    /// Successful runs in grid order.
    pub all_results: Vec<OptimizationRecord>,
    pub skipped: Vec<SkippedCombination>,
}

impl OptimizationResult {
    /// Runs with at least `min_trades` closed trades, best first. Falls back
    /// to every run when none qualifies.
    pub fn ranked(&self, min_trades: usize) -> Vec<&OptimizationRecord> {
        let mut ranked: Vec<&OptimizationRecord> = self
            .all_results
            .iter()
            .filter(|r| r.metrics.trade_count >= min_trades)
            .collect();
        if ranked.is_empty() {
            ranked = self.all_results.iter().collect();
        }
        let metric = self.metric;
        ranked.sort_by(|a, b| {
            metric
                .value(&b.metrics)
                .total_cmp(&metric.value(&a.metrics))
        });
        ranked
    }
}

impl BacktestEngine {
    /// Run `factory`'s strategy for every grid combination at full position
    /// size and keep the one maximising `metric`; ties go to the earlier
    /// combination. Failing combinations are skipped, never fatal. Missing
    /// `ma{n}` columns for period-like axes are filled from the close.
    pub fn optimize<F>(
        &self,
        bars: &[Bar],
        factory: F,
        grid: &ParamGrid,
        metric: RankMetric,
    ) -> OptimizationResult
    where
        F: Fn(&ParamSet) -> Result<Box<dyn Strategy>, TwquantError> + Sync,
    {
        let mut prepared = bars.to_vec();
        ensure_moving_averages(&mut prepared, &grid.ma_periods());

        let combinations = grid.combinations();
        info!(combinations = combinations.len(), %metric, "grid search");

        let outcomes: Vec<(ParamSet, Result<BacktestResult, TwquantError>)> = combinations
            .into_par_iter()
            .map(|params| {
                let outcome = factory(&params)
                    .and_then(|strategy| self.run(&prepared, strategy.as_ref(), 1.0, false));
                (params, outcome)
            })
            .collect();

        let mut best_score = f64::NEG_INFINITY;
        let mut best: Option<(ParamSet, BacktestResult)> = None;
        let mut all_results = Vec::new();
        let mut skipped = Vec::new();
        for (params, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    let score = metric.value(&result.metrics);
                    all_results.push(OptimizationRecord {
                        params: params.clone(),
                        metrics: result.metrics.clone(),
                    });
                    if score > best_score {
                        best_score = score;
                        best = Some((params, result));
                    }
                }
                Err(e) => {
                    warn!(?params, error = %e, "skipping combination");
                    skipped.push(SkippedCombination {
                        params,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let (best_params, best_result) = match best {
            Some((params, result)) => (Some(params), Some(result)),
            None => (None, None),
        };
        OptimizationResult {
            metric,
            best_params,
            best_score,
            best_result,
            all_results,
            skipped,
        }
    }
}
