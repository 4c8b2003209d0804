//! Single-asset sequential backtest engine.
//!
//! One pass over chronologically ordered bars: record the day's equity, then
//! act on the day's signal at the close. At most one position is open at a
//! time; it is never force-closed at the end of the run.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::bar::{Bar, check_chronological};
use super::error::TwquantError;
use super::execution::{CostBasis, CostModel, execute_buy, execute_sell};
use super::metrics::{DEFAULT_RISK_FREE_RATE, Metrics};
use super::portfolio::EquityPoint;
use super::position::{Position, Trade};
use super::risk::{PositionSizer, RiskManager, StopRules};
use super::strategy::{Signal, Strategy};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_capital: f64,
    pub costs: CostModel,
    pub risk_free_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            initial_capital: 1_000_000.0,
            costs: CostModel::default(),
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub strategy: String,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: Metrics,
    pub signals: Vec<Signal>,
}

#[derive(Debug, Clone, Default)]
pub struct BacktestEngine {
    pub config: EngineConfig,
    stops: Option<StopRules>,
    sizer: Option<PositionSizer>,
}

pub(crate) fn log_fill(verbose: bool, trade: &Trade) {
    if verbose {
        info!(
            side = %trade.side,
            date = %trade.date,
            ticker = trade.ticker.as_deref().unwrap_or("-"),
            price = trade.price,
            shares = trade.shares,
            profit = trade.profit,
            reason = trade.reason.as_deref(),
            "fill"
        );
    } else {
        debug!(
            side = %trade.side,
            date = %trade.date,
            ticker = trade.ticker.as_deref().unwrap_or("-"),
            price = trade.price,
            shares = trade.shares,
            profit = trade.profit,
            reason = trade.reason.as_deref(),
            "fill"
        );
    }
}

/// Win rate and profit factor of the closed trades so far, for Kelly sizing.
fn closed_trade_stats(trades: &[Trade]) -> (f64, f64) {
    let profits: Vec<f64> = trades.iter().filter_map(|t| t.profit).collect();
    if profits.is_empty() {
        return (0.0, 0.0);
    }
    let wins: Vec<f64> = profits.iter().copied().filter(|p| *p > 0.0).collect();
    let losses: Vec<f64> = profits.iter().copied().filter(|p| *p < 0.0).collect();
    let win_rate = wins.len() as f64 / profits.len() as f64;
    let avg = |v: &[f64]| {
        if v.is_empty() {
            0.0
        } else {
            v.iter().sum::<f64>() / v.len() as f64
        }
    };
    let (avg_win, avg_loss) = (avg(&wins), avg(&losses));
    let profit_factor = if avg_loss != 0.0 {
        (avg_win / avg_loss).abs()
    } else {
        0.0
    };
    (win_rate, profit_factor)
}

impl BacktestEngine {
    pub fn new(config: EngineConfig) -> Self {
        BacktestEngine {
            config,
            stops: None,
            sizer: None,
        }
    }

    /// Exit open positions on stop-loss, take-profit or trailing-stop breaches
    /// before the bar's signal is considered.
    pub fn with_stops(mut self, rules: StopRules) -> Self {
        self.stops = (!rules.is_empty()).then_some(rules);
        self
    }

    /// Size entries with `sizer` instead of `cash × position_size`.
    pub fn with_sizer(mut self, sizer: PositionSizer) -> Self {
        self.sizer = Some(sizer);
        self
    }

    pub fn run(
        &self,
        bars: &[Bar],
        strategy: &dyn Strategy,
        position_size: f64,
        verbose: bool,
    ) -> Result<BacktestResult, TwquantError> {
        let name = strategy.name();
        if bars.is_empty() {
            return Err(TwquantError::InsufficientData {
                ticker: name,
                bars: 0,
                minimum: 1,
            });
        }
        if !(0.0..=1.0).contains(&position_size) {
            return Err(TwquantError::InvalidParameter {
                name: "position_size".into(),
                reason: format!("{position_size} is outside [0, 1]"),
            });
        }
        check_chronological(bars)?;

        let signals = strategy.generate_signals(bars)?;
        if signals.len() != bars.len() {
            return Err(TwquantError::SignalMismatch {
                bars: bars.len(),
                signals: signals.len(),
            });
        }

        let costs = &self.config.costs;
        let mut cash = self.config.initial_capital;
        let mut position = Position::default();
        let mut trades: Vec<Trade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::with_capacity(bars.len());
        let mut risk = self.stops.map(RiskManager::new);

        for (bar, signal) in bars.iter().zip(&signals) {
            let market_value = position.market_value(bar.close);
            equity_curve.push(EquityPoint {
                date: bar.date,
                equity: cash + market_value,
                cash,
                market_value,
            });

            if position.is_open() {
                if let Some(rm) = risk.as_mut() {
                    if let Some(reason) = rm.check_exit(position.average_cost, bar.close) {
                        let reason = reason.to_string();
                        let shares = position.shares;
                        if let Some(trade) = execute_sell(
                            &mut cash,
                            &mut position,
                            None,
                            bar.date,
                            bar.close,
                            shares,
                            costs,
                            Some(&reason),
                        ) {
                            log_fill(verbose, &trade);
                            trades.push(trade);
                        }
                        continue;
                    }
                }
            }

            match signal {
                Signal::Buy if !position.is_open() => {
                    let buy_price = costs.buy_price(bar.close);
                    let wanted = match &self.sizer {
                        Some(sizer) => {
                            let (win_rate, profit_factor) = closed_trade_stats(&trades);
                            sizer.get_shares(cash, buy_price, win_rate, profit_factor)
                        }
                        None => (cash * position_size / buy_price).floor() as u64,
                    };
                    let shares = wanted.min(costs.affordable_shares(cash, buy_price));
                    if let Some(trade) = execute_buy(
                        &mut cash,
                        &mut position,
                        None,
                        bar.date,
                        bar.close,
                        shares,
                        costs,
                        CostBasis::FillPrice,
                        None,
                    ) {
                        if let Some(rm) = risk.as_mut() {
                            rm.reset_at(trade.price);
                        }
                        log_fill(verbose, &trade);
                        trades.push(trade);
                    }
                }
                Signal::Sell if position.is_open() => {
                    let shares = position.shares;
                    if let Some(trade) = execute_sell(
                        &mut cash,
                        &mut position,
                        None,
                        bar.date,
                        bar.close,
                        shares,
                        costs,
                        None,
                    ) {
                        log_fill(verbose, &trade);
                        trades.push(trade);
                    }
                }
                _ => {}
            }
        }

        // The last point reflects any fill made on the final bar.
        if let (Some(last), Some(bar)) = (equity_curve.last_mut(), bars.last()) {
            let market_value = position.market_value(bar.close);
            *last = EquityPoint {
                date: bar.date,
                equity: cash + market_value,
                cash,
                market_value,
            };
        }

        let metrics = Metrics::compute(
            &trades,
            &equity_curve,
            self.config.initial_capital,
            self.config.risk_free_rate,
        );
        debug!(
            strategy = %name,
            trades = trades.len(),
            total_return = metrics.total_return,
            "run complete"
        );

        Ok(BacktestResult {
            strategy: name,
            trades,
            equity_curve,
            metrics,
            signals,
        })
    }

    /// Run every strategy over the same bars at full position size; results
    /// keep input order.
    pub fn run_multiple(
        &self,
        bars: &[Bar],
        strategies: &[Box<dyn Strategy>],
    ) -> Result<Vec<(String, Metrics)>, TwquantError> {
        strategies
            .par_iter()
            .map(|strategy| {
                let result = self.run(bars, strategy.as_ref(), 1.0, false)?;
                Ok((result.strategy, result.metrics))
            })
            .collect()
    }
}
