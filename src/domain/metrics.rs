//! Performance metrics computed once from a finished run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::portfolio::EquityPoint;
use super::position::Trade;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub initial_capital: f64,
    pub final_capital: f64,
    pub total_return: f64,
    pub annual_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_date: Option<NaiveDate>,
    /// Closed (sell) trades.
    pub trade_count: usize,
    /// Every ledger entry, buys included.
    pub total_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub total_profit: f64,
    pub total_loss: f64,
}

impl Metrics {
    pub fn compute(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        initial_capital: f64,
        risk_free_rate: f64,
    ) -> Self {
        let final_capital = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_capital);

        let total_return = if initial_capital > 0.0 {
            (final_capital - initial_capital) / initial_capital
        } else {
            0.0
        };

        let annual_return = annualize(total_return, equity_curve.len());
        let volatility = annualized_volatility(equity_curve);
        let sharpe_ratio = if volatility > 0.0 {
            (annual_return - risk_free_rate) / volatility
        } else {
            0.0
        };

        let (max_drawdown, max_drawdown_date) = compute_drawdown(equity_curve);

        let profits: Vec<f64> = trades.iter().filter_map(|t| t.profit).collect();
        let wins: Vec<f64> = profits.iter().copied().filter(|&p| p > 0.0).collect();
        let losses: Vec<f64> = profits.iter().copied().filter(|&p| p < 0.0).collect();

        let win_rate = if profits.is_empty() {
            0.0
        } else {
            wins.len() as f64 / profits.len() as f64
        };
        let avg_win = mean(&wins);
        let avg_loss = mean(&losses);

        let profit_factor = if avg_loss != 0.0 {
            (avg_win / avg_loss).abs()
        } else if avg_win > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        Metrics {
            initial_capital,
            final_capital,
            total_return,
            annual_return,
            volatility,
            sharpe_ratio,
            max_drawdown,
            max_drawdown_date,
            trade_count: profits.len(),
            total_trades: trades.len(),
            win_rate,
            avg_win,
            avg_loss,
            profit_factor,
            total_profit: wins.iter().sum(),
            total_loss: losses.iter().sum(),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// (1 + total)^(252 / days) - 1; zero for an empty curve or a wiped-out account.
fn annualize(total_return: f64, trading_days: usize) -> f64 {
    if trading_days == 0 {
        return 0.0;
    }
    let growth = 1.0 + total_return;
    if growth < 0.0 {
        return 0.0;
    }
    let annual = growth.powf(TRADING_DAYS_PER_YEAR / trading_days as f64) - 1.0;
    if annual.is_finite() { annual } else { 0.0 }
}

/// Sample standard deviation (n - 1) of day-over-day equity returns, times sqrt(252).
fn annualized_volatility(equity_curve: &[EquityPoint]) -> f64 {
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .filter(|w| w[0].equity != 0.0)
        .map(|w| (w[1].equity - w[0].equity) / w[0].equity)
        .collect();

    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let avg = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - avg).powi(2)).sum::<f64>() / (n - 1.0);
    let vol = variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt();
    if vol.is_finite() { vol } else { 0.0 }
}

/// Deepest (equity - running_max) / running_max, as a value <= 0, and the
/// date it was reached. Zero with no date for a non-decreasing curve.
fn compute_drawdown(equity_curve: &[EquityPoint]) -> (f64, Option<NaiveDate>) {
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    let mut max_dd_date = None;

    for point in equity_curve {
        peak = peak.max(point.equity);
        if peak <= 0.0 {
            continue;
        }
        let dd = (point.equity - peak) / peak;
        if dd < max_dd {
            max_dd = dd;
            max_dd_date = Some(point.date);
        }
    }

    (max_dd, max_dd_date)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::position::TradeSide;
    use approx::assert_relative_eq;

    fn make_equity_curve(values: &[f64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquityPoint {
                date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
                    + chrono::Duration::days(i as i64),
                equity: v,
                cash: v,
                market_value: 0.0,
            })
            .collect()
    }

    fn make_sell(profit: f64) -> Trade {
        Trade {
            side: TradeSide::Sell,
            date: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            ticker: None,
            price: 100.0,
            shares: 100,
            amount: 10_000.0 + profit,
            profit: Some(profit),
            return_pct: Some(profit / 10_000.0),
            reason: None,
        }
    }

    fn make_buy() -> Trade {
        Trade {
            side: TradeSide::Buy,
            profit: None,
            return_pct: None,
            ..make_sell(0.0)
        }
    }

    #[test]
    fn empty_run_has_neutral_metrics() {
        let metrics = Metrics::compute(&[], &[], 100_000.0, 0.02);
        assert!((metrics.final_capital - 100_000.0).abs() < f64::EPSILON);
        assert!((metrics.total_return - 0.0).abs() < f64::EPSILON);
        assert!((metrics.annual_return - 0.0).abs() < f64::EPSILON);
        assert!((metrics.sharpe_ratio - 0.0).abs() < f64::EPSILON);
        assert!((metrics.max_drawdown - 0.0).abs() < f64::EPSILON);
        assert_eq!(metrics.trade_count, 0);
        assert!((metrics.profit_factor - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn total_return_from_last_equity() {
        let curve = make_equity_curve(&[100_000.0, 110_000.0]);
        let metrics = Metrics::compute(&[], &curve, 100_000.0, 0.02);
        assert_relative_eq!(metrics.total_return, 0.10, epsilon = 1e-12);
        assert_relative_eq!(metrics.final_capital, 110_000.0);
    }

    #[test]
    fn annual_return_uses_252_over_days() {
        let mut values = vec![100_000.0; 251];
        values.push(110_000.0);
        let curve = make_equity_curve(&values);
        let metrics = Metrics::compute(&[], &curve, 100_000.0, 0.02);
        assert_relative_eq!(metrics.annual_return, 0.10, epsilon = 1e-12);

        let half = make_equity_curve(&[100_000.0; 126].iter().copied().chain([121_000.0]).collect::<Vec<_>>());
        let m = Metrics::compute(&[], &half, 100_000.0, 0.02);
        let expected = 1.21_f64.powf(252.0 / 127.0) - 1.0;
        assert_relative_eq!(m.annual_return, expected, epsilon = 1e-12);
    }

    #[test]
    fn volatility_is_sample_std_annualized() {
        let curve = make_equity_curve(&[100.0, 110.0, 99.0, 108.9]);
        let returns = [0.1, -0.1, 0.1];
        let avg = (0.1 - 0.1 + 0.1) / 3.0;
        let var: f64 = returns.iter().map(|r: &f64| (r - avg).powi(2)).sum::<f64>() / 2.0;
        let expected = var.sqrt() * 252.0_f64.sqrt();
        let metrics = Metrics::compute(&[], &curve, 100.0, 0.0);
        assert_relative_eq!(metrics.volatility, expected, epsilon = 1e-9);
    }

    #[test]
    fn sharpe_zero_when_volatility_zero() {
        let curve = make_equity_curve(&[100.0, 100.0, 100.0]);
        let metrics = Metrics::compute(&[], &curve, 100.0, 0.02);
        assert!((metrics.volatility - 0.0).abs() < f64::EPSILON);
        assert!((metrics.sharpe_ratio - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sharpe_subtracts_risk_free_rate() {
        let curve = make_equity_curve(&[100.0, 102.0, 101.0, 104.0, 103.0]);
        let metrics = Metrics::compute(&[], &curve, 100.0, 0.02);
        let expected = (metrics.annual_return - 0.02) / metrics.volatility;
        assert_relative_eq!(metrics.sharpe_ratio, expected);
    }

    #[test]
    fn max_drawdown_from_running_peak() {
        let curve = make_equity_curve(&[100.0, 120.0, 90.0, 130.0, 117.0]);
        let metrics = Metrics::compute(&[], &curve, 100.0, 0.02);
        assert_relative_eq!(metrics.max_drawdown, -0.25, epsilon = 1e-12);
        assert_eq!(
            metrics.max_drawdown_date,
            Some(NaiveDate::from_ymd_opt(2024, 1, 3).unwrap())
        );
    }

    #[test]
    fn non_decreasing_curve_has_zero_drawdown() {
        let curve = make_equity_curve(&[100.0, 100.0, 105.0, 110.0]);
        let metrics = Metrics::compute(&[], &curve, 100.0, 0.02);
        assert!((metrics.max_drawdown - 0.0).abs() < f64::EPSILON);
        assert!(metrics.max_drawdown_date.is_none());
    }

    #[test]
    fn trade_statistics_count_closed_trades_only() {
        let trades = vec![
            make_buy(),
            make_sell(300.0),
            make_buy(),
            make_sell(-100.0),
            make_buy(),
            make_sell(100.0),
        ];
        let curve = make_equity_curve(&[100_000.0, 100_300.0]);
        let metrics = Metrics::compute(&trades, &curve, 100_000.0, 0.02);

        assert_eq!(metrics.trade_count, 3);
        assert_eq!(metrics.total_trades, 6);
        assert_relative_eq!(metrics.win_rate, 2.0 / 3.0);
        assert_relative_eq!(metrics.avg_win, 200.0);
        assert_relative_eq!(metrics.avg_loss, -100.0);
        assert_relative_eq!(metrics.profit_factor, 2.0);
        assert_relative_eq!(metrics.total_profit, 400.0);
        assert_relative_eq!(metrics.total_loss, -100.0);
    }

    #[test]
    fn profit_factor_infinite_without_losses() {
        let trades = vec![make_sell(50.0), make_sell(150.0)];
        let metrics = Metrics::compute(&trades, &[], 100_000.0, 0.02);
        assert!(metrics.profit_factor.is_infinite());
        assert_relative_eq!(metrics.win_rate, 1.0);
    }

    #[test]
    fn breakeven_trades_count_against_win_rate() {
        let trades = vec![make_sell(0.0), make_sell(10.0)];
        let metrics = Metrics::compute(&trades, &[], 100_000.0, 0.02);
        assert_eq!(metrics.trade_count, 2);
        assert_relative_eq!(metrics.win_rate, 0.5);
        assert!(metrics.profit_factor.is_infinite());
    }
}
