//! Rebalance policies for the portfolio engine.
//!
//! A policy is asked once per simulated date that has at least one priced
//! ticker. It answers with a [`RebalanceDecision`]; all state it needs across
//! calls lives in an explicit state struct it owns.

pub mod buy_and_hold;
pub mod dca;
pub mod equal_weight;
pub mod strategy_driven;

use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::bar::Bar;
use super::position::Position;

pub use buy_and_hold::{
    DiamondHold, ExtraBuy, MultilayerHold, MultilayerState, RebuyAmount, RebuyHold, RebuyPhase,
    RebuyState,
};
pub use dca::{Dca, DcaState};
pub use equal_weight::{EqualWeight, EqualWeightState, Frequency};
pub use strategy_driven::{StrategyDriven, StrategyDrivenState, TickerRule};

/// Ticker to portfolio weight in `[0, 1]`.
pub type TargetWeights = BTreeMap<String, f64>;

/// The day's bars for the tickers that traded, keyed by ticker.
pub type BarSnapshot<'a> = BTreeMap<&'a str, &'a Bar>;

#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceDecision {
    Hold,
    /// Move listed tickers to their weight of current equity. Weight 0
    /// closes the position; tickers not listed are left alone.
    SetWeights {
        weights: TargetWeights,
        reason: Option<String>,
    },
    /// Deposit `amount`, then spend it across `weights` without selling.
    InjectCash {
        amount: f64,
        weights: TargetWeights,
        reason: Option<String>,
    },
    /// Spend existing cash across `weights` without selling.
    Allocate {
        weights: TargetWeights,
        reason: Option<String>,
    },
    /// Periodic contribution. The initial buy spends existing cash; later
    /// buys deposit `amount` first and spend only that.
    DcaBuy {
        amount: f64,
        initial: bool,
        weights: TargetWeights,
        reason: Option<String>,
    },
}

pub trait RebalancePolicy: Send {
    fn name(&self) -> String;

    fn rebalance_signal(
        &mut self,
        date: NaiveDate,
        available: &[String],
        snapshot: &BarSnapshot<'_>,
        positions: &BTreeMap<String, Position>,
    ) -> RebalanceDecision;
}

/// `1 / n` for each ticker.
pub fn equal_weights(tickers: &[String]) -> TargetWeights {
    if tickers.is_empty() {
        return TargetWeights::new();
    }
    let weight = 1.0 / tickers.len() as f64;
    tickers.iter().map(|t| (t.clone(), weight)).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Bars priced at `close` for each ticker on `date`.
    pub fn bars_at(date: NaiveDate, closes: &[(&str, f64)]) -> Vec<(String, Bar)> {
        closes
            .iter()
            .map(|(t, c)| (t.to_string(), Bar::new(date, *c, *c, *c, *c, 1_000.0)))
            .collect()
    }

    pub fn snapshot(bars: &[(String, Bar)]) -> BarSnapshot<'_> {
        bars.iter().map(|(t, b)| (t.as_str(), b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::tickers;
    use super::*;

    #[test]
    fn equal_weights_split_evenly() {
        let weights = equal_weights(&tickers(&["2330", "2317", "2454", "2412"]));
        assert_eq!(weights.len(), 4);
        assert!(weights.values().all(|w| (*w - 0.25).abs() < 1e-12));
        assert!(equal_weights(&[]).is_empty());
    }
}
