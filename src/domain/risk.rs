//! Position sizing and protective-stop evaluation.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fraction of capital used when Kelly inputs are unusable.
const KELLY_FALLBACK_FRACTION: f64 = 0.1;
const KELLY_CAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "snake_case")]
pub enum SizingMethod {
    /// Fraction of available capital.
    Percent(f64),
    /// Fixed currency amount, capped at available capital.
    FixedAmount(f64),
    /// Half-Kelly from the observed win rate and profit factor.
    Kelly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSizer {
    pub method: SizingMethod,
}

impl PositionSizer {
    pub fn new(method: SizingMethod) -> Self {
        PositionSizer { method }
    }

    /// Whole shares to buy at `price` out of `capital`.
    pub fn get_shares(&self, capital: f64, price: f64, win_rate: f64, profit_factor: f64) -> u64 {
        if capital <= 0.0 || price <= 0.0 {
            return 0;
        }
        let budget = match self.method {
            SizingMethod::Percent(fraction) => capital * fraction.clamp(0.0, 1.0),
            SizingMethod::FixedAmount(amount) => amount.min(capital),
            SizingMethod::Kelly => capital * kelly_fraction(win_rate, profit_factor),
        };
        if budget <= 0.0 {
            return 0;
        }
        (budget / price).floor() as u64
    }
}

/// Half of `f* = p - (1 - p) / b`, clamped to `[0, 0.5]`. Falls back to a
/// flat 10% when either input is non-positive.
pub fn kelly_fraction(win_rate: f64, profit_factor: f64) -> f64 {
    if win_rate <= 0.0 || profit_factor <= 0.0 {
        warn!(
            win_rate,
            profit_factor, "kelly inputs not positive, sizing at {KELLY_FALLBACK_FRACTION}"
        );
        return KELLY_FALLBACK_FRACTION;
    }
    let full = win_rate - (1.0 - win_rate) / profit_factor;
    (full / 2.0).clamp(0.0, KELLY_CAP)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TakeProfit => write!(f, "take_profit"),
            ExitReason::TrailingStop => write!(f, "trailing_stop"),
        }
    }
}

/// Stop thresholds as positive fractions: `stop_loss = 0.1` exits 10% below
/// entry, `take_profit = 0.2` exits 20% above, `trailing_stop = 0.05` exits
/// 5% below the running high.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StopRules {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_stop: Option<f64>,
}

impl StopRules {
    /// Accepts either sign for every threshold; zero disables it.
    pub fn normalized(
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        trailing_stop: Option<f64>,
    ) -> Self {
        let magnitude = |v: Option<f64>| v.map(f64::abs).filter(|m| *m > 0.0);
        StopRules {
            stop_loss: magnitude(stop_loss),
            take_profit: magnitude(take_profit),
            trailing_stop: magnitude(trailing_stop),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stop_loss.is_none() && self.take_profit.is_none() && self.trailing_stop.is_none()
    }
}

/// Stateful stop checker for one position. The trailing high persists
/// across calls and must be reset between trades.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskManager {
    pub rules: StopRules,
    highest_price: Option<f64>,
}

impl RiskManager {
    pub fn new(rules: StopRules) -> Self {
        RiskManager {
            rules,
            highest_price: None,
        }
    }

    pub fn highest_price(&self) -> Option<f64> {
        self.highest_price
    }

    /// Stop-loss, then take-profit, then trailing stop.
    pub fn check_exit(&mut self, entry_price: f64, current_price: f64) -> Option<ExitReason> {
        if entry_price <= 0.0 {
            return None;
        }
        let high = self
            .highest_price
            .map_or(current_price, |h| h.max(current_price));
        self.highest_price = Some(high);

        let change = current_price / entry_price - 1.0;
        if self.rules.stop_loss.is_some_and(|sl| change <= -sl) {
            return Some(ExitReason::StopLoss);
        }
        if self.rules.take_profit.is_some_and(|tp| change >= tp) {
            return Some(ExitReason::TakeProfit);
        }
        if let Some(ts) = self.rules.trailing_stop {
            if high > 0.0 && current_price <= high * (1.0 - ts) {
                return Some(ExitReason::TrailingStop);
            }
        }
        None
    }

    pub fn reset(&mut self) {
        self.highest_price = None;
    }

    /// Start tracking a new trade entered at `price`.
    pub fn reset_at(&mut self, price: f64) {
        self.highest_price = Some(price);
    }
}
