//! Position bookkeeping and the trade ledger entry.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Shares held in one ticker with their weighted average cost.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Position {
    pub ticker: String,
    pub shares: u64,
    pub average_cost: f64,
}

impl Position {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            shares: 0,
            average_cost: 0.0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.shares > 0
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        self.shares as f64 * (price - self.average_cost)
    }

    /// Add shares bought for `cost_basis` in total, re-weighting the average cost.
    pub fn apply_buy(&mut self, shares: u64, cost_basis: f64) {
        if shares == 0 {
            return;
        }
        let held_cost = self.shares as f64 * self.average_cost;
        self.shares += shares;
        self.average_cost = (held_cost + cost_basis) / self.shares as f64;
    }

    /// Remove up to `shares` and return the cost basis released by the sale.
    /// Average cost resets to zero once the position is flat.
    pub fn apply_sell(&mut self, shares: u64) -> f64 {
        let sold = shares.min(self.shares);
        let released = sold as f64 * self.average_cost;
        self.shares -= sold;
        if self.shares == 0 {
            self.average_cost = 0.0;
        }
        released
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "BUY"),
            TradeSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Append-only ledger entry.
///
/// `amount` is the cash that left the account on a buy (notional plus
/// commission) or entered it on a sell (notional minus commission and tax).
/// `profit` and `return_pct` are only set on sells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: TradeSide,
    pub date: NaiveDate,
    pub ticker: Option<String>,
    pub price: f64,
    pub shares: u64,
    pub amount: f64,
    pub profit: Option<f64>,
    pub return_pct: Option<f64>,
    pub reason: Option<String>,
}

impl Trade {
    pub fn is_buy(&self) -> bool {
        self.side == TradeSide::Buy
    }

    pub fn is_sell(&self) -> bool {
        self.side == TradeSide::Sell
    }
}
