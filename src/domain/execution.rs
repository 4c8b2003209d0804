//! Fill simulation: slippage, commission, transaction tax, and the cash and
//! position updates a fill implies.
//!
//! Rates are fractions of gross notional (0.001425 = 0.1425%). Slippage
//! worsens the fill on both sides: buys fill above the market, sells below.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::position::{Position, Trade, TradeSide};

/// Transaction frictions applied to every fill.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub commission: f64,
    pub tax: f64,
    pub slippage: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel {
            commission: 0.001425,
            tax: 0.003,
            slippage: 0.001,
        }
    }
}

impl CostModel {
    /// Frictionless model, handy for exact arithmetic in tests.
    pub fn zero() -> Self {
        CostModel {
            commission: 0.0,
            tax: 0.0,
            slippage: 0.0,
        }
    }

    pub fn buy_price(&self, market_price: f64) -> f64 {
        market_price * (1.0 + self.slippage)
    }

    pub fn sell_price(&self, market_price: f64) -> f64 {
        market_price * (1.0 - self.slippage)
    }

    pub fn commission_on(&self, notional: f64) -> f64 {
        notional * self.commission
    }

    pub fn tax_on(&self, notional: f64) -> f64 {
        notional * self.tax
    }

    /// Multiplier portfolio sizing divides by so a target allocation leaves
    /// room for commission and slippage.
    pub fn buy_cost_factor(&self) -> f64 {
        1.0 + self.commission + self.slippage
    }

    /// Largest share count whose notional plus commission fits in `cash`.
    pub fn affordable_shares(&self, cash: f64, buy_price: f64) -> u64 {
        if cash <= 0.0 || buy_price <= 0.0 {
            return 0;
        }
        (cash / (buy_price * (1.0 + self.commission))).floor() as u64
    }
}

/// What a position's average cost absorbs on a buy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostBasis {
    /// Fill price only; commission is a cash outflow but not part of the basis.
    FillPrice,
    /// Fill price plus commission.
    FillPriceWithCommission,
}

/// Buy `shares` at `market_price`. Returns `None` without touching any state
/// when the order is empty or the total cost would overdraw `cash`.
#[allow(clippy::too_many_arguments)]
pub fn execute_buy(
    cash: &mut f64,
    position: &mut Position,
    ticker: Option<&str>,
    date: NaiveDate,
    market_price: f64,
    shares: u64,
    costs: &CostModel,
    basis: CostBasis,
    reason: Option<&str>,
) -> Option<Trade> {
    if shares == 0 || market_price <= 0.0 {
        return None;
    }

    let price = costs.buy_price(market_price);
    let notional = shares as f64 * price;
    let commission = costs.commission_on(notional);
    let total = notional + commission;

    if total > *cash {
        return None;
    }

    *cash -= total;
    let cost_basis = match basis {
        CostBasis::FillPrice => notional,
        CostBasis::FillPriceWithCommission => total,
    };
    position.apply_buy(shares, cost_basis);

    Some(Trade {
        side: TradeSide::Buy,
        date,
        ticker: ticker.map(str::to_string),
        price,
        shares,
        amount: total,
        profit: None,
        return_pct: None,
        reason: reason.map(str::to_string),
    })
}

/// Sell up to `shares` at `market_price`, realising P&L against the
/// position's average cost.
#[allow(clippy::too_many_arguments)]
pub fn execute_sell(
    cash: &mut f64,
    position: &mut Position,
    ticker: Option<&str>,
    date: NaiveDate,
    market_price: f64,
    shares: u64,
    costs: &CostModel,
    reason: Option<&str>,
) -> Option<Trade> {
    let shares = shares.min(position.shares);
    if shares == 0 {
        return None;
    }

    let price = costs.sell_price(market_price);
    let notional = shares as f64 * price;
    let net = notional - costs.commission_on(notional) - costs.tax_on(notional);
    let released = position.apply_sell(shares);
    let profit = net - released;
    let return_pct = if released > 0.0 { profit / released } else { 0.0 };

    *cash += net;

    Some(Trade {
        side: TradeSide::Sell,
        date,
        ticker: ticker.map(str::to_string),
        price,
        shares,
        amount: net,
        profit: Some(profit),
        return_pct: Some(return_pct),
        reason: reason.map(str::to_string),
    })
}
