//! Account state and equity tracking for one engine run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::execution::{CostBasis, CostModel, execute_buy, execute_sell};
use super::position::{Position, Trade};

/// One entry per simulated date.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
    pub cash: f64,
    pub market_value: f64,
}

/// Cash plus ticker positions, with the run's trade ledger and equity curve.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: BTreeMap<String, Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
}

impl Account {
    pub fn new(initial_capital: f64) -> Self {
        Account {
            cash: initial_capital,
            initial_capital,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            equity_curve: Vec::new(),
        }
    }

    pub fn position(&self, ticker: &str) -> Option<&Position> {
        self.positions.get(ticker)
    }

    pub fn shares(&self, ticker: &str) -> u64 {
        self.positions.get(ticker).map_or(0, |p| p.shares)
    }

    /// Add external cash (DCA contributions, scheduled injections).
    pub fn deposit(&mut self, amount: f64) {
        if amount > 0.0 {
            self.cash += amount;
        }
    }

    /// Mark-to-market value of positions that have a price in `prices`.
    /// Unpriced positions contribute nothing.
    pub fn market_value(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.positions
            .values()
            .filter_map(|pos| prices.get(&pos.ticker).map(|&p| pos.market_value(p)))
            .sum()
    }

    pub fn total_equity(&self, prices: &BTreeMap<String, f64>) -> f64 {
        self.cash + self.market_value(prices)
    }

    pub fn record_equity(&mut self, date: NaiveDate, market_value: f64) {
        self.equity_curve.push(EquityPoint {
            date,
            equity: self.cash + market_value,
            cash: self.cash,
            market_value,
        });
    }

    /// Buy into `ticker`; commission is folded into the average cost.
    pub fn buy(
        &mut self,
        ticker: &str,
        date: NaiveDate,
        market_price: f64,
        shares: u64,
        costs: &CostModel,
        reason: Option<&str>,
    ) -> Option<&Trade> {
        let position = self
            .positions
            .entry(ticker.to_string())
            .or_insert_with(|| Position::new(ticker));
        let trade = execute_buy(
            &mut self.cash,
            position,
            Some(ticker),
            date,
            market_price,
            shares,
            costs,
            CostBasis::FillPriceWithCommission,
            reason,
        )?;
        self.trades.push(trade);
        self.trades.last()
    }

    pub fn sell(
        &mut self,
        ticker: &str,
        date: NaiveDate,
        market_price: f64,
        shares: u64,
        costs: &CostModel,
        reason: Option<&str>,
    ) -> Option<&Trade> {
        let position = self.positions.get_mut(ticker)?;
        let trade = execute_sell(
            &mut self.cash,
            position,
            Some(ticker),
            date,
            market_price,
            shares,
            costs,
            reason,
        )?;
        self.trades.push(trade);
        self.trades.last()
    }

    /// Tickers with a positive share count.
    pub fn open_positions(&self) -> BTreeMap<String, u64> {
        self.positions
            .values()
            .filter(|p| p.is_open())
            .map(|p| (p.ticker.clone(), p.shares))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
    }

    fn prices(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries.iter().map(|(t, p)| (t.to_string(), *p)).collect()
    }

    #[test]
    fn new_account() {
        let account = Account::new(1_000_000.0);
        assert!((account.cash - 1_000_000.0).abs() < f64::EPSILON);
        assert!(account.positions.is_empty());
        assert!(account.trades.is_empty());
        assert!(account.equity_curve.is_empty());
    }

    #[test]
    fn buy_then_sell_records_ledger() {
        let mut account = Account::new(100_000.0);
        let costs = CostModel::zero();
        account.buy("2330", date(), 100.0, 100, &costs, Some("rebalance"));
        assert_eq!(account.shares("2330"), 100);
        account.sell("2330", date(), 110.0, 100, &costs, None);
        assert_eq!(account.shares("2330"), 0);
        assert_eq!(account.trades.len(), 2);
        assert!((account.cash - 101_000.0).abs() < 1e-9);
        assert!((account.trades[1].profit.unwrap() - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn sell_unknown_ticker_is_noop() {
        let mut account = Account::new(100_000.0);
        assert!(account.sell("9999", date(), 10.0, 5, &CostModel::default(), None).is_none());
        assert!(account.trades.is_empty());
    }

    #[test]
    fn market_value_skips_unpriced_positions() {
        let mut account = Account::new(100_000.0);
        let costs = CostModel::zero();
        account.buy("2330", date(), 100.0, 100, &costs, None);
        account.buy("2317", date(), 50.0, 100, &costs, None);

        let mv = account.market_value(&prices(&[("2330", 120.0)]));
        assert!((mv - 12_000.0).abs() < 1e-9);
        let equity = account.total_equity(&prices(&[("2330", 120.0), ("2317", 50.0)]));
        assert!((equity - (85_000.0 + 12_000.0 + 5_000.0)).abs() < 1e-9);
    }

    #[test]
    fn record_equity_captures_cash_and_market_value() {
        let mut account = Account::new(50_000.0);
        account.record_equity(date(), 2_500.0);
        let point = account.equity_curve[0];
        assert!((point.equity - 52_500.0).abs() < f64::EPSILON);
        assert!((point.cash - 50_000.0).abs() < f64::EPSILON);
        assert!((point.market_value - 2_500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deposit_ignores_non_positive_amounts() {
        let mut account = Account::new(10.0);
        account.deposit(-5.0);
        account.deposit(15.0);
        assert!((account.cash - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn open_positions_excludes_closed() {
        let mut account = Account::new(100_000.0);
        let costs = CostModel::zero();
        account.buy("2330", date(), 100.0, 10, &costs, None);
        account.buy("2317", date(), 100.0, 10, &costs, None);
        account.sell("2317", date(), 100.0, 10, &costs, None);
        let open = account.open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open.get("2330"), Some(&10));
    }
}
