//! Multi-asset backtest engine driven by a [`RebalancePolicy`].
//!
//! Tickers keep their own trading calendars. The engine walks the sorted
//! union of all dates; a ticker without a bar on a date is neither priced
//! nor tradable that day, and its position is left out of the day's market
//! value.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::bar::check_chronological;
use super::engine::{EngineConfig, log_fill};
use super::error::TwquantError;
use super::metrics::Metrics;
use super::policy::{BarSnapshot, RebalanceDecision, RebalancePolicy, TargetWeights};
use super::portfolio::{Account, EquityPoint};
use super::position::Trade;
use super::ticker_data::{TickerData, build_unified_timeline};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortfolioResult {
    pub policy: String,
    pub metrics: Metrics,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    /// Open share counts at the end of the run.
    pub positions: BTreeMap<String, u64>,
    /// Last-date closes of the open positions that traded on that date.
    pub final_prices: BTreeMap<String, f64>,
    pub cash: f64,
    pub market_value: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PortfolioEngine {
    pub config: EngineConfig,
    verbose: bool,
}

impl PortfolioEngine {
    pub fn new(config: EngineConfig) -> Self {
        PortfolioEngine {
            config,
            verbose: false,
        }
    }

    /// Log every fill at INFO rather than DEBUG.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn run(
        &self,
        data: &[TickerData],
        policy: &mut dyn RebalancePolicy,
    ) -> Result<PortfolioResult, TwquantError> {
        for td in data {
            check_chronological(&td.bars)?;
        }
        let timeline = build_unified_timeline(data);
        let Some(&last_date) = timeline.last() else {
            return Err(TwquantError::InsufficientData {
                ticker: "portfolio".into(),
                bars: 0,
                minimum: 1,
            });
        };
        info!(
            policy = %policy.name(),
            tickers = data.len(),
            dates = timeline.len(),
            "running portfolio backtest"
        );

        let mut account = Account::new(self.config.initial_capital);

        for &date in &timeline {
            let mut prices: BTreeMap<String, f64> = BTreeMap::new();
            let mut snapshot = BarSnapshot::new();
            let mut available: Vec<String> = Vec::new();
            for td in data {
                if let Some(bar) = td.get_bar(date) {
                    prices.insert(td.ticker.clone(), bar.close);
                    snapshot.insert(td.ticker.as_str(), bar);
                    available.push(td.ticker.clone());
                }
            }

            let market_value = account.market_value(&prices);
            account.record_equity(date, market_value);
            if available.is_empty() {
                continue;
            }
            let equity = account.cash + market_value;

            let decision = policy.rebalance_signal(date, &available, &snapshot, &account.positions);
            match decision {
                RebalanceDecision::Hold => {}
                RebalanceDecision::SetWeights { weights, reason } => {
                    let reason = reason.as_deref().unwrap_or("rebalance");
                    self.rebalance(&mut account, date, equity, &prices, &available, &weights, reason);
                }
                RebalanceDecision::InjectCash {
                    amount,
                    weights,
                    reason,
                } => {
                    account.deposit(amount);
                    let reason = reason.as_deref().unwrap_or("cash injection");
                    self.allocate(&mut account, date, amount, &prices, &available, &weights, reason);
                }
                RebalanceDecision::Allocate { weights, reason } => {
                    let budget = account.cash;
                    let reason = reason.as_deref().unwrap_or("allocate");
                    self.allocate(&mut account, date, budget, &prices, &available, &weights, reason);
                }
                RebalanceDecision::DcaBuy {
                    amount,
                    initial,
                    weights,
                    reason,
                } => {
                    let budget = if initial {
                        account.cash
                    } else {
                        account.deposit(amount);
                        amount
                    };
                    if budget > 0.0 {
                        let reason = reason.as_deref().unwrap_or("dca");
                        self.allocate(&mut account, date, budget, &prices, &available, &weights, reason);
                    }
                }
            }
        }

        // Settle on the last date's closes only.
        let final_prices: BTreeMap<String, f64> = account
            .open_positions()
            .into_keys()
            .filter_map(|ticker| {
                let bar = data
                    .iter()
                    .find(|td| td.ticker == ticker)
                    .and_then(|td| td.get_bar(last_date))?;
                Some((ticker, bar.close))
            })
            .collect();
        let market_value = account.market_value(&final_prices);
        let final_equity = account.cash + market_value;

        let mut metrics = Metrics::compute(
            &account.trades,
            &account.equity_curve,
            self.config.initial_capital,
            self.config.risk_free_rate,
        );
        metrics.final_capital = final_equity;
        metrics.total_trades = account.trades.len();
        debug!(
            final_equity,
            cash = account.cash,
            trades = account.trades.len(),
            "portfolio run complete"
        );

        Ok(PortfolioResult {
            policy: policy.name(),
            metrics,
            positions: account.open_positions(),
            final_prices,
            cash: account.cash,
            market_value,
            equity_curve: account.equity_curve,
            trades: account.trades,
        })
    }

    /// Sell everything above target first so proceeds fund the buys.
    #[allow(clippy::too_many_arguments)]
    fn rebalance(
        &self,
        account: &mut Account,
        date: chrono::NaiveDate,
        equity: f64,
        prices: &BTreeMap<String, f64>,
        available: &[String],
        weights: &TargetWeights,
        reason: &str,
    ) {
        let costs = self.config.costs;
        let targets: Vec<(&String, f64, f64)> = available
            .iter()
            .filter_map(|t| Some((t, *weights.get(t)?, *prices.get(t)?)))
            .filter(|(_, _, price)| *price > 0.0)
            .collect();

        for &(ticker, weight, price) in &targets {
            let target = (equity * weight / price).floor() as u64;
            let held = account.shares(ticker);
            if target < held {
                if let Some(trade) = account.sell(ticker, date, price, held - target, &costs, Some(reason)) {
                    log_fill(self.verbose, trade);
                }
            }
        }

        for &(ticker, weight, price) in &targets {
            let target = (equity * weight / (price * costs.buy_cost_factor())).floor() as u64;
            let held = account.shares(ticker);
            if target > held {
                if let Some(trade) = account.buy(ticker, date, price, target - held, &costs, Some(reason)) {
                    log_fill(self.verbose, trade);
                }
            }
        }
    }

    /// Buy-only allocation of `budget` across the weighted tickers.
    #[allow(clippy::too_many_arguments)]
    fn allocate(
        &self,
        account: &mut Account,
        date: chrono::NaiveDate,
        budget: f64,
        prices: &BTreeMap<String, f64>,
        available: &[String],
        weights: &TargetWeights,
        reason: &str,
    ) {
        let costs = self.config.costs;
        for ticker in available {
            let (Some(&weight), Some(&price)) = (weights.get(ticker), prices.get(ticker)) else {
                continue;
            };
            if weight <= 0.0 || price <= 0.0 {
                continue;
            }
            let buy_price = costs.buy_price(price);
            let shares = (budget * weight / (buy_price * costs.buy_cost_factor())).floor() as u64;
            if let Some(trade) = account.buy(ticker, date, price, shares, &costs, Some(reason)) {
                log_fill(self.verbose, trade);
            }
        }
    }
}
