//! Buy-and-hold variants: hold forever, hold with scheduled top-ups, and
//! hold with protective exits followed by a cooldown re-entry.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

use super::{BarSnapshot, RebalanceDecision, RebalancePolicy, equal_weights};
use crate::domain::position::Position;
use crate::domain::risk::{ExitReason, RiskManager, StopRules};

/// Buys every available ticker at equal weight on the first call, then never
/// trades again.
#[derive(Debug, Clone, Default)]
pub struct DiamondHold {
    invested: bool,
}

impl DiamondHold {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_invested(&self) -> bool {
        self.invested
    }
}

impl RebalancePolicy for DiamondHold {
    fn name(&self) -> String {
        "Buy & Hold".into()
    }

    fn rebalance_signal(
        &mut self,
        _date: NaiveDate,
        available: &[String],
        _snapshot: &BarSnapshot<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> RebalanceDecision {
        if self.invested {
            return RebalanceDecision::Hold;
        }
        self.invested = true;
        RebalanceDecision::SetWeights {
            weights: equal_weights(available),
            reason: Some("initial buy".into()),
        }
    }
}

/// A scheduled additional contribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtraBuy {
    pub date: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultilayerState {
    pub invested: bool,
    pub executed: BTreeSet<NaiveDate>,
}

/// Diamond hold plus cash injections on or after each scheduled date. Each
/// injection fires once; at most one fires per call.
#[derive(Debug, Clone)]
pub struct MultilayerHold {
    extra_buys: Vec<ExtraBuy>,
    state: MultilayerState,
}

impl MultilayerHold {
    pub fn new(mut extra_buys: Vec<ExtraBuy>) -> Self {
        extra_buys.sort_by_key(|e| e.date);
        MultilayerHold {
            extra_buys,
            state: MultilayerState::default(),
        }
    }

    pub fn state(&self) -> &MultilayerState {
        &self.state
    }
}

impl RebalancePolicy for MultilayerHold {
    fn name(&self) -> String {
        "Buy & Hold (multilayer)".into()
    }

    fn rebalance_signal(
        &mut self,
        date: NaiveDate,
        available: &[String],
        _snapshot: &BarSnapshot<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> RebalanceDecision {
        if !self.state.invested {
            if available.is_empty() {
                return RebalanceDecision::Hold;
            }
            self.state.invested = true;
            return RebalanceDecision::SetWeights {
                weights: equal_weights(available),
                reason: Some("initial buy".into()),
            };
        }

        let due = self
            .extra_buys
            .iter()
            .find(|e| e.date <= date && !self.state.executed.contains(&e.date))
            .copied();
        match due {
            Some(extra) => {
                self.state.executed.insert(extra.date);
                info!(%date, scheduled = %extra.date, amount = extra.amount, "scheduled top-up");
                RebalanceDecision::InjectCash {
                    amount: extra.amount,
                    weights: equal_weights(available),
                    reason: Some(format!("top-up {:.0}", extra.amount)),
                }
            }
            None => RebalanceDecision::Hold,
        }
    }
}

/// What the rebuy after a cooldown puts back to work.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum RebuyAmount {
    /// Rebalance every available ticker back to equal weight.
    #[default]
    All,
    /// Fraction in `(0, 1]` of idle cash, split over the exited tickers.
    /// Holdings that never exited are not touched.
    Fraction(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RebuyPhase {
    #[default]
    NotInvested,
    Invested,
    WaitingRebuy {
        sold_on: NaiveDate,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuyState {
    pub phase: RebuyPhase,
    pub entry_prices: BTreeMap<String, f64>,
    pub managers: BTreeMap<String, RiskManager>,
    /// Tickers sold on the last stop breach.
    pub exited: BTreeSet<String>,
}

/// Equal-weight hold that exits tickers on a stop breach, waits
/// `cooldown_days` calendar days, then re-enters.
#[derive(Debug, Clone)]
pub struct RebuyHold {
    pub rules: StopRules,
    pub cooldown_days: i64,
    pub rebuy_amount: RebuyAmount,
    state: RebuyState,
}

impl RebuyHold {
    pub fn new(rules: StopRules, cooldown_days: i64, rebuy_amount: RebuyAmount) -> Self {
        RebuyHold {
            rules,
            cooldown_days,
            rebuy_amount,
            state: RebuyState::default(),
        }
    }

    pub fn state(&self) -> &RebuyState {
        &self.state
    }

    fn track_entries(&mut self, available: &[String], snapshot: &BarSnapshot<'_>) {
        for ticker in available {
            if let Some(bar) = snapshot.get(ticker.as_str()) {
                let mut manager = RiskManager::new(self.rules);
                manager.reset_at(bar.close);
                self.state.entry_prices.insert(ticker.clone(), bar.close);
                self.state.managers.insert(ticker.clone(), manager);
            }
        }
    }

    fn breaches(
        &mut self,
        snapshot: &BarSnapshot<'_>,
        positions: &BTreeMap<String, Position>,
    ) -> Vec<(String, ExitReason)> {
        let mut hits = Vec::new();
        for (ticker, _) in positions.iter().filter(|(_, p)| p.is_open()) {
            let Some(bar) = snapshot.get(ticker.as_str()) else {
                continue;
            };
            let entry = *self
                .state
                .entry_prices
                .entry(ticker.clone())
                .or_insert(bar.close);
            let rules = self.rules;
            let manager = self.state.managers.entry(ticker.clone()).or_insert_with(|| {
                let mut m = RiskManager::new(rules);
                m.reset_at(entry);
                m
            });
            if let Some(reason) = manager.check_exit(entry, bar.close) {
                hits.push((ticker.clone(), reason));
            }
        }
        hits
    }
}

impl RebalancePolicy for RebuyHold {
    fn name(&self) -> String {
        "Buy & Hold (rebuy)".into()
    }

    fn rebalance_signal(
        &mut self,
        date: NaiveDate,
        available: &[String],
        snapshot: &BarSnapshot<'_>,
        positions: &BTreeMap<String, Position>,
    ) -> RebalanceDecision {
        match self.state.phase {
            RebuyPhase::WaitingRebuy { sold_on } => {
                if (date - sold_on).num_days() < self.cooldown_days {
                    return RebalanceDecision::Hold;
                }
                self.state.phase = RebuyPhase::Invested;
                let exited = std::mem::take(&mut self.state.exited);
                let reason = Some(format!("rebuy after {} day cooldown", self.cooldown_days));
                match self.rebuy_amount {
                    RebuyAmount::All => {
                        self.track_entries(available, snapshot);
                        RebalanceDecision::SetWeights {
                            weights: equal_weights(available),
                            reason,
                        }
                    }
                    RebuyAmount::Fraction(f) => {
                        let back: Vec<String> = available
                            .iter()
                            .filter(|t| exited.contains(*t))
                            .cloned()
                            .collect();
                        self.track_entries(&back, snapshot);
                        let share = f.clamp(0.0, 1.0) / back.len().max(1) as f64;
                        RebalanceDecision::Allocate {
                            weights: back.into_iter().map(|t| (t, share)).collect(),
                            reason,
                        }
                    }
                }
            }
            RebuyPhase::NotInvested => {
                self.state.phase = RebuyPhase::Invested;
                self.track_entries(available, snapshot);
                RebalanceDecision::SetWeights {
                    weights: equal_weights(available),
                    reason: Some("initial buy".into()),
                }
            }
            RebuyPhase::Invested => {
                let hits = self.breaches(snapshot, positions);
                if hits.is_empty() {
                    return RebalanceDecision::Hold;
                }
                self.state.phase = RebuyPhase::WaitingRebuy { sold_on: date };
                let reason = hits
                    .iter()
                    .map(|(t, r)| format!("{t} {r}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                info!(%date, exits = %reason, "stop triggered, entering cooldown");
                self.state.exited = hits.iter().map(|(t, _)| t.clone()).collect();
                RebalanceDecision::SetWeights {
                    weights: hits.into_iter().map(|(t, _)| (t, 0.0)).collect(),
                    reason: Some(reason),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::test_support::{bars_at, day, snapshot, tickers};

    fn holding(ticker: &str, shares: u64, cost: f64) -> BTreeMap<String, Position> {
        let mut p = Position::new(ticker);
        p.apply_buy(shares, shares as f64 * cost);
        BTreeMap::from([(ticker.to_string(), p)])
    }

    #[test]
    fn diamond_buys_once() {
        let mut policy = DiamondHold::new();
        let names = tickers(&["A", "B"]);
        let first = policy.rebalance_signal(day(2024, 1, 2), &names, &BarSnapshot::new(), &BTreeMap::new());
        assert!(matches!(first, RebalanceDecision::SetWeights { ref weights, .. } if weights.len() == 2));
        for d in 3..10 {
            let next =
                policy.rebalance_signal(day(2024, 1, d), &names, &BarSnapshot::new(), &BTreeMap::new());
            assert_eq!(next, RebalanceDecision::Hold);
        }
        assert!(policy.is_invested());
    }

    #[test]
    fn multilayer_injects_each_trigger_once() {
        let mut policy = MultilayerHold::new(vec![
            ExtraBuy {
                date: day(2024, 2, 1),
                amount: 50_000.0,
            },
            ExtraBuy {
                date: day(2024, 3, 1),
                amount: 20_000.0,
            },
        ]);
        let names = tickers(&["A"]);
        let snap = BarSnapshot::new();
        let none = BTreeMap::new();
        assert!(matches!(
            policy.rebalance_signal(day(2024, 1, 2), &names, &snap, &none),
            RebalanceDecision::SetWeights { .. }
        ));
        assert_eq!(
            policy.rebalance_signal(day(2024, 1, 31), &names, &snap, &none),
            RebalanceDecision::Hold
        );
        // Both dates already passed: one injection per call, earliest first.
        let first = policy.rebalance_signal(day(2024, 3, 4), &names, &snap, &none);
        assert!(matches!(first, RebalanceDecision::InjectCash { amount, .. } if amount == 50_000.0));
        let second = policy.rebalance_signal(day(2024, 3, 5), &names, &snap, &none);
        assert!(matches!(second, RebalanceDecision::InjectCash { amount, .. } if amount == 20_000.0));
        assert_eq!(
            policy.rebalance_signal(day(2024, 3, 6), &names, &snap, &none),
            RebalanceDecision::Hold
        );
        assert_eq!(policy.state().executed.len(), 2);
    }

    #[test]
    fn rebuy_cycle() {
        let rules = StopRules::normalized(Some(-0.1), None, None);
        let mut policy = RebuyHold::new(rules, 30, RebuyAmount::All);
        let names = tickers(&["A"]);

        let bars = bars_at(day(2024, 1, 2), &[("A", 100.0)]);
        let first = policy.rebalance_signal(day(2024, 1, 2), &names, &snapshot(&bars), &BTreeMap::new());
        assert!(matches!(first, RebalanceDecision::SetWeights { .. }));
        assert_eq!(policy.state().phase, RebuyPhase::Invested);
        assert_eq!(policy.state().entry_prices["A"], 100.0);

        let positions = holding("A", 100, 100.0);
        let bars = bars_at(day(2024, 1, 10), &[("A", 95.0)]);
        assert_eq!(
            policy.rebalance_signal(day(2024, 1, 10), &names, &snapshot(&bars), &positions),
            RebalanceDecision::Hold
        );

        let bars = bars_at(day(2024, 1, 15), &[("A", 88.0)]);
        let exit = policy.rebalance_signal(day(2024, 1, 15), &names, &snapshot(&bars), &positions);
        let RebalanceDecision::SetWeights { weights, .. } = exit else {
            panic!("expected an exit");
        };
        assert_eq!(weights["A"], 0.0);
        assert_eq!(
            policy.state().phase,
            RebuyPhase::WaitingRebuy {
                sold_on: day(2024, 1, 15)
            }
        );

        let bars = bars_at(day(2024, 2, 1), &[("A", 80.0)]);
        assert_eq!(
            policy.rebalance_signal(day(2024, 2, 1), &names, &snapshot(&bars), &BTreeMap::new()),
            RebalanceDecision::Hold
        );

        let bars = bars_at(day(2024, 2, 14), &[("A", 82.0)]);
        let rebuy = policy.rebalance_signal(day(2024, 2, 14), &names, &snapshot(&bars), &BTreeMap::new());
        assert!(matches!(rebuy, RebalanceDecision::SetWeights { ref weights, .. } if weights["A"] == 1.0));
        assert_eq!(policy.state().phase, RebuyPhase::Invested);
        assert_eq!(policy.state().entry_prices["A"], 82.0);
    }

    #[test]
    fn rebuy_only_zeroes_breached_tickers() {
        let rules = StopRules::normalized(None, Some(0.2), None);
        let mut policy = RebuyHold::new(rules, 5, RebuyAmount::All);
        let names = tickers(&["A", "B"]);
        let bars = bars_at(day(2024, 1, 2), &[("A", 100.0), ("B", 100.0)]);
        policy.rebalance_signal(day(2024, 1, 2), &names, &snapshot(&bars), &BTreeMap::new());

        let mut positions = holding("A", 10, 100.0);
        positions.extend(holding("B", 10, 100.0));
        let bars = bars_at(day(2024, 1, 3), &[("A", 125.0), ("B", 101.0)]);
        let RebalanceDecision::SetWeights { weights, .. } =
            policy.rebalance_signal(day(2024, 1, 3), &names, &snapshot(&bars), &positions)
        else {
            panic!("expected an exit");
        };
        assert_eq!(weights.len(), 1);
        assert_eq!(weights["A"], 0.0);
    }

    #[test]
    fn rebuy_fraction_reenters_exited_tickers_only() {
        let rules = StopRules::normalized(None, Some(0.2), None);
        let mut policy = RebuyHold::new(rules, 5, RebuyAmount::Fraction(0.5));
        let names = tickers(&["A", "B", "C"]);
        let bars = bars_at(day(2024, 1, 2), &[("A", 100.0), ("B", 100.0), ("C", 100.0)]);
        policy.rebalance_signal(day(2024, 1, 2), &names, &snapshot(&bars), &BTreeMap::new());

        let mut positions = holding("A", 10, 100.0);
        positions.extend(holding("B", 10, 100.0));
        positions.extend(holding("C", 10, 100.0));
        let bars = bars_at(day(2024, 1, 3), &[("A", 125.0), ("B", 100.0), ("C", 130.0)]);
        policy.rebalance_signal(day(2024, 1, 3), &names, &snapshot(&bars), &positions);
        assert_eq!(policy.state().exited, BTreeSet::from(["A".to_string(), "C".to_string()]));

        positions.remove("A");
        positions.remove("C");
        let bars = bars_at(day(2024, 1, 10), &[("A", 120.0), ("B", 101.0), ("C", 128.0)]);
        let rebuy = policy.rebalance_signal(day(2024, 1, 10), &names, &snapshot(&bars), &positions);
        let RebalanceDecision::Allocate { weights, reason } = rebuy else {
            panic!("expected a buy-only rebuy");
        };
        assert_eq!(weights, BTreeMap::from([("A".to_string(), 0.25), ("C".to_string(), 0.25)]));
        assert_eq!(reason.as_deref(), Some("rebuy after 5 day cooldown"));
        assert!(policy.state().exited.is_empty());
        assert_eq!(policy.state().entry_prices["A"], 120.0);
        assert_eq!(policy.state().entry_prices["B"], 100.0);
    }
}
