//! Dollar-cost averaging.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;

use super::{BarSnapshot, RebalanceDecision, RebalancePolicy, equal_weights};
use crate::domain::position::Position;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcaState {
    pub last_month: Option<(i32, u32)>,
    pub first_buy: bool,
}

impl Default for DcaState {
    fn default() -> Self {
        DcaState {
            last_month: None,
            first_buy: true,
        }
    }
}

/// Invests the starting cash on the first trading day, then contributes
/// `monthly_amount` on the first trading day on or after `buy_day` of every
/// later month. Never sells.
#[derive(Debug, Clone)]
pub struct Dca {
    pub buy_day: u32,
    pub monthly_amount: f64,
    state: DcaState,
}

impl Default for Dca {
    fn default() -> Self {
        Dca::new(1, 10_000.0)
    }
}

impl Dca {
    pub fn new(buy_day: u32, monthly_amount: f64) -> Self {
        Dca {
            buy_day: buy_day.clamp(1, 31),
            monthly_amount,
            state: DcaState::default(),
        }
    }

    pub fn state(&self) -> &DcaState {
        &self.state
    }
}

impl RebalancePolicy for Dca {
    fn name(&self) -> String {
        "DCA".into()
    }

    fn rebalance_signal(
        &mut self,
        date: NaiveDate,
        available: &[String],
        _snapshot: &BarSnapshot<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> RebalanceDecision {
        let month = (date.year(), date.month());
        if self.state.last_month == Some(month) {
            return RebalanceDecision::Hold;
        }
        if !self.state.first_buy && date.day() < self.buy_day {
            return RebalanceDecision::Hold;
        }
        self.state.last_month = Some(month);
        if available.is_empty() {
            return RebalanceDecision::Hold;
        }

        let initial = self.state.first_buy;
        self.state.first_buy = false;
        RebalanceDecision::DcaBuy {
            amount: self.monthly_amount,
            initial,
            weights: equal_weights(available),
            reason: Some(if initial {
                "initial capital buy".into()
            } else {
                "monthly contribution".into()
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::test_support::{day, tickers};

    fn ask(policy: &mut Dca, date: NaiveDate) -> RebalanceDecision {
        policy.rebalance_signal(
            date,
            &tickers(&["A", "B"]),
            &BarSnapshot::new(),
            &BTreeMap::new(),
        )
    }

    #[test]
    fn first_call_buys_with_existing_cash() {
        let mut policy = Dca::new(15, 10_000.0);
        let first = ask(&mut policy, day(2024, 1, 2));
        assert!(matches!(first, RebalanceDecision::DcaBuy { initial: true, .. }));
        assert!(!policy.state().first_buy);
    }

    #[test]
    fn later_months_wait_for_buy_day() {
        let mut policy = Dca::new(15, 10_000.0);
        ask(&mut policy, day(2024, 1, 2));
        assert_eq!(ask(&mut policy, day(2024, 2, 14)), RebalanceDecision::Hold);
        let buy = ask(&mut policy, day(2024, 2, 16));
        assert!(matches!(
            buy,
            RebalanceDecision::DcaBuy { initial: false, amount, .. } if amount == 10_000.0
        ));
        assert_eq!(ask(&mut policy, day(2024, 2, 20)), RebalanceDecision::Hold);
    }

    #[test]
    fn one_buy_per_month() {
        let mut policy = Dca::default();
        let buys = (0..90)
            .map(|i| day(2024, 1, 1) + chrono::Duration::days(i))
            .filter(|d| ask(&mut policy, *d) != RebalanceDecision::Hold)
            .count();
        assert_eq!(buys, 3);
    }
}
