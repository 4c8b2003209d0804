//! Periodic equal-weight rebalancing.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::{BarSnapshot, RebalanceDecision, RebalancePolicy, TargetWeights};
use crate::domain::error::TwquantError;
use crate::domain::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Frequency {
    /// Mondays only, once per ISO week.
    Weekly,
    #[default]
    Monthly,
    Quarterly,
}

impl Frequency {
    /// Calendar period a date falls in: ISO (year, week), (year, month) or
    /// (year, quarter).
    pub fn period_key(self, date: NaiveDate) -> (i32, u32) {
        match self {
            Frequency::Weekly => {
                let iso = date.iso_week();
                (iso.year(), iso.week())
            }
            Frequency::Monthly => (date.year(), date.month()),
            Frequency::Quarterly => (date.year(), (date.month() - 1) / 3 + 1),
        }
    }
}

impl FromStr for Frequency {
    type Err = TwquantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "quarterly" => Ok(Frequency::Quarterly),
            other => Err(TwquantError::InvalidParameter {
                name: "frequency".into(),
                reason: format!("unknown frequency `{other}`"),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EqualWeightState {
    pub last_period: Option<(i32, u32)>,
}

/// Splits equity evenly over the first `top_n` available tickers on the
/// first eligible trading day of each period. Tickers outside the cut are
/// closed.
#[derive(Debug, Clone)]
pub struct EqualWeight {
    pub frequency: Frequency,
    pub top_n: Option<usize>,
    state: EqualWeightState,
}

impl EqualWeight {
    pub fn new(frequency: Frequency, top_n: Option<usize>) -> Self {
        EqualWeight {
            frequency,
            top_n: top_n.filter(|n| *n > 0),
            state: EqualWeightState::default(),
        }
    }

    pub fn state(&self) -> &EqualWeightState {
        &self.state
    }
}

impl RebalancePolicy for EqualWeight {
    fn name(&self) -> String {
        "Equal Weight".into()
    }

    fn rebalance_signal(
        &mut self,
        date: NaiveDate,
        available: &[String],
        _snapshot: &BarSnapshot<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> RebalanceDecision {
        let period = self.frequency.period_key(date);
        if self.state.last_period == Some(period) {
            return RebalanceDecision::Hold;
        }
        if self.frequency == Frequency::Weekly && date.weekday() != Weekday::Mon {
            return RebalanceDecision::Hold;
        }
        self.state.last_period = Some(period);

        let cut = self.top_n.unwrap_or(available.len()).min(available.len());
        if cut == 0 {
            return RebalanceDecision::Hold;
        }
        let weight = 1.0 / cut as f64;
        let weights: TargetWeights = available
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), if i < cut { weight } else { 0.0 }))
            .collect();
        RebalanceDecision::SetWeights {
            weights,
            reason: Some("periodic rebalance".into()),
        }
    }
}
