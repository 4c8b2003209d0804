//! Per-ticker rule driven portfolio.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::str::FromStr;

use super::{BarSnapshot, RebalanceDecision, RebalancePolicy, TargetWeights};
use crate::domain::bar::Bar;
use crate::domain::error::TwquantError;
use crate::domain::position::Position;
use crate::domain::strategy::Signal;

/// State rule applied to one ticker's bar. Unlike the crossover strategies
/// these compare levels on the current bar only.
#[derive(Debug, Clone, PartialEq)]
pub enum TickerRule {
    /// Hold while `ma{short}` is above `ma{long}`.
    MaCross { short: usize, long: usize },
    /// Hold while `macd` is above `macd_signal`.
    MacdCross,
    /// Enter below `oversold`, exit above `overbought`.
    RsiBands { oversold: f64, overbought: f64 },
    /// Enter on a positive `{flow}_5d` sum, exit on a negative daily `{flow}`.
    FlowFollow { flow: String },
    /// Enter on first sight, never exit.
    AlwaysBuy,
}

impl Default for TickerRule {
    fn default() -> Self {
        TickerRule::MaCross { short: 5, long: 20 }
    }
}

impl FromStr for TickerRule {
    type Err = TwquantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        let rule = match name.as_str() {
            "macd" => TickerRule::MacdCross,
            "rsi" => TickerRule::RsiBands {
                oversold: 30.0,
                overbought: 70.0,
            },
            "foreign" | "trust" | "dealer" | "inst_total" => TickerRule::FlowFollow { flow: name.clone() },
            "buy_and_hold" | "always_buy" => TickerRule::AlwaysBuy,
            ma if ma.starts_with("ma") => {
                let periods = ma.trim_start_matches("ma");
                let parsed = periods
                    .split_once('x')
                    .and_then(|(s, l)| Some((s.parse::<usize>().ok()?, l.parse::<usize>().ok()?)));
                match parsed {
                    Some((short, long)) if short > 0 && short < long => {
                        TickerRule::MaCross { short, long }
                    }
                    _ => {
                        return Err(TwquantError::UnknownStrategy {
                            name: s.to_string(),
                        });
                    }
                }
            }
            _ => {
                return Err(TwquantError::UnknownStrategy {
                    name: s.to_string(),
                });
            }
        };
        Ok(rule)
    }
}

impl TickerRule {
    fn check(&self, bar: &Bar, held: bool) -> Signal {
        let (enter, exit) = match self {
            TickerRule::MaCross { short, long } => {
                match (bar.field(&format!("ma{short}")), bar.field(&format!("ma{long}"))) {
                    (Some(s), Some(l)) => (s > l, s < l),
                    _ => (false, false),
                }
            }
            TickerRule::MacdCross => match (bar.field("macd"), bar.field("macd_signal")) {
                (Some(m), Some(s)) => (m > s, m < s),
                _ => (false, false),
            },
            TickerRule::RsiBands {
                oversold,
                overbought,
            } => match bar.field("rsi") {
                Some(r) => (r < *oversold, r > *overbought),
                None => (false, false),
            },
            TickerRule::FlowFollow { flow } => (
                bar.field(&format!("{flow}_5d")).is_some_and(|v| v > 0.0),
                bar.field(flow).is_some_and(|v| v < 0.0),
            ),
            TickerRule::AlwaysBuy => (true, false),
        };
        if enter && !held {
            Signal::Buy
        } else if exit && held {
            Signal::Sell
        } else {
            Signal::Hold
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyDrivenState {
    pub held: BTreeMap<String, bool>,
}

/// Each ticker follows its own [`TickerRule`]. Whenever any ticker enters or
/// exits, the held tickers trading today are re-weighted equally and exits
/// are closed.
#[derive(Debug, Clone, Default)]
pub struct StrategyDriven {
    pub rules: BTreeMap<String, TickerRule>,
    pub default_rule: TickerRule,
    state: StrategyDrivenState,
}

impl StrategyDriven {
    pub fn new(rules: BTreeMap<String, TickerRule>, default_rule: TickerRule) -> Self {
        StrategyDriven {
            rules,
            default_rule,
            state: StrategyDrivenState::default(),
        }
    }

    pub fn state(&self) -> &StrategyDrivenState {
        &self.state
    }

    fn is_held(&self, ticker: &str) -> bool {
        self.state.held.get(ticker).copied().unwrap_or(false)
    }
}

impl RebalancePolicy for StrategyDriven {
    fn name(&self) -> String {
        "Strategy Driven".into()
    }

    fn rebalance_signal(
        &mut self,
        _date: NaiveDate,
        available: &[String],
        snapshot: &BarSnapshot<'_>,
        _positions: &BTreeMap<String, Position>,
    ) -> RebalanceDecision {
        let mut exits = Vec::new();
        let mut changed = false;
        for ticker in available {
            let Some(bar) = snapshot.get(ticker.as_str()) else {
                continue;
            };
            let rule = self.rules.get(ticker).unwrap_or(&self.default_rule);
            match rule.check(bar, self.is_held(ticker)) {
                Signal::Buy => {
                    self.state.held.insert(ticker.clone(), true);
                    changed = true;
                }
                Signal::Sell => {
                    self.state.held.insert(ticker.clone(), false);
                    exits.push(ticker.clone());
                    changed = true;
                }
                Signal::Hold => {}
            }
        }
        if !changed {
            return RebalanceDecision::Hold;
        }

        let held: Vec<&String> = available.iter().filter(|t| self.is_held(t)).collect();
        let mut weights: TargetWeights = exits.into_iter().map(|t| (t, 0.0)).collect();
        if !held.is_empty() {
            let weight = 1.0 / held.len() as f64;
            weights.extend(held.into_iter().map(|t| (t.clone(), weight)));
        }
        RebalanceDecision::SetWeights {
            weights,
            reason: Some("rule signals".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::policy::test_support::{day, tickers};

    fn bar_with(fields: &[(&str, f64)]) -> Bar {
        fields.iter().fold(
            Bar::new(day(2024, 1, 2), 10.0, 10.0, 10.0, 10.0, 1_000.0),
            |bar, (k, v)| bar.with_field(k, *v),
        )
    }

    #[test]
    fn parse_rule_names() {
        assert_eq!(
            "MA5x60".parse::<TickerRule>().unwrap(),
            TickerRule::MaCross { short: 5, long: 60 }
        );
        assert_eq!("MACD".parse::<TickerRule>().unwrap(), TickerRule::MacdCross);
        assert_eq!(
            "foreign".parse::<TickerRule>().unwrap(),
            TickerRule::FlowFollow {
                flow: "foreign".into()
            }
        );
        assert!("ma20x5".parse::<TickerRule>().is_err());
        assert!("tea_leaves".parse::<TickerRule>().is_err());
    }

    #[test]
    fn rule_respects_held_state() {
        let bar = bar_with(&[("ma5", 11.0), ("ma20", 10.0)]);
        let rule = TickerRule::default();
        assert_eq!(rule.check(&bar, false), Signal::Buy);
        assert_eq!(rule.check(&bar, true), Signal::Hold);
    }

    #[test]
    fn flow_rule() {
        let rule = TickerRule::FlowFollow {
            flow: "foreign".into(),
        };
        assert_eq!(rule.check(&bar_with(&[("foreign_5d", 500.0)]), false), Signal::Buy);
        assert_eq!(rule.check(&bar_with(&[("foreign", -1.0)]), true), Signal::Sell);
    }

    #[test]
    fn reweights_held_subset() {
        let mut policy = StrategyDriven::new(BTreeMap::new(), TickerRule::AlwaysBuy);
        policy
            .rules
            .insert("B".into(), TickerRule::MacdCross);
        let a = bar_with(&[]);
        let b = bar_with(&[("macd", -1.0), ("macd_signal", 0.0)]);
        let snap: BarSnapshot = BTreeMap::from([("A", &a), ("B", &b)]);
        let names = tickers(&["A", "B"]);

        let RebalanceDecision::SetWeights { weights, .. } =
            policy.rebalance_signal(day(2024, 1, 2), &names, &snap, &BTreeMap::new())
        else {
            panic!("expected weights");
        };
        assert_eq!(weights.len(), 1);
        assert_eq!(weights["A"], 1.0);

        // Nothing changes on the next call.
        assert_eq!(
            policy.rebalance_signal(day(2024, 1, 3), &names, &snap, &BTreeMap::new()),
            RebalanceDecision::Hold
        );

        let b_up = bar_with(&[("macd", 1.0), ("macd_signal", 0.0)]);
        let snap: BarSnapshot = BTreeMap::from([("A", &a), ("B", &b_up)]);
        let RebalanceDecision::SetWeights { weights, .. } =
            policy.rebalance_signal(day(2024, 1, 4), &names, &snap, &BTreeMap::new())
        else {
            panic!("expected weights");
        };
        assert_eq!(weights["A"], 0.5);
        assert_eq!(weights["B"], 0.5);

        let b_down = bar_with(&[("macd", -1.0), ("macd_signal", 0.0)]);
        let snap: BarSnapshot = BTreeMap::from([("A", &a), ("B", &b_down)]);
        let RebalanceDecision::SetWeights { weights, .. } =
            policy.rebalance_signal(day(2024, 1, 5), &names, &snap, &BTreeMap::new())
        else {
            panic!("expected weights");
        };
        assert_eq!(weights["A"], 1.0);
        assert_eq!(weights["B"], 0.0);
        assert_eq!(policy.state().held.get("B"), Some(&false));
    }
}
