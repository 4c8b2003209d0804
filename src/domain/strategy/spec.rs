//! Serializable strategy descriptions.
//!
//! A [`StrategySpec`] names one built-in strategy together with its
//! parameters. Specs are what configuration files, grid searches and the
//! scanner roster deal in; [`StrategySpec::build`] turns one into a runnable
//! [`Strategy`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    Bollinger, ChipTech, Condition, InstitutionalFollow, Kd, MaCross, Macd, MeanReversion,
    MomentumBreakout, MultiCondition, Rsi, Strategy, Turtle, VolumeBreakout,
};
use crate::domain::error::TwquantError;

/// Named numeric parameters, e.g. one grid-search combination.
pub type ParamSet = BTreeMap<String, f64>;

/// Kind names accepted by [`StrategySpec::from_params`].
pub const KINDS: &[&str] = &[
    "ma_cross",
    "rsi",
    "kd",
    "macd",
    "bollinger",
    "foreign_follow",
    "trust_follow",
    "dealer_follow",
    "inst_total_follow",
    "chip_tech",
    "momentum_breakout",
    "mean_reversion",
    "volume_breakout",
    "turtle",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    MaCross {
        short: usize,
        long: usize,
    },
    Rsi {
        oversold: f64,
        overbought: f64,
    },
    Kd {
        oversold: f64,
        overbought: f64,
    },
    Macd,
    Bollinger,
    Institutional {
        flow: String,
        consecutive_days: usize,
        threshold: f64,
    },
    ChipTech {
        flow: String,
    },
    MomentumBreakout {
        period: usize,
        volume_mult: f64,
    },
    MeanReversion {
        ma_period: usize,
        deviation: f64,
        rsi_low: f64,
        rsi_high: f64,
    },
    VolumeBreakout {
        volume_mult: f64,
        price_change: f64,
    },
    Turtle {
        entry_period: usize,
        exit_period: usize,
    },
    MultiCondition {
        label: String,
        buy: Vec<Condition>,
        sell: Vec<Condition>,
    },
}

fn real(params: &ParamSet, name: &str, default: f64) -> f64 {
    params.get(name).copied().unwrap_or(default)
}

fn count(params: &ParamSet, name: &str, default: usize) -> Result<usize, TwquantError> {
    match params.get(name) {
        None => Ok(default),
        Some(&v) if v >= 0.0 && v.fract() == 0.0 && v.is_finite() => Ok(v as usize),
        Some(&v) => Err(TwquantError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a non-negative integer, got {v}"),
        }),
    }
}

impl StrategySpec {
    /// Build a spec from a kind name and numeric parameters. Parameters not
    /// present take the strategy's defaults; unknown parameters are ignored.
    pub fn from_params(kind: &str, params: &ParamSet) -> Result<Self, TwquantError> {
        let follow = |flow: &str| -> Result<Self, TwquantError> {
            Ok(StrategySpec::Institutional {
                flow: flow.to_string(),
                consecutive_days: count(params, "consecutive_days", 3)?,
                threshold: real(params, "threshold", 0.0),
            })
        };
        let spec = match kind.to_lowercase().as_str() {
            "ma_cross" => StrategySpec::MaCross {
                short: count(params, "short", 5)?,
                long: count(params, "long", 20)?,
            },
            "rsi" => StrategySpec::Rsi {
                oversold: real(params, "oversold", 30.0),
                overbought: real(params, "overbought", 70.0),
            },
            "kd" => StrategySpec::Kd {
                oversold: real(params, "oversold", 20.0),
                overbought: real(params, "overbought", 80.0),
            },
            "macd" => StrategySpec::Macd,
            "bollinger" => StrategySpec::Bollinger,
            "foreign_follow" => follow("foreign")?,
            "trust_follow" => follow("trust")?,
            "dealer_follow" => follow("dealer")?,
            "inst_total_follow" => follow("inst_total")?,
            "chip_tech" => StrategySpec::ChipTech {
                flow: "foreign".into(),
            },
            "momentum_breakout" => StrategySpec::MomentumBreakout {
                period: count(params, "period", 20)?,
                volume_mult: real(params, "volume_mult", 1.5),
            },
            "mean_reversion" => StrategySpec::MeanReversion {
                ma_period: count(params, "ma_period", 20)?,
                deviation: real(params, "deviation", 0.05),
                rsi_low: real(params, "rsi_low", 30.0),
                rsi_high: real(params, "rsi_high", 70.0),
            },
            "volume_breakout" => StrategySpec::VolumeBreakout {
                volume_mult: real(params, "volume_mult", 2.0),
                price_change: real(params, "price_change", 0.02),
            },
            "turtle" => StrategySpec::Turtle {
                entry_period: count(params, "entry_period", 20)?,
                exit_period: count(params, "exit_period", 10)?,
            },
            other => {
                return Err(TwquantError::UnknownStrategy {
                    name: other.to_string(),
                });
            }
        };
        Ok(spec)
    }

    pub fn build(&self) -> Result<Box<dyn Strategy>, TwquantError> {
        let strategy: Box<dyn Strategy> = match self {
            StrategySpec::MaCross { short, long } => Box::new(MaCross::new(*short, *long)?),
            StrategySpec::Rsi {
                oversold,
                overbought,
            } => Box::new(Rsi {
                oversold: *oversold,
                overbought: *overbought,
            }),
            StrategySpec::Kd {
                oversold,
                overbought,
            } => Box::new(Kd {
                oversold: *oversold,
                overbought: *overbought,
            }),
            StrategySpec::Macd => Box::new(Macd),
            StrategySpec::Bollinger => Box::new(Bollinger),
            StrategySpec::Institutional {
                flow,
                consecutive_days,
                threshold,
            } => Box::new(InstitutionalFollow::new(flow, *consecutive_days, *threshold)?),
            StrategySpec::ChipTech { flow } => Box::new(ChipTech::new(flow)),
            StrategySpec::MomentumBreakout {
                period,
                volume_mult,
            } => Box::new(MomentumBreakout::new(*period, *volume_mult)?),
            StrategySpec::MeanReversion {
                ma_period,
                deviation,
                rsi_low,
                rsi_high,
            } => Box::new(MeanReversion::new(*ma_period, *deviation, *rsi_low, *rsi_high)?),
            StrategySpec::VolumeBreakout {
                volume_mult,
                price_change,
            } => Box::new(VolumeBreakout {
                volume_mult: *volume_mult,
                price_change: *price_change,
            }),
            StrategySpec::Turtle {
                entry_period,
                exit_period,
            } => Box::new(Turtle::new(*entry_period, *exit_period)?),
            StrategySpec::MultiCondition { label, buy, sell } => {
                if buy.is_empty() && sell.is_empty() {
                    return Err(TwquantError::NoStrategy);
                }
                Box::new(MultiCondition::new(label, buy.clone(), sell.clone()))
            }
        };
        Ok(strategy)
    }

    /// `ma{n}` periods this strategy reads, which can be derived from the
    /// close when a data source lacks them.
    pub fn moving_averages(&self) -> Vec<usize> {
        match self {
            StrategySpec::MaCross { short, long } => vec![*short, *long],
            StrategySpec::MeanReversion { ma_period, .. } => vec![*ma_period],
            _ => Vec::new(),
        }
    }
}

/// Roster used by the market scanner when none is configured.
pub fn default_roster() -> Vec<StrategySpec> {
    vec![
        StrategySpec::MaCross { short: 5, long: 20 },
        StrategySpec::MaCross { short: 5, long: 60 },
        StrategySpec::Rsi {
            oversold: 30.0,
            overbought: 70.0,
        },
        StrategySpec::Macd,
        StrategySpec::Bollinger,
        StrategySpec::MomentumBreakout {
            period: 20,
            volume_mult: 1.5,
        },
        StrategySpec::VolumeBreakout {
            volume_mult: 2.0,
            price_change: 0.02,
        },
        StrategySpec::Turtle {
            entry_period: 20,
            exit_period: 10,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, f64)]) -> ParamSet {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn from_params_uses_defaults() {
        let spec = StrategySpec::from_params("turtle", &ParamSet::new()).unwrap();
        assert_eq!(
            spec,
            StrategySpec::Turtle {
                entry_period: 20,
                exit_period: 10
            }
        );
    }

    #[test]
    fn from_params_overrides() {
        let spec =
            StrategySpec::from_params("ma_cross", &params(&[("short", 10.0), ("long", 60.0)]))
                .unwrap();
        assert_eq!(spec.build().unwrap().name(), "MA10x60");
    }

    #[test]
    fn follow_kinds_pick_flow_column() {
        let spec = StrategySpec::from_params("trust_follow", &ParamSet::new()).unwrap();
        let strategy = spec.build().unwrap();
        assert_eq!(strategy.required_columns(), vec!["trust".to_string()]);
    }

    #[test]
    fn fractional_period_rejected() {
        let err = StrategySpec::from_params("turtle", &params(&[("entry_period", 2.5)]));
        assert!(matches!(err, Err(TwquantError::InvalidParameter { .. })));
    }

    #[test]
    fn unknown_kind() {
        assert!(matches!(
            StrategySpec::from_params("astrology", &ParamSet::new()),
            Err(TwquantError::UnknownStrategy { .. })
        ));
    }

    #[test]
    fn every_kind_builds_with_defaults() {
        for kind in KINDS {
            let spec = StrategySpec::from_params(kind, &ParamSet::new()).unwrap();
            assert!(spec.build().is_ok(), "{kind}");
        }
    }

    #[test]
    fn invalid_ma_cross_fails_at_build() {
        let spec = StrategySpec::MaCross { short: 20, long: 5 };
        assert!(spec.build().is_err());
    }

    #[test]
    fn empty_multi_condition_is_no_strategy() {
        let spec = StrategySpec::MultiCondition {
            label: "empty".into(),
            buy: Vec::new(),
            sell: Vec::new(),
        };
        assert!(matches!(spec.build(), Err(TwquantError::NoStrategy)));
    }

    #[test]
    fn json_is_tagged_by_kind() {
        let json = serde_json::to_value(StrategySpec::MaCross { short: 5, long: 20 }).unwrap();
        assert_eq!(json["kind"], "ma_cross");
        let back: StrategySpec =
            serde_json::from_str(r#"{"kind":"macd"}"#).unwrap();
        assert_eq!(back, StrategySpec::Macd);
    }

    #[test]
    fn default_roster_builds() {
        let roster = default_roster();
        assert_eq!(roster.len(), 8);
        assert!(roster.iter().all(|spec| spec.build().is_ok()));
    }

    #[test]
    fn moving_average_periods() {
        assert_eq!(
            StrategySpec::MaCross { short: 5, long: 60 }.moving_averages(),
            vec![5, 60]
        );
        assert!(StrategySpec::Macd.moving_averages().is_empty());
    }
}
