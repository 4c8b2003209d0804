//! Single-asset signal generators.
//!
//! A [`Strategy`] maps a chronologically ordered bar series to one
//! [`Signal`] per bar. Crossovers compare the current bar with the previous
//! one; a bar missing any operand never fires. When a bar satisfies both the
//! buy and the sell condition, the sell wins.

pub mod breakout;
pub mod condition;
pub mod crossover;
pub mod flow;
pub mod spec;

use serde::{Deserialize, Serialize};

use super::bar::{Bar, require_columns};
use super::error::TwquantError;

pub use breakout::{MeanReversion, MomentumBreakout, Turtle, VolumeBreakout};
pub use condition::{Comparison, Condition, MultiCondition};
pub use crossover::{Bollinger, Kd, MaCross, Macd, Rsi};
pub use flow::{ChipTech, InstitutionalFollow};
pub use spec::{ParamSet, StrategySpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Signal {
    Sell,
    #[default]
    Hold,
    Buy,
}

impl Signal {
    /// -1 / 0 / 1 encoding.
    pub fn value(self) -> i8 {
        match self {
            Signal::Sell => -1,
            Signal::Hold => 0,
            Signal::Buy => 1,
        }
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> String;

    /// Indicator columns the bar series must carry.
    fn required_columns(&self) -> Vec<String> {
        Vec::new()
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError>;

    fn ensure_columns(&self, bars: &[Bar]) -> Result<(), TwquantError> {
        require_columns(bars, &self.name(), &self.required_columns())
    }
}

/// Either a named bar field or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Field(String),
    Constant(f64),
}

impl Operand {
    pub fn field(name: &str) -> Self {
        Operand::Field(name.to_lowercase())
    }

    pub fn resolve(&self, bar: &Bar) -> Option<f64> {
        match self {
            Operand::Field(name) => bar.field(name),
            Operand::Constant(v) => Some(*v),
        }
    }
}

fn pair(bars: &[Bar], i: usize, left: &Operand, right: &Operand) -> Option<(f64, f64)> {
    let bar = &bars[i];
    Some((left.resolve(bar)?, right.resolve(bar)?))
}

/// `left` moves from at-or-below `right` on the previous bar to above it.
pub fn crosses_above(bars: &[Bar], i: usize, left: &Operand, right: &Operand) -> bool {
    if i == 0 {
        return false;
    }
    match (pair(bars, i, left, right), pair(bars, i - 1, left, right)) {
        (Some((l, r)), Some((pl, pr))) => l > r && pl <= pr,
        _ => false,
    }
}

/// `left` moves from at-or-above `right` on the previous bar to below it.
pub fn crosses_below(bars: &[Bar], i: usize, left: &Operand, right: &Operand) -> bool {
    if i == 0 {
        return false;
    }
    match (pair(bars, i, left, right), pair(bars, i - 1, left, right)) {
        (Some((l, r)), Some((pl, pr))) => l < r && pl >= pr,
        _ => false,
    }
}

/// Build the signal vector from per-bar buy and sell predicates. Sell takes
/// precedence over buy on the same bar.
pub fn signals_from(
    len: usize,
    buy: impl Fn(usize) -> bool,
    sell: impl Fn(usize) -> bool,
) -> Vec<Signal> {
    (0..len)
        .map(|i| {
            if sell(i) {
                Signal::Sell
            } else if buy(i) {
                Signal::Buy
            } else {
                Signal::Hold
            }
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::test_support::bars_with;
    use super::*;

    #[test]
    fn signal_values() {
        assert_eq!(Signal::Buy.value(), 1);
        assert_eq!(Signal::Hold.value(), 0);
        assert_eq!(Signal::Sell.value(), -1);
        assert_eq!(Signal::default(), Signal::Hold);
    }

    #[test]
    fn crosses_need_previous_bar() {
        let bars = bars_with(&[10.0, 12.0], &[("ma", &[11.0, 11.0])]);
        let close = Operand::field("close");
        let ma = Operand::field("ma");
        assert!(!crosses_above(&bars, 0, &close, &ma));
        assert!(crosses_above(&bars, 1, &close, &ma));
        assert!(!crosses_below(&bars, 1, &close, &ma));
    }

    #[test]
    fn cross_from_equality_counts() {
        let bars = bars_with(&[11.0, 10.0], &[("ma", &[11.0, 11.0])]);
        assert!(crosses_below(
            &bars,
            1,
            &Operand::field("close"),
            &Operand::field("ma")
        ));
    }

    #[test]
    fn missing_operand_never_crosses() {
        let bars = bars_with(&[10.0, 12.0], &[("ma", &[f64::NAN, 11.0])]);
        assert!(!crosses_above(
            &bars,
            1,
            &Operand::field("close"),
            &Operand::field("ma")
        ));
    }

    #[test]
    fn sell_wins_over_buy() {
        let signals = signals_from(3, |i| i >= 1, |i| i == 2);
        assert_eq!(signals, vec![Signal::Hold, Signal::Buy, Signal::Sell]);
    }
}
