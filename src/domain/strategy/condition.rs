//! User-defined conjunctions of field comparisons.
//!
//! Conditions are written as `field op value` where `value` is either a
//! number or another field name, e.g. `rsi < 30 & macd > macd_signal`.

use serde::{Deserialize, Serialize};

use super::{Operand, Signal, Strategy, signals_from};
use crate::domain::bar::Bar;
use crate::domain::error::TwquantError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">=")]
    GreaterEq,
    #[serde(rename = "<=")]
    LessEq,
    #[serde(rename = "==")]
    Equal,
}

impl Comparison {
    fn parse(token: &str) -> Option<Self> {
        match token {
            ">" => Some(Comparison::Greater),
            "<" => Some(Comparison::Less),
            ">=" => Some(Comparison::GreaterEq),
            "<=" => Some(Comparison::LessEq),
            "==" => Some(Comparison::Equal),
            _ => None,
        }
    }

    pub fn holds(self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Greater => left > right,
            Comparison::Less => left < right,
            Comparison::GreaterEq => left >= right,
            Comparison::LessEq => left <= right,
            Comparison::Equal => left == right,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Comparison,
    pub value: Operand,
}

impl Condition {
    pub fn new(field: &str, op: Comparison, value: Operand) -> Self {
        Condition {
            field: field.to_lowercase(),
            op,
            value,
        }
    }

    /// Parse `field op value`.
    pub fn parse(text: &str) -> Result<Self, TwquantError> {
        let invalid = |reason: &str| TwquantError::InvalidParameter {
            name: "condition".into(),
            reason: format!("`{}`: {reason}", text.trim()),
        };
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let [field, op, value] = tokens.as_slice() else {
            return Err(invalid("expected `field op value`"));
        };
        let op = Comparison::parse(op).ok_or_else(|| invalid("unknown operator"))?;
        let value = match value.parse::<f64>() {
            Ok(v) => Operand::Constant(v),
            Err(_) => Operand::field(value),
        };
        Ok(Condition::new(field, op, value))
    }

    /// Parse `cond & cond & ...`; an empty string yields no conditions.
    pub fn parse_all(text: &str) -> Result<Vec<Self>, TwquantError> {
        text.split('&')
            .filter(|part| !part.trim().is_empty())
            .map(Condition::parse)
            .collect()
    }

    fn columns(&self) -> Vec<String> {
        let mut columns = vec![self.field.clone()];
        if let Operand::Field(name) = &self.value {
            columns.push(name.clone());
        }
        columns
    }

    fn holds(&self, bar: &Bar) -> bool {
        match (bar.field(&self.field), self.value.resolve(bar)) {
            (Some(left), Some(right)) => self.op.holds(left, right),
            _ => false,
        }
    }
}

/// Buys when every buy condition holds, sells when every sell condition
/// holds. An empty condition list never fires.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiCondition {
    pub label: String,
    pub buy: Vec<Condition>,
    pub sell: Vec<Condition>,
}

impl MultiCondition {
    pub fn new(label: &str, buy: Vec<Condition>, sell: Vec<Condition>) -> Self {
        MultiCondition {
            label: label.to_string(),
            buy,
            sell,
        }
    }
}

fn all_hold(conditions: &[Condition], bar: &Bar) -> bool {
    !conditions.is_empty() && conditions.iter().all(|c| c.holds(bar))
}

impl Strategy for MultiCondition {
    fn name(&self) -> String {
        self.label.clone()
    }

    fn required_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .buy
            .iter()
            .chain(&self.sell)
            .flat_map(Condition::columns)
            .collect();
        columns.sort();
        columns.dedup();
        columns
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        Ok(signals_from(
            bars.len(),
            |i| all_hold(&self.buy, &bars[i]),
            |i| all_hold(&self.sell, &bars[i]),
        ))
    }
}
