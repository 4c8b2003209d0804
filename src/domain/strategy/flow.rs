//! Institutional-flow strategies (foreign investors, investment trusts,
//! dealers, or the combined total), read from a named net-flow column.

use super::{Operand, Signal, Strategy, crosses_above, signals_from};
use crate::domain::bar::Bar;
use crate::domain::error::TwquantError;
use crate::domain::rolling::rolling_count;

/// Buys on the first bar completing `consecutive_days` of net buying above
/// `threshold`; sells on the mirror run of net selling.
#[derive(Debug, Clone, PartialEq)]
pub struct InstitutionalFollow {
    pub flow: String,
    pub consecutive_days: usize,
    pub threshold: f64,
}

impl InstitutionalFollow {
    pub fn new(flow: &str, consecutive_days: usize, threshold: f64) -> Result<Self, TwquantError> {
        if consecutive_days == 0 {
            return Err(TwquantError::InvalidParameter {
                name: "consecutive_days".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(Self {
            flow: flow.to_lowercase(),
            consecutive_days,
            threshold,
        })
    }

    fn run_starts(&self, flags: &[bool]) -> Vec<bool> {
        let n = self.consecutive_days;
        let counts = rolling_count(flags, n);
        (0..flags.len())
            .map(|i| {
                i > 0 && counts[i] == Some(n) && counts[i - 1].is_some_and(|prev| prev < n)
            })
            .collect()
    }
}

impl Strategy for InstitutionalFollow {
    fn name(&self) -> String {
        format!("Follow {} ({}d)", self.flow, self.consecutive_days)
    }

    fn required_columns(&self) -> Vec<String> {
        vec![self.flow.clone()]
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        let flows: Vec<Option<f64>> = bars.iter().map(|b| b.field(&self.flow)).collect();
        let buying: Vec<bool> = flows
            .iter()
            .map(|f| f.is_some_and(|v| v > self.threshold))
            .collect();
        let selling: Vec<bool> = flows
            .iter()
            .map(|f| f.is_some_and(|v| v < -self.threshold))
            .collect();
        let buys = self.run_starts(&buying);
        let sells = self.run_starts(&selling);
        Ok(signals_from(bars.len(), |i| buys[i], |i| sells[i]))
    }
}

/// Net buying plus a weak RSI confirmed by a MACD golden cross; exits on net
/// selling with a strong RSI.
#[derive(Debug, Clone, PartialEq)]
pub struct ChipTech {
    pub flow: String,
    pub rsi_buy_below: f64,
    pub rsi_sell_above: f64,
}

impl ChipTech {
    pub fn new(flow: &str) -> Self {
        ChipTech {
            flow: flow.to_lowercase(),
            rsi_buy_below: 40.0,
            rsi_sell_above: 60.0,
        }
    }
}

impl Strategy for ChipTech {
    fn name(&self) -> String {
        format!("ChipTech({})", self.flow)
    }

    fn required_columns(&self) -> Vec<String> {
        vec![
            self.flow.clone(),
            "rsi".into(),
            "macd".into(),
            "macd_signal".into(),
        ]
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        let line = Operand::field("macd");
        let signal = Operand::field("macd_signal");
        let flow = |i: usize| bars[i].field(&self.flow);
        let rsi = |i: usize| bars[i].field("rsi");
        Ok(signals_from(
            bars.len(),
            |i| {
                flow(i).is_some_and(|f| f > 0.0)
                    && rsi(i).is_some_and(|r| r < self.rsi_buy_below)
                    && crosses_above(bars, i, &line, &signal)
            },
            |i| {
                flow(i).is_some_and(|f| f < 0.0) && rsi(i).is_some_and(|r| r > self.rsi_sell_above)
            },
        ))
    }
}
