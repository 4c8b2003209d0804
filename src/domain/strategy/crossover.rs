//! Indicator crossover strategies.

use super::{Operand, Signal, Strategy, crosses_above, crosses_below, signals_from};
use crate::domain::bar::Bar;
use crate::domain::error::TwquantError;

/// Golden cross buys, death cross sells, on precomputed `ma{n}` fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MaCross {
    pub short_period: usize,
    pub long_period: usize,
}

impl MaCross {
    pub fn new(short_period: usize, long_period: usize) -> Result<Self, TwquantError> {
        if short_period == 0 || short_period >= long_period {
            return Err(TwquantError::InvalidParameter {
                name: "short_period".into(),
                reason: format!(
                    "short period {short_period} must be positive and below long period {long_period}"
                ),
            });
        }
        Ok(Self {
            short_period,
            long_period,
        })
    }
}

impl Strategy for MaCross {
    fn name(&self) -> String {
        format!("MA{}x{}", self.short_period, self.long_period)
    }

    fn required_columns(&self) -> Vec<String> {
        vec![
            format!("ma{}", self.short_period),
            format!("ma{}", self.long_period),
        ]
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        let short = Operand::Field(format!("ma{}", self.short_period));
        let long = Operand::Field(format!("ma{}", self.long_period));
        Ok(signals_from(
            bars.len(),
            |i| crosses_above(bars, i, &short, &long),
            |i| crosses_below(bars, i, &short, &long),
        ))
    }
}

/// Buys when RSI climbs back above the oversold band, sells when it falls
/// back below the overbought band.
#[derive(Debug, Clone, PartialEq)]
pub struct Rsi {
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for Rsi {
    fn default() -> Self {
        Rsi {
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

impl Strategy for Rsi {
    fn name(&self) -> String {
        format!("RSI({},{})", self.oversold, self.overbought)
    }

    fn required_columns(&self) -> Vec<String> {
        vec!["rsi".into()]
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        let rsi = Operand::field("rsi");
        let low = Operand::Constant(self.oversold);
        let high = Operand::Constant(self.overbought);
        Ok(signals_from(
            bars.len(),
            |i| crosses_above(bars, i, &rsi, &low),
            |i| crosses_below(bars, i, &rsi, &high),
        ))
    }
}

/// Stochastic K/D crosses, ignored when K is already past the far band.
#[derive(Debug, Clone, PartialEq)]
pub struct Kd {
    pub oversold: f64,
    pub overbought: f64,
}

impl Default for Kd {
    fn default() -> Self {
        Kd {
            oversold: 20.0,
            overbought: 80.0,
        }
    }
}

impl Strategy for Kd {
    fn name(&self) -> String {
        format!("KD({},{})", self.oversold, self.overbought)
    }

    fn required_columns(&self) -> Vec<String> {
        vec!["k".into(), "d".into()]
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        let k = Operand::field("k");
        let d = Operand::field("d");
        let k_at = |i: usize| bars[i].field("k");
        Ok(signals_from(
            bars.len(),
            |i| crosses_above(bars, i, &k, &d) && k_at(i).is_some_and(|v| v < self.overbought),
            |i| crosses_below(bars, i, &k, &d) && k_at(i).is_some_and(|v| v > self.oversold),
        ))
    }
}

/// MACD line crossing its signal line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Macd;

impl Strategy for Macd {
    fn name(&self) -> String {
        "MACD".into()
    }

    fn required_columns(&self) -> Vec<String> {
        vec!["macd".into(), "macd_signal".into()]
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        let line = Operand::field("macd");
        let signal = Operand::field("macd_signal");
        Ok(signals_from(
            bars.len(),
            |i| crosses_above(bars, i, &line, &signal),
            |i| crosses_below(bars, i, &line, &signal),
        ))
    }
}

/// Close re-entering the bands: up through the lower band buys, down
/// through the upper band sells.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bollinger;

impl Strategy for Bollinger {
    fn name(&self) -> String {
        "Bollinger".into()
    }

    fn required_columns(&self) -> Vec<String> {
        vec!["bb_lower".into(), "bb_upper".into()]
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        let close = Operand::field("close");
        let lower = Operand::field("bb_lower");
        let upper = Operand::field("bb_upper");
        Ok(signals_from(
            bars.len(),
            |i| crosses_above(bars, i, &close, &lower),
            |i| crosses_below(bars, i, &close, &upper),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::strategy::test_support::bars_with;

    #[test]
    fn ma_cross_rejects_inverted_periods() {
        assert!(MaCross::new(20, 5).is_err());
        assert!(MaCross::new(10, 10).is_err());
        assert!(MaCross::new(0, 10).is_err());
        assert_eq!(MaCross::new(5, 20).unwrap().name(), "MA5x20");
    }

    #[test]
    fn ma_cross_golden_and_death() {
        let bars = bars_with(
            &[10.0; 5],
            &[
                ("ma5", &[9.0, 11.0, 12.0, 10.0, 9.0]),
                ("ma20", &[10.0, 10.0, 10.0, 10.0, 10.0]),
            ],
        );
        let signals = MaCross::new(5, 20).unwrap().generate_signals(&bars).unwrap();
        assert_eq!(
            signals,
            vec![Signal::Hold, Signal::Buy, Signal::Hold, Signal::Hold, Signal::Sell]
        );
    }

    #[test]
    fn ma_cross_missing_column_is_fatal() {
        let bars = bars_with(&[10.0, 11.0], &[("ma5", &[1.0, 2.0])]);
        let err = MaCross::new(5, 20).unwrap().generate_signals(&bars).unwrap_err();
        assert!(matches!(err, TwquantError::MissingColumn { ref column, .. } if column == "ma20"));
    }

    #[test]
    fn rsi_band_recrossings() {
        let bars = bars_with(&[10.0; 6], &[("rsi", &[25.0, 35.0, 50.0, 75.0, 65.0, 60.0])]);
        let signals = Rsi::default().generate_signals(&bars).unwrap();
        assert_eq!(
            signals,
            vec![
                Signal::Hold,
                Signal::Buy,
                Signal::Hold,
                Signal::Hold,
                Signal::Sell,
                Signal::Hold
            ]
        );
    }

    #[test]
    fn kd_cross_filtered_by_band() {
        let bars = bars_with(
            &[10.0; 4],
            &[("k", &[40.0, 60.0, 85.0, 95.0]), ("d", &[50.0, 50.0, 90.0, 90.0])],
        );
        let signals = Kd::default().generate_signals(&bars).unwrap();
        // bar 1: k crosses above d at 60 < 80 -> buy
        // bar 2: k crosses below d at 85 > 20 -> sell
        // bar 3: k crosses above d but 95 >= 80 -> hold
        assert_eq!(
            signals,
            vec![Signal::Hold, Signal::Buy, Signal::Sell, Signal::Hold]
        );
    }

    #[test]
    fn macd_crosses() {
        let bars = bars_with(
            &[10.0; 3],
            &[("macd", &[-1.0, 1.0, -0.5]), ("macd_signal", &[0.0, 0.0, 0.0])],
        );
        let signals = Macd.generate_signals(&bars).unwrap();
        assert_eq!(signals, vec![Signal::Hold, Signal::Buy, Signal::Sell]);
    }

    #[test]
    fn bollinger_reentry() {
        let bars = bars_with(
            &[89.0, 92.0, 111.0, 108.0],
            &[
                ("bb_lower", &[90.0, 90.0, 90.0, 90.0]),
                ("bb_upper", &[110.0, 110.0, 110.0, 110.0]),
            ],
        );
        let signals = Bollinger.generate_signals(&bars).unwrap();
        assert_eq!(
            signals,
            vec![Signal::Hold, Signal::Buy, Signal::Hold, Signal::Sell]
        );
    }
}
