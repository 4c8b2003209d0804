//! Price/volume breakout and mean-reversion strategies. These derive their
//! channels from raw OHLCV rather than precomputed indicator columns.

use super::{Signal, Strategy, signals_from};
use crate::domain::bar::Bar;
use crate::domain::error::TwquantError;
use crate::domain::rolling::{rolling_max, rolling_mean, rolling_min};

fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

fn highs(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.high).collect()
}

fn lows(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.low).collect()
}

fn volumes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.volume).collect()
}

fn positive_window(name: &str, value: usize) -> Result<(), TwquantError> {
    if value == 0 {
        return Err(TwquantError::InvalidParameter {
            name: name.into(),
            reason: "window must be at least 1".into(),
        });
    }
    Ok(())
}

/// Previous bar's channel value, if the window had warmed up.
fn prior(channel: &[Option<f64>], i: usize) -> Option<f64> {
    if i == 0 { None } else { channel[i - 1] }
}

/// Close above the prior `period`-bar high on expanding volume buys; close
/// below the prior `period`-bar low sells.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentumBreakout {
    pub period: usize,
    pub volume_mult: f64,
}

impl MomentumBreakout {
    pub fn new(period: usize, volume_mult: f64) -> Result<Self, TwquantError> {
        positive_window("period", period)?;
        Ok(Self {
            period,
            volume_mult,
        })
    }
}

impl Strategy for MomentumBreakout {
    fn name(&self) -> String {
        format!("Momentum({}d)", self.period)
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        let high_n = rolling_max(&highs(bars), self.period);
        let low_n = rolling_min(&lows(bars), self.period);
        let vol_ma = rolling_mean(&volumes(bars), self.period);
        Ok(signals_from(
            bars.len(),
            |i| {
                prior(&high_n, i).is_some_and(|h| bars[i].close > h)
                    && vol_ma[i].is_some_and(|m| bars[i].volume > m * self.volume_mult)
            },
            |i| prior(&low_n, i).is_some_and(|l| bars[i].close < l),
        ))
    }
}

/// Fades stretched moves: buys when close sits `deviation` below `ma{n}`
/// with an oversold RSI, sells on the overbought mirror.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanReversion {
    pub ma_period: usize,
    pub deviation: f64,
    pub rsi_low: f64,
    pub rsi_high: f64,
}

impl MeanReversion {
    pub fn new(ma_period: usize, deviation: f64, rsi_low: f64, rsi_high: f64) -> Result<Self, TwquantError> {
        positive_window("ma_period", ma_period)?;
        Ok(Self {
            ma_period,
            deviation,
            rsi_low,
            rsi_high,
        })
    }

    fn ma_column(&self) -> String {
        format!("ma{}", self.ma_period)
    }
}

impl Strategy for MeanReversion {
    fn name(&self) -> String {
        format!("MeanReversion(MA{})", self.ma_period)
    }

    fn required_columns(&self) -> Vec<String> {
        vec![self.ma_column(), "rsi".into()]
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        self.ensure_columns(bars)?;
        let ma_column = self.ma_column();
        let stretch: Vec<Option<f64>> = bars
            .iter()
            .map(|b| {
                b.field(&ma_column)
                    .filter(|ma| *ma != 0.0)
                    .map(|ma| (b.close - ma) / ma)
            })
            .collect();
        let rsi = |i: usize| bars[i].field("rsi");
        Ok(signals_from(
            bars.len(),
            |i| {
                stretch[i].is_some_and(|s| s < -self.deviation)
                    && rsi(i).is_some_and(|r| r < self.rsi_low)
            },
            |i| {
                stretch[i].is_some_and(|s| s > self.deviation)
                    && rsi(i).is_some_and(|r| r > self.rsi_high)
            },
        ))
    }
}

/// Volume surge with a strong up day buys; volume drying up on a strong down
/// day sells. Volume is compared with its 20-bar mean.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeBreakout {
    pub volume_mult: f64,
    pub price_change: f64,
}

impl VolumeBreakout {
    const VOLUME_WINDOW: usize = 20;
    const DRY_UP_RATIO: f64 = 0.5;
}

impl Default for VolumeBreakout {
    fn default() -> Self {
        VolumeBreakout {
            volume_mult: 2.0,
            price_change: 0.02,
        }
    }
}

impl Strategy for VolumeBreakout {
    fn name(&self) -> String {
        format!("VolumeBreakout({}x)", self.volume_mult)
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        let vol_ma = rolling_mean(&volumes(bars), Self::VOLUME_WINDOW);
        let close = closes(bars);
        let change = |i: usize| -> Option<f64> {
            (i > 0 && close[i - 1] != 0.0).then(|| close[i] / close[i - 1] - 1.0)
        };
        Ok(signals_from(
            bars.len(),
            |i| {
                vol_ma[i].is_some_and(|m| bars[i].volume > m * self.volume_mult)
                    && change(i).is_some_and(|c| c > self.price_change)
            },
            |i| {
                vol_ma[i].is_some_and(|m| bars[i].volume < m * Self::DRY_UP_RATIO)
                    && change(i).is_some_and(|c| c < -self.price_change)
            },
        ))
    }
}

/// Donchian breakout: close above the prior `entry_period` high buys, close
/// below the prior `exit_period` low sells.
#[derive(Debug, Clone, PartialEq)]
pub struct Turtle {
    pub entry_period: usize,
    pub exit_period: usize,
}

impl Turtle {
    pub fn new(entry_period: usize, exit_period: usize) -> Result<Self, TwquantError> {
        positive_window("entry_period", entry_period)?;
        positive_window("exit_period", exit_period)?;
        Ok(Self {
            entry_period,
            exit_period,
        })
    }
}

impl Strategy for Turtle {
    fn name(&self) -> String {
        format!("Turtle({}/{})", self.entry_period, self.exit_period)
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        let entry_high = rolling_max(&highs(bars), self.entry_period);
        let exit_low = rolling_min(&lows(bars), self.exit_period);
        Ok(signals_from(
            bars.len(),
            |i| prior(&entry_high, i).is_some_and(|h| bars[i].close > h),
            |i| prior(&exit_low, i).is_some_and(|l| bars[i].close < l),
        ))
    }
}
