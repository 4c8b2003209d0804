//! Daily bar representation with named indicator fields.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::error::TwquantError;

/// One trading day for one ticker: OHLCV plus precomputed indicator fields
/// (`ma5`, `rsi`, `macd_signal`, `foreign`, ...) keyed by lowercase name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub fields: BTreeMap<String, f64>,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: f64) -> Self {
        self.fields.insert(name.to_lowercase(), value);
        self
    }

    /// Look up a price or indicator field by name. NaN reads as absent.
    pub fn field(&self, name: &str) -> Option<f64> {
        let value = match name {
            "open" => self.open,
            "high" => self.high,
            "low" => self.low,
            "close" => self.close,
            "volume" => self.volume,
            other => *self.fields.get(other)?,
        };
        (!value.is_nan()).then_some(value)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }
}

/// A column is present when at least one bar in the series carries it.
pub fn has_column(bars: &[Bar], name: &str) -> bool {
    bars.iter().any(|bar| bar.has_field(name))
}

/// Fail with `MissingColumn` for the first required column the series lacks.
pub fn require_columns(bars: &[Bar], strategy: &str, columns: &[String]) -> Result<(), TwquantError> {
    match columns.iter().find(|column| !has_column(bars, column)) {
        Some(column) => Err(TwquantError::MissingColumn {
            strategy: strategy.to_string(),
            column: column.clone(),
        }),
        None => Ok(()),
    }
}

/// Bars must have strictly increasing dates.
pub fn check_chronological(bars: &[Bar]) -> Result<(), TwquantError> {
    match bars.windows(2).find(|w| w[1].date <= w[0].date) {
        Some(w) => Err(TwquantError::UnorderedBars { date: w[1].date }),
        None => Ok(()),
    }
}
