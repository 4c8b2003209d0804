//! Per-ticker bar series and the unified multi-ticker timeline.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};

use super::bar::Bar;

#[derive(Debug, Clone)]
pub struct TickerData {
    pub ticker: String,
    pub bars: Vec<Bar>,
    pub date_index: HashMap<NaiveDate, usize>,
}

impl TickerData {
    pub fn new(ticker: impl Into<String>, bars: Vec<Bar>) -> Self {
        let date_index = bars
            .iter()
            .enumerate()
            .map(|(i, bar)| (bar.date, i))
            .collect();
        Self {
            ticker: ticker.into(),
            bars,
            date_index,
        }
    }

    pub fn bar_count(&self) -> usize {
        self.bars.len()
    }

    pub fn get_bar(&self, date: NaiveDate) -> Option<&Bar> {
        self.date_index.get(&date).map(|&i| &self.bars[i])
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }

    /// Mean daily volume, zero for an empty series.
    pub fn average_volume(&self) -> f64 {
        if self.bars.is_empty() {
            return 0.0;
        }
        self.bars.iter().map(|b| b.volume).sum::<f64>() / self.bars.len() as f64
    }
}

/// Sorted union of every ticker's dates.
pub fn build_unified_timeline(tickers: &[TickerData]) -> Vec<NaiveDate> {
    let unique_dates: BTreeSet<NaiveDate> = tickers
        .iter()
        .flat_map(|td| td.bars.iter().map(|bar| bar.date))
        .collect();
    unique_dates.into_iter().collect()
}
