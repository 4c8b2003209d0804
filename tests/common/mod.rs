#![allow(dead_code)]

use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::Path;
use twquant::domain::bar::Bar;
use twquant::domain::error::TwquantError;
use twquant::domain::strategy::{Signal, Strategy};
use twquant::ports::data_port::DataPort;

pub struct MockDataPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockDataPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, ticker: &str, bars: Vec<Bar>) -> Self {
        self.data.insert(ticker.to_string(), bars);
        self
    }

    pub fn with_error(mut self, ticker: &str, reason: &str) -> Self {
        self.errors.insert(ticker.to_string(), reason.to_string());
        self
    }
}

impl DataPort for MockDataPort {
    fn fetch_bars(
        &self,
        ticker: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, TwquantError> {
        if let Some(reason) = self.errors.get(ticker) {
            return Err(TwquantError::Data {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(ticker)
            .map(|bars| {
                bars.iter()
                    .filter(|b| start.is_none_or(|s| b.date >= s) && end.is_none_or(|e| b.date <= e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn list_tickers(&self) -> Result<Vec<String>, TwquantError> {
        let mut tickers: Vec<String> = self
            .data
            .keys()
            .chain(self.errors.keys())
            .cloned()
            .collect();
        tickers.sort();
        tickers.dedup();
        Ok(tickers)
    }
}

/// Emits a fixed signal per bar index; `Hold` past the end of the script.
pub struct Scripted {
    pub script: Vec<Signal>,
}

impl Scripted {
    pub fn buy_sell(len: usize, buy_at: usize, sell_at: usize) -> Self {
        let mut script = vec![Signal::Hold; len];
        script[buy_at] = Signal::Buy;
        script[sell_at] = Signal::Sell;
        Self { script }
    }
}

impl Strategy for Scripted {
    fn name(&self) -> String {
        "scripted".into()
    }

    fn generate_signals(&self, bars: &[Bar]) -> Result<Vec<Signal>, TwquantError> {
        Ok((0..bars.len())
            .map(|i| self.script.get(i).copied().unwrap_or_default())
            .collect())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(date: &str, close: f64) -> Bar {
    Bar::new(
        NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        close - 1.0,
        close + 1.0,
        close - 2.0,
        close,
        1000.0,
    )
}

/// One bar per calendar day with close moving by `step` each day.
pub fn generate_bars(start_date: &str, count: usize, start_price: f64, step: f64) -> Vec<Bar> {
    let start = NaiveDate::parse_from_str(start_date, "%Y-%m-%d").unwrap();
    (0..count)
        .map(|i| {
            let close = start_price + step * i as f64;
            Bar::new(
                start + chrono::Duration::days(i as i64),
                close,
                close + 1.0,
                close - 1.0,
                close,
                1000.0,
            )
        })
        .collect()
}

/// Weekday bars only, close moving by `step` each trading day.
pub fn generate_trading_days(start: NaiveDate, end: NaiveDate, start_price: f64, step: f64) -> Vec<Bar> {
    use chrono::Datelike;
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| d.weekday().number_from_monday() <= 5)
        .enumerate()
        .map(|(i, d)| {
            let close = start_price + step * i as f64;
            Bar::new(d, close, close + 1.0, close - 1.0, close, 1000.0)
        })
        .collect()
}

pub fn write_csv(dir: &Path, ticker: &str, bars: &[Bar]) {
    let mut content = String::from("date,open,high,low,close,volume\n");
    for bar in bars {
        content.push_str(&format!(
            "{},{},{},{},{},{}\n",
            bar.date, bar.open, bar.high, bar.low, bar.close, bar.volume
        ));
    }
    std::fs::write(dir.join(format!("{ticker}.csv")), content).unwrap();
}
