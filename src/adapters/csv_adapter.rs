//! CSV file data adapter.
//!
//! One file per ticker, `{ticker}.csv`, with a header row. The OHLCV columns
//! are required; every other column becomes a named bar field.

use crate::domain::bar::Bar;
use crate::domain::error::TwquantError;
use crate::ports::data_port::DataPort;
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

const REQUIRED: [&str; 6] = ["date", "open", "high", "low", "close", "volume"];

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{}.csv", ticker))
    }
}

fn parse_price(value: &str, column: &str, line: usize) -> Result<f64, TwquantError> {
    value.trim().parse().map_err(|e| TwquantError::Data {
        reason: format!("line {}: invalid {} value `{}`: {}", line, column, value, e),
    })
}

impl DataPort for CsvAdapter {
    fn fetch_bars(
        &self,
        ticker: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, TwquantError> {
        let path = self.csv_path(ticker);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TwquantError::NoData {
                    ticker: ticker.to_string(),
                });
            }
            Err(e) => {
                return Err(TwquantError::Data {
                    reason: format!("failed to read {}: {}", path.display(), e),
                });
            }
        };

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| TwquantError::Data {
                reason: format!("CSV header error in {}: {}", path.display(), e),
            })?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        let mut index = [0usize; 6];
        for (slot, name) in index.iter_mut().zip(REQUIRED) {
            *slot = headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| TwquantError::Data {
                    reason: format!("{} is missing the `{}` column", path.display(), name),
                })?;
        }
        let extra: Vec<(usize, &str)> = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !index.contains(i))
            .map(|(i, h)| (i, h.as_str()))
            .collect();

        let mut bars = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let line = row + 2;
            let record = result.map_err(|e| TwquantError::Data {
                reason: format!("CSV parse error: {}", e),
            })?;
            let cell = |i: usize| record.get(i).unwrap_or("");

            let date_str = cell(index[0]).trim();
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|e| {
                TwquantError::Data {
                    reason: format!("line {}: invalid date `{}`: {}", line, date_str, e),
                }
            })?;
            if start.is_some_and(|s| date < s) || end.is_some_and(|e| date > e) {
                continue;
            }

            let mut bar = Bar::new(
                date,
                parse_price(cell(index[1]), "open", line)?,
                parse_price(cell(index[2]), "high", line)?,
                parse_price(cell(index[3]), "low", line)?,
                parse_price(cell(index[4]), "close", line)?,
                parse_price(cell(index[5]), "volume", line)?,
            );
            for &(i, name) in &extra {
                if let Ok(value) = cell(i).trim().parse::<f64>() {
                    bar.fields.insert(name.to_string(), value);
                }
            }
            bars.push(bar);
        }

        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    fn list_tickers(&self) -> Result<Vec<String>, TwquantError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| TwquantError::Data {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut tickers = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "csv") {
                if let Some(stem) = path.file_stem() {
                    tickers.push(stem.to_string_lossy().into_owned());
                }
            }
        }

        tickers.sort();
        Ok(tickers)
    }
}
