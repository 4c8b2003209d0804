//! Bar source port.

use chrono::NaiveDate;

use crate::domain::bar::Bar;
use crate::domain::error::TwquantError;

pub trait DataPort: Send + Sync {
    /// Bars for `ticker` in ascending date order, limited to the inclusive
    /// `[start, end]` range when bounds are given.
    fn fetch_bars(
        &self,
        ticker: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, TwquantError>;

    /// Every ticker the source can serve, sorted.
    fn list_tickers(&self) -> Result<Vec<String>, TwquantError>;
}
