//! Domain error types.

use chrono::NaiveDate;

/// Top-level error type for twquant.
#[derive(Debug, thiserror::Error)]
pub enum TwquantError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("strategy {strategy} requires column `{column}`")]
    MissingColumn { strategy: String, column: String },

    #[error("no strategy supplied")]
    NoStrategy,

    #[error("unknown strategy: {name}")]
    UnknownStrategy { name: String },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("no data for {ticker}")]
    NoData { ticker: String },

    #[error("insufficient data for {ticker}: have {bars} bars, need {minimum}")]
    InsufficientData {
        ticker: String,
        bars: usize,
        minimum: usize,
    },

    #[error("bars are not in chronological order at {date}")]
    UnorderedBars { date: NaiveDate },

    #[error("strategy produced {signals} signals for {bars} bars")]
    SignalMismatch { bars: usize, signals: usize },

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("another scan holds the lock at {path}")]
    ScanLocked { path: String },

    #[error("scan interrupted after {processed} tickers; progress saved")]
    ScanInterrupted { processed: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<&TwquantError> for std::process::ExitCode {
    fn from(err: &TwquantError) -> Self {
        let code: u8 = match err {
            TwquantError::Io(_) | TwquantError::Json(_) => 1,
            TwquantError::ConfigParse { .. }
            | TwquantError::ConfigMissing { .. }
            | TwquantError::ConfigInvalid { .. } => 2,
            TwquantError::MissingColumn { .. }
            | TwquantError::NoStrategy
            | TwquantError::UnknownStrategy { .. }
            | TwquantError::InvalidParameter { .. } => 4,
            TwquantError::NoData { .. }
            | TwquantError::InsufficientData { .. }
            | TwquantError::UnorderedBars { .. }
            | TwquantError::SignalMismatch { .. }
            | TwquantError::Data { .. } => 5,
            TwquantError::ScanLocked { .. } | TwquantError::ScanInterrupted { .. } => 6,
        };
        std::process::ExitCode::from(code)
    }
}

impl TwquantError {
    /// True for errors caused by configuration rather than by the data.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            TwquantError::ConfigParse { .. }
                | TwquantError::ConfigMissing { .. }
                | TwquantError::ConfigInvalid { .. }
                | TwquantError::MissingColumn { .. }
                | TwquantError::NoStrategy
                | TwquantError::UnknownStrategy { .. }
                | TwquantError::InvalidParameter { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::ExitCode;

    #[test]
    fn missing_column_message_names_strategy_and_column() {
        let err = TwquantError::MissingColumn {
            strategy: "MA5x20".into(),
            column: "ma20".into(),
        };
        assert_eq!(err.to_string(), "strategy MA5x20 requires column `ma20`");
        assert!(err.is_configuration());
    }

    #[test]
    fn data_errors_are_not_configuration() {
        let err = TwquantError::InsufficientData {
            ticker: "2330".into(),
            bars: 0,
            minimum: 1,
        };
        assert!(!err.is_configuration());
        assert_eq!(ExitCode::from(&err), ExitCode::from(5));
    }

    #[test]
    fn scan_lock_maps_to_its_own_exit_code() {
        let err = TwquantError::ScanLocked {
            path: "scan.lock".into(),
        };
        assert_eq!(ExitCode::from(&err), ExitCode::from(6));
    }
}
