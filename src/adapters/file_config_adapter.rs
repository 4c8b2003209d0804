//! INI file configuration adapter.

use crate::domain::error::TwquantError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TwquantError> {
        let mut config = Ini::new();
        config
            .load(path.as_ref())
            .map_err(|reason| TwquantError::ConfigParse {
                file: path.as_ref().display().to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, TwquantError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| TwquantError::ConfigParse {
                file: "<string>".into(),
                reason,
            })?;
        Ok(Self { config })
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.config
            .getint(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_ref()
            .and_then(|v| Self::parse_bool(v))
            .unwrap_or(default)
    }

    fn keys(&self, section: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .config
            .get_map_ref()
            .get(&section.to_lowercase())
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_config() {
        let content = r#"
[data]
dir = ./data/prices

[backtest]
initial_capital = 1000000
commission = 0.001425

[strategy]
kind = ma_cross
short = 5
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("data", "dir"),
            Some("./data/prices".to_string())
        );
        assert_eq!(
            adapter.get_string("strategy", "kind"),
            Some("ma_cross".to_string())
        );
        assert_eq!(adapter.get_int("strategy", "short", 0), 5);
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter =
            FileConfigAdapter::from_string("[backtest]\ninitial_capital = 100\n").unwrap();
        assert_eq!(adapter.get_string("backtest", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_int_returns_default_for_non_numeric() {
        let adapter = FileConfigAdapter::from_string("[scan]\nworkers = abc\n").unwrap();
        assert_eq!(adapter.get_int("scan", "workers", 4), 4);
        assert_eq!(adapter.get_int("scan", "missing", 42), 42);
    }

    #[test]
    fn get_double_returns_value() {
        let adapter =
            FileConfigAdapter::from_string("[backtest]\ntax = 0.003\n").unwrap();
        assert_eq!(adapter.get_double("backtest", "tax", 0.0), 0.003);
        assert_eq!(adapter.get_double("backtest", "missing", 99.9), 99.9);
    }

    #[test]
    fn get_bool_values() {
        let adapter = FileConfigAdapter::from_string(
            "[scan]\na = true\nb = yes\nc = 0\nd = maybe\n",
        )
        .unwrap();
        assert!(adapter.get_bool("scan", "a", false));
        assert!(adapter.get_bool("scan", "b", false));
        assert!(!adapter.get_bool("scan", "c", true));
        assert!(adapter.get_bool("scan", "d", true));
    }

    #[test]
    fn get_list_splits_on_commas() {
        let adapter =
            FileConfigAdapter::from_string("[portfolio]\ntickers = 2330, 2317,,0050\n").unwrap();
        assert_eq!(
            adapter.get_list("portfolio", "tickers"),
            vec!["2330", "2317", "0050"]
        );
        assert!(adapter.get_list("portfolio", "missing").is_empty());
    }

    #[test]
    fn keys_are_sorted_and_lowercase() {
        let adapter =
            FileConfigAdapter::from_string("[Strategy]\nKind = rsi\noversold = 25\n").unwrap();
        assert_eq!(adapter.keys("strategy"), vec!["kind", "oversold"]);
        assert!(adapter.keys("nothing").is_empty());
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[data]\ndir = /srv/tw\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(adapter.get_string("data", "dir"), Some("/srv/tw".to_string()));
    }

    #[test]
    fn from_file_returns_error_for_missing_file() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(matches!(result, Err(TwquantError::ConfigParse { .. })));
    }
}
