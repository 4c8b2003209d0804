//! Configuration validation.
//!
//! Each command validates the sections it reads before anything runs, so a
//! bad value fails fast with the section and key that caused it.

use crate::domain::error::TwquantError;
use crate::domain::optimizer::RankMetric;
use crate::domain::policy::{Frequency, TickerRule};
use crate::domain::strategy::condition::Condition;
use crate::domain::strategy::spec::KINDS;
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

/// Policy names accepted in `[portfolio] policy`.
pub const POLICIES: &[&str] = &[
    "equal_weight",
    "buy_and_hold",
    "multilayer",
    "rebuy",
    "dca",
    "strategy_driven",
];

/// Keys of `[strategy]` that are not strategy parameters.
pub const STRATEGY_RESERVED_KEYS: &[&str] = &[
    "kind",
    "label",
    "buy",
    "sell",
    "stop_loss",
    "take_profit",
    "trailing_stop",
    "sizing",
    "sizing_value",
];

/// Keys of `[optimize]` that are not grid axes.
pub const OPTIMIZE_RESERVED_KEYS: &[&str] = &["kind", "metric", "min_trades", "top"];

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> TwquantError {
    TwquantError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> TwquantError {
    TwquantError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

/// The key's value as a number, `None` when absent.
pub fn number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, TwquantError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(section, key, format!("`{}` is not a number", raw.trim()))),
    }
}

fn number_in(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    accept: impl Fn(f64) -> bool,
    reason: &str,
) -> Result<(), TwquantError> {
    match number(config, section, key)? {
        Some(v) if !accept(v) => Err(invalid(section, key, reason)),
        _ => Ok(()),
    }
}

fn whole(config: &dyn ConfigPort, section: &str, key: &str, min: f64) -> Result<(), TwquantError> {
    number_in(
        config,
        section,
        key,
        |v| v.fract() == 0.0 && v >= min,
        &format!("{key} must be a whole number of at least {min}"),
    )
}

/// Optional `YYYY-MM-DD` date.
pub fn date(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<NaiveDate>, TwquantError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(Some)
            .map_err(|_| invalid(section, key, format!("invalid {key} format, expected YYYY-MM-DD"))),
    }
}

pub fn validate_data_config(config: &dyn ConfigPort) -> Result<(), TwquantError> {
    match config.get_string("data", "dir") {
        Some(s) if !s.trim().is_empty() => Ok(()),
        _ => Err(missing("data", "dir")),
    }
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), TwquantError> {
    number_in(config, "backtest", "initial_capital", |v| v > 0.0, "initial_capital must be positive")?;
    for key in ["commission", "tax", "slippage"] {
        number_in(
            config,
            "backtest",
            key,
            |v| (0.0..1.0).contains(&v),
            &format!("{key} must be in [0, 1)"),
        )?;
    }
    number_in(
        config,
        "backtest",
        "risk_free_rate",
        |v| (0.0..1.0).contains(&v),
        "risk_free_rate must be between 0 and 1",
    )?;
    number_in(
        config,
        "backtest",
        "position_size",
        |v| v > 0.0 && v <= 1.0,
        "position_size must be between 0 and 1",
    )?;

    let start = date(config, "backtest", "start_date")?;
    let end = date(config, "backtest", "end_date")?;
    if let (Some(start), Some(end)) = (start, end) {
        if start >= end {
            return Err(invalid("backtest", "start_date", "start_date must be before end_date"));
        }
    }
    Ok(())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), TwquantError> {
    let kind = match config.get_string("strategy", "kind") {
        Some(k) if !k.trim().is_empty() => k.trim().to_lowercase(),
        _ => return Err(missing("strategy", "kind")),
    };

    if kind == "multi_condition" {
        let buy = config.get_string("strategy", "buy").unwrap_or_default();
        let sell = config.get_string("strategy", "sell").unwrap_or_default();
        if buy.trim().is_empty() && sell.trim().is_empty() {
            return Err(missing("strategy", "buy"));
        }
        for (key, text) in [("buy", &buy), ("sell", &sell)] {
            Condition::parse_all(text).map_err(|e| invalid("strategy", key, e.to_string()))?;
        }
    } else if !KINDS.contains(&kind.as_str()) {
        return Err(invalid("strategy", "kind", format!("unknown strategy kind `{kind}`")));
    } else {
        for key in config.keys("strategy") {
            if !STRATEGY_RESERVED_KEYS.contains(&key.as_str()) {
                number(config, "strategy", &key)?;
            }
        }
    }

    for key in ["stop_loss", "take_profit", "trailing_stop"] {
        number_in(
            config,
            "strategy",
            key,
            |v| v.abs() < 1.0 || key == "take_profit",
            &format!("{key} must be a fraction below 1"),
        )?;
    }

    match config.get_string("strategy", "sizing").as_deref().map(str::trim) {
        None | Some("") => {}
        Some("kelly") => {}
        Some("percent") => number_in(
            config,
            "strategy",
            "sizing_value",
            |v| v > 0.0 && v <= 1.0,
            "percent sizing_value must be between 0 and 1",
        )?,
        Some("fixed") => match number(config, "strategy", "sizing_value")? {
            Some(v) if v > 0.0 => {}
            Some(_) => return Err(invalid("strategy", "sizing_value", "fixed sizing_value must be positive")),
            None => return Err(missing("strategy", "sizing_value")),
        },
        Some(other) => {
            return Err(invalid(
                "strategy",
                "sizing",
                format!("unknown sizing `{other}`, expected percent, fixed or kelly"),
            ));
        }
    }
    Ok(())
}

pub fn validate_portfolio_config(config: &dyn ConfigPort) -> Result<(), TwquantError> {
    let policy = match config.get_string("portfolio", "policy") {
        Some(p) if !p.trim().is_empty() => p.trim().to_lowercase(),
        _ => return Err(missing("portfolio", "policy")),
    };
    if !POLICIES.contains(&policy.as_str()) {
        return Err(invalid("portfolio", "policy", format!("unknown policy `{policy}`")));
    }
    if config.get_list("portfolio", "tickers").is_empty() {
        return Err(missing("portfolio", "tickers"));
    }

    if let Some(freq) = config.get_string("portfolio", "frequency") {
        freq.parse::<Frequency>()
            .map_err(|e| invalid("portfolio", "frequency", e.to_string()))?;
    }
    whole(config, "portfolio", "top_n", 1.0)?;
    number_in(
        config,
        "portfolio",
        "buy_day",
        |v| v.fract() == 0.0 && (1.0..=31.0).contains(&v),
        "buy_day must be a day of month",
    )?;
    number_in(config, "portfolio", "monthly_amount", |v| v >= 0.0, "monthly_amount must be non-negative")?;
    whole(config, "portfolio", "cooldown_days", 0.0)?;
    number_in(
        config,
        "portfolio",
        "rebuy_fraction",
        |v| v > 0.0 && v <= 1.0,
        "rebuy_fraction must be in (0, 1]",
    )?;
    for key in ["stop_loss", "take_profit", "trailing_stop"] {
        number(config, "portfolio", key)?;
    }

    for entry in config.get_list("portfolio", "extra_buys") {
        parse_extra_buy(&entry).map_err(|reason| invalid("portfolio", "extra_buys", reason))?;
    }
    for entry in config.get_list("portfolio", "rules") {
        let (_, rule) = entry
            .split_once(':')
            .ok_or_else(|| invalid("portfolio", "rules", format!("`{entry}` is not ticker:rule")))?;
        rule.parse::<TickerRule>()
            .map_err(|e| invalid("portfolio", "rules", e.to_string()))?;
    }
    if let Some(rule) = config.get_string("portfolio", "default_rule") {
        rule.parse::<TickerRule>()
            .map_err(|e| invalid("portfolio", "default_rule", e.to_string()))?;
    }
    Ok(())
}

/// `YYYY-MM-DD:amount`.
pub fn parse_extra_buy(entry: &str) -> Result<(NaiveDate, f64), String> {
    let (d, amount) = entry
        .split_once(':')
        .ok_or_else(|| format!("`{entry}` is not date:amount"))?;
    let d = NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d")
        .map_err(|_| format!("`{}` is not a YYYY-MM-DD date", d.trim()))?;
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|_| format!("`{}` is not an amount", amount.trim()))?;
    if amount <= 0.0 {
        return Err(format!("amount {amount} must be positive"));
    }
    Ok((d, amount))
}

pub fn validate_optimize_config(config: &dyn ConfigPort) -> Result<(), TwquantError> {
    match config.get_string("optimize", "kind") {
        Some(k) if KINDS.contains(&k.trim().to_lowercase().as_str()) => {}
        Some(k) => {
            return Err(invalid("optimize", "kind", format!("unknown strategy kind `{}`", k.trim())));
        }
        None => return Err(missing("optimize", "kind")),
    }
    if let Some(metric) = config.get_string("optimize", "metric") {
        metric
            .parse::<RankMetric>()
            .map_err(|e| invalid("optimize", "metric", e.to_string()))?;
    }
    whole(config, "optimize", "min_trades", 0.0)?;
    whole(config, "optimize", "top", 1.0)?;

    let mut axes = 0;
    for key in config.keys("optimize") {
        if OPTIMIZE_RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let values = config.get_list("optimize", &key);
        if values.is_empty() {
            return Err(invalid("optimize", &key, "grid axis has no values"));
        }
        if let Some(bad) = values.iter().find(|v| v.parse::<f64>().is_err()) {
            return Err(invalid("optimize", &key, format!("`{bad}` is not a number")));
        }
        axes += 1;
    }
    if axes == 0 {
        return Err(TwquantError::ConfigMissing {
            section: "optimize".into(),
            key: "<grid axis>".into(),
        });
    }
    Ok(())
}

pub fn validate_scan_config(config: &dyn ConfigPort) -> Result<(), TwquantError> {
    whole(config, "scan", "workers", 1.0)?;
    whole(config, "scan", "min_days", 0.0)?;
    number_in(config, "scan", "min_volume", |v| v >= 0.0, "min_volume must be non-negative")?;
    whole(config, "scan", "min_trades", 0.0)?;
    whole(config, "scan", "top_n", 0.0)?;
    whole(config, "scan", "checkpoint_every", 1.0)?;
    for kind in config.get_list("scan", "strategies") {
        if !KINDS.contains(&kind.to_lowercase().as_str()) {
            return Err(invalid("scan", "strategies", format!("unknown strategy kind `{kind}`")));
        }
    }
    Ok(())
}

pub fn validate_batch_config(config: &dyn ConfigPort) -> Result<(), TwquantError> {
    whole(config, "batch", "top_n", 0.0)?;
    whole(config, "batch", "min_trades", 0.0)?;
    if let Some(metric) = config.get_string("batch", "sort_by") {
        metric
            .parse::<RankMetric>()
            .map_err(|e| invalid("batch", "sort_by", e.to_string()))?;
    }
    if let Some(aggregate) = config.get_string("batch", "aggregate") {
        aggregate
            .parse::<crate::domain::batch::Aggregate>()
            .map_err(|e| invalid("batch", "aggregate", e.to_string()))?;
    }
    for kind in config.get_list("batch", "strategies") {
        if !KINDS.contains(&kind.to_lowercase().as_str()) {
            return Err(invalid("batch", "strategies", format!("unknown strategy kind `{kind}`")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    fn make_config(content: &str) -> FileConfigAdapter {
        FileConfigAdapter::from_string(content).unwrap()
    }

    fn invalid_key(err: TwquantError) -> String {
        match err {
            TwquantError::ConfigInvalid { key, .. } | TwquantError::ConfigMissing { key, .. } => key,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn valid_backtest_config_passes() {
        let config = make_config(
            r#"
[backtest]
initial_capital = 1000000
commission = 0.001425
tax = 0.003
slippage = 0.001
risk_free_rate = 0.02
position_size = 1.0
start_date = 2020-01-01
end_date = 2024-12-31
"#,
        );
        assert!(validate_backtest_config(&config).is_ok());
    }

    #[test]
    fn empty_backtest_section_uses_defaults() {
        assert!(validate_backtest_config(&make_config("[backtest]\n")).is_ok());
    }

    #[test]
    fn initial_capital_must_be_positive() {
        let err = validate_backtest_config(&make_config("[backtest]\ninitial_capital = 0\n")).unwrap_err();
        assert_eq!(invalid_key(err), "initial_capital");
    }

    #[test]
    fn non_numeric_value_is_reported() {
        let err = validate_backtest_config(&make_config("[backtest]\ntax = lots\n")).unwrap_err();
        assert_eq!(invalid_key(err), "tax");
    }

    #[test]
    fn negative_commission_fails() {
        let err =
            validate_backtest_config(&make_config("[backtest]\ncommission = -0.1\n")).unwrap_err();
        assert_eq!(invalid_key(err), "commission");
    }

    #[test]
    fn start_date_after_end_date_fails() {
        let config = make_config("[backtest]\nstart_date = 2024-12-31\nend_date = 2020-01-01\n");
        assert_eq!(invalid_key(validate_backtest_config(&config).unwrap_err()), "start_date");
    }

    #[test]
    fn invalid_date_format_fails() {
        let config = make_config("[backtest]\nstart_date = 2020/01/01\n");
        assert_eq!(invalid_key(validate_backtest_config(&config).unwrap_err()), "start_date");
    }

    #[test]
    fn data_dir_required() {
        assert_eq!(invalid_key(validate_data_config(&make_config("[data]\n")).unwrap_err()), "dir");
    }

    #[test]
    fn valid_strategy_config_passes() {
        let config = make_config(
            "[strategy]\nkind = ma_cross\nshort = 5\nlong = 20\nstop_loss = -0.05\nsizing = percent\nsizing_value = 0.5\n",
        );
        assert!(validate_strategy_config(&config).is_ok());
    }

    #[test]
    fn unknown_kind_fails() {
        let config = make_config("[strategy]\nkind = astrology\n");
        assert_eq!(invalid_key(validate_strategy_config(&config).unwrap_err()), "kind");
    }

    #[test]
    fn missing_kind_fails() {
        let err = validate_strategy_config(&make_config("[strategy]\nshort = 5\n")).unwrap_err();
        assert!(matches!(err, TwquantError::ConfigMissing { key, .. } if key == "kind"));
    }

    #[test]
    fn non_numeric_param_fails() {
        let config = make_config("[strategy]\nkind = rsi\noversold = low\n");
        assert_eq!(invalid_key(validate_strategy_config(&config).unwrap_err()), "oversold");
    }

    #[test]
    fn multi_condition_needs_conditions() {
        let ok = make_config("[strategy]\nkind = multi_condition\nbuy = rsi < 30 & close > ma20\n");
        assert!(validate_strategy_config(&ok).is_ok());

        let empty = make_config("[strategy]\nkind = multi_condition\n");
        assert_eq!(invalid_key(validate_strategy_config(&empty).unwrap_err()), "buy");

        let bad = make_config("[strategy]\nkind = multi_condition\nsell = rsi ~ 70\n");
        assert_eq!(invalid_key(validate_strategy_config(&bad).unwrap_err()), "sell");
    }

    #[test]
    fn fixed_sizing_needs_value() {
        let config = make_config("[strategy]\nkind = macd\nsizing = fixed\n");
        assert_eq!(invalid_key(validate_strategy_config(&config).unwrap_err()), "sizing_value");
    }

    #[test]
    fn valid_portfolio_config_passes() {
        let config = make_config(
            r#"
[portfolio]
policy = strategy_driven
tickers = 2330, 2317, 0050
rules = 2330:ma5x20, 2317:macd
default_rule = rsi
extra_buys = 2024-03-01:50000
"#,
        );
        assert!(validate_portfolio_config(&config).is_ok());
    }

    #[test]
    fn portfolio_needs_tickers() {
        let config = make_config("[portfolio]\npolicy = dca\n");
        assert_eq!(invalid_key(validate_portfolio_config(&config).unwrap_err()), "tickers");
    }

    #[test]
    fn portfolio_rejects_bad_values() {
        let base = "[portfolio]\npolicy = dca\ntickers = 2330\n";
        for (extra, key) in [
            ("buy_day = 40\n", "buy_day"),
            ("frequency = hourly\n", "frequency"),
            ("extra_buys = 2024-03-01\n", "extra_buys"),
            ("rules = 2330\n", "rules"),
            ("rebuy_fraction = 1.5\n", "rebuy_fraction"),
        ] {
            let config = make_config(&format!("{base}{extra}"));
            assert_eq!(invalid_key(validate_portfolio_config(&config).unwrap_err()), key);
        }
    }

    #[test]
    fn extra_buy_parsing() {
        assert_eq!(
            parse_extra_buy("2024-03-01:50000").unwrap(),
            (NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 50_000.0)
        );
        assert!(parse_extra_buy("2024-03-01:-5").is_err());
    }

    #[test]
    fn optimize_needs_an_axis() {
        let ok = make_config("[optimize]\nkind = ma_cross\nshort = 5,10\nlong = 20,60\nmetric = sharpe_ratio\n");
        assert!(validate_optimize_config(&ok).is_ok());

        let none = make_config("[optimize]\nkind = ma_cross\n");
        assert!(validate_optimize_config(&none).is_err());

        let bad = make_config("[optimize]\nkind = ma_cross\nshort = 5,x\n");
        assert_eq!(invalid_key(validate_optimize_config(&bad).unwrap_err()), "short");
    }

    #[test]
    fn scan_config_checks() {
        assert!(validate_scan_config(&make_config("[scan]\nworkers = 4\nstrategies = turtle, macd\n")).is_ok());
        let err = validate_scan_config(&make_config("[scan]\nworkers = 0\n")).unwrap_err();
        assert_eq!(invalid_key(err), "workers");
        let err = validate_scan_config(&make_config("[scan]\nstrategies = voodoo\n")).unwrap_err();
        assert_eq!(invalid_key(err), "strategies");
    }

    #[test]
    fn batch_config_checks() {
        assert!(validate_batch_config(&make_config("[batch]\nsort_by = total_return\naggregate = median\n")).is_ok());
        let err = validate_batch_config(&make_config("[batch]\naggregate = mode\n")).unwrap_err();
        assert_eq!(invalid_key(err), "aggregate");
    }
}
