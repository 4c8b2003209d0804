//! CLI definition and dispatch.
//!
//! Every command reads one INI file, validates the sections it uses, runs
//! the domain engine and prints a plain-text summary to stderr. Ticker lists
//! and single values go to stdout so they can be piped.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::batch::{Aggregate, BatchOptions, batch_backtest, compare_strategies};
use crate::domain::config_validation::{
    OPTIMIZE_RESERVED_KEYS, STRATEGY_RESERVED_KEYS, date, number, parse_extra_buy,
    validate_backtest_config, validate_batch_config, validate_data_config,
    validate_optimize_config, validate_portfolio_config, validate_scan_config,
    validate_strategy_config,
};
use crate::domain::engine::{BacktestEngine, EngineConfig};
use crate::domain::error::TwquantError;
use crate::domain::execution::CostModel;
use crate::domain::metrics::{DEFAULT_RISK_FREE_RATE, Metrics};
use crate::domain::optimizer::{ParamGrid, RankMetric};
use crate::domain::policy::{
    Dca, DiamondHold, EqualWeight, ExtraBuy, Frequency, MultilayerHold, RebalancePolicy,
    RebuyAmount, RebuyHold, StrategyDriven, TickerRule,
};
use crate::domain::portfolio_engine::PortfolioEngine;
use crate::domain::risk::{PositionSizer, SizingMethod, StopRules};
use crate::domain::rolling::ensure_moving_averages;
use crate::domain::scan::{MarketScanner, ScanConfig};
use crate::domain::strategy::condition::Condition;
use crate::domain::strategy::spec::default_roster;
use crate::domain::strategy::{ParamSet, Strategy, StrategySpec};
use crate::domain::ticker_data::TickerData;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::DataPort;

#[derive(Parser, Debug)]
#[command(name = "twquant", about = "Taiwan-stock strategy backtester")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest one strategy on one ticker
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        ticker: Option<String>,
        /// Write the full result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run several strategies on one ticker side by side
    Compare {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        ticker: Option<String>,
        /// Aggregate across the configured ticker list instead of one ticker
        #[arg(long)]
        all: bool,
    },
    /// Grid-search one strategy's parameters on one ticker
    Optimize {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        ticker: Option<String>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a multi-ticker portfolio under a rebalance policy
    Portfolio {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run one strategy across many tickers
    Batch {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Scan the whole market with a strategy roster
    Scan {
        #[arg(short, long)]
        config: PathBuf,
        /// Continue from a recent progress file
        #[arg(long)]
        resume: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List tickers available in the data directory
    ListTickers {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Validate every section present in a config file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Cli {
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        // A subscriber may already be installed when run is called twice.
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}

pub fn run(cli: Cli) -> ExitCode {
    cli.init_logging();
    let verbose = cli.verbose > 0;
    let outcome = match &cli.command {
        Command::Backtest {
            config,
            ticker,
            output,
        } => run_backtest(config, ticker.as_deref(), output.as_deref(), verbose),
        Command::Compare {
            config,
            ticker,
            all,
        } => run_compare(config, ticker.as_deref(), *all),
        Command::Optimize {
            config,
            ticker,
            output,
        } => run_optimize(config, ticker.as_deref(), output.as_deref()),
        Command::Portfolio { config, output } => run_portfolio(config, output.as_deref(), verbose),
        Command::Batch { config } => run_batch(config),
        Command::Scan {
            config,
            resume,
            output,
        } => run_scan(config, *resume, output.as_deref()),
        Command::ListTickers { config } => run_list_tickers(config),
        Command::Validate { config } => run_validate(config),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            if e.is_configuration() {
                eprintln!("hint: `twquant validate --config <file>` checks every section");
            }
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, TwquantError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

pub fn build_engine_config(config: &dyn ConfigPort) -> EngineConfig {
    let defaults = CostModel::default();
    EngineConfig {
        initial_capital: config.get_double("backtest", "initial_capital", 1_000_000.0),
        costs: CostModel {
            commission: config.get_double("backtest", "commission", defaults.commission),
            tax: config.get_double("backtest", "tax", defaults.tax),
            slippage: config.get_double("backtest", "slippage", defaults.slippage),
        },
        risk_free_rate: config.get_double("backtest", "risk_free_rate", DEFAULT_RISK_FREE_RATE),
    }
}

pub fn date_range(
    config: &dyn ConfigPort,
) -> Result<(Option<NaiveDate>, Option<NaiveDate>), TwquantError> {
    Ok((
        date(config, "backtest", "start_date")?,
        date(config, "backtest", "end_date")?,
    ))
}

pub fn data_port(config: &dyn ConfigPort) -> Result<CsvAdapter, TwquantError> {
    validate_data_config(config)?;
    let dir = config.get_string("data", "dir").unwrap_or_default();
    Ok(CsvAdapter::new(PathBuf::from(dir.trim())))
}

/// Numeric parameters of `[section]`, skipping `reserved` keys.
fn params(
    config: &dyn ConfigPort,
    section: &str,
    reserved: &[&str],
) -> Result<ParamSet, TwquantError> {
    let mut params = ParamSet::new();
    for key in config.keys(section) {
        if reserved.contains(&key.as_str()) {
            continue;
        }
        if let Some(value) = number(config, section, &key)? {
            params.insert(key, value);
        }
    }
    Ok(params)
}

pub fn build_strategy_spec(config: &dyn ConfigPort) -> Result<StrategySpec, TwquantError> {
    validate_strategy_config(config)?;
    let kind = config
        .get_string("strategy", "kind")
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    if kind == "multi_condition" {
        let parse = |key: &str| {
            Condition::parse_all(&config.get_string("strategy", key).unwrap_or_default())
        };
        return Ok(StrategySpec::MultiCondition {
            label: config
                .get_string("strategy", "label")
                .unwrap_or_else(|| "multi_condition".into()),
            buy: parse("buy")?,
            sell: parse("sell")?,
        });
    }
    StrategySpec::from_params(&kind, &params(config, "strategy", STRATEGY_RESERVED_KEYS)?)
}

pub fn build_stop_rules(config: &dyn ConfigPort, section: &str) -> Result<StopRules, TwquantError> {
    Ok(StopRules::normalized(
        number(config, section, "stop_loss")?,
        number(config, section, "take_profit")?,
        number(config, section, "trailing_stop")?,
    ))
}

pub fn build_sizer(config: &dyn ConfigPort) -> Result<Option<PositionSizer>, TwquantError> {
    let value = number(config, "strategy", "sizing_value")?;
    let method = match config.get_string("strategy", "sizing").as_deref().map(str::trim) {
        Some("percent") => SizingMethod::Percent(value.unwrap_or(1.0)),
        Some("fixed") => SizingMethod::FixedAmount(value.unwrap_or(0.0)),
        Some("kelly") => SizingMethod::Kelly,
        _ => return Ok(None),
    };
    Ok(Some(PositionSizer::new(method)))
}

pub fn build_engine(config: &dyn ConfigPort) -> Result<BacktestEngine, TwquantError> {
    validate_backtest_config(config)?;
    let mut engine =
        BacktestEngine::new(build_engine_config(config)).with_stops(build_stop_rules(config, "strategy")?);
    if let Some(sizer) = build_sizer(config)? {
        engine = engine.with_sizer(sizer);
    }
    Ok(engine)
}

pub fn build_policy(config: &dyn ConfigPort) -> Result<Box<dyn RebalancePolicy>, TwquantError> {
    validate_portfolio_config(config)?;
    let name = config
        .get_string("portfolio", "policy")
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let policy: Box<dyn RebalancePolicy> = match name.as_str() {
        "equal_weight" => {
            let frequency = match config.get_string("portfolio", "frequency") {
                Some(f) => f.parse()?,
                None => Frequency::default(),
            };
            let top_n = number(config, "portfolio", "top_n")?.map(|v| v as usize);
            Box::new(EqualWeight::new(frequency, top_n))
        }
        "buy_and_hold" => Box::new(DiamondHold::new()),
        "multilayer" => {
            let mut extra_buys = Vec::new();
            for entry in config.get_list("portfolio", "extra_buys") {
                let (date, amount) = parse_extra_buy(&entry).map_err(|reason| {
                    TwquantError::ConfigInvalid {
                        section: "portfolio".into(),
                        key: "extra_buys".into(),
                        reason,
                    }
                })?;
                extra_buys.push(ExtraBuy { date, amount });
            }
            Box::new(MultilayerHold::new(extra_buys))
        }
        "rebuy" => {
            let amount = match number(config, "portfolio", "rebuy_fraction")? {
                Some(f) if f < 1.0 => RebuyAmount::Fraction(f),
                _ => RebuyAmount::All,
            };
            Box::new(RebuyHold::new(
                build_stop_rules(config, "portfolio")?,
                config.get_int("portfolio", "cooldown_days", 30),
                amount,
            ))
        }
        "dca" => Box::new(Dca::new(
            config.get_int("portfolio", "buy_day", 1) as u32,
            config.get_double("portfolio", "monthly_amount", 10_000.0),
        )),
        "strategy_driven" => {
            let (rules, default_rule) = ticker_rules(config)?;
            Box::new(StrategyDriven::new(rules, default_rule))
        }
        other => {
            return Err(TwquantError::ConfigInvalid {
                section: "portfolio".into(),
                key: "policy".into(),
                reason: format!("unknown policy `{other}`"),
            });
        }
    };
    Ok(policy)
}

fn ticker_rules(
    config: &dyn ConfigPort,
) -> Result<(BTreeMap<String, TickerRule>, TickerRule), TwquantError> {
    let mut rules = BTreeMap::new();
    for entry in config.get_list("portfolio", "rules") {
        let Some((ticker, rule)) = entry.split_once(':') else {
            return Err(TwquantError::ConfigInvalid {
                section: "portfolio".into(),
                key: "rules".into(),
                reason: format!("`{entry}` is not ticker:rule"),
            });
        };
        rules.insert(ticker.trim().to_string(), rule.parse()?);
    }
    let default_rule = match config.get_string("portfolio", "default_rule") {
        Some(rule) => rule.parse()?,
        None => TickerRule::default(),
    };
    Ok((rules, default_rule))
}

/// Grid axes are every non-reserved `[optimize]` key, in key order.
pub fn build_grid(config: &dyn ConfigPort) -> Result<ParamGrid, TwquantError> {
    validate_optimize_config(config)?;
    let mut grid = ParamGrid::new();
    for key in config.keys("optimize") {
        if OPTIMIZE_RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        let values = config
            .get_list("optimize", &key)
            .iter()
            .filter_map(|v| v.parse::<f64>().ok())
            .collect();
        grid = grid.with(&key, values);
    }
    Ok(grid)
}

pub fn build_batch_options(config: &dyn ConfigPort) -> Result<BatchOptions, TwquantError> {
    validate_batch_config(config)?;
    let defaults = BatchOptions::default();
    let (start, end) = date_range(config)?;
    Ok(BatchOptions {
        top_n: config.get_int("batch", "top_n", defaults.top_n as i64) as usize,
        sort_by: match config.get_string("batch", "sort_by") {
            Some(m) => m.parse()?,
            None => defaults.sort_by,
        },
        min_trades: config.get_int("batch", "min_trades", defaults.min_trades as i64) as usize,
        start,
        end,
    })
}

pub fn build_scan_config(config: &dyn ConfigPort) -> Result<ScanConfig, TwquantError> {
    validate_scan_config(config)?;
    let d = ScanConfig::default();
    let path = |key: &str, default: &PathBuf| {
        config
            .get_string("scan", key)
            .map(PathBuf::from)
            .unwrap_or_else(|| default.clone())
    };
    Ok(ScanConfig {
        workers: config.get_int("scan", "workers", d.workers as i64) as usize,
        min_days: config.get_int("scan", "min_days", d.min_days as i64) as usize,
        min_volume: config.get_double("scan", "min_volume", d.min_volume),
        min_trades: config.get_int("scan", "min_trades", d.min_trades as i64) as usize,
        top_n: config.get_int("scan", "top_n", d.top_n as i64) as usize,
        progress_file: path("progress_file", &d.progress_file),
        lock_file: path("lock_file", &d.lock_file),
        checkpoint_every: config.get_int("scan", "checkpoint_every", d.checkpoint_every as i64)
            as usize,
        resume: config.get_bool("scan", "resume", d.resume),
    })
}

/// Strategy kinds listed under `[section] strategies`, each with default
/// parameters; the built-in roster when none are listed.
pub fn build_roster(config: &dyn ConfigPort, section: &str) -> Result<Vec<StrategySpec>, TwquantError> {
    let kinds = config.get_list(section, "strategies");
    if kinds.is_empty() {
        return Ok(default_roster());
    }
    kinds
        .iter()
        .map(|kind| StrategySpec::from_params(kind, &ParamSet::new()))
        .collect()
}

fn resolve_ticker(config: &dyn ConfigPort, ticker: Option<&str>) -> Result<String, TwquantError> {
    ticker
        .map(str::to_string)
        .or_else(|| config.get_string("backtest", "ticker"))
        .ok_or_else(|| TwquantError::ConfigMissing {
            section: "backtest".into(),
            key: "ticker".into(),
        })
}

/// `[backtest] tickers` when set, otherwise everything the port lists.
fn resolve_tickers(config: &dyn ConfigPort, port: &dyn DataPort) -> Result<Vec<String>, TwquantError> {
    let tickers = config.get_list("backtest", "tickers");
    if tickers.is_empty() {
        port.list_tickers()
    } else {
        Ok(tickers)
    }
}

fn load_bars(
    config: &dyn ConfigPort,
    port: &dyn DataPort,
    ticker: &str,
    ma_periods: &[usize],
) -> Result<Vec<crate::domain::bar::Bar>, TwquantError> {
    let (start, end) = date_range(config)?;
    let mut bars = port.fetch_bars(ticker, start, end)?;
    if bars.is_empty() {
        return Err(TwquantError::NoData {
            ticker: ticker.to_string(),
        });
    }
    ensure_moving_averages(&mut bars, ma_periods);
    Ok(bars)
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), TwquantError> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    eprintln!("\nResult written to: {}", path.display());
    Ok(())
}

fn print_metrics(metrics: &Metrics) {
    eprintln!("Final Capital:    {:.0}", metrics.final_capital);
    eprintln!("Total Return:     {:.2}%", metrics.total_return * 100.0);
    eprintln!("Annualized:       {:.2}%", metrics.annual_return * 100.0);
    eprintln!("Volatility:       {:.2}%", metrics.volatility * 100.0);
    eprintln!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
    eprintln!("Max Drawdown:     {:.1}%", metrics.max_drawdown * 100.0);
    if let Some(date) = metrics.max_drawdown_date {
        eprintln!("  Trough on:      {}", date);
    }
    eprintln!(
        "Trades:           {} closed / {} total",
        metrics.trade_count, metrics.total_trades
    );
    eprintln!("Win Rate:         {:.1}%", metrics.win_rate * 100.0);
    eprintln!("Profit Factor:    {:.2}", metrics.profit_factor);
}

fn run_backtest(
    config_path: &Path,
    ticker: Option<&str>,
    output: Option<&Path>,
    verbose: bool,
) -> Result<(), TwquantError> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    let spec = build_strategy_spec(&config)?;
    let strategy = spec.build()?;
    let port = data_port(&config)?;
    let ticker = resolve_ticker(&config, ticker)?;
    let position_size = config.get_double("backtest", "position_size", 1.0);

    let bars = load_bars(&config, &port, &ticker, &spec.moving_averages())?;
    eprintln!(
        "Running {} on {}: {} bars, {} to {}",
        strategy.name(),
        ticker,
        bars.len(),
        bars[0].date,
        bars[bars.len() - 1].date
    );
    let result = engine.run(&bars, strategy.as_ref(), position_size, verbose)?;

    eprintln!("\n=== {} / {} ===", result.strategy, ticker);
    print_metrics(&result.metrics);
    if let Some(path) = output {
        write_json(path, &result)?;
    }
    Ok(())
}

fn run_compare(config_path: &Path, ticker: Option<&str>, all: bool) -> Result<(), TwquantError> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    validate_batch_config(&config)?;
    let port = data_port(&config)?;
    let roster = build_roster(&config, "batch")?;
    let strategies: Vec<Box<dyn Strategy>> =
        roster.iter().map(StrategySpec::build).collect::<Result<_, _>>()?;

    if all {
        let tickers = resolve_tickers(&config, &port)?;
        let aggregate = match config.get_string("batch", "aggregate") {
            Some(a) => a.parse()?,
            None => Aggregate::default(),
        };
        let (start, end) = date_range(&config)?;
        let summaries =
            compare_strategies(&engine, &port, &tickers, &strategies, aggregate, start, end);
        eprintln!("\n=== Strategy comparison over {} tickers ({}) ===", tickers.len(), aggregate);
        eprintln!(
            "{:<28} {:>7} {:>10} {:>8} {:>10} {:>8}",
            "strategy", "tickers", "return%", "sharpe", "drawdown%", "trades"
        );
        for s in &summaries {
            eprintln!(
                "{:<28} {:>7} {:>10.2} {:>8.2} {:>10.2} {:>8.1}",
                s.strategy,
                s.tickers_tested,
                s.total_return * 100.0,
                s.sharpe_ratio,
                s.max_drawdown * 100.0,
                s.trade_count
            );
        }
        return Ok(());
    }

    let ticker = resolve_ticker(&config, ticker)?;
    let periods: Vec<usize> = roster.iter().flat_map(StrategySpec::moving_averages).collect();
    let bars = load_bars(&config, &port, &ticker, &periods)?;
    // Strategies the data cannot support are reported and left out.
    let mut runnable: Vec<Box<dyn Strategy>> = Vec::new();
    for strategy in strategies {
        match strategy.ensure_columns(&bars) {
            Ok(()) => runnable.push(strategy),
            Err(e) => warn!(error = %e, "skipping strategy"),
        }
    }
    let results = engine.run_multiple(&bars, &runnable)?;

    eprintln!("\n=== Strategy comparison on {} ===", ticker);
    eprintln!(
        "{:<28} {:>10} {:>8} {:>10} {:>7} {:>8}",
        "strategy", "return%", "sharpe", "drawdown%", "trades", "win%"
    );
    for (name, m) in &results {
        eprintln!(
            "{:<28} {:>10.2} {:>8.2} {:>10.2} {:>7} {:>8.1}",
            name,
            m.total_return * 100.0,
            m.sharpe_ratio,
            m.max_drawdown * 100.0,
            m.trade_count,
            m.win_rate * 100.0
        );
    }
    Ok(())
}

fn run_optimize(
    config_path: &Path,
    ticker: Option<&str>,
    output: Option<&Path>,
) -> Result<(), TwquantError> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    let grid = build_grid(&config)?;
    let port = data_port(&config)?;
    let ticker = resolve_ticker(&config, ticker)?;
    let kind = config
        .get_string("optimize", "kind")
        .unwrap_or_default()
        .trim()
        .to_lowercase();
    let metric: RankMetric = match config.get_string("optimize", "metric") {
        Some(m) => m.parse()?,
        None => RankMetric::default(),
    };
    let min_trades = config.get_int("optimize", "min_trades", 3) as usize;
    let top = config.get_int("optimize", "top", 10) as usize;

    let bars = load_bars(&config, &port, &ticker, &[])?;
    eprintln!(
        "Optimizing {} on {}: {} combinations, ranking by {}",
        kind,
        ticker,
        grid.len(),
        metric
    );
    let result = engine.optimize(
        &bars,
        |params: &ParamSet| StrategySpec::from_params(&kind, params)?.build(),
        &grid,
        metric,
    );

    for skipped in &result.skipped {
        eprintln!("  skipped {:?}: {}", skipped.params, skipped.reason);
    }
    let Some(best) = &result.best_params else {
        return Err(TwquantError::Data {
            reason: "every parameter combination failed".into(),
        });
    };
    eprintln!("\n=== Best {} = {:.4} ===", metric, result.best_score);
    eprintln!("Params: {:?}", best);
    if let Some(best_result) = &result.best_result {
        print_metrics(&best_result.metrics);
    }

    eprintln!("\n=== Top {} (min {} trades) ===", top, min_trades);
    for record in result.ranked(min_trades).into_iter().take(top) {
        eprintln!(
            "  {:?}  {} = {:.4}, trades = {}",
            record.params,
            metric,
            metric.value(&record.metrics),
            record.metrics.trade_count
        );
    }
    if let Some(path) = output {
        write_json(path, &result.all_results)?;
    }
    Ok(())
}

fn run_portfolio(config_path: &Path, output: Option<&Path>, verbose: bool) -> Result<(), TwquantError> {
    let config = load_config(config_path)?;
    validate_backtest_config(&config)?;
    let mut policy = build_policy(&config)?;
    let port = data_port(&config)?;
    let tickers = config.get_list("portfolio", "tickers");

    let rule_driven = config
        .get_string("portfolio", "policy")
        .is_some_and(|p| p.trim().eq_ignore_ascii_case("strategy_driven"));
    let periods: Vec<usize> = if rule_driven {
        let (rules, default_rule) = ticker_rules(&config)?;
        rules
            .values()
            .chain(std::iter::once(&default_rule))
            .filter_map(|rule| match rule {
                TickerRule::MaCross { short, long } => Some([*short, *long]),
                _ => None,
            })
            .flatten()
            .collect()
    } else {
        Vec::new()
    };

    let mut data = Vec::with_capacity(tickers.len());
    for ticker in &tickers {
        match load_bars(&config, &port, ticker, &periods) {
            Ok(bars) => data.push(TickerData::new(ticker.as_str(), bars)),
            Err(e) => eprintln!("warning: skipping {} ({})", ticker, e),
        }
    }
    if data.is_empty() {
        return Err(TwquantError::Data {
            reason: "no ticker with data to backtest".into(),
        });
    }

    let engine = PortfolioEngine::new(build_engine_config(&config)).with_verbose(verbose);
    let result = engine.run(&data, policy.as_mut())?;

    eprintln!("\n=== {} ({} tickers) ===", result.policy, data.len());
    print_metrics(&result.metrics);
    eprintln!("Cash:             {:.0}", result.cash);
    eprintln!("Market Value:     {:.0}", result.market_value);
    if !result.positions.is_empty() {
        eprintln!("\n=== Open Positions ===");
        for (ticker, shares) in &result.positions {
            match result.final_prices.get(ticker) {
                Some(price) => eprintln!("  {}: {} shares @ {:.2}", ticker, shares, price),
                None => eprintln!("  {}: {} shares (no final price)", ticker, shares),
            }
        }
    }
    if let Some(path) = output {
        write_json(path, &result)?;
    }
    Ok(())
}

fn run_batch(config_path: &Path) -> Result<(), TwquantError> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    let spec = build_strategy_spec(&config)?;
    let strategy = spec.build()?;
    let options = build_batch_options(&config)?;
    let port = data_port(&config)?;
    let tickers = resolve_tickers(&config, &port)?;

    eprintln!("Running {} on {} tickers", strategy.name(), tickers.len());
    let report = batch_backtest(&engine, &port, &tickers, strategy.as_ref(), &options);

    eprintln!(
        "\n=== Top {} by {} (min {} trades) ===",
        report.entries.len(),
        options.sort_by,
        options.min_trades
    );
    for (rank, entry) in report.entries.iter().enumerate() {
        let m = &entry.metrics;
        eprintln!(
            "{:>3}. {:<8} return {:>8.2}%  sharpe {:>6.2}  drawdown {:>7.2}%  trades {}",
            rank + 1,
            entry.ticker,
            m.total_return * 100.0,
            m.sharpe_ratio,
            m.max_drawdown * 100.0,
            m.trade_count
        );
    }
    if !report.skipped.is_empty() {
        eprintln!("\n{} tickers skipped", report.skipped.len());
    }
    Ok(())
}

fn run_scan(config_path: &Path, resume: bool, output: Option<&Path>) -> Result<(), TwquantError> {
    let config = load_config(config_path)?;
    let engine = build_engine(&config)?;
    let mut scan_config = build_scan_config(&config)?;
    scan_config.resume |= resume;
    let roster = build_roster(&config, "scan")?;
    let port = data_port(&config)?;

    // Ctrl-C stops the scan at the next ticker and flushes progress.
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!(error = %e, "cannot install interrupt handler");
    }
    let scanner = MarketScanner::new(engine, scan_config);
    let outcome = scanner.run(&port, &roster, &cancel)?;
    info!(processed = outcome.processed, "scan finished");

    for scan in &outcome.per_strategy {
        eprintln!("\n=== {} ({} hits) ===", scan.strategy, scan.records.len());
        for record in &scan.records {
            eprintln!(
                "  {:<8} sharpe {:>6.2}  return {:>8.2}%  win {:>5.1}%  trades {}",
                record.ticker,
                record.sharpe_ratio,
                record.total_return * 100.0,
                record.win_rate * 100.0,
                record.trade_count
            );
        }
    }
    eprintln!("\n=== Overall ranking ===");
    for (rank, entry) in outcome.ranking.iter().enumerate() {
        eprintln!(
            "{:>3}. {:<8} score {:>6.2}  strategies {}  avg sharpe {:.2}  avg return {:.2}%  best {}",
            rank + 1,
            entry.ticker,
            entry.score,
            entry.strategy_count,
            entry.avg_sharpe,
            entry.avg_return * 100.0,
            entry.best_strategy
        );
    }
    eprintln!(
        "\n{} tickers processed, {} skipped",
        outcome.processed,
        outcome.skipped.len()
    );
    if let Some(path) = output {
        write_json(path, &outcome)?;
    }
    Ok(())
}

fn run_list_tickers(config_path: &Path) -> Result<(), TwquantError> {
    let config = load_config(config_path)?;
    let port = data_port(&config)?;
    let tickers = port.list_tickers()?;
    if tickers.is_empty() {
        eprintln!("No tickers found");
    } else {
        for ticker in &tickers {
            println!("{}", ticker);
        }
        eprintln!("{} tickers found", tickers.len());
    }
    Ok(())
}

/// Validate each section the file contains; `[data]` is always required.
pub fn validate_config(config: &dyn ConfigPort) -> Result<Vec<&'static str>, TwquantError> {
    validate_data_config(config)?;
    validate_backtest_config(config)?;
    let mut checked = vec!["data", "backtest"];
    let sections: [(&'static str, fn(&dyn ConfigPort) -> Result<(), TwquantError>); 5] = [
        ("strategy", validate_strategy_config),
        ("portfolio", validate_portfolio_config),
        ("optimize", validate_optimize_config),
        ("batch", validate_batch_config),
        ("scan", validate_scan_config),
    ];
    for (section, validate) in sections {
        if !config.keys(section).is_empty() {
            validate(config)?;
            checked.push(section);
        }
    }
    Ok(checked)
}

fn run_validate(config_path: &Path) -> Result<(), TwquantError> {
    let config = load_config(config_path)?;
    let checked = validate_config(&config)?;
    if checked.contains(&"strategy") {
        let spec = build_strategy_spec(&config)?;
        eprintln!("Strategy: {}", spec.build()?.name());
    }
    eprintln!("Validated sections: {}", checked.join(", "));
    eprintln!("Config validated successfully");
    Ok(())
}
