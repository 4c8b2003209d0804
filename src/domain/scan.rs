//! Whole-market strategy scan.
//!
//! Every ticker a [`DataPort`] lists is run through a fixed roster of
//! strategies on a dedicated worker pool. Work proceeds in checkpoints: after
//! each chunk of tickers the processed set and partial results are written to
//! a JSON progress file, so an interrupted scan can resume where it stopped.
//! An advisory lock on a lock file keeps two scans from running at once.

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::batch::SkippedTicker;
use super::engine::BacktestEngine;
use super::error::TwquantError;
use super::rolling::ensure_moving_averages;
use super::strategy::{Strategy, StrategySpec};
use super::ticker_data::TickerData;
use crate::ports::data_port::DataPort;

/// Progress files older than this are ignored on resume.
const PROGRESS_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct ScanConfig {
    pub workers: usize,
    pub min_days: usize,
    pub min_volume: f64,
    pub min_trades: usize,
    pub top_n: usize,
    pub progress_file: PathBuf,
    pub lock_file: PathBuf,
    pub checkpoint_every: usize,
    pub resume: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
        ScanConfig {
            workers: cpus.min(6),
            min_days: 60,
            min_volume: 500.0,
            min_trades: 3,
            top_n: 30,
            progress_file: PathBuf::from("scan_progress.json"),
            lock_file: PathBuf::from("scan_market.lock"),
            checkpoint_every: 100,
            resume: false,
        }
    }
}

/// One strategy run that closed enough trades to be worth reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub ticker: String,
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub trade_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub processed: Vec<String>,
    /// Records keyed by strategy name.
    pub results: BTreeMap<String, Vec<ScanRecord>>,
    /// Tickers that failed to load or run, kept across resumes.
    #[serde(default)]
    pub skipped: Vec<SkippedTicker>,
    pub started_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
}

impl ScanProgress {
    fn fresh() -> Self {
        let now = Utc::now();
        ScanProgress {
            processed: Vec::new(),
            results: BTreeMap::new(),
            skipped: Vec::new(),
            started_at: now,
            saved_at: now,
        }
    }

    /// Load a progress file saved within the last day. A missing, stale or
    /// unreadable file yields `None`.
    pub fn load(path: &Path) -> Option<Self> {
        let text = fs::read_to_string(path).ok()?;
        let progress: ScanProgress = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable progress file");
                return None;
            }
        };
        if Utc::now() - progress.saved_at > Duration::hours(PROGRESS_MAX_AGE_HOURS) {
            info!(path = %path.display(), "progress file is stale, starting over");
            return None;
        }
        Some(progress)
    }

    pub fn save(&mut self, path: &Path) -> Result<(), TwquantError> {
        self.saved_at = Utc::now();
        let json = serde_json::to_string(self)?;
        fs::write(path, json)?;
        debug!(path = %path.display(), processed = self.processed.len(), "progress saved");
        Ok(())
    }
}

/// Exclusive advisory lock on the lock file. The OS drops it with the file
/// handle, so a killed scan never leaves a stale lock behind.
#[derive(Debug)]
pub struct ScanLock {
    _file: File,
}

impl ScanLock {
    pub fn acquire(path: &Path) -> Result<Self, TwquantError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            let contended = e.kind() == ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            if contended {
                return Err(TwquantError::ScanLocked {
                    path: path.display().to_string(),
                });
            }
            return Err(e.into());
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(ScanLock { _file: file })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrategyScan {
    pub strategy: String,
    /// Sharpe ratio descending, at most `top_n`.
    pub records: Vec<ScanRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub ticker: String,
    /// `strategy_count × avg_sharpe`.
    pub score: f64,
    pub strategy_count: usize,
    pub avg_sharpe: f64,
    pub avg_return: f64,
    pub best_strategy: String,
    pub best_sharpe: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanOutcome {
    /// Roster order.
    pub per_strategy: Vec<StrategyScan>,
    pub ranking: Vec<RankingEntry>,
    pub processed: usize,
    pub skipped: Vec<SkippedTicker>,
}

enum TickerScan {
    Filtered(&'static str),
    Scanned(Vec<(String, ScanRecord)>),
}

#[derive(Debug, Clone)]
pub struct MarketScanner {
    pub engine: BacktestEngine,
    pub config: ScanConfig,
}

impl MarketScanner {
    pub fn new(engine: BacktestEngine, config: ScanConfig) -> Self {
        MarketScanner { engine, config }
    }

    pub fn run(
        &self,
        port: &dyn DataPort,
        roster: &[StrategySpec],
        cancel: &AtomicBool,
    ) -> Result<ScanOutcome, TwquantError> {
        if roster.is_empty() {
            return Err(TwquantError::NoStrategy);
        }
        let _lock = ScanLock::acquire(&self.config.lock_file)?;

        let strategies: Vec<Box<dyn Strategy>> = roster
            .iter()
            .map(StrategySpec::build)
            .collect::<Result<_, _>>()?;
        let ma_periods: Vec<usize> = roster
            .iter()
            .flat_map(StrategySpec::moving_averages)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut progress = if self.config.resume {
            ScanProgress::load(&self.config.progress_file).unwrap_or_else(ScanProgress::fresh)
        } else {
            ScanProgress::fresh()
        };
        let done: BTreeSet<String> = progress.processed.iter().cloned().collect();
        let pending: Vec<String> = port
            .list_tickers()?
            .into_iter()
            .filter(|t| !done.contains(t))
            .collect();
        info!(
            pending = pending.len(),
            resumed = done.len(),
            workers = self.config.workers,
            "market scan"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()
            .map_err(|e| TwquantError::Data {
                reason: format!("cannot start scan workers: {e}"),
            })?;

        for chunk in pending.chunks(self.config.checkpoint_every.max(1)) {
            if cancel.load(Ordering::Relaxed) {
                return Err(self.interrupt(&mut progress)?);
            }

            // Tickers not started before cancellation stay pending.
            let outcomes: Vec<(&String, Option<Result<TickerScan, TwquantError>>)> =
                pool.install(|| {
                    chunk
                        .par_iter()
                        .map(|ticker| {
                            if cancel.load(Ordering::Relaxed) {
                                return (ticker, None);
                            }
                            let outcome = self.scan_ticker(port, ticker, &strategies, &ma_periods);
                            (ticker, Some(outcome))
                        })
                        .collect()
                });

            for (ticker, outcome) in outcomes {
                let Some(outcome) = outcome else {
                    continue;
                };
                match outcome {
                    Ok(TickerScan::Scanned(records)) => {
                        for (strategy, record) in records {
                            progress.results.entry(strategy).or_default().push(record);
                        }
                    }
                    Ok(TickerScan::Filtered(why)) => {
                        debug!(ticker = %ticker, why, "filtered");
                    }
                    Err(e) => {
                        warn!(ticker = %ticker, error = %e, "skipping ticker");
                        progress.skipped.push(SkippedTicker {
                            ticker: ticker.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
                progress.processed.push(ticker.clone());
            }
            if cancel.load(Ordering::Relaxed) {
                return Err(self.interrupt(&mut progress)?);
            }
            progress.save(&self.config.progress_file)?;
            info!(processed = progress.processed.len(), "checkpoint");
        }

        match fs::remove_file(&self.config.progress_file) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let processed = progress.processed.len();
        let per_strategy = self.collate(&strategies, progress.results);
        let ranking = rank_tickers(&per_strategy, self.config.top_n);
        Ok(ScanOutcome {
            per_strategy,
            ranking,
            processed,
            skipped: progress.skipped,
        })
    }

    /// Flush progress and build the error a cancelled scan returns.
    fn interrupt(&self, progress: &mut ScanProgress) -> Result<TwquantError, TwquantError> {
        progress.save(&self.config.progress_file)?;
        warn!(processed = progress.processed.len(), "scan interrupted");
        Ok(TwquantError::ScanInterrupted {
            processed: progress.processed.len(),
        })
    }

    fn scan_ticker(
        &self,
        port: &dyn DataPort,
        ticker: &str,
        strategies: &[Box<dyn Strategy>],
        ma_periods: &[usize],
    ) -> Result<TickerScan, TwquantError> {
        let data = TickerData::new(ticker, port.fetch_bars(ticker, None, None)?);
        if data.bar_count() < self.config.min_days {
            return Ok(TickerScan::Filtered("too few bars"));
        }
        if data.average_volume() < self.config.min_volume {
            return Ok(TickerScan::Filtered("low volume"));
        }
        let mut bars = data.bars;
        ensure_moving_averages(&mut bars, ma_periods);

        let mut records = Vec::new();
        for strategy in strategies {
            // A strategy the data cannot support is dropped for this ticker only.
            let metrics = match self.engine.run(&bars, strategy.as_ref(), 1.0, false) {
                Ok(result) => result.metrics,
                Err(e) => {
                    debug!(ticker, strategy = %strategy.name(), error = %e, "run skipped");
                    continue;
                }
            };
            if metrics.trade_count >= self.config.min_trades {
                records.push((
                    strategy.name(),
                    ScanRecord {
                        ticker: ticker.to_string(),
                        total_return: metrics.total_return,
                        sharpe_ratio: metrics.sharpe_ratio,
                        max_drawdown: metrics.max_drawdown,
                        win_rate: metrics.win_rate,
                        trade_count: metrics.trade_count,
                    },
                ));
            }
        }
        Ok(TickerScan::Scanned(records))
    }

    fn collate(
        &self,
        strategies: &[Box<dyn Strategy>],
        mut results: BTreeMap<String, Vec<ScanRecord>>,
    ) -> Vec<StrategyScan> {
        strategies
            .iter()
            .map(|strategy| {
                let name = strategy.name();
                let mut records = results.remove(&name).unwrap_or_default();
                records.sort_by(|a, b| {
                    b.sharpe_ratio
                        .total_cmp(&a.sharpe_ratio)
                        .then_with(|| a.ticker.cmp(&b.ticker))
                });
                if self.config.top_n > 0 {
                    records.truncate(self.config.top_n);
                }
                StrategyScan {
                    strategy: name,
                    records,
                }
            })
            .collect()
    }
}

/// Cross-strategy ranking over the per-strategy top lists. Tickers that do
/// well under more strategies score higher.
pub fn rank_tickers(per_strategy: &[StrategyScan], top_n: usize) -> Vec<RankingEntry> {
    let mut by_ticker: BTreeMap<&str, Vec<(&str, &ScanRecord)>> = BTreeMap::new();
    for scan in per_strategy {
        for record in &scan.records {
            by_ticker
                .entry(record.ticker.as_str())
                .or_default()
                .push((scan.strategy.as_str(), record));
        }
    }

    let mut ranking: Vec<RankingEntry> = by_ticker
        .into_iter()
        .map(|(ticker, hits)| {
            let count = hits.len();
            let avg_sharpe = hits.iter().map(|(_, r)| r.sharpe_ratio).sum::<f64>() / count as f64;
            let avg_return = hits.iter().map(|(_, r)| r.total_return).sum::<f64>() / count as f64;
            let (best_strategy, best_sharpe) = hits
                .iter()
                .fold(("", f64::NEG_INFINITY), |best, (name, r)| {
                    if r.sharpe_ratio > best.1 {
                        (*name, r.sharpe_ratio)
                    } else {
                        best
                    }
                });
            RankingEntry {
                ticker: ticker.to_string(),
                score: count as f64 * avg_sharpe,
                strategy_count: count,
                avg_sharpe,
                avg_return,
                best_strategy: best_strategy.to_string(),
                best_sharpe,
            }
        })
        .collect();
    ranking.sort_by(|a, b| b.score.total_cmp(&a.score));
    if top_n > 0 {
        ranking.truncate(top_n);
    }
    ranking
}
