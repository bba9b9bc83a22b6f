//! Arbitrage monitor
//!
//! Main entry point: asset list generation, one-shot cycle discovery,
//! live or replayed monitoring, historical data capture and backtests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use arb_core::{AssetLists, EngineConfig, RankStrategy, TradingPair};
use arb_detector::{evaluate, AllowedAssets, LiquidityFilter};
use arb_monitor::settings::{self, DEFAULT_LISTS_PATH};
use arb_monitor::{
    BacktestRunner, ChannelReporter, LogReporter, MonitorLoop, MultiReporter, ReportBatch,
};
use arb_price_feed::{
    aggregate_metrics, candidate_assets, BinanceClient, BookTickerStream, QuoteBook,
    ReplayProvider, SnapshotHistory, SnapshotProvider, StreamConfig,
};

#[derive(Parser, Debug)]
#[command(name = "arb-monitor")]
#[command(about = "Cyclic arbitrage discovery, monitoring and backtesting", version)]
struct Args {
    /// Settings file (default: configs/engine.*, optional)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Asset lists file (default: configs/asset_lists.json, optional)
    #[arg(long, global = true)]
    lists: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate whitelist/blacklist from live 24h statistics
    Lists {
        /// Override the configured ranking strategy
        #[arg(long)]
        strategy: Option<RankStrategy>,

        /// Output path
        #[arg(long, default_value = DEFAULT_LISTS_PATH)]
        output: PathBuf,
    },

    /// Print every cycle through the base currency for one live snapshot
    Cycles {
        /// Rank assets from live statistics instead of reading the lists file
        #[arg(long)]
        fresh_lists: bool,

        /// Print cycles as JSON
        #[arg(long)]
        json: bool,
    },

    /// Monitor opportunities until interrupted
    Monitor {
        /// Replay a snapshot history file instead of polling the exchange
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Read quotes from the exchange's book ticker stream instead of polling
        #[arg(long, conflicts_with = "replay")]
        stream: bool,

        /// Append every report batch to this file as JSON lines
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Build a snapshot history from exchange klines of the allowed assets
    History {
        /// Range start, RFC 3339
        #[arg(long)]
        start: DateTime<Utc>,

        /// Range end, RFC 3339
        #[arg(long)]
        end: DateTime<Utc>,

        /// Kline interval
        #[arg(long, default_value = "1m")]
        interval: String,

        /// Refuse to fetch more symbols than this
        #[arg(long, default_value_t = 200)]
        max_symbols: usize,

        /// Output path
        #[arg(long)]
        output: PathBuf,
    },

    /// Replay a snapshot history file over a time range
    Backtest {
        /// Snapshot history (JSON array of snapshots)
        file: PathBuf,

        /// Range start, RFC 3339 (default: first snapshot)
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Range end, RFC 3339 (default: last snapshot)
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// Evaluate a fixed grid with this many seconds between steps
        #[arg(long)]
        step_secs: Option<i64>,

        /// Replay in parallel chunks of this many steps
        #[arg(long)]
        chunk: Option<usize>,

        /// Write all records as JSON to this path
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let args = Args::parse();
    info!("Starting arb-monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = settings::load_config(args.config.as_deref())?;

    match args.command {
        Commands::Lists { strategy, output } => generate_lists(config, strategy, &output).await,
        Commands::Cycles { fresh_lists, json } => {
            print_cycles(config, args.lists.as_deref(), fresh_lists, json).await
        }
        Commands::Monitor {
            replay,
            stream,
            output,
        } => run_monitor(config, args.lists.as_deref(), replay, stream, output).await,
        Commands::History {
            start,
            end,
            interval,
            max_symbols,
            output,
        } => {
            fetch_history(
                config,
                args.lists.as_deref(),
                start,
                end,
                &interval,
                max_symbols,
                &output,
            )
            .await
        }
        Commands::Backtest {
            file,
            start,
            end,
            step_secs,
            chunk,
            output,
        } => run_backtest(
            config,
            args.lists.as_deref(),
            &file,
            start,
            end,
            step_secs,
            chunk,
            output.as_deref(),
        ),
    }
}

fn exchange_client(config: &EngineConfig) -> Result<BinanceClient> {
    BinanceClient::new(config.monitor.fetch_timeout()).context("Failed to build exchange client")
}

async fn fetch_lists(
    client: &BinanceClient,
    config: &EngineConfig,
    strategy: RankStrategy,
) -> Result<AssetLists> {
    let stats = client.pair_stats().await?;
    info!("Fetched 24h statistics for {} pairs", stats.len());

    let config = EngineConfig {
        strategy,
        ..config.clone()
    };
    let metrics = aggregate_metrics(&stats);
    Ok(LiquidityFilter::from_config(&config).classify(&candidate_assets(&stats), &metrics))
}

async fn generate_lists(
    config: EngineConfig,
    strategy: Option<RankStrategy>,
    output: &std::path::Path,
) -> Result<()> {
    let client = exchange_client(&config)?;
    let lists = fetch_lists(&client, &config, strategy.unwrap_or(config.strategy)).await?;
    settings::save_lists(&lists, output)?;

    println!(
        "{} whitelisted, {} blacklisted ({})",
        lists.whitelist.len(),
        lists.blacklist.len(),
        lists.strategy
    );
    Ok(())
}

async fn print_cycles(
    config: EngineConfig,
    lists_path: Option<&std::path::Path>,
    fresh_lists: bool,
    json: bool,
) -> Result<()> {
    let client = exchange_client(&config)?;

    let (snapshot, lists) = if fresh_lists {
        let (snapshot, lists) = futures::try_join!(
            async { client.current_snapshot().await.map_err(anyhow::Error::from) },
            fetch_lists(&client, &config, config.strategy),
        )?;
        (snapshot, Some(lists))
    } else {
        let lists = settings::load_lists(lists_path)?;
        (client.current_snapshot().await?, lists)
    };

    let allowed = AllowedAssets::resolve(&config, lists.as_ref());
    let evaluation = evaluate(&snapshot, &allowed, &config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&evaluation.cycles)?);
        return Ok(());
    }

    println!(
        "{} cycles through {} at {} ({} vertices, {} edges, {} pairs rejected)",
        evaluation.cycles.len(),
        config.base_currency,
        evaluation.timestamp,
        evaluation.vertex_count,
        evaluation.edge_count,
        evaluation.rejected.len()
    );
    let mut cycles = evaluation.cycles.clone();
    cycles.sort_by(|a, b| b.log_weight.total_cmp(&a.log_weight));
    for cycle in &cycles {
        let marker = if cycle.net_profit_pct() > config.min_profit_threshold {
            "*"
        } else {
            " "
        };
        println!(
            "{} {}  profit={:+.4}%  gain={:.6}{}",
            marker,
            cycle.id,
            cycle.net_profit_pct(),
            cycle.gain_ratio(),
            if cycle.derived_legs > 0 { "  (derived legs)" } else { "" }
        );
    }
    Ok(())
}

/// Exchange symbols whose both assets are allowed
async fn permitted_symbols(
    client: &BinanceClient,
    allowed: &AllowedAssets,
) -> Result<HashMap<String, TradingPair>> {
    let symbols = client.symbols().await?;
    let permitted: HashMap<String, TradingPair> = symbols
        .iter()
        .filter(|(_, pair)| allowed.permits(&pair.base) && allowed.permits(&pair.quote))
        .map(|(symbol, pair)| (symbol.clone(), pair.clone()))
        .collect();

    info!("{} of {} symbols permitted", permitted.len(), symbols.len());
    Ok(permitted)
}

/// Spawn the book ticker stream and wait briefly for the first quotes
async fn start_stream(
    config: &EngineConfig,
    allowed: &AllowedAssets,
) -> Result<(Arc<QuoteBook>, JoinHandle<()>)> {
    let client = exchange_client(config)?;
    let symbols = permitted_symbols(&client, allowed).await?;
    if symbols.is_empty() {
        bail!("No exchange symbols between allowed assets");
    }

    let book = Arc::new(QuoteBook::default());
    let stream = BookTickerStream::new(StreamConfig::default(), Arc::new(symbols), Arc::clone(&book));
    let handle = tokio::spawn(async move {
        if let Err(e) = stream.run().await {
            error!("Book ticker stream stopped: {}", e);
        }
    });

    let warmup = config.monitor.fetch_timeout();
    let ready = tokio::time::timeout(warmup, async {
        while book.is_empty() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if ready.is_err() {
        warn!("No quotes streamed within {:?}", warmup);
    }

    Ok((book, handle))
}

/// Write each batch as one JSON line until every sender is dropped
async fn write_batches(
    mut rx: mpsc::UnboundedReceiver<ReportBatch>,
    path: PathBuf,
) -> Result<usize> {
    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut written = 0usize;

    while let Some(batch) = rx.recv().await {
        let mut line = serde_json::to_vec(&batch)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        written += 1;
    }

    file.flush().await?;
    Ok(written)
}

async fn run_monitor(
    config: EngineConfig,
    lists_path: Option<&std::path::Path>,
    replay: Option<PathBuf>,
    stream: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let lists = settings::load_lists(lists_path)?;
    let allowed = AllowedAssets::resolve(&config, lists.as_ref());

    let mut feed = None;
    let (provider, max_ticks): (Arc<dyn SnapshotProvider>, Option<u64>) = match replay {
        Some(path) => {
            let history = SnapshotHistory::load(&path)?;
            if history.is_empty() {
                bail!("No snapshots in {}", path.display());
            }
            let ticks = history.len() as u64;
            (Arc::new(ReplayProvider::new(&history)), Some(ticks))
        }
        None if stream => {
            let (book, handle) = start_stream(&config, &allowed).await?;
            feed = Some(handle);
            (book, None)
        }
        None => (Arc::new(exchange_client(&config)?), None),
    };

    let mut reporter = MultiReporter::new().with(LogReporter);
    let mut writer = None;
    if let Some(path) = output {
        let (channel, rx) = ChannelReporter::new();
        reporter = reporter.with(channel);
        info!("Writing report batches to {}", path.display());
        writer = Some(tokio::spawn(write_batches(rx, path)));
    }

    let mut monitor = MonitorLoop::new(config, allowed, provider, reporter)?;
    if let Some(ticks) = max_ticks {
        monitor = monitor.with_max_ticks(ticks);
    }

    // Setup shutdown channel
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // Spawn shutdown signal handler
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    error!("Failed to install signal handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C");
            }
            _ = terminate => {
                info!("Received termination signal");
            }
        }

        let _ = shutdown_tx.send(());
    });

    info!("Press Ctrl+C to stop");
    let result = monitor.run(shutdown_rx).await;

    if let Some(feed) = feed {
        feed.abort();
    }
    // Closes the report channel so the writer drains and exits
    drop(monitor);
    if let Some(writer) = writer {
        match writer.await {
            Ok(Ok(written)) => info!("{} report batches written", written),
            Ok(Err(e)) => error!("Report writer failed: {}", e),
            Err(e) => error!("Report writer task failed: {}", e),
        }
    }

    match result {
        Ok(stats) => {
            info!(
                "Monitor finished: {} ticks, {} opportunities reported",
                stats.ticks, stats.opportunities
            );
            Ok(())
        }
        Err(e) => {
            error!("Monitor error: {}", e);
            Err(e.into())
        }
    }
}

async fn fetch_history(
    config: EngineConfig,
    lists_path: Option<&std::path::Path>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    interval: &str,
    max_symbols: usize,
    output: &std::path::Path,
) -> Result<()> {
    if start > end {
        bail!("Range start {} is after end {}", start, end);
    }

    let lists = settings::load_lists(lists_path)?;
    let allowed = AllowedAssets::resolve(&config, lists.as_ref());

    let client = exchange_client(&config)?;
    let symbols = permitted_symbols(&client, &allowed).await?;
    if symbols.is_empty() {
        bail!("No exchange symbols between allowed assets");
    }
    if symbols.len() > max_symbols {
        bail!(
            "{} symbols permitted, more than --max-symbols {}; narrow the asset lists",
            symbols.len(),
            max_symbols
        );
    }

    let mut names: Vec<String> = symbols.into_keys().collect();
    names.sort();

    let history = client.kline_history(&names, interval, start, end).await?;
    history.save(output)?;

    println!(
        "{} snapshots from {} symbols written to {}",
        history.len(),
        names.len(),
        output.display()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_backtest(
    config: EngineConfig,
    lists_path: Option<&std::path::Path>,
    file: &std::path::Path,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    step_secs: Option<i64>,
    chunk: Option<usize>,
    output: Option<&std::path::Path>,
) -> Result<()> {
    let history = SnapshotHistory::load(file)?;
    let (Some(first), Some(last)) = (history.first_timestamp(), history.last_timestamp()) else {
        bail!("No snapshots in {}", file.display());
    };
    let start = start.unwrap_or(first);
    let end = end.unwrap_or(last);

    let lists = settings::load_lists(lists_path)?;
    let allowed = AllowedAssets::resolve(&config, lists.as_ref());

    let mut runner = BacktestRunner::new(config, allowed)?;
    if let Some(secs) = step_secs {
        runner = runner.with_step(chrono::Duration::seconds(secs));
    }

    let report = match chunk {
        Some(size) => runner.run_parallel(&history, start, end, size),
        None => runner.run_with_reporter(&history, start, end, &LogReporter),
    };

    print!("{}", report);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&report.records)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Records written to {}", path.display());
    }
    Ok(())
}
