//! sbs: BaseStation feed tracker CLI.

use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use sbs_core::config::{self, Config};
use sbs_core::notify::LogSubscriber;
use sbs_core::types::icao_to_string;
use sbs_core::{codec, Notifier, TrackedAircraft, Tracker, TrackerSettings};

mod error;
mod hub;
mod reader;
mod service;
mod store;
mod timer;
mod web;
mod writer;

use crate::hub::HubBridge;
use crate::reader::{MessageReader, TcpLineSource};
use crate::store::SqliteStore;
use crate::timer::IntervalTicker;
use crate::writer::{QueuedWriter, WriterSettings, WriterSubscriber};

#[derive(Parser)]
#[command(name = "sbs", version, about = "BaseStation (SBS) feed tracker")]
struct Cli {
    /// Config file (default: ~/.sbs-tracker/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (overrides RUST_LOG and log_level)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a feed and track aircraft until Ctrl-C
    Track(TrackArgs),

    /// Decode captured BaseStation lines from a file and print an aircraft table
    Decode {
        /// Path to file containing lines ("-" for stdin)
        file: PathBuf,

        /// Print every decoded message instead of the summary table
        #[arg(short, long)]
        raw: bool,
    },

    /// Show database statistics
    Stats {
        /// SQLite database path
        #[arg(long)]
        db_path: Option<String>,
    },

    /// Write a default config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct TrackArgs {
    /// Feed host
    #[arg(long, env = "SBS_HOST")]
    host: Option<String>,

    /// Feed port
    #[arg(long, env = "SBS_PORT")]
    port: Option<u16>,

    /// SQLite database path
    #[arg(long)]
    db_path: Option<String>,

    /// JSON tracking profile
    #[arg(long)]
    profile: Option<String>,

    /// Receiver latitude
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Receiver longitude
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Don't persist snapshots
    #[arg(long)]
    no_persist: bool,

    /// Forward events to this hub URL
    #[arg(long)]
    hub_url: Option<String>,

    /// Serve the read-only HTTP view
    #[arg(long)]
    dashboard: bool,

    /// HTTP view port
    #[arg(long)]
    dashboard_port: Option<u16>,
}

impl TrackArgs {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.feed.host = host;
        }
        if let Some(port) = self.port {
            config.feed.port = port;
        }
        if let Some(path) = self.db_path {
            config.database.path = path;
        }
        if self.profile.is_some() {
            config.tracking.profile = self.profile;
        }
        if self.lat.is_some() {
            config.tracking.lat = self.lat;
            config.tracking.lon = self.lon;
        }
        if self.no_persist {
            config.writer.enabled = false;
        }
        if self.hub_url.is_some() {
            config.hub.url = self.hub_url;
        }
        if self.dashboard {
            config.dashboard.enabled = true;
        }
        if let Some(port) = self.dashboard_port {
            config.dashboard.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(config::config_file);
    let mut config = config::load_config(&config_path).unwrap_or_else(|e| {
        eprintln!("Error loading config {}: {e}", config_path.display());
        std::process::exit(1);
    });

    init_logging(&config.log_level, cli.verbose);

    match cli.command {
        Commands::Track(args) => {
            args.apply(&mut config);
            cmd_track(config).await
        }
        Commands::Decode { file, raw } => cmd_decode(&file, raw),
        Commands::Stats { db_path } => {
            cmd_stats(db_path.as_deref().unwrap_or(&config.database.path))
        }
        Commands::InitConfig { force } => cmd_init_config(&config_path, force),
    }
}

fn init_logging(level: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

// ---------------------------------------------------------------------------
// track
// ---------------------------------------------------------------------------

async fn cmd_track(config: Config) -> ExitCode {
    let settings = config.tracker_settings().unwrap_or_else(|e| {
        eprintln!("Error in tracking settings: {e}");
        std::process::exit(1);
    });

    let feed = &config.feed;
    let mut source = match TcpLineSource::connect(
        &feed.host,
        feed.port,
        Duration::from_millis(feed.connect_timeout_ms),
        Duration::from_millis(feed.read_timeout_ms),
    )
    .await
    {
        Ok(source) => source,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let token = CancellationToken::new();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let notifier = Notifier::new();
    notifier.subscribe(Arc::new(LogSubscriber));

    // Persistence
    let writer = if config.writer.enabled {
        let store = SqliteStore::open(&config.database.path).unwrap_or_else(|e| {
            eprintln!("Error opening database {}: {e}", config.database.path);
            std::process::exit(1);
        });
        let writer = Arc::new(QueuedWriter::new(
            Arc::new(store),
            WriterSettings {
                interval: Duration::from_millis(config.writer.interval_ms),
                batch_size: config.writer.batch_size,
                time_to_lock: Duration::from_millis(config.writer.time_to_lock_ms),
            },
        ));
        notifier.subscribe(Arc::new(WriterSubscriber::new(Arc::clone(&writer))));

        let mut batches = writer.subscribe_batches();
        let batch_token = token.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                let batch = tokio::select! {
                    _ = batch_token.cancelled() => break,
                    batch = batches.recv() => match batch {
                        Ok(batch) => batch,
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                };
                if batch.failed > 0 {
                    warn!(failed = batch.failed, written = batch.written, "batch had failures");
                } else if batch.written > 0 {
                    info!(
                        written = batch.written,
                        queued = batch.final_queue_size,
                        elapsed_ms = batch.duration.as_millis() as u64,
                        "batch persisted"
                    );
                }
            }
        }));

        let ticker = IntervalTicker::new(writer.settings().interval);
        let run = Arc::clone(&writer).run(ticker, token.clone());
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run.await {
                error!(error = %e, "writer stopped");
            }
        }));
        Some(writer)
    } else {
        None
    };

    // Hub bridge
    let hub_counters = config.hub.url.as_deref().map(|url| {
        let (bridge, publisher) = HubBridge::new(
            url,
            Duration::from_millis(config.hub.timeout_ms),
            config.hub.capacity,
        );
        let counters = bridge.counters();
        notifier.subscribe(Arc::new(bridge));
        tasks.push(tokio::spawn(publisher.run(token.clone())));
        counters
    });

    let tracker = Arc::new(Tracker::new(settings, notifier));

    // Loops
    let reader = MessageReader::new();
    let ingest = tokio::spawn(service::run_ingest(
        Arc::clone(&tracker),
        reader.subscribe(),
        token.clone(),
        service::local_now,
    ));
    tasks.push(tokio::spawn(service::run_sweep(
        Arc::clone(&tracker),
        IntervalTicker::new(tracker.settings().sweep_interval),
        token.clone(),
        service::local_now,
    )));

    if config.dashboard.enabled {
        let state = Arc::new(web::AppState {
            tracker: Arc::clone(&tracker),
            writer: writer.clone(),
        });
        let host = config.dashboard.host.clone();
        let port = config.dashboard.port;
        let token = token.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = web::serve(state, &host, port, token).await {
                error!(error = %e, "dashboard failed");
            }
        }));
    }

    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupted, shutting down");
                token.cancel();
            }
        });
    }

    let result = reader.run(&mut source, &token).await;
    token.cancel();
    drop(reader);

    let ingested = ingest.await.unwrap_or(0);
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "task panicked");
        }
    }

    let stats = tracker.stats();
    print_aircraft_table(&tracker.get_active());
    println!(
        "Lines: {} read, {ingested} ingested, {} decode failures; {} added, {} removed",
        stats.lines, stats.decode_failures, stats.added, stats.removed
    );
    if let Some(counters) = hub_counters {
        println!(
            "Hub: {} queued, {} sent, {} failed, {} dropped",
            counters.queued.load(Ordering::Relaxed),
            counters.sent.load(Ordering::Relaxed),
            counters.failed.load(Ordering::Relaxed),
            counters.dropped.load(Ordering::Relaxed)
        );
    }

    match result {
        Ok(lines) => {
            info!(lines, "feed reader stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("feed failed: {e}");
            ExitCode::FAILURE
        }
    }
}

// ---------------------------------------------------------------------------
// decode
// ---------------------------------------------------------------------------

fn cmd_decode(file: &Path, raw: bool) -> ExitCode {
    let reader: Box<dyn BufRead> = if file.to_str() == Some("-") {
        Box::new(io::stdin().lock())
    } else {
        let f = std::fs::File::open(file).unwrap_or_else(|e| {
            eprintln!("Error opening {}: {e}", file.display());
            std::process::exit(1);
        });
        Box::new(io::BufReader::new(f))
    };

    // Pass-through rules and no staleness: every MSG address gets a row
    let settings = TrackerSettings::new(Duration::MAX, Duration::MAX);
    let tracker = Tracker::new(settings, Notifier::new());
    let mut total_lines = 0u64;
    let mut failures = 0u64;

    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        total_lines += 1;

        match codec::decode(line) {
            Ok(msg) => {
                if raw {
                    println!("{msg:?}");
                }
                tracker.ingest(&msg, msg.generated);
            }
            Err(e) => {
                failures += 1;
                if raw {
                    eprintln!("  {e}: {line}");
                }
            }
        }
    }

    if !raw {
        println!();
        println!(
            "Lines: {total_lines} read, {} decoded, {failures} failed, {} aircraft",
            total_lines - failures,
            tracker.len()
        );
        println!();
        print_aircraft_table(&tracker.get_active());
    }
    ExitCode::SUCCESS
}

fn print_aircraft_table(aircraft: &[TrackedAircraft]) {
    if aircraft.is_empty() {
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Address", "Callsign", "Squawk", "Alt (ft)", "Speed (kts)", "Track", "VRate",
        "Lat", "Lon", "Dist (nm)", "Behaviour", "Msgs",
    ]);

    let mut sorted: Vec<_> = aircraft.iter().collect();
    sorted.sort_by_key(|a| std::cmp::Reverse(a.message_count));

    for ac in sorted {
        table.add_row(vec![
            Cell::new(icao_to_string(&ac.address)),
            Cell::new(ac.callsign.as_deref().unwrap_or("-")),
            Cell::new(ac.squawk.as_deref().unwrap_or("-")),
            Cell::new(ac.altitude.map(|a| a.to_string()).unwrap_or("-".into())),
            Cell::new(
                ac.ground_speed
                    .map(|s| format!("{s:.0}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(ac.track.map(|h| format!("{h:.1}")).unwrap_or("-".into())),
            Cell::new(
                ac.vertical_rate
                    .map(|v| format!("{v:+}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(ac.latitude.map(|l| format!("{l:.4}")).unwrap_or("-".into())),
            Cell::new(ac.longitude.map(|l| format!("{l:.4}")).unwrap_or("-".into())),
            Cell::new(
                ac.distance_nm
                    .map(|d| format!("{d:.1}"))
                    .unwrap_or("-".into()),
            ),
            Cell::new(ac.behaviour),
            Cell::new(ac.message_count),
        ]);
    }

    println!("{table}");
}

// ---------------------------------------------------------------------------
// stats / init-config
// ---------------------------------------------------------------------------

fn cmd_stats(db_path: &str) -> ExitCode {
    let store = SqliteStore::open(db_path).unwrap_or_else(|e| {
        eprintln!("Error opening database {db_path}: {e}");
        std::process::exit(1);
    });

    let stats = match store.stats() {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("Error reading database {db_path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    println!();
    println!("Database: {db_path}");
    println!();
    println!("  Aircraft rows:  {}", stats.aircraft);
    println!("  Locked:         {}", stats.locked);
    println!("  Open:           {}", stats.aircraft - stats.locked);
    println!("  Positions:      {}", stats.positions);
    println!();
    ExitCode::SUCCESS
}

fn cmd_init_config(path: &Path, force: bool) -> ExitCode {
    if path.exists() && !force {
        eprintln!("{} already exists (use --force to overwrite)", path.display());
        return ExitCode::FAILURE;
    }
    match config::save_config(&Config::default(), path) {
        Ok(()) => {
            println!("Wrote {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error writing {}: {e}", path.display());
            ExitCode::FAILURE
        }
    }
}
