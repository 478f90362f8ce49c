use anyhow::Result;
use cachedns::config::{self, ServerConfig};
use cachedns::{metrics, DnsServer, JsonFileStore, RecordCache, Resolver};
use chrono::Local;
use clap::Parser;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Log timestamps in local time instead of UTC
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "cachedns")]
#[command(about = "A caching DNS resolver written in Rust", long_about = None)]
struct Args {
    /// Where the record cache is persisted between runs
    #[arg(long, default_value = "cache.json")]
    cache_file: PathBuf,

    #[arg(long, default_value = config::DEFAULT_LISTEN, value_parser = config::parse_addr)]
    listen: SocketAddr,

    #[arg(long, default_value = config::DEFAULT_ROOT, value_parser = config::parse_addr)]
    root: SocketAddr,

    /// Serve Prometheus metrics on this address
    #[arg(long, value_parser = config::parse_addr)]
    metrics: Option<SocketAddr>,

    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

fn main() -> Result<()> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("cachedns-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.log_dir)?;
    let file_appender = RollingFileAppender::new(
        args.log_dir.join("cachedns.log"),
        RollingConditionBasic::new().daily(),
        30,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
        .init();

    info!("Starting cachedns version {}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig { listen: args.listen, root: args.root, ..ServerConfig::default() };

    let store = Arc::new(JsonFileStore::new(&args.cache_file));
    let cache = Arc::new(RecordCache::open(store)?);
    info!(">>> Cache file: {}", args.cache_file.display());

    // Dropping the guard on any early return still stops the sweep and flushes.
    let sweeper = cache.spawn_sweeper(config.sweep_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Some(addr) = args.metrics {
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve(addr, rx).await {
                tracing::error!("[metrics] Exporter failed: {}", e);
            }
        });
    }

    let resolver = Resolver::udp(cache.clone(), config.upstream_timeout);
    let server = DnsServer::bind(config, resolver).await?;

    let result = tokio::select! {
        res = server.run(shutdown_rx) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    drop(server);
    sweeper.shutdown().await?;
    info!("Server stopped");
    result
}
