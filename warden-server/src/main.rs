// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Warden: rule-based logging reverse proxy
//
//  Proxy:     axum listener → ForwardingPipeline → reqwest upstream
//  Admin API: axum listener for rules, logs, metrics
//  Config:    YAML + WARDEN_* environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use warden_admin::AdminState;
use warden_core::WardenConfig;
use warden_core::config::LogsConfig;
use warden_observability::MetricsCollector;
use warden_proxy::{ForwardingPipeline, HttpUpstream, ProxyState};
use warden_store::{
    LogRecorder, LogRepository, MemoryLogRepository, MemoryRuleRepository, RuleCache,
    RuleRepository, RuleStore,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Warden: rule-based logging reverse proxy")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/warden/warden.yaml")]
    config: PathBuf,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Diagnostic log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// JSON file the rule set is mirrored to and restored from.
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// JSONL journal request logs are appended to and replayed from.
    #[arg(long)]
    log_journal: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "Warden starting");

    // ── Config ──
    if cli.config.exists() {
        info!(path = %cli.config.display(), "Loading config file");
    } else {
        info!(path = %cli.config.display(), "No config file found, using defaults and environment");
    }
    let config = WardenConfig::load(&cli.config)?;

    // ── Storage ──
    let rule_repo: Arc<dyn RuleRepository> = match cli.state_file {
        Some(ref path) => Arc::new(MemoryRuleRepository::with_state_file(path)),
        None => Arc::new(MemoryRuleRepository::new()),
    };
    let log_repo: Arc<dyn LogRepository> = match cli.log_journal {
        Some(ref path) => Arc::new(MemoryLogRepository::with_journal(path)),
        None => Arc::new(MemoryLogRepository::new()),
    };

    let cache = Arc::new(RuleCache::new(rule_repo.clone(), config.rules.cache_ttl()));
    let rules = RuleStore::new(rule_repo, cache.clone());
    let logs = LogRecorder::new(log_repo, config.logs.recent_limit);

    if config.rules.seed_defaults && rules.seed_defaults_if_empty().await? {
        info!("Rule store was empty, default rules installed");
    }
    let (active, total) = cache.counts().await?;
    info!(active, total, "Rules loaded");

    // ── Metrics ──
    let metrics = Arc::new(MetricsCollector::new(config.observability.prometheus.enabled)?);

    // ── Shutdown signal ──
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Proxy ──
    let upstream = Arc::new(HttpUpstream::new(config.proxy.timeout())?);
    let pipeline = ForwardingPipeline::new(
        cache.clone(),
        logs.clone(),
        upstream,
        metrics.clone(),
        config.proxy.mount_prefix.clone(),
        config.proxy.upstream_base.clone(),
    );
    let proxy_state = Arc::new(ProxyState::new(
        pipeline,
        &config.proxy.mount_prefix,
        &config.proxy.identity_header,
    )?);
    let proxy_addr = config.proxy.addr.clone();
    let proxy_task = tokio::spawn({
        let state = proxy_state.clone();
        let shutdown = wait_for(shutdown_rx.clone());
        async move { warden_proxy::start_proxy(state, &proxy_addr, shutdown).await }
    });

    // ── Admin API ──
    let admin_task = if config.admin.enabled {
        let admin_state = Arc::new(AdminState {
            rules: rules.clone(),
            logs: logs.clone(),
            metrics: metrics.clone(),
            api_key: config.admin.api_key.clone(),
            metrics_path: config.observability.prometheus.path.clone(),
            state_file: cli.state_file.clone(),
            log_journal: cli.log_journal.clone(),
        });
        let admin_addr = config.admin.addr.clone();
        let shutdown = wait_for(shutdown_rx.clone());
        Some(tokio::spawn(async move {
            warden_admin::start_admin(admin_state, &admin_addr, shutdown).await
        }))
    } else {
        info!("Admin API disabled");
        None
    };

    // ── Retention ──
    let retention_task = (config.logs.retention_days > 0).then(|| {
        tokio::spawn(run_retention(
            logs.clone(),
            config.logs.clone(),
            shutdown_rx.clone(),
        ))
    });

    info!(
        proxy_addr = %config.proxy.addr,
        admin_addr = %config.admin.addr,
        upstream = %config.proxy.upstream_base,
        mount = %config.proxy.mount_prefix,
        "Warden is ready, serving traffic"
    );

    // ── Graceful shutdown: wait for SIGTERM/SIGINT ──
    shutdown_signal().await;
    info!("Shutdown signal received, stopping...");
    let _ = shutdown_tx.send(true);

    match proxy_task.await {
        Ok(Err(e)) => error!(error = %e, "Proxy listener failed"),
        Err(e) => error!(error = %e, "Proxy task panicked"),
        Ok(Ok(())) => {}
    }
    let pending = proxy_state.pipeline.pending_logs();
    if pending > 0 {
        info!(pending, "Waiting for pending log writes");
    }
    proxy_state.pipeline.drain_logs().await;

    if let Some(task) = admin_task {
        match task.await {
            Ok(Err(e)) => error!(error = %e, "Admin API failed"),
            Err(e) => error!(error = %e, "Admin task panicked"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(task) = retention_task {
        let _ = task.await;
    }

    info!("Warden stopped");
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    match cli.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Resolves once the shutdown flag flips to true.
async fn wait_for(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Delete records older than the retention window, once per interval.
async fn run_retention(logs: LogRecorder, config: LogsConfig, shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(config.retention_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    let stop = wait_for(shutdown);
    tokio::pin!(stop);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(cutoff) = config.retention_cutoff(chrono::Utc::now()) else {
                    warn!(retention_days = config.retention_days, "Retention window out of range, pass skipped");
                    continue;
                };
                if let Err(e) = logs.purge_older_than(cutoff).await {
                    warn!(error = %e, "Log retention pass failed");
                }
            }
            _ = &mut stop => return,
        }
    }
}

/// SIGTERM (docker stop) or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
