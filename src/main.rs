//! CryptoNote pool server binary.

use clap::Parser;
use cryptonote_pool::config::{Args, Config};
use cryptonote_pool::error::Result;
use cryptonote_pool::net::{bind_listener, build_tls_acceptor, run_listener};
use cryptonote_pool::pool::bans::LocalBanPublisher;
use cryptonote_pool::pool::stats::LogSink;
use cryptonote_pool::pow::Blake2Pow;
use cryptonote_pool::rpc::DaemonClient;
use cryptonote_pool::PoolServer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Sweep period for miner timeouts and ban expiry.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

fn init_logging(level: &str, format: &str) {
    let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Arc::new(Config::from_args(&args)?);
    init_logging(&config.logging.level, &config.logging.format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        daemon = %config.daemon.url,
        "starting cryptonote-pool"
    );

    let daemon = Arc::new(DaemonClient::new(
        config.daemon.url.clone(),
        Duration::from_secs(config.daemon.timeout_secs),
    )?);
    let pool = Arc::new(PoolServer::new(
        config.clone(),
        daemon,
        Arc::new(Blake2Pow),
        Arc::new(LogSink::new()),
        Arc::new(LocalBanPublisher),
    )?);

    // A pool with no template has nothing to hand to miners; refuse to
    // start until the daemon answers once.
    pool.bootstrap().await?;

    let tls_acceptor = match &config.pool.tls {
        Some(tls_cfg) if config.pool.ports.iter().any(|p| p.tls) => {
            Some(build_tls_acceptor(tls_cfg)?)
        }
        _ => None,
    };

    for port in config.pool.ports.clone() {
        // Bind before spawning so an occupied port aborts startup.
        let listener = bind_listener(port.port).await?;
        let acceptor = port.tls.then(|| tls_acceptor.clone()).flatten();
        let pool = pool.clone();
        tokio::spawn(async move {
            if let Err(err) = run_listener(pool, listener, port, acceptor).await {
                error!(%err, "listener terminated");
            }
        });
    }

    let refresh_pool = pool.clone();
    let refresh_interval = Duration::from_millis(config.pool.refresh_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(refresh_interval);
        loop {
            ticker.tick().await;
            refresh_pool.refresh_cycle().await;
        }
    });

    let retarget_pool = pool.clone();
    let retarget_interval = Duration::from_secs(config.pool.var_diff.retarget_time);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(retarget_interval);
        loop {
            ticker.tick().await;
            retarget_pool.retarget_all();
        }
    });

    let sweep_pool = pool.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            sweep_pool.sweep();
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(sessions = pool.session_count(), "shutting down"),
        Err(err) => warn!(%err, "failed to listen for shutdown signal"),
    }
    Ok(())
}
