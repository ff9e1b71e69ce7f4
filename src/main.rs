//! Backend Balancer daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────────┐
//!                  │                  BACKEND BALANCER                     │
//!                  │                                                       │
//!   caller ───────▶│  LoadBalancer ──▶ active strategy ──▶ BackendLease    │
//!                  │       │                                   │           │
//!                  │       ▼                                   ▼           │
//!                  │  circuit breaker (per backend) ──▶ caller's call ─────┼──▶ backend
//!                  │       │                                               │
//!                  │       ▼                                               │
//!                  │  response-time / throughput ──▶ bottleneck detector   │
//!                  │                                                       │
//!                  │  HealthChecker ── periodic probes ────────────────────┼──▶ backend /health
//!                  │  admin API · config watcher · metrics exporter        │
//!                  └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use backend_balancer::config::load_config;
use backend_balancer::lifecycle::{signals, startup, Shutdown};
use backend_balancer::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "backend-balancer")]
#[command(about = "Health-aware backend load balancer", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "balancer.toml")]
    config: PathBuf,

    /// Do not reload the configuration when the file changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "backend-balancer starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let watch_path = (!args.no_watch).then_some(args.config.as_path());
    let running = startup::start(config, watch_path, &shutdown).await?;

    signals::wait_for_signal().await;
    shutdown.trigger();
    running.join(Duration::from_secs(10)).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
