//! tvstate agent entry point.
//!
//! Loads the TOML configuration, builds the device session and sink, and
//! runs the poll loop until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ AgentConfig::load()        -- TOML config, defaults if missing
//!  └─ PollLoop::new()
//!       ├─ AdbSession            -- authenticated TCP session to the device
//!       └─ TracingSink           -- states/events as structured log lines
//!  └─ tick() every interval, reconnecting as needed
//! ```

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tvstate_agent::config::AgentConfig;
use tvstate_agent::poller::{PollLoop, PollOptions};
use tvstate_agent::publish::TracingSink;
use tvstate_agent::session::AdbSession;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tvstate.toml"));
    let config = AgentConfig::load(&config_path)?;

    // Structured logging at the configured level; `RUST_LOG` overrides.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.agent.log_level.clone())),
        )
        .init();

    info!(
        config = %config_path.display(),
        device = %format!("{}:{}", config.device.host, config.device.port),
        interval_secs = config.poll.interval_secs,
        "tvstate agent starting"
    );

    let session = AdbSession::new(&config);
    let options = PollOptions::from(&config);
    let mut poller = PollLoop::new(session, TracingSink, options);

    // Shutdown flag flipped by the Ctrl-C handler.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    let interval = config.poll_interval();
    while running.load(Ordering::Relaxed) {
        poller.tick().await;

        // Sleep in short slices so Ctrl-C takes effect promptly even with
        // long poll intervals.
        let mut remaining = interval;
        while running.load(Ordering::Relaxed) && !remaining.is_zero() {
            let slice = remaining.min(Duration::from_millis(100));
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
    }

    poller.shutdown().await;
    info!("tvstate agent stopped");
    Ok(())
}
