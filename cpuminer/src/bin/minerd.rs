//! Mining daemon entry point.
//!
//! Configured entirely through `CPUMINER_*` environment variables; see
//! [`cpuminer::config`].

use cpuminer::{config::MinerConfig, daemon::Daemon};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cpuminer::tracing::init_journald_or_stdout();

    let config = MinerConfig::from_env()?;
    Daemon::new(config).run().await
}
