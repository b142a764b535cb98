//! Index node entry point (spec.md §6.4): coordinates query planning,
//! placement, and reorg across worker nodes. Takes no flags; configuration
//! is read from the default search paths (`geocache.toml`, then
//! `/etc/geocache/geocache.toml`), falling back to defaults.

use geocache::config::Settings;
use geocache::index::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load_default();
    geocache::telemetry::init(settings.log_level);

    tracing::info!(version = geocache::VERSION, port = settings.index.port, "starting geocache index node");

    if let Err(e) = server::run(settings).await {
        tracing::error!(error = %e, "index node exited with an error");
        return Err(e.into());
    }
    Ok(())
}
