//! Worker node entry point (spec.md §6.4): holds local caches and executes
//! puzzle jobs the index dispatches. Takes no flags; configuration is read
//! from the same default search paths as the index binary.

use geocache::config::Settings;
use geocache::node::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load_default();
    geocache::telemetry::init(settings.log_level);

    tracing::info!(
        version = geocache::VERSION,
        port = settings.node.port,
        "starting geocache worker node"
    );

    let index_host = "127.0.0.1".to_string();
    let index_control_port = settings.index.port + 1;

    if let Err(e) = server::run(settings.node, index_host, index_control_port).await {
        tracing::error!(error = %e, "node exited with an error");
        return Err(e.into());
    }
    Ok(())
}
