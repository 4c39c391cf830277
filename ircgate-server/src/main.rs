use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (IRCGATE_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("IRCGATE_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("ircgate_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let config = ircgate_server::config::ServerConfig::parse();
    tracing::info!("Starting IRC gateway on {}", config.listen_addr);
    if let Some(ref dir) = config.data_dir {
        tracing::info!("Storing credentials under {}", dir.display());
    }
    for account in &config.accounts {
        tracing::info!(account = %account.id, protocol = %account.protocol, "Configured account");
    }

    let server = ircgate_server::server::Server::new(config);
    server.run().await
}
