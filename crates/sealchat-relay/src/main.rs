use sealchat_relay::config::ServerConfig;
use sealchat_relay::RelayServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = if let Ok(path) = std::env::var("SEALCHAT_CONFIG_PATH") {
        ServerConfig::from_toml(path)?
    } else {
        ServerConfig::from_env()?
    };

    let server = RelayServer::new(config)?;
    server.start().await?;

    Ok(())
}
