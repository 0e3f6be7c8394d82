use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (VERIS_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("VERIS_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("veris_gateway=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = veris_gateway::GatewayConfig::parse();
    if config.fail_open {
        tracing::warn!("fail-open enabled: PDP outages degrade to sandbox mode");
    }

    let listen_addr = config.listen_addr.clone();
    let gateway = Arc::new(veris_gateway::Gateway::open(config)?);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(%listen_addr, "gateway listening");
    gateway.serve(listener).await
}
