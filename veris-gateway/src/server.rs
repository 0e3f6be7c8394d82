//! Gateway assembly: configuration in, serving router out.

use std::sync::Arc;
use std::time::SystemTime;

use anyhow::Result;

use crate::config::GatewayConfig;
use crate::nonce::NonceRegistry;
use crate::policy::PolicyClient;
use crate::store::Store;
use crate::tools::ToolDbTarget;
use crate::vault::VaultClient;

/// Shared state behind every handler: the stores and external clients,
/// wired once at startup and injected via axum state.
pub struct Gateway {
    pub config: GatewayConfig,
    pub store: Store,
    pub nonces: NonceRegistry,
    pub policy: PolicyClient,
    pub vault: Option<VaultClient>,
    pub tool_db: ToolDbTarget,
}

impl Gateway {
    /// Open the store, seed the builtin tool catalog, and construct the
    /// external-service clients.
    pub fn open(config: GatewayConfig) -> Result<Self> {
        let store = if config.db_path == ":memory:" {
            Store::open_memory()?
        } else {
            Store::open(&config.db_path)?
        };
        store.seed_builtin_tools(&config.pg_vault_role)?;

        let policy = PolicyClient::new(&config.opa_url, config.fail_open)?;

        let vault = if config.vault_token.is_empty() {
            tracing::warn!("broker token not set; broker-backed tools will refuse to run");
            None
        } else {
            Some(VaultClient::new(&config.vault_addr, &config.vault_token)?)
        };

        let tool_db = ToolDbTarget {
            host: config.tool_db_host.clone(),
            port: config.tool_db_port,
            dbname: config.tool_db_name.clone(),
        };

        Ok(Self {
            config,
            store,
            nonces: NonceRegistry::new(),
            policy,
            vault,
            tool_db,
        })
    }

    /// Bind and serve until the task is cancelled.
    pub async fn serve(self: Arc<Self>, listener: tokio::net::TcpListener) -> Result<()> {
        let app = crate::web::router(self);
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Seconds since the unix epoch.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
