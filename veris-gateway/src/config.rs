//! Process configuration.
//!
//! Every setting is a CLI flag with a `VERIS_`-prefixed environment
//! override, so containers configure the gateway without wrapper scripts.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "veris-gateway", version, about = "Secure agent gateway")]
pub struct GatewayConfig {
    /// Address the HTTP API listens on.
    #[arg(long, env = "VERIS_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// SQLite database path (":memory:" for an ephemeral store).
    #[arg(long, env = "VERIS_DB_PATH", default_value = "veris.db")]
    pub db_path: String,

    /// Policy decision point base URL.
    #[arg(long, env = "VERIS_OPA_URL", default_value = "http://localhost:8181")]
    pub opa_url: String,

    /// Secret broker base URL.
    #[arg(long, env = "VERIS_VAULT_ADDR", default_value = "http://localhost:8200")]
    pub vault_addr: String,

    /// Secret broker token. Empty disables broker-backed tools.
    #[arg(long, env = "VERIS_VAULT_TOKEN", default_value = "", hide_env_values = true)]
    pub vault_token: String,

    /// Key for HMAC receipt signatures.
    #[arg(
        long,
        env = "VERIS_RECEIPT_SIGNING_KEY",
        default_value = "dev_only_change_me",
        hide_env_values = true
    )]
    pub receipt_signing_key: String,

    /// Key for bearer token MACs.
    #[arg(
        long,
        env = "VERIS_JWT_SIGNING_KEY",
        default_value = "dev_jwt_change_me",
        hide_env_values = true
    )]
    pub jwt_signing_key: String,

    /// Degrade to sandbox instead of deny when the PDP is unreachable.
    #[arg(long, env = "VERIS_FAIL_OPEN")]
    pub fail_open: bool,

    /// Host of the database the pg_whoami tool connects to.
    #[arg(long, env = "VERIS_TOOL_DB_HOST", default_value = "localhost")]
    pub tool_db_host: String,

    #[arg(long, env = "VERIS_TOOL_DB_PORT", default_value_t = 5432)]
    pub tool_db_port: u16,

    #[arg(long, env = "VERIS_TOOL_DB_NAME", default_value = "veris")]
    pub tool_db_name: String,

    /// Broker role minted for pg_whoami credentials.
    #[arg(long, env = "VERIS_PG_VAULT_ROLE", default_value = "gateway_app")]
    pub pg_vault_role: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::parse_from(["veris-gateway"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = GatewayConfig::default();
        assert_eq!(config.tool_db_port, 5432);
        assert!(!config.fail_open);
        assert!(config.vault_token.is_empty());
    }

    #[test]
    fn flags_override() {
        let config = GatewayConfig::parse_from([
            "veris-gateway",
            "--db-path",
            ":memory:",
            "--fail-open",
            "--opa-url",
            "http://pdp:8181/",
        ]);
        assert_eq!(config.db_path, ":memory:");
        assert!(config.fail_open);
        assert_eq!(config.opa_url, "http://pdp:8181/");
    }
}
