//! Secret broker client: just-in-time database credentials.
//!
//! The broker mints short-lived `(username, password)` pairs under
//! `database/creds/<role>`. Minted values flow straight into a database
//! connection and nowhere else: the `Debug` impl redacts the password, and
//! errors carry only status and class, so credentials cannot leak into
//! audit rows, receipts, or logs.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Hard budget for a credential mint.
pub const BROKER_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("broker token not configured")]
    TokenMissing,
    #[error("broker request failed: {0}")]
    Request(String),
    #[error("broker returned status {0}")]
    Status(u16),
    #[error("broker response malformed")]
    Decode,
    #[error("broker client init failed: {0}")]
    Init(String),
}

/// A minted credential lease.
#[derive(Debug, Clone, Deserialize)]
pub struct DbCredentials {
    #[serde(default)]
    pub lease_id: String,
    #[serde(default)]
    pub lease_duration: i64,
    pub data: DbCredentialData,
}

#[derive(Clone, Deserialize)]
pub struct DbCredentialData {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DbCredentialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbCredentialData")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub struct VaultClient {
    addr: String,
    token: String,
    client: reqwest::Client,
}

impl VaultClient {
    /// Refuses to construct without a token: a tokenless client could only
    /// ever produce confusing 403s at mint time.
    pub fn new(addr: &str, token: &str) -> Result<Self, VaultError> {
        if token.is_empty() {
            return Err(VaultError::TokenMissing);
        }
        let client = reqwest::Client::builder()
            .timeout(BROKER_TIMEOUT)
            .build()
            .map_err(|e| VaultError::Init(e.to_string()))?;
        Ok(Self {
            addr: addr.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    /// Mint database credentials for `role`.
    pub async fn database_creds(&self, role: &str) -> Result<DbCredentials, VaultError> {
        let url = format!("{}/v1/database/creds/{role}", self.addr);
        let resp = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .map_err(|e| {
                VaultError::Request(if e.is_timeout() {
                    "timeout".into()
                } else if e.is_connect() {
                    "connect".into()
                } else {
                    "request".into()
                })
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(VaultError::Status(status.as_u16()));
        }
        resp.json().await.map_err(|_| VaultError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_refused() {
        assert!(matches!(
            VaultClient::new("http://localhost:8200", ""),
            Err(VaultError::TokenMissing)
        ));
    }

    #[test]
    fn lease_decodes() {
        let creds: DbCredentials = serde_json::from_value(serde_json::json!({
            "request_id": "r1",
            "lease_id": "database/creds/app/abc",
            "lease_duration": 300,
            "renewable": true,
            "data": {"username": "v-user", "password": "v-pass"},
        }))
        .unwrap();
        assert_eq!(creds.lease_id, "database/creds/app/abc");
        assert_eq!(creds.lease_duration, 300);
        assert_eq!(creds.data.username, "v-user");
    }

    #[test]
    fn debug_redacts_password() {
        let data = DbCredentialData {
            username: "v-user".into(),
            password: "super-secret".into(),
        };
        let rendered = format!("{data:?}");
        assert!(rendered.contains("v-user"));
        assert!(!rendered.contains("super-secret"));
    }

    #[tokio::test]
    async fn unreachable_broker_classified() {
        let client = VaultClient::new("http://127.0.0.1:9", "tok").unwrap();
        match client.database_creds("app").await {
            Err(VaultError::Request(class)) => assert_eq!(class, "connect"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
