//! Policy decision point client.
//!
//! One synchronous question per secure call: "may this agent run these
//! tools, and in which mode?". The PDP answers with a decision document;
//! when it cannot answer, the gateway degrades according to the
//! process-wide fail-open flag. Fail-closed is the default.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Hard budget for the decision round-trip.
pub const PDP_TIMEOUT: Duration = Duration::from_secs(3);

/// Sandbox TTL handed out when degrading fail-open.
const FAIL_OPEN_TTL_SECS: i64 = 30;

/// Per-call execution regime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Normal,
    Sandbox,
    Deny,
}

/// The PDP's verdict for one secure call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub allow: bool,
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default)]
    pub ttl_seconds: i64,
    #[serde(default)]
    pub reasons: Vec<String>,
}

fn default_mode() -> Mode {
    Mode::Normal
}

impl Decision {
    fn deny(reason: String) -> Self {
        Decision {
            allow: false,
            mode: Mode::Deny,
            ttl_seconds: 0,
            reasons: vec![reason],
        }
    }
}

#[derive(Deserialize)]
struct PdpEnvelope {
    result: Option<Decision>,
}

pub struct PolicyClient {
    base_url: String,
    fail_open: bool,
    client: reqwest::Client,
}

impl PolicyClient {
    pub fn new(base_url: &str, fail_open: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(PDP_TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            fail_open,
            client,
        })
    }

    /// Ask the PDP for a decision. Never errors: unreachability and
    /// malformed answers degrade to a synthesized decision.
    pub async fn decide(&self, input: &Value) -> Decision {
        match self.query(input).await {
            Ok(Some(decision)) => decision,
            Ok(None) => Decision::deny("opa_no_result".into()),
            Err(class) => self.degraded(class),
        }
    }

    async fn query(&self, input: &Value) -> Result<Option<Decision>, String> {
        let url = format!("{}/v1/data/inneri/decision", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&json!({ "input": input }))
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("status:{}", status.as_u16()));
        }

        let envelope: PdpEnvelope = resp.json().await.map_err(|_| "decode".to_string())?;
        Ok(envelope.result)
    }

    fn degraded(&self, class: String) -> Decision {
        if self.fail_open {
            tracing::warn!(%class, "PDP unavailable, degrading fail-open to sandbox");
            Decision {
                allow: true,
                mode: Mode::Sandbox,
                ttl_seconds: FAIL_OPEN_TTL_SECS,
                reasons: vec![format!("opa_unavailable_fail_open:{class}")],
            }
        } else {
            tracing::warn!(%class, "PDP unavailable, failing closed");
            Decision::deny(format!("opa_unavailable:{class}"))
        }
    }
}

fn classify(e: reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout".into()
    } else if e.is_connect() {
        "connect".into()
    } else {
        "request".into()
    }
}
