//! HTTP surface and the secure-call pipeline.
//!
//! The handlers here are thin until `secure_call`, which orchestrates the
//! whole trust pipeline: bearer binding, policy decision, per-tool schema
//! validation and sandbox gating, sequential execution with per-tool error
//! isolation, reputation update, receipt signing, and the audit append.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::canonical;
use crate::crypto;
use crate::error::ApiError;
use crate::policy::Mode;
use crate::server::{now_unix, Gateway};
use crate::token::{self, Claims, TOKEN_TTL_SECS};
use crate::tools::{self, ExecContext};

/// Build the gateway router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/agents/register", post(register_agent))
        .route("/v1/agents/{agent_id}/nonce", get(issue_nonce))
        .route("/v1/agents/auth", post(authenticate))
        .route("/v1/tools", get(list_tools))
        .route("/v1/secure_call", post(secure_call))
        .route("/v1/verify/agent", post(verify_agent))
        .route("/v1/reputation/{agent_id}", get(get_reputation))
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

// ── Request/response types ─────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub display_name: String,
    pub public_key_ed25519_pem: String,
}

#[derive(Debug, Serialize)]
struct NonceResponse {
    agent_id: String,
    nonce: String,
    expires_unix: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthRequest {
    pub agent_id: String,
    pub nonce: String,
    pub signature_b64url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_id: String,
    #[serde(default = "empty_object")]
    pub args: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SecureCallRequest {
    pub agent_id: String,
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolCall>,
    #[serde(default = "default_scopes")]
    pub data_scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec!["public".to_string()]
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyAgentRequest {
    pub agent_id: String,
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

fn default_level() -> String {
    "basic".to_string()
}

#[derive(Debug, Serialize)]
struct ToolInfo {
    tool_id: String,
    name: String,
    description: String,
    risk: String,
    version: i64,
}

// ── Bearer auth ────────────────────────────────────────────────────────

/// Pull and verify the bearer token from the Authorization header.
fn bearer_claims(gateway: &Gateway, headers: &HeaderMap) -> Result<Claims, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::MissingBearerToken)?;
    if value.len() < 7 || !value[..7].eq_ignore_ascii_case("bearer ") {
        return Err(ApiError::MissingBearerToken);
    }
    let token = value[7..].trim();
    Ok(token::decode(
        &gateway.config.jwt_signing_key,
        token,
        now_unix(),
    )?)
}

/// Agents act as themselves; `admin` and `verifier` may act for any agent.
fn check_token_binding(claims: &Claims, agent_id: &str) -> Result<(), ApiError> {
    if claims.agent_id != agent_id && !matches!(claims.role.as_str(), "admin" | "verifier") {
        return Err(ApiError::TokenAgentMismatch);
    }
    Ok(())
}

// ── Handlers ───────────────────────────────────────────────────────────

async fn healthz() -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": "veris-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn register_agent(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.agent_id.len() < 3 || req.agent_id.len() > 64 {
        return Err(ApiError::InvalidRequest("agent_id must be 3-64 characters"));
    }
    if req.display_name.is_empty() || req.display_name.len() > 128 {
        return Err(ApiError::InvalidRequest(
            "display_name must be 1-128 characters",
        ));
    }
    if req.public_key_ed25519_pem.len() < 32 {
        return Err(ApiError::InvalidRequest("public key PEM too short"));
    }

    gateway
        .store
        .register_agent(&req.agent_id, &req.display_name, &req.public_key_ed25519_pem)?;

    gateway.store.append_audit(
        Some(&req.agent_id),
        "agent.register",
        &serde_json::to_value(&req)?,
        &json!({"ok": true}),
    )?;
    tracing::info!(agent_id = %req.agent_id, "agent registered");

    Ok(Json(json!({"ok": true, "agent_id": req.agent_id})))
}

async fn issue_nonce(
    State(gateway): State<Arc<Gateway>>,
    Path(agent_id): Path<String>,
) -> Result<Json<NonceResponse>, ApiError> {
    gateway
        .store
        .get_agent(&agent_id)?
        .ok_or(ApiError::AgentNotFound)?;

    let (nonce, expires_unix) = gateway.nonces.issue(&agent_id, now_unix());
    Ok(Json(NonceResponse {
        agent_id,
        nonce,
        expires_unix,
    }))
}

async fn authenticate(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<AuthRequest>,
) -> Result<Json<Value>, ApiError> {
    let agent = gateway
        .store
        .get_agent(&req.agent_id)?
        .ok_or(ApiError::AgentNotFound)?;
    let key_pem = gateway
        .store
        .get_agent_key(&req.agent_id)?
        .ok_or(ApiError::AgentKeyNotFound)?;

    if !gateway.nonces.consume(&req.agent_id, &req.nonce, now_unix()) {
        return Err(ApiError::InvalidOrExpiredNonce);
    }

    // The signed message is canonical JSON of exactly {agent_id, nonce};
    // any other byte sequence fails verification.
    let message = canonical::canonical_json(&json!({
        "agent_id": req.agent_id,
        "nonce": req.nonce,
    }))?;
    if !crypto::verify_agent_signature(&key_pem, message.as_bytes(), &req.signature_b64url) {
        return Err(ApiError::BadSignature);
    }

    let now = now_unix();
    let claims = Claims {
        sub: agent.agent_id.clone(),
        agent_id: agent.agent_id.clone(),
        role: agent.role.clone(),
        verification_level: agent.verification_level.clone(),
        risk_tier: agent.risk_tier.clone(),
        iat: now,
        exp: now + TOKEN_TTL_SECS,
    };
    let access_token = token::issue(&gateway.config.jwt_signing_key, &claims)?;

    gateway.store.append_audit(
        Some(&req.agent_id),
        "agent.auth",
        &serde_json::to_value(&req)?,
        &json!({"ok": true}),
    )?;
    tracing::info!(agent_id = %req.agent_id, "agent authenticated");

    Ok(Json(json!({
        "ok": true,
        "access_token": access_token,
        "token_type": "Bearer",
        "ttl_seconds": TOKEN_TTL_SECS,
        "agent": {
            "agent_id": agent.agent_id,
            "role": agent.role,
            "verification_level": agent.verification_level,
            "risk_tier": agent.risk_tier,
        },
    })))
}

async fn list_tools(State(gateway): State<Arc<Gateway>>) -> Result<Json<Value>, ApiError> {
    let tools: Vec<ToolInfo> = gateway
        .store
        .list_enabled_tools()?
        .into_iter()
        .map(|t| ToolInfo {
            tool_id: t.tool_id,
            name: t.name,
            description: t.description,
            risk: t.risk,
            version: t.version,
        })
        .collect();
    Ok(Json(json!({ "tools": tools })))
}

async fn secure_call(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(req): Json<SecureCallRequest>,
) -> Result<Json<Value>, ApiError> {
    let claims = bearer_claims(&gateway, &headers)?;
    let agent = gateway
        .store
        .get_agent(&req.agent_id)?
        .ok_or(ApiError::AgentNotFound)?;
    check_token_binding(&claims, &req.agent_id)?;

    // Detached: once a call is accepted it appends exactly one terminal
    // audit entry, even if the client hangs up mid-pipeline.
    let pipeline = tokio::spawn(run_secure_call(gateway.clone(), agent, req));
    let body = pipeline
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;
    Ok(Json(body))
}

async fn run_secure_call(
    gateway: Arc<Gateway>,
    agent: crate::store::AgentRow,
    req: SecureCallRequest,
) -> Result<Value, ApiError> {
    // Resolve the catalog up front: the policy input carries each tool's
    // risk, and a missing or disabled tool fails the whole request.
    let mut catalog = Vec::with_capacity(req.tools.len());
    for call in &req.tools {
        let tool = gateway
            .store
            .get_enabled_tool(&call.tool_id)?
            .ok_or(ApiError::ToolNotFoundOrDisabled)?;
        catalog.push(tool);
    }

    let decision = gateway
        .policy
        .decide(&json!({
            "agent": {
                "agent_id": agent.agent_id,
                "verification_level": agent.verification_level,
                "risk_tier": agent.risk_tier,
                "role": agent.role,
            },
            "request": {
                "intent": req.intent,
                "tools": catalog
                    .iter()
                    .map(|t| json!({"tool_id": t.tool_id, "risk": t.risk}))
                    .collect::<Vec<_>>(),
                "data_scopes": req.data_scopes,
            },
        }))
        .await;

    let request_json = serde_json::to_value(&req)?;

    if !decision.allow {
        gateway.store.append_audit(
            Some(&req.agent_id),
            "secure_call.deny",
            &request_json,
            &json!({"decision": decision}),
        )?;
        tracing::info!(agent_id = %req.agent_id, reasons = ?decision.reasons, "secure call denied");
        return Err(ApiError::Denied(decision));
    }

    let ctx = ExecContext {
        vault: gateway.vault.as_ref(),
        tool_db: &gateway.tool_db,
    };

    // Tools run sequentially in submitted order; each failure is isolated
    // to its own output entry.
    let mut outputs = Vec::with_capacity(req.tools.len());
    for (call, tool) in req.tools.iter().zip(&catalog) {
        if let Err(message) = tools::validate_args(&tool.json_schema, &call.args) {
            gateway.store.append_audit(
                Some(&req.agent_id),
                "tool.args_invalid",
                &json!({"tool_id": tool.tool_id, "args": call.args}),
                &json!({"error": message}),
            )?;
            outputs.push(json!({
                "tool_id": tool.tool_id,
                "error": "args_schema_invalid",
                "message": message,
                "status": 422,
            }));
            continue;
        }

        if decision.mode == Mode::Sandbox && tool.risk != "low" {
            outputs.push(json!({
                "tool_id": tool.tool_id,
                "blocked": true,
                "reason": "sandbox_mode",
            }));
            continue;
        }

        match tools::run_tool(tool, &call.args, &ctx).await {
            Ok(output) => outputs.push(json!({"tool_id": tool.tool_id, "output": output})),
            Err(e) => outputs.push(json!({"tool_id": tool.tool_id, "error": e.to_string()})),
        }
    }

    // A policy-clean call in normal mode earns one reputation point,
    // regardless of per-tool outcomes.
    if decision.mode == Mode::Normal {
        gateway.store.adjust_reputation(&req.agent_id, 1)?;
    }

    let outputs = Value::Array(outputs);
    let mut receipt = json!({
        "ts_unix": now_unix(),
        "agent_id": req.agent_id,
        "intent": req.intent,
        "mode": decision.mode,
        "decision": decision,
        "outputs_hash": canonical::canonical_hash(&outputs)?,
    });
    let signature = crypto::mac_b64url(
        gateway.config.receipt_signing_key.as_bytes(),
        canonical::canonical_json(&receipt)?.as_bytes(),
    )?;
    receipt["signature"] = Value::String(signature);

    let audit = gateway.store.append_audit(
        Some(&req.agent_id),
        "secure_call.run",
        &request_json,
        &json!({
            "mode": decision.mode,
            "decision": decision,
            "outputs": outputs,
            "receipt": receipt,
        }),
    )?;

    Ok(json!({
        "outputs": outputs,
        "receipt": receipt,
        "audit": audit,
    }))
}

async fn verify_agent(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Json(req): Json<VerifyAgentRequest>,
) -> Result<Json<Value>, ApiError> {
    let claims = bearer_claims(&gateway, &headers)?;
    let agent = gateway
        .store
        .get_agent(&req.agent_id)?
        .ok_or(ApiError::AgentNotFound)?;
    check_token_binding(&claims, &req.agent_id)?;

    if !matches!(
        req.level.as_str(),
        "basic" | "technical" | "performance" | "continuous"
    ) {
        return Err(ApiError::InvalidVerificationLevel);
    }

    let reputation = gateway.store.reputation(&req.agent_id)?;
    let has_key = gateway.store.get_agent_key(&req.agent_id)?.is_some();

    let report = json!({
        "agent_id": agent.agent_id,
        "display_name": agent.display_name,
        "role": agent.role,
        "verification_level_before": agent.verification_level,
        "risk_tier": agent.risk_tier,
        "reputation_score": reputation,
        "checks": {
            "has_key": has_key,
            "has_reputation": reputation.is_some(),
        },
        "notes": req.notes,
    });

    let new_level = if req.level == "basic" { "basic" } else { "full" };
    gateway
        .store
        .set_verification_level(&req.agent_id, new_level)?;
    gateway
        .store
        .insert_verification(&req.agent_id, &req.level, &report)?;

    let mut receipt = json!({
        "agent_id": req.agent_id,
        "level": req.level,
        "ts_unix": now_unix(),
    });
    let signature = crypto::mac_b64url(
        gateway.config.receipt_signing_key.as_bytes(),
        canonical::canonical_json(&receipt)?.as_bytes(),
    )?;
    receipt["signature"] = Value::String(signature);

    gateway.store.append_audit(
        Some(&req.agent_id),
        "agent.verify",
        &serde_json::to_value(&req)?,
        &json!({"report": report, "receipt": receipt}),
    )?;
    tracing::info!(agent_id = %req.agent_id, level = %req.level, "agent verified");

    Ok(Json(json!({"ok": true, "report": report, "receipt": receipt})))
}

async fn get_reputation(
    State(gateway): State<Arc<Gateway>>,
    headers: HeaderMap,
    Path(agent_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    bearer_claims(&gateway, &headers)?;
    gateway
        .store
        .get_agent(&agent_id)?
        .ok_or(ApiError::AgentNotFound)?;

    let score = gateway.store.reputation(&agent_id)?.unwrap_or(0);
    Ok(Json(json!({"agent_id": agent_id, "score": score})))
}
