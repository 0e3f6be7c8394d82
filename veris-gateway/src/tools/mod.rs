//! Tool catalog contracts and builtin executors.
//!
//! A tool's catalog row carries everything the pipeline needs: a JSON
//! Schema for its arguments, a risk class for sandbox gating, and an
//! optional broker role for executors that need minted credentials.
//! Validation is a data-driven schema interpretation — schemas cannot
//! cause code execution — and dispatch is a tagged match on `tool_id`.

pub mod mathexpr;

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::store::ToolRow;
use crate::vault::VaultClient;

/// What an executor failure looks like to the pipeline: a message that is
/// safe to put in outputs and audit rows.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ExecError(pub String);

impl ExecError {
    fn msg(s: impl Into<String>) -> Self {
        ExecError(s.into())
    }
}

/// Where the pg_whoami executor connects once it holds minted credentials.
#[derive(Debug, Clone)]
pub struct ToolDbTarget {
    pub host: String,
    pub port: u16,
    pub dbname: String,
}

/// Everything executors may reach beyond their validated arguments.
pub struct ExecContext<'a> {
    pub vault: Option<&'a VaultClient>,
    pub tool_db: &'a ToolDbTarget,
}

/// Validate tool arguments against the catalog schema. Returns the
/// validator's diagnostic for the first failure.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let validator =
        jsonschema::validator_for(schema).map_err(|e| format!("schema compile failed: {e}"))?;
    validator.validate(args).map_err(|e| e.to_string())
}

/// Run a builtin tool. Arguments have already passed schema validation;
/// executors still read them defensively because schemas are operator data.
pub async fn run_tool(
    tool: &ToolRow,
    args: &Value,
    ctx: &ExecContext<'_>,
) -> Result<Value, ExecError> {
    match tool.tool_id.as_str() {
        "echo" => {
            let text = args
                .get("text")
                .cloned()
                .ok_or_else(|| ExecError::msg("missing argument: text"))?;
            Ok(json!({ "text": text }))
        }
        "time_now" => Ok(json!({
            "utc": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
        })),
        "math_eval" => {
            let expression = args
                .get("expression")
                .and_then(Value::as_str)
                .ok_or_else(|| ExecError::msg("missing argument: expression"))?;
            let value = mathexpr::eval(expression).map_err(ExecError)?;
            Ok(json!({ "value": value.into_json() }))
        }
        "pg_whoami" => pg_whoami(tool, ctx).await,
        other => Err(ExecError::msg(format!("unknown tool_id: {other}"))),
    }
}

/// Demonstrates brokered just-in-time credentials: mint a `(username,
/// password)` lease, open a connection with it, and report who the database
/// thinks we are. The minted values never leave this function.
async fn pg_whoami(tool: &ToolRow, ctx: &ExecContext<'_>) -> Result<Value, ExecError> {
    let role = tool
        .requires_vault_role
        .as_deref()
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ExecError::msg("pg_whoami catalog entry is missing a vault role"))?;
    let vault = ctx
        .vault
        .ok_or_else(|| ExecError::msg("broker token not configured"))?;

    let creds = vault
        .database_creds(role)
        .await
        .map_err(|e| ExecError::msg(e.to_string()))?;

    let mut pg = tokio_postgres::Config::new();
    pg.host(&ctx.tool_db.host)
        .port(ctx.tool_db.port)
        .dbname(&ctx.tool_db.dbname)
        .user(&creds.data.username)
        .password(&creds.data.password)
        .connect_timeout(Duration::from_secs(5));

    // Connection errors can echo server-side detail; keep them generic so
    // minted credentials cannot surface in outputs or audit rows.
    let (client, connection) = pg
        .connect(tokio_postgres::NoTls)
        .await
        .map_err(|_| ExecError::msg("database connection failed"))?;
    let driver = tokio::spawn(async move {
        let _ = connection.await;
    });

    let result = client.query_one("select current_user", &[]).await;
    drop(client);
    driver.abort();

    let row = result.map_err(|_| ExecError::msg("database query failed"))?;
    let current_user: String = row.get(0);

    Ok(json!({
        "current_user": current_user,
        "lease_id": creds.lease_id,
        "lease_duration": creds.lease_duration,
    }))
}

/// The builtin catalog seeded at startup.
pub fn builtin_catalog(pg_vault_role: &str) -> Vec<ToolRow> {
    vec![
        ToolRow {
            tool_id: "echo".into(),
            name: "Echo".into(),
            description: "Returns its input text unchanged".into(),
            risk: "low".into(),
            json_schema: json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"],
            }),
            requires_vault_role: None,
            enabled: true,
            version: 1,
        },
        ToolRow {
            tool_id: "time_now".into(),
            name: "Current time".into(),
            description: "Current UTC time, ISO-8601".into(),
            risk: "low".into(),
            json_schema: json!({"type": "object"}),
            requires_vault_role: None,
            enabled: true,
            version: 1,
        },
        ToolRow {
            tool_id: "math_eval".into(),
            name: "Arithmetic".into(),
            description: "Evaluates an arithmetic expression (literals and + - * / % // ** only)".into(),
            risk: "low".into(),
            json_schema: json!({
                "type": "object",
                "properties": {"expression": {"type": "string"}},
                "required": ["expression"],
            }),
            requires_vault_role: None,
            enabled: true,
            version: 1,
        },
        ToolRow {
            tool_id: "pg_whoami".into(),
            name: "Database identity".into(),
            description: "Connects with brokered credentials and reports current_user".into(),
            risk: "high".into(),
            json_schema: json!({"type": "object"}),
            requires_vault_role: Some(pg_vault_role.to_string()),
            enabled: true,
            version: 1,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_without_broker() -> (ToolDbTarget, Option<VaultClient>) {
        (
            ToolDbTarget {
                host: "localhost".into(),
                port: 5432,
                dbname: "veris".into(),
            },
            None,
        )
    }

    fn tool(tool_id: &str) -> ToolRow {
        builtin_catalog("gateway_app")
            .into_iter()
            .find(|t| t.tool_id == tool_id)
            .unwrap()
    }

    #[test]
    fn validate_accepts_and_rejects() {
        let echo = tool("echo");
        assert!(validate_args(&echo.json_schema, &json!({"text": "hi"})).is_ok());

        let err = validate_args(&echo.json_schema, &json!({})).unwrap_err();
        assert!(err.contains("text"), "diagnostic should name the field: {err}");

        let err = validate_args(&echo.json_schema, &json!({"text": 7})).unwrap_err();
        assert!(!err.is_empty());
    }

    #[tokio::test]
    async fn echo_returns_text() {
        let (db, vault) = ctx_without_broker();
        let ctx = ExecContext {
            vault: vault.as_ref(),
            tool_db: &db,
        };
        let out = run_tool(&tool("echo"), &json!({"text": "hi"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"text": "hi"}));
    }

    #[tokio::test]
    async fn time_now_is_utc_with_z() {
        let (db, vault) = ctx_without_broker();
        let ctx = ExecContext {
            vault: vault.as_ref(),
            tool_db: &db,
        };
        let out = run_tool(&tool("time_now"), &json!({}), &ctx).await.unwrap();
        let utc = out["utc"].as_str().unwrap();
        assert!(utc.ends_with('Z'), "{utc}");
        assert!(utc.contains('T'));
    }

    #[tokio::test]
    async fn math_eval_executes() {
        let (db, vault) = ctx_without_broker();
        let ctx = ExecContext {
            vault: vault.as_ref(),
            tool_db: &db,
        };
        let out = run_tool(&tool("math_eval"), &json!({"expression": "2 + 3 * 4"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!({"value": 14}));

        let err = run_tool(&tool("math_eval"), &json!({"expression": "evil()"}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported expression");
    }

    #[tokio::test]
    async fn pg_whoami_without_broker_fails_cleanly() {
        let (db, vault) = ctx_without_broker();
        let ctx = ExecContext {
            vault: vault.as_ref(),
            tool_db: &db,
        };
        let err = run_tool(&tool("pg_whoami"), &json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "broker token not configured");
    }

    #[tokio::test]
    async fn pg_whoami_requires_catalog_role() {
        let (db, vault) = ctx_without_broker();
        let ctx = ExecContext {
            vault: vault.as_ref(),
            tool_db: &db,
        };
        let mut stripped = tool("pg_whoami");
        stripped.requires_vault_role = None;
        let err = run_tool(&stripped, &json!({}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("vault role"));
    }

    #[tokio::test]
    async fn unknown_tool_refused() {
        let (db, vault) = ctx_without_broker();
        let ctx = ExecContext {
            vault: vault.as_ref(),
            tool_db: &db,
        };
        let mut bogus = tool("echo");
        bogus.tool_id = "shell_exec".into();
        let err = run_tool(&bogus, &json!({"text": "x"}), &ctx).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool_id"));
    }
}
