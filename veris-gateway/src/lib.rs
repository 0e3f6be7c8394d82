//! Veris: a secure agent gateway.
//!
//! Authenticates autonomous agents with an Ed25519 challenge-response
//! handshake, authorizes their tool invocations against an external policy
//! decision point, dispatches permitted invocations to sandbox-gated tool
//! executors, and records every state transition in a hash-chained audit
//! log with a MAC-signed receipt per call.
//!
//! # Architecture
//!
//! - `canonical` — canonical JSON and SHA-256 digests
//! - `crypto` — Ed25519 verification, HMAC MACs, nonce generation
//! - `nonce` — single-use challenge registry
//! - `store` — SQLite persistence (agents, keys, tools, reputation, audit)
//! - `audit` — hash-chain append and verification
//! - `policy` — PDP client with fail-open/fail-closed degradation
//! - `vault` — secret-broker client for just-in-time DB credentials
//! - `tools` — argument validation and builtin executors
//! - `token` — HS256 bearer tokens
//! - `web` — HTTP surface and the secure-call pipeline

pub mod audit;
pub mod canonical;
pub mod config;
pub mod crypto;
pub mod error;
pub mod nonce;
pub mod policy;
pub mod server;
pub mod store;
pub mod token;
pub mod tools;
pub mod vault;
pub mod web;

pub use config::GatewayConfig;
pub use server::Gateway;
