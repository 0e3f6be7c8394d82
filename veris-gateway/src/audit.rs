//! Append-only, hash-chained audit log.
//!
//! Every entry's `row_hash` is the SHA-256 of the canonical JSON of
//! `{actor_agent_id, action, request, result, prev_hash}`, and `prev_hash`
//! is the `row_hash` of the entry with the largest smaller id (null for the
//! first entry). Reading the tail, hashing, and inserting all happen under
//! the store's connection mutex, so appends form one linear chain no matter
//! how many requests race.

use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use serde_json::{json, Value};

use crate::canonical;
use crate::store::{Store, StoreError};

/// What an append hands back to the caller (and onto the wire).
#[derive(Debug, Clone, Serialize)]
pub struct AuditHead {
    pub audit_id: i64,
    pub row_hash: String,
    pub prev_hash: Option<String>,
}

/// A full audit row, as read back for verification.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub ts: String,
    pub actor_agent_id: Option<String>,
    pub action: String,
    pub request: Value,
    pub result: Value,
    pub prev_hash: Option<String>,
    pub row_hash: String,
}

/// First deviation found when walking the chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainViolation {
    #[error("audit row {id}: stored row_hash does not match recomputed value")]
    RowHash { id: i64 },
    #[error("audit row {id}: prev_hash does not match predecessor row_hash")]
    Link { id: i64 },
}

fn hash_fields(
    actor_agent_id: Option<&str>,
    action: &str,
    request: &Value,
    result: &Value,
    prev_hash: Option<&str>,
) -> Result<String, serde_json::Error> {
    canonical::canonical_hash(&json!({
        "actor_agent_id": actor_agent_id,
        "action": action,
        "request": request,
        "result": result,
        "prev_hash": prev_hash,
    }))
}

impl Store {
    /// Append one audit entry, linking it to the current tail.
    pub fn append_audit(
        &self,
        actor_agent_id: Option<&str>,
        action: &str,
        request: &Value,
        result: &Value,
    ) -> Result<AuditHead, StoreError> {
        // One lock covers tail read + hash + insert: the chain's only
        // correctness requirement.
        let db = self.db.lock();

        let prev_hash: Option<String> = db
            .query_row(
                "SELECT row_hash FROM audit_log ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let row_hash = hash_fields(actor_agent_id, action, request, result, prev_hash.as_deref())?;

        db.execute(
            "INSERT INTO audit_log (actor_agent_id, action, request_json, result_json, prev_hash, row_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                actor_agent_id,
                action,
                request.to_string(),
                result.to_string(),
                prev_hash,
                row_hash,
            ],
        )?;

        Ok(AuditHead {
            audit_id: db.last_insert_rowid(),
            row_hash,
            prev_hash,
        })
    }

    /// All audit entries in id order.
    pub fn audit_entries(&self) -> Result<Vec<AuditEntry>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT id, ts, actor_agent_id, action, request_json, result_json, prev_hash, row_hash
             FROM audit_log ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);
        drop(db);

        rows.into_iter()
            .map(
                |(id, ts, actor_agent_id, action, request_json, result_json, prev_hash, row_hash)| {
                    Ok(AuditEntry {
                        id,
                        ts,
                        actor_agent_id,
                        action,
                        request: serde_json::from_str(&request_json)?,
                        result: serde_json::from_str(&result_json)?,
                        prev_hash,
                        row_hash,
                    })
                },
            )
            .collect()
    }

    /// Walk the whole chain, recomputing every `row_hash` and checking every
    /// link. Returns the first violation, or None when the chain is intact.
    pub fn verify_audit_chain(&self) -> Result<Option<ChainViolation>, StoreError> {
        let entries = self.audit_entries()?;
        let mut expected_prev: Option<String> = None;

        for e in &entries {
            let recomputed = hash_fields(
                e.actor_agent_id.as_deref(),
                &e.action,
                &e.request,
                &e.result,
                e.prev_hash.as_deref(),
            )?;
            if recomputed != e.row_hash {
                return Ok(Some(ChainViolation::RowHash { id: e.id }));
            }
            if e.prev_hash != expected_prev {
                return Ok(Some(ChainViolation::Link { id: e.id }));
            }
            expected_prev = Some(e.row_hash.clone());
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn appended(store: &Store, n: usize) -> Vec<AuditHead> {
        (0..n)
            .map(|i| {
                store
                    .append_audit(
                        Some("a1"),
                        "secure_call.run",
                        &json!({"intent": format!("step-{i}")}),
                        &json!({"ok": true, "i": i}),
                    )
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn first_entry_has_null_prev() {
        let store = Store::open_memory().unwrap();
        let head = store
            .append_audit(None, "agent.register", &json!({}), &json!({"ok": true}))
            .unwrap();
        assert_eq!(head.audit_id, 1);
        assert!(head.prev_hash.is_none());
    }

    #[test]
    fn entries_link_into_a_chain() {
        let store = Store::open_memory().unwrap();
        let heads = appended(&store, 4);

        for pair in heads.windows(2) {
            assert_eq!(pair[1].prev_hash.as_deref(), Some(pair[0].row_hash.as_str()));
        }
        assert_eq!(store.verify_audit_chain().unwrap(), None);
    }

    #[test]
    fn row_hash_recomputable_from_stored_fields() {
        let store = Store::open_memory().unwrap();
        appended(&store, 3);

        for e in store.audit_entries().unwrap() {
            let recomputed = hash_fields(
                e.actor_agent_id.as_deref(),
                &e.action,
                &e.request,
                &e.result,
                e.prev_hash.as_deref(),
            )
            .unwrap();
            assert_eq!(recomputed, e.row_hash);
        }
    }

    #[test]
    fn tampered_result_breaks_the_chain() {
        let store = Store::open_memory().unwrap();
        appended(&store, 5);

        // Mutate the third row's result behind the chain's back.
        store
            .db
            .lock()
            .execute(
                "UPDATE audit_log SET result_json = ?1 WHERE id = 3",
                params![r#"{"ok":true,"i":999}"#],
            )
            .unwrap();

        assert_eq!(
            store.verify_audit_chain().unwrap(),
            Some(ChainViolation::RowHash { id: 3 })
        );

        // Entry 4's prev_hash no longer matches a recomputation of row 3.
        let entries = store.audit_entries().unwrap();
        let third = &entries[2];
        let fourth = &entries[3];
        let recomputed_third = hash_fields(
            third.actor_agent_id.as_deref(),
            &third.action,
            &third.request,
            &third.result,
            third.prev_hash.as_deref(),
        )
        .unwrap();
        assert_ne!(fourth.prev_hash.as_deref(), Some(recomputed_third.as_str()));
    }

    #[test]
    fn relinked_prev_hash_detected() {
        let store = Store::open_memory().unwrap();
        let heads = appended(&store, 3);

        // Re-point entry 3 at entry 1, recomputing its row_hash so the row
        // itself looks self-consistent.
        let entries = store.audit_entries().unwrap();
        let third = &entries[2];
        let forged_prev = heads[0].row_hash.clone();
        let forged_hash = hash_fields(
            third.actor_agent_id.as_deref(),
            &third.action,
            &third.request,
            &third.result,
            Some(&forged_prev),
        )
        .unwrap();
        store
            .db
            .lock()
            .execute(
                "UPDATE audit_log SET prev_hash = ?1, row_hash = ?2 WHERE id = 3",
                params![forged_prev, forged_hash],
            )
            .unwrap();

        assert_eq!(
            store.verify_audit_chain().unwrap(),
            Some(ChainViolation::Link { id: 3 })
        );
    }

    #[test]
    fn empty_chain_verifies() {
        let store = Store::open_memory().unwrap();
        assert_eq!(store.verify_audit_chain().unwrap(), None);
    }
}
