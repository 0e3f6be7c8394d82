//! Single-use challenge nonces for the authentication handshake.
//!
//! Each agent holds at most one live binding; issuing a fresh nonce voids
//! the previous one. A binding is removed only by a successful consume, so
//! a failed attempt (wrong nonce, expired) cannot burn the challenge.
//! Storage is process-local by design; an external replacement must keep
//! the single-use semantics.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::crypto;

/// Challenges are valid for 120 seconds from issuance.
pub const NONCE_TTL_SECS: u64 = 120;

#[derive(Debug, Clone)]
struct Binding {
    nonce: String,
    expires_unix: u64,
}

#[derive(Default)]
pub struct NonceRegistry {
    bindings: Mutex<HashMap<String, Binding>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh challenge for `agent_id`, replacing any prior binding.
    pub fn issue(&self, agent_id: &str, now: u64) -> (String, u64) {
        let nonce = crypto::generate_nonce();
        let expires_unix = now + NONCE_TTL_SECS;
        self.bindings.lock().insert(
            agent_id.to_string(),
            Binding {
                nonce: nonce.clone(),
                expires_unix,
            },
        );
        (nonce, expires_unix)
    }

    /// Consume a challenge. Succeeds iff a binding exists for `agent_id`,
    /// the nonce matches exactly, and it has not expired; success removes
    /// the binding.
    pub fn consume(&self, agent_id: &str, nonce: &str, now: u64) -> bool {
        let mut bindings = self.bindings.lock();
        match bindings.get(agent_id) {
            Some(b) if b.nonce == nonce && b.expires_unix >= now => {
                bindings.remove(agent_id);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_is_single_use() {
        let reg = NonceRegistry::new();
        let (nonce, _) = reg.issue("a1", 1000);
        assert!(reg.consume("a1", &nonce, 1001));
        assert!(!reg.consume("a1", &nonce, 1002));
    }

    #[test]
    fn expired_nonce_rejected() {
        let reg = NonceRegistry::new();
        let (nonce, expires) = reg.issue("a1", 1000);
        assert_eq!(expires, 1000 + NONCE_TTL_SECS);
        assert!(!reg.consume("a1", &nonce, expires + 1));
        // boundary: exactly at expiry still counts
        let (nonce, expires) = reg.issue("a1", 2000);
        assert!(reg.consume("a1", &nonce, expires));
    }

    #[test]
    fn reissue_voids_prior_challenge() {
        let reg = NonceRegistry::new();
        let (first, _) = reg.issue("a1", 1000);
        let (second, _) = reg.issue("a1", 1010);
        assert!(!reg.consume("a1", &first, 1011));
        assert!(reg.consume("a1", &second, 1011));
    }

    #[test]
    fn failed_consume_keeps_binding() {
        let reg = NonceRegistry::new();
        let (nonce, _) = reg.issue("a1", 1000);
        assert!(!reg.consume("a1", "wrong", 1001));
        assert!(reg.consume("a1", &nonce, 1002));
    }

    #[test]
    fn unknown_agent_fails() {
        let reg = NonceRegistry::new();
        assert!(!reg.consume("ghost", "anything", 0));
    }

    #[test]
    fn bindings_are_per_agent() {
        let reg = NonceRegistry::new();
        let (na, _) = reg.issue("a1", 1000);
        let (nb, _) = reg.issue("b2", 1000);
        assert!(!reg.consume("a1", &nb, 1001));
        assert!(reg.consume("a1", &na, 1001));
        assert!(reg.consume("b2", &nb, 1001));
    }
}
