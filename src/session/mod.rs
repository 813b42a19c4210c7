//! Server-side sessions and the per-session CSRF secret
//!
//! A `Session` is bound to the client by an opaque cookie-carried
//! identifier. Each session owns its own CSRF secret; tokens derived
//! from one session never validate against another.
//!
//! The store hands out shared entries, not copies: every concurrent
//! request resolving the same identifier works against one
//! `SharedSession`, so overlapping writes serialize on its lock instead
//! of clobbering each other at save time.

use crate::error::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type HmacSha256 = Hmac<Sha256>;

/// Server-side session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier carried by the session cookie
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Arbitrary data written by downstream handlers
    pub data: serde_json::Map<String, serde_json::Value>,
    /// Secret the anti-forgery token is derived from; never sent to the client
    pub csrf_secret: String,
}

impl Session {
    /// Create a fresh session with random identifier and CSRF secret.
    pub fn new() -> Self {
        Self {
            id: URL_SAFE_NO_PAD.encode(rand::random::<[u8; 16]>()),
            created_at: Utc::now(),
            data: serde_json::Map::new(),
            csrf_secret: hex::encode(rand::random::<[u8; 32]>()),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Derive the CSRF token for a session.
///
/// Token = HMAC-SHA256(csrf_secret, session id), hex-encoded. The secret
/// is per-session, so a captured token is useless against any other
/// session.
pub fn csrf_token(session: &Session) -> String {
    let mut mac = HmacSha256::new_from_slice(session.csrf_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(session.id.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Validate a submitted CSRF token against the session's secret.
///
/// Comparison is constant-time via the HMAC verifier.
pub fn verify_csrf_token(session: &Session, submitted: &str) -> bool {
    let Ok(submitted_bytes) = hex::decode(submitted) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(session.csrf_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(session.id.as_bytes());
    mac.verify_slice(&submitted_bytes).is_ok()
}

/// Store-owned session entry. All handles resolving one identifier
/// point at the same entry; its lock is what serializes concurrent
/// field access.
pub type SharedSession = Arc<Mutex<Session>>;

/// Session persistence abstraction.
///
/// Server-side expiry policy is a store concern; the guard only loads,
/// saves and deletes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<SharedSession>>;
    async fn save(&self, session: SharedSession) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Process-local session store.
///
/// All state lives in this process; running multiple instances without a
/// shared store breaks the per-client session guarantees.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SharedSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<SharedSession>> {
        Ok(self.sessions.lock().unwrap().get(id).cloned())
    }

    /// Saving an entry already in the map is a no-op: handles mutate the
    /// stored entry in place. First save of a fresh session inserts it.
    async fn save(&self, session: SharedSession) -> Result<()> {
        let id = session.lock().unwrap().id.clone();
        self.sessions.lock().unwrap().insert(id, session);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.lock().unwrap().remove(id);
        Ok(())
    }
}
