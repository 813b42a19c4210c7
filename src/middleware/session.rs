//! Session resolution and lazy persistence
//!
//! Resolves the session identified by the `sid` cookie, or creates a
//! fresh in-memory session. Fresh sessions are persisted only if a
//! downstream handler wrote data into them, so scanning and bot traffic
//! never churns the store. On first persistence the client receives the
//! HTTP-only session cookie and the readable `csrf-token` cookie.
//!
//! Every handle works against the store-owned `SharedSession` entry, so
//! concurrent requests carrying the same `sid` mutate one session under
//! one lock; neither request's writes are lost.

use crate::server::AppState;
use crate::session::{csrf_token, verify_csrf_token, Session, SharedSession};
use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use std::sync::{Arc, Mutex};

pub const SESSION_COOKIE: &str = "sid";
pub const CSRF_COOKIE: &str = "csrf-token";

struct HandleFlags {
    /// True when the session was loaded from the store (the client
    /// already holds its cookie and token).
    established: bool,
    dirty: bool,
}

/// Shared view of the request's session, exposed to downstream handlers
/// through the request extensions. Mutations land directly on the
/// store-owned entry and mark the handle dirty so the middleware
/// persists it after the handler returns.
#[derive(Clone)]
pub struct SessionHandle {
    session: SharedSession,
    flags: Arc<Mutex<HandleFlags>>,
}

impl SessionHandle {
    fn new(session: SharedSession, established: bool) -> Self {
        Self {
            session,
            flags: Arc::new(Mutex::new(HandleFlags {
                established,
                dirty: false,
            })),
        }
    }

    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.session.lock().unwrap().data.get(key).cloned()
    }

    /// Snapshot of the session data.
    pub fn data(&self) -> serde_json::Map<String, serde_json::Value> {
        self.session.lock().unwrap().data.clone()
    }

    pub fn insert(&self, key: &str, value: serde_json::Value) {
        self.session
            .lock()
            .unwrap()
            .data
            .insert(key.to_string(), value);
        self.flags.lock().unwrap().dirty = true;
    }

    pub fn remove(&self, key: &str) -> Option<serde_json::Value> {
        let removed = self.session.lock().unwrap().data.remove(key);
        if removed.is_some() {
            self.flags.lock().unwrap().dirty = true;
        }
        removed
    }

    /// Whether the client already holds this session's cookie and token.
    pub fn is_established(&self) -> bool {
        self.flags.lock().unwrap().established
    }

    pub fn csrf_token(&self) -> String {
        csrf_token(&self.session.lock().unwrap())
    }

    pub fn verify_csrf(&self, submitted: &str) -> bool {
        verify_csrf_token(&self.session.lock().unwrap(), submitted)
    }

    fn shared(&self) -> SharedSession {
        self.session.clone()
    }

    fn snapshot(&self) -> Session {
        self.session.lock().unwrap().clone()
    }

    fn finish(&self) -> (bool, bool) {
        let flags = self.flags.lock().unwrap();
        (flags.established, flags.dirty)
    }
}

pub async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(request.headers());

    let loaded = match jar.get(SESSION_COOKIE) {
        Some(cookie) => match state.sessions.load(cookie.value()).await {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "session load failed, treating as new");
                None
            }
        },
        None => None,
    };

    let handle = match loaded {
        Some(session) => SessionHandle::new(session, true),
        None => SessionHandle::new(Arc::new(Mutex::new(Session::new())), false),
    };
    request.extensions_mut().insert(handle.clone());

    let mut response = next.run(request).await;

    // Writes already landed on the shared entry; save hands the entry to
    // the store so a fresh session gets inserted (and an external store
    // could persist it).
    let (established, dirty) = handle.finish();
    if dirty {
        match state.sessions.save(handle.shared()).await {
            Ok(()) => {
                if !established {
                    issue_cookies(
                        &mut response,
                        &handle.snapshot(),
                        state.config.session.cookie_secure,
                    );
                }
            }
            Err(e) => tracing::warn!(error = %e, "session save failed"),
        }
    }

    response
}

/// Set the session cookie (HTTP-only, no expiry: a session cookie) and
/// the token cookie the client echoes back on state-changing requests.
fn issue_cookies(response: &mut Response, session: &Session, secure: bool) {
    let sid = Cookie::build((SESSION_COOKIE, session.id.clone()))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build();
    let token = Cookie::build((CSRF_COOKIE, csrf_token(session)))
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build();

    response
        .headers_mut()
        .append(header::SET_COOKIE, sid.to_string().parse().unwrap());
    response
        .headers_mut()
        .append(header::SET_COOKIE, token.to_string().parse().unwrap());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> SharedSession {
        Arc::new(Mutex::new(Session::new()))
    }

    #[test]
    fn test_insert_marks_dirty() {
        let handle = SessionHandle::new(shared(), false);
        assert!(!handle.is_established());

        handle.insert("user", serde_json::json!("alice"));
        let (_, dirty) = handle.finish();
        assert!(dirty);
        assert_eq!(handle.get("user"), Some(serde_json::json!("alice")));
    }

    #[test]
    fn test_read_does_not_mark_dirty() {
        let handle = SessionHandle::new(shared(), true);
        let _ = handle.get("absent");
        let _ = handle.data();
        let (established, dirty) = handle.finish();
        assert!(established);
        assert!(!dirty);
    }

    #[test]
    fn test_remove_absent_key_keeps_clean() {
        let handle = SessionHandle::new(shared(), true);
        assert!(handle.remove("absent").is_none());
        let (_, dirty) = handle.finish();
        assert!(!dirty);
    }

    #[test]
    fn test_handles_on_one_entry_see_each_others_writes() {
        // Two concurrent requests resolving the same sid each get their
        // own handle over the same stored entry.
        let entry = shared();
        let a = SessionHandle::new(entry.clone(), true);
        let b = SessionHandle::new(entry, true);

        a.insert("from_a", serde_json::json!(1));
        b.insert("from_b", serde_json::json!(2));

        let data = a.data();
        assert_eq!(data.get("from_a"), Some(&serde_json::json!(1)));
        assert_eq!(data.get("from_b"), Some(&serde_json::json!(2)));
        assert!(a.finish().1);
        assert!(b.finish().1);
    }

    #[test]
    fn test_issued_cookies_have_required_attributes() {
        let session = Session::new();
        let mut response = Response::new(Body::empty());
        issue_cookies(&mut response, &session, true);

        let cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);

        let sid = cookies.iter().find(|c| c.starts_with("sid=")).unwrap();
        assert!(sid.contains("HttpOnly"));
        assert!(sid.contains("Secure"));
        assert!(!sid.contains("Max-Age"));
        assert!(!sid.contains("Expires"));

        let token = cookies
            .iter()
            .find(|c| c.starts_with("csrf-token="))
            .unwrap();
        assert!(!token.contains("HttpOnly"));
        assert!(token.contains(&csrf_token(&session)));
    }

    #[test]
    fn test_insecure_cookie_when_configured() {
        let session = Session::new();
        let mut response = Response::new(Body::empty());
        issue_cookies(&mut response, &session, false);

        let sid = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .find(|c| c.starts_with("sid="))
            .unwrap();
        assert!(sid.contains("HttpOnly"));
        assert!(!sid.contains("Secure"));
    }
}
