//! CSRF token issuance and validation (spec §4.9): `GET /api/csrf-token`
//! hands out a token; every mutating endpoint must echo it back in the
//! `X-CSRF-Token` header. Grounded on the teacher's admin Basic-auth check
//! (`rest/scout.rs::check_admin_auth`) in shape — a small stateful guard
//! consulted before a mutating handler runs — but a token issue/consume
//! store instead of a password comparison.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

const TOKEN_TTL_MINUTES: i64 = 60;

pub struct CsrfStore {
    tokens: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl CsrfStore {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()) }
    }

    pub fn issue(&self) -> String {
        let token = Uuid::new_v4().to_string();
        let mut tokens = self.tokens.lock().expect("csrf store poisoned");
        tokens.retain(|_, issued_at| Utc::now() - *issued_at < Duration::minutes(TOKEN_TTL_MINUTES));
        tokens.insert(token.clone(), Utc::now());
        token
    }

    /// One-time use: a valid token is consumed on successful validation so
    /// a leaked token can't be replayed indefinitely.
    pub fn validate(&self, token: &str) -> bool {
        let mut tokens = self.tokens.lock().expect("csrf store poisoned");
        match tokens.remove(token) {
            Some(issued_at) => Utc::now() - issued_at < Duration::minutes(TOKEN_TTL_MINUTES),
            None => false,
        }
    }
}

impl Default for CsrfStore {
    fn default() -> Self {
        Self::new()
    }
}
