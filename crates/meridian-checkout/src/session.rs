//! # Checkout Sessions
//!
//! Short-lived sessions binding a customer's checkout flow to a cart.
//! Sessions expire on a TTL; an expired session is indistinguishable from
//! a missing one.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CheckoutError, CheckoutResult};

/// Default session lifetime.
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;

// =============================================================================
// Session
// =============================================================================

/// A live checkout session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub id: String,
    pub cart_id: String,
    pub customer_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Creates a session with a fresh UUID and the given lifetime.
    pub fn new(cart_id: impl Into<String>, customer_id: Option<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        CheckoutSession {
            id: Uuid::new_v4().to_string(),
            cart_id: cart_id.into(),
            customer_id,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// Store
// =============================================================================

/// Session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: CheckoutSession) -> CheckoutResult<()>;

    /// Fetches a live session; expired sessions are reported as missing.
    async fn get(&self, session_id: &str) -> CheckoutResult<CheckoutSession>;

    /// Pushes the expiry forward by the session TTL.
    async fn touch(&self, session_id: &str, ttl: Duration) -> CheckoutResult<()>;

    async fn delete(&self, session_id: &str) -> CheckoutResult<()>;
}

/// In-memory session store with lazy expiry: expired entries are dropped
/// when they are next touched.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, CheckoutSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: CheckoutSession) -> CheckoutResult<()> {
        debug!(session_id = %session.id, cart_id = %session.cart_id, "session created");
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> CheckoutResult<CheckoutSession> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        match sessions.get(session_id) {
            Some(session) if !session.is_expired(now) => Ok(session.clone()),
            Some(_) => {
                sessions.remove(session_id);
                Err(CheckoutError::SessionNotFound(session_id.to_string()))
            }
            None => Err(CheckoutError::SessionNotFound(session_id.to_string())),
        }
    }

    async fn touch(&self, session_id: &str, ttl: Duration) -> CheckoutResult<()> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(session) if !session.is_expired(now) => {
                session.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(CheckoutError::SessionNotFound(session_id.to_string())),
        }
    }

    async fn delete(&self, session_id: &str) -> CheckoutResult<()> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
