//! Delivery session manager
//!
//! Tracks per-viewer state:
//! - Target document and delivery strategy chosen when viewing started
//! - Current page, zoom and rotation, updated on navigation
//! - Idle expiry driven by the housekeeping sweep

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::cache::normalize_rotation;
use crate::error::{DeliveryError, DeliveryResult};
use crate::strategy::DeliveryStrategy;

/// One viewer's session on one document
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySession {
    pub id: Uuid,
    pub document_id: String,
    pub strategy: DeliveryStrategy,
    pub page: usize,
    pub zoom: f32,
    pub rotation: u16,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl DeliverySession {
    pub fn new(document_id: &str, strategy: DeliveryStrategy) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            strategy,
            page: 0,
            zoom: 1.0,
            rotation: 0,
            created_at: now,
            last_seen: now,
        }
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now - self.last_seen > ttl,
            Err(_) => false,
        }
    }
}

/// Navigation update; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUpdate {
    pub page: Option<usize>,
    pub zoom: Option<f32>,
    pub rotation: Option<i64>,
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    sessions: RwLock<HashMap<Uuid, DeliverySession>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                sessions: RwLock::new(HashMap::new()),
                ttl,
            }),
        }
    }

    pub async fn create(&self, session: DeliverySession) -> DeliverySession {
        tracing::debug!(
            session_id = %session.id,
            doc_id = %session.document_id,
            strategy = %session.strategy,
            "Created delivery session"
        );
        self.inner
            .sessions
            .write()
            .await
            .insert(session.id, session.clone());
        session
    }

    pub async fn get(&self, id: Uuid) -> DeliveryResult<DeliverySession> {
        self.inner
            .sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| session_not_found(id))
    }

    /// Apply a navigation update and refresh the idle timer
    pub async fn update(&self, id: Uuid, update: SessionUpdate) -> DeliveryResult<DeliverySession> {
        let mut sessions = self.inner.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or_else(|| session_not_found(id))?;

        if let Some(page) = update.page {
            session.page = page;
        }
        if let Some(zoom) = update.zoom {
            if zoom.is_finite() && zoom > 0.0 {
                session.zoom = zoom.min(10.0);
            }
        }
        if let Some(rotation) = update.rotation {
            session.rotation = normalize_rotation(rotation);
        }
        session.last_seen = Utc::now();

        Ok(session.clone())
    }

    pub async fn remove(&self, id: Uuid) -> DeliveryResult<DeliverySession> {
        let session = self
            .inner
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or_else(|| session_not_found(id))?;
        tracing::debug!(session_id = %id, "Ended delivery session");
        Ok(session)
    }

    /// Drop every session viewing `document_id`
    pub async fn remove_for_document(&self, document_id: &str) -> usize {
        let mut sessions = self.inner.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.document_id != document_id);
        before - sessions.len()
    }

    /// Clean up sessions idle longer than the configured TTL
    ///
    /// Returns the number of sessions removed
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let ttl = self.inner.ttl;
        let mut sessions = self.inner.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(ttl, now));
        let count = before - sessions.len();

        if count > 0 {
            tracing::info!(count = count, "Cleaned up expired delivery sessions");
        }
        count
    }

    pub async fn count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }
}

fn session_not_found(id: Uuid) -> DeliveryError {
    DeliveryError::NotFound(format!("Session {} not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_update() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let session = manager
            .create(DeliverySession::new("doc1", DeliveryStrategy::Image))
            .await;

        let updated = manager
            .update(
                session.id,
                SessionUpdate {
                    page: Some(4),
                    zoom: Some(1.5),
                    rotation: Some(-90),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.page, 4);
        assert_eq!(updated.zoom, 1.5);
        assert_eq!(updated.rotation, 270);
        assert!(updated.last_seen >= session.last_seen);
    }

    #[tokio::test]
    async fn test_invalid_zoom_is_ignored() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let session = manager
            .create(DeliverySession::new("doc1", DeliveryStrategy::Inline))
            .await;
        let updated = manager
            .update(
                session.id,
                SessionUpdate {
                    zoom: Some(-2.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.zoom, 1.0);
    }

    #[tokio::test]
    async fn test_remove_for_document() {
        let manager = SessionManager::new(Duration::from_secs(60));
        manager.create(DeliverySession::new("a", DeliveryStrategy::Image)).await;
        manager.create(DeliverySession::new("a", DeliveryStrategy::Image)).await;
        let kept = manager.create(DeliverySession::new("b", DeliveryStrategy::Image)).await;

        assert_eq!(manager.remove_for_document("a").await, 2);
        assert_eq!(manager.count().await, 1);
        assert!(manager.get(kept.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let manager = SessionManager::new(Duration::from_secs(60));
        let mut stale = DeliverySession::new("a", DeliveryStrategy::Streaming);
        stale.last_seen = Utc::now() - chrono::Duration::seconds(120);
        let stale = manager.create(stale).await;
        let fresh = manager.create(DeliverySession::new("a", DeliveryStrategy::Streaming)).await;

        assert_eq!(manager.cleanup_expired().await, 1);
        assert!(manager.get(stale.id).await.is_err());
        assert!(manager.get(fresh.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let manager = SessionManager::new(Duration::from_secs(60));
        assert!(matches!(
            manager.remove(Uuid::new_v4()).await,
            Err(DeliveryError::NotFound(_))
        ));
    }
}
