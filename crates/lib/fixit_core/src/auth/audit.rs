//! Best-effort audit trail.
//!
//! A failed append is logged and swallowed: the operation being audited has
//! already committed and must not fail because of its audit entry.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

use super::AuthError;
use super::store::TokenStore;
use crate::models::auth::{AuditAction, AuditEntry, ClientContext};

/// Builds audit entries and appends them to the token store.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn TokenStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Append an entry. Never fails.
    pub async fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.store.append_audit(&entry).await {
            warn!(
                action = %entry.action,
                target = ?entry.target_user_id,
                error = %e,
                "audit append failed"
            );
        }
    }

    /// Build and append an entry stamped with the current time.
    pub async fn event(
        &self,
        action: AuditAction,
        actor: Option<Uuid>,
        target: Option<Uuid>,
        client: &ClientContext,
        metadata: Value,
    ) {
        self.record(entry(action, actor, target, client, metadata))
            .await;
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<AuditEntry>, AuthError> {
        self.store.recent_audit(limit).await
    }
}

/// Build an audit entry. `metadata` of `null` becomes `{}`.
pub fn entry(
    action: AuditAction,
    actor: Option<Uuid>,
    target: Option<Uuid>,
    client: &ClientContext,
    metadata: Value,
) -> AuditEntry {
    AuditEntry {
        actor_user_id: actor,
        target_user_id: target,
        action,
        metadata: if metadata.is_null() { json!({}) } else { metadata },
        ip: client.ip.clone(),
        user_agent: client.user_agent.clone(),
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::memory::MemoryTokenStore;

    #[tokio::test]
    async fn failed_append_is_swallowed() {
        let store = Arc::new(MemoryTokenStore::new());
        let log = AuditLog::new(store.clone());
        store.fail_audit_appends(true).await;

        log.event(
            AuditAction::Login,
            None,
            Some(Uuid::new_v4()),
            &ClientContext::default(),
            Value::Null,
        )
        .await;

        store.fail_audit_appends(false).await;
        assert!(log.recent(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entries_carry_client_context() {
        let store = Arc::new(MemoryTokenStore::new());
        let log = AuditLog::new(store);
        let client = ClientContext {
            user_agent: Some("curl/8".into()),
            ip: Some("203.0.113.7".into()),
        };
        log.event(AuditAction::Logout, None, None, &client, Value::Null)
            .await;

        let recent = log.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(recent[0].user_agent.as_deref(), Some("curl/8"));
        assert_eq!(recent[0].metadata, json!({}));
    }
}
