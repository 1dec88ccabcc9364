//! Delivery reconciliation — matches vendor lifecycle events to outbound
//! log rows and advances their status exactly once per event.
//!
//! Lookup is by vendor external id first, then a fallback to the most recent
//! pending/sent row for the recipient. The monotonic transition rule lives in
//! each UPDATE's WHERE clause, so a duplicate event against a terminal row is
//! a single no-op statement rather than a read-then-write race.

use crate::store::{sql_ts, Store};
use shamba_core::error::ShambaError;
use shamba_core::message::{LifecycleEvent, LifecycleKind};
use tracing::{debug, warn};
use uuid::Uuid;

/// What applying a lifecycle event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The row was advanced.
    Applied,
    /// A matching row exists but was already at or past the target status.
    Duplicate,
    /// No matching outbound row. Not fatal — fire-and-forget sends exist.
    Miss,
}

impl Store {
    /// Apply a delivery lifecycle event to the outbound log.
    pub async fn apply_lifecycle(
        &self,
        event: &LifecycleEvent,
    ) -> Result<ReconcileOutcome, ShambaError> {
        let Some(target) = self.find_target(event).await? else {
            warn!(
                external_id = event.external_id.as_deref().unwrap_or("-"),
                recipient = %event.recipient.as_ref().map(|p| p.to_string()).unwrap_or_default(),
                "lifecycle event matches no outbound row, dropping"
            );
            return Ok(ReconcileOutcome::Miss);
        };

        let stamp = sql_ts(&event.timestamp);
        let result = match event.kind {
            LifecycleKind::Sent => sqlx::query(
                "UPDATE outbound_messages \
                 SET status = 'sent', sent_at = ?, external_id = COALESCE(external_id, ?) \
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(&stamp)
            .bind(&event.external_id)
            .bind(target.to_string())
            .execute(self.pool())
            .await,
            LifecycleKind::Delivered => sqlx::query(
                "UPDATE outbound_messages \
                 SET status = 'delivered', delivered_at = ? \
                 WHERE id = ? AND status IN ('pending', 'sent')",
            )
            .bind(&stamp)
            .bind(target.to_string())
            .execute(self.pool())
            .await,
            LifecycleKind::Failed => sqlx::query(
                "UPDATE outbound_messages \
                 SET status = 'failed', error = ? \
                 WHERE id = ? AND status IN ('pending', 'sent')",
            )
            .bind(&event.error)
            .bind(target.to_string())
            .execute(self.pool())
            .await,
        };

        let result =
            result.map_err(|e| ShambaError::Store(format!("lifecycle update failed: {e}")))?;

        if result.rows_affected() == 0 {
            debug!(%target, kind = ?event.kind, "lifecycle event is a no-op (already terminal)");
            Ok(ReconcileOutcome::Duplicate)
        } else {
            debug!(%target, kind = ?event.kind, "lifecycle event applied");
            Ok(ReconcileOutcome::Applied)
        }
    }

    /// Resolve the outbound row an event refers to: external id first, then
    /// the most recent non-terminal row for the recipient.
    async fn find_target(&self, event: &LifecycleEvent) -> Result<Option<Uuid>, ShambaError> {
        if let Some(ext) = event.external_id.as_deref() {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT id FROM outbound_messages WHERE external_id = ?")
                    .bind(ext)
                    .fetch_optional(self.pool())
                    .await
                    .map_err(|e| ShambaError::Store(format!("lifecycle lookup failed: {e}")))?;
            if let Some((id,)) = row {
                return Ok(Uuid::parse_str(&id).ok());
            }
        }

        if let Some(recipient) = event.recipient.as_ref() {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT id FROM outbound_messages \
                 WHERE recipient = ? AND status IN ('pending', 'sent') \
                 ORDER BY created_at DESC LIMIT 1",
            )
            .bind(recipient.digits())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| ShambaError::Store(format!("lifecycle lookup failed: {e}")))?;
            if let Some((id,)) = row {
                return Ok(Uuid::parse_str(&id).ok());
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shamba_core::message::{DeliveryStatus, MessageCategory};
    use shamba_core::phone;

    fn event(kind: LifecycleKind, external_id: Option<&str>) -> LifecycleEvent {
        LifecycleEvent {
            kind,
            external_id: external_id.map(String::from),
            recipient: None,
            timestamp: Utc::now(),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_sent_then_delivered_by_external_id() {
        let store = Store::in_memory().await.unwrap();
        let phone = phone::normalize("254712345678").unwrap();
        let id = store
            .log_outbound(&phone, "maize alert", MessageCategory::Alert, None)
            .await
            .unwrap();
        store
            .record_gateway_outcome(id, true, Some("ext-1"), None)
            .await
            .unwrap();

        let outcome = store
            .apply_lifecycle(&event(LifecycleKind::Sent, Some("ext-1")))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let outcome = store
            .apply_lifecycle(&event(LifecycleKind::Delivered, Some("ext-1")))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied);

        let row = store.get_outbound(id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Delivered);
        assert!(row.sent_at.is_some());
        assert!(row.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_delivered_is_noop() {
        let store = Store::in_memory().await.unwrap();
        let phone = phone::normalize("254712345678").unwrap();
        let id = store
            .log_outbound(&phone, "hi", MessageCategory::General, None)
            .await
            .unwrap();
        store
            .record_gateway_outcome(id, true, Some("ext-2"), None)
            .await
            .unwrap();

        let delivered = event(LifecycleKind::Delivered, Some("ext-2"));
        assert_eq!(
            store.apply_lifecycle(&delivered).await.unwrap(),
            ReconcileOutcome::Applied
        );
        assert_eq!(
            store.apply_lifecycle(&delivered).await.unwrap(),
            ReconcileOutcome::Duplicate
        );

        let row = store.get_outbound(id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn test_delivered_never_resurrects_failed() {
        let store = Store::in_memory().await.unwrap();
        let phone = phone::normalize("254712345678").unwrap();
        let id = store
            .log_outbound(&phone, "hi", MessageCategory::General, None)
            .await
            .unwrap();
        store
            .record_gateway_outcome(id, false, None, Some("network timeout"))
            .await
            .unwrap();

        let mut delivered = event(LifecycleKind::Delivered, None);
        delivered.recipient = Some(phone.clone());
        // The failed row is terminal, so the recipient fallback skips it
        // entirely and the event is a miss.
        assert_eq!(
            store.apply_lifecycle(&delivered).await.unwrap(),
            ReconcileOutcome::Miss
        );

        let row = store.get_outbound(id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("network timeout"));
    }

    #[tokio::test]
    async fn test_recipient_fallback_picks_latest_pending() {
        let store = Store::in_memory().await.unwrap();
        let phone = phone::normalize("254712345678").unwrap();
        let _older = store
            .log_outbound(&phone, "first", MessageCategory::Update, None)
            .await
            .unwrap();
        let newer = store
            .log_outbound(&phone, "second", MessageCategory::Update, None)
            .await
            .unwrap();
        // Force distinct created_at ordering; sqlite datetime('now') has
        // second resolution.
        sqlx::query("UPDATE outbound_messages SET created_at = datetime('now', '-1 hour') WHERE id != ?")
            .bind(newer.to_string())
            .execute(store.pool())
            .await
            .unwrap();

        let mut ev = event(LifecycleKind::Sent, None);
        ev.recipient = Some(phone.clone());
        assert_eq!(
            store.apply_lifecycle(&ev).await.unwrap(),
            ReconcileOutcome::Applied
        );

        let row = store.get_outbound(newer).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Sent);
    }

    #[tokio::test]
    async fn test_unknown_event_is_a_miss() {
        let store = Store::in_memory().await.unwrap();
        let outcome = store
            .apply_lifecycle(&event(LifecycleKind::Delivered, Some("ghost")))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Miss);
    }
}
