//! Outbound log — create rows on send attempts, record gateway outcomes,
//! operator-facing queries.

use super::{parse_ts, Store, REPLY_LINK_WINDOW_HOURS};
use shamba_core::error::ShambaError;
use shamba_core::message::{DeliveryStatus, MessageCategory, OutboundMessage};
use shamba_core::phone::PhoneNumber;
use std::str::FromStr;
use uuid::Uuid;

type OutboundRow = (
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    Option<String>,
);

impl Store {
    /// Insert a new `pending` outbound row for a send that is about to be
    /// attempted. Returns the log row id.
    pub async fn log_outbound(
        &self,
        recipient: &PhoneNumber,
        body: &str,
        category: MessageCategory,
        sender_id: Option<&str>,
    ) -> Result<Uuid, ShambaError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO outbound_messages (id, recipient, body, category, status, sender_id) \
             VALUES (?, ?, ?, ?, 'pending', ?)",
        )
        .bind(id.to_string())
        .bind(recipient.digits())
        .bind(body)
        .bind(category.as_str())
        .bind(sender_id)
        .execute(self.pool())
        .await
        .map_err(|e| ShambaError::Store(format!("outbound insert failed: {e}")))?;

        Ok(id)
    }

    /// Record the gateway's answer to a send attempt.
    ///
    /// An accepted send stays `pending` with its vendor id attached — the
    /// reconciler advances it when lifecycle events arrive. A rejected send
    /// is terminal `failed` immediately.
    pub async fn record_gateway_outcome(
        &self,
        id: Uuid,
        accepted: bool,
        external_id: Option<&str>,
        error: Option<&str>,
    ) -> Result<(), ShambaError> {
        let result = if accepted {
            sqlx::query(
                "UPDATE outbound_messages SET external_id = ? WHERE id = ? AND status = 'pending'",
            )
            .bind(external_id)
            .bind(id.to_string())
            .execute(self.pool())
            .await
        } else {
            sqlx::query(
                "UPDATE outbound_messages SET status = 'failed', error = ? \
                 WHERE id = ? AND status = 'pending'",
            )
            .bind(error)
            .bind(id.to_string())
            .execute(self.pool())
            .await
        };

        result.map_err(|e| ShambaError::Store(format!("outbound update failed: {e}")))?;
        Ok(())
    }

    /// Most recent outbound row to `phone` created within the reply-link
    /// window. Best-effort heuristic, not a correctness-critical join.
    pub async fn recent_outbound_to(
        &self,
        phone: &PhoneNumber,
    ) -> Result<Option<Uuid>, ShambaError> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM outbound_messages \
             WHERE recipient = ? AND datetime(created_at) > datetime('now', ? || ' hours') \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(phone.digits())
        .bind(-REPLY_LINK_WINDOW_HOURS)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| ShambaError::Store(format!("outbound query failed: {e}")))?;

        Ok(row.and_then(|(id,)| Uuid::parse_str(&id).ok()))
    }

    /// Fetch a single outbound row by id.
    pub async fn get_outbound(&self, id: Uuid) -> Result<Option<OutboundMessage>, ShambaError> {
        let row: Option<OutboundRow> = sqlx::query_as(
            "SELECT id, recipient, body, category, status, external_id, sender_id, error, \
                    created_at, sent_at, delivered_at \
             FROM outbound_messages WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| ShambaError::Store(format!("outbound query failed: {e}")))?;

        row.map(from_row).transpose()
    }

    /// Most recent outbound rows, newest first.
    pub async fn recent_outbound(&self, limit: i64) -> Result<Vec<OutboundMessage>, ShambaError> {
        let rows: Vec<OutboundRow> = sqlx::query_as(
            "SELECT id, recipient, body, category, status, external_id, sender_id, error, \
                    created_at, sent_at, delivered_at \
             FROM outbound_messages ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(|e| ShambaError::Store(format!("outbound query failed: {e}")))?;

        rows.into_iter().map(from_row).collect()
    }

    /// Row counts per delivery status, for the operator surface.
    pub async fn outbound_status_counts(&self) -> Result<Vec<(String, i64)>, ShambaError> {
        sqlx::query_as(
            "SELECT status, COUNT(*) FROM outbound_messages GROUP BY status ORDER BY status",
        )
        .fetch_all(self.pool())
        .await
        .map_err(|e| ShambaError::Store(format!("outbound stats failed: {e}")))
    }

}

fn from_row(row: OutboundRow) -> Result<OutboundMessage, ShambaError> {
    let (id, recipient, body, category, status, external_id, sender_id, error, created, sent, delivered) =
        row;
    Ok(OutboundMessage {
        id: Uuid::parse_str(&id)
            .map_err(|e| ShambaError::Store(format!("bad outbound id '{id}': {e}")))?,
        recipient: shamba_core::phone::normalize(&recipient)
            .map_err(|e| ShambaError::Store(format!("bad stored recipient: {e}")))?,
        body,
        category: MessageCategory::from_str(&category).map_err(ShambaError::Store)?,
        status: DeliveryStatus::from_str(&status).map_err(ShambaError::Store)?,
        external_id,
        sender_id,
        error,
        created_at: parse_ts(&created)?,
        sent_at: sent.as_deref().map(parse_ts).transpose()?,
        delivered_at: delivered.as_deref().map(parse_ts).transpose()?,
    })
}
