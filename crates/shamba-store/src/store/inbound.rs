//! Inbound log — idempotent inserts keyed by vendor message id.

use super::{sql_ts, Store};
use chrono::{DateTime, Utc};
use shamba_core::error::ShambaError;
use shamba_core::phone::PhoneNumber;
use uuid::Uuid;

impl Store {
    /// Insert an inbound message if its vendor id has not been seen before.
    ///
    /// Returns `Some(row_id)` when the row was newly inserted, `None` when
    /// the vendor id already exists. The unique index makes this
    /// check-then-set a single atomic statement, which is what lets the
    /// webhook and polling paths race safely.
    pub async fn insert_inbound(
        &self,
        vendor_id: &str,
        sender: &PhoneNumber,
        body: &str,
        accepted: bool,
        received_at: &DateTime<Utc>,
    ) -> Result<Option<Uuid>, ShambaError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO inbound_messages \
             (id, vendor_id, sender, body, accepted, received_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(vendor_id)
        .bind(sender.digits())
        .bind(body)
        .bind(accepted)
        .bind(sql_ts(received_at))
        .execute(self.pool())
        .await
        .map_err(|e| ShambaError::Store(format!("inbound insert failed: {e}")))?;

        Ok((result.rows_affected() > 0).then_some(id))
    }

    /// Attach the best-effort reply-to link resolved at ingest time.
    pub async fn link_reply_to(
        &self,
        inbound_id: Uuid,
        outbound_id: Uuid,
    ) -> Result<(), ShambaError> {
        sqlx::query("UPDATE inbound_messages SET reply_to = ? WHERE id = ?")
            .bind(outbound_id.to_string())
            .bind(inbound_id.to_string())
            .execute(self.pool())
            .await
            .map_err(|e| ShambaError::Store(format!("reply link failed: {e}")))?;
        Ok(())
    }

    /// Whether a vendor message id has already been ingested.
    pub async fn inbound_exists(&self, vendor_id: &str) -> Result<bool, ShambaError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT id FROM inbound_messages WHERE vendor_id = ?")
                .bind(vendor_id)
                .fetch_optional(self.pool())
                .await
                .map_err(|e| ShambaError::Store(format!("inbound query failed: {e}")))?;
        Ok(row.is_some())
    }

    /// Count of inbound rows, split by accepted flag.
    pub async fn inbound_counts(&self) -> Result<(i64, i64), ShambaError> {
        let (accepted,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM inbound_messages WHERE accepted = 1")
                .fetch_one(self.pool())
                .await
                .map_err(|e| ShambaError::Store(format!("inbound stats failed: {e}")))?;
        let (rejected,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM inbound_messages WHERE accepted = 0")
                .fetch_one(self.pool())
                .await
                .map_err(|e| ShambaError::Store(format!("inbound stats failed: {e}")))?;
        Ok((accepted, rejected))
    }
}
