//! Price-alert subscriptions, keyed by normalized phone.

use super::Store;
use shamba_core::error::ShambaError;
use shamba_core::phone::PhoneNumber;

impl Store {
    /// Activate (or create) a subscription. Idempotent — JOIN after JOIN
    /// just refreshes `updated_at`.
    pub async fn activate_subscription(
        &self,
        phone: &PhoneNumber,
        crop: Option<&str>,
    ) -> Result<(), ShambaError> {
        sqlx::query(
            "INSERT INTO subscriptions (phone, active, crop) VALUES (?, 1, ?) \
             ON CONFLICT(phone) DO UPDATE SET \
                 active = 1, \
                 crop = COALESCE(excluded.crop, crop), \
                 updated_at = datetime('now')",
        )
        .bind(phone.digits())
        .bind(crop)
        .execute(self.pool())
        .await
        .map_err(|e| ShambaError::Store(format!("subscription activate failed: {e}")))?;
        Ok(())
    }

    /// Deactivate a subscription. A STOP from an unknown phone is a no-op.
    pub async fn deactivate_subscription(&self, phone: &PhoneNumber) -> Result<(), ShambaError> {
        sqlx::query(
            "UPDATE subscriptions SET active = 0, updated_at = datetime('now') WHERE phone = ?",
        )
        .bind(phone.digits())
        .execute(self.pool())
        .await
        .map_err(|e| ShambaError::Store(format!("subscription deactivate failed: {e}")))?;
        Ok(())
    }

    /// Whether the phone has an active subscription.
    pub async fn is_subscribed(&self, phone: &PhoneNumber) -> Result<bool, ShambaError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT active FROM subscriptions WHERE phone = ?")
                .bind(phone.digits())
                .fetch_optional(self.pool())
                .await
                .map_err(|e| ShambaError::Store(format!("subscription query failed: {e}")))?;
        Ok(row.is_some_and(|(active,)| active != 0))
    }

    /// All active subscriber phones, for bulk alert sends.
    pub async fn active_subscriptions(&self) -> Result<Vec<PhoneNumber>, ShambaError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT phone FROM subscriptions WHERE active = 1 ORDER BY phone")
                .fetch_all(self.pool())
                .await
                .map_err(|e| ShambaError::Store(format!("subscription query failed: {e}")))?;

        rows.into_iter()
            .map(|(p,)| {
                shamba_core::phone::normalize(&p)
                    .map_err(|e| ShambaError::Store(format!("bad stored phone: {e}")))
            })
            .collect()
    }
}
