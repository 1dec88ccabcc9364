//! Logged sends — every outbound SMS leaves a `pending` log row before the
//! gateway call and absorbs the gateway's verdict afterwards, so the
//! reconciler has something to match lifecycle events against.

use async_trait::async_trait;
use shamba_core::error::ShambaError;
use shamba_core::message::MessageCategory;
use shamba_core::phone::PhoneNumber;
use shamba_gateway::{GatewayClient, SendOutcome};
use shamba_store::Store;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// Seam over the gateway's send operations, so tests can substitute a mock.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone: &PhoneNumber, text: &str) -> SendOutcome;

    /// One vendor batch call for many recipients.
    async fn send_many(&self, phones: &[PhoneNumber], text: &str) -> SendOutcome;
}

#[async_trait]
impl SmsSender for GatewayClient {
    async fn send(&self, phone: &PhoneNumber, text: &str) -> SendOutcome {
        self.send_one(phone, text).await
    }

    async fn send_many(&self, phones: &[PhoneNumber], text: &str) -> SendOutcome {
        self.send_bulk(phones, text).await
    }
}

/// Result of a bulk logged send, for operator-facing payloads.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct BulkSendReport {
    pub sent: usize,
    pub failed: usize,
}

/// Sends SMS through the gateway with log-row bookkeeping on either side.
pub struct Outbox {
    store: Store,
    sender: Arc<dyn SmsSender>,
    /// Operator id recorded on log rows, when configured.
    operator_id: Option<String>,
    /// Blocking pause between recipients in a bulk send.
    bulk_delay: std::time::Duration,
}

impl Outbox {
    pub fn new(
        store: Store,
        sender: Arc<dyn SmsSender>,
        operator_id: Option<String>,
        bulk_delay: std::time::Duration,
    ) -> Self {
        Self {
            store,
            sender,
            operator_id,
            bulk_delay,
        }
    }

    /// Log, send, and record the outcome. Returns the log row id and whether
    /// the gateway accepted. Gateway failures are recorded as terminal
    /// `failed` rows, never propagated — resending is the caller's business.
    pub async fn send_logged(
        &self,
        phone: &PhoneNumber,
        text: &str,
        category: MessageCategory,
    ) -> Result<(Uuid, SendOutcome), ShambaError> {
        let id = self
            .store
            .log_outbound(phone, text, category, self.operator_id.as_deref())
            .await?;

        let outcome = self.sender.send(phone, text).await;

        self.store
            .record_gateway_outcome(
                id,
                outcome.accepted,
                outcome.external_id.as_deref(),
                outcome.error.as_deref(),
            )
            .await?;

        if !outcome.accepted {
            warn!(
                %phone,
                error = outcome.error.as_deref().unwrap_or("-"),
                "send rejected, logged as failed"
            );
        }

        Ok((id, outcome))
    }

    /// Send the same text to many recipients, one logged send each. Partial
    /// failure is normal and reported as counts, never as an error.
    pub async fn send_bulk_logged(
        &self,
        phones: &[PhoneNumber],
        text: &str,
        category: MessageCategory,
    ) -> Result<BulkSendReport, ShambaError> {
        let mut sent = 0;
        let mut failed = 0;
        for (i, phone) in phones.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.bulk_delay).await;
            }
            let (_, outcome) = self.send_logged(phone, text, category).await?;
            if outcome.accepted {
                sent += 1;
            } else {
                failed += 1;
            }
        }
        Ok(BulkSendReport { sent, failed })
    }

    /// Send one alert to many recipients as a single vendor batch.
    ///
    /// Each recipient still gets its own `pending` log row, but without an
    /// external id (the batch shares one, and external ids are unique per
    /// row) — the reconciler matches their lifecycle events through the
    /// recipient-recency fallback instead. On batch rejection every row is
    /// marked failed.
    pub async fn broadcast_logged(
        &self,
        phones: &[PhoneNumber],
        text: &str,
        category: MessageCategory,
    ) -> Result<BulkSendReport, ShambaError> {
        if phones.is_empty() {
            return Ok(BulkSendReport { sent: 0, failed: 0 });
        }

        let mut ids = Vec::with_capacity(phones.len());
        for phone in phones {
            let id = self
                .store
                .log_outbound(phone, text, category, self.operator_id.as_deref())
                .await?;
            ids.push(id);
        }

        let outcome = self.sender.send_many(phones, text).await;

        for id in &ids {
            self.store
                .record_gateway_outcome(*id, outcome.accepted, None, outcome.error.as_deref())
                .await?;
        }

        if outcome.accepted {
            Ok(BulkSendReport {
                sent: phones.len(),
                failed: 0,
            })
        } else {
            warn!(
                error = outcome.error.as_deref().unwrap_or("-"),
                recipients = phones.len(),
                "broadcast rejected, all rows logged as failed"
            );
            Ok(BulkSendReport {
                sent: 0,
                failed: phones.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shamba_core::message::DeliveryStatus;
    use shamba_core::phone;
    use std::sync::Mutex;
    use std::time::Duration;

    struct RecordingSender {
        sent: Mutex<Vec<String>>,
        accept: bool,
    }

    #[async_trait]
    impl SmsSender for RecordingSender {
        async fn send(&self, phone: &PhoneNumber, _text: &str) -> SendOutcome {
            self.sent.lock().unwrap().push(phone.to_string());
            if self.accept {
                SendOutcome {
                    accepted: true,
                    external_id: Some(format!("v-{}", self.sent.lock().unwrap().len())),
                    error: None,
                }
            } else {
                SendOutcome {
                    accepted: false,
                    external_id: None,
                    error: Some("device offline".to_string()),
                }
            }
        }

        async fn send_many(&self, phones: &[PhoneNumber], _text: &str) -> SendOutcome {
            let mut sent = self.sent.lock().unwrap();
            for phone in phones {
                sent.push(phone.to_string());
            }
            if self.accept {
                SendOutcome {
                    accepted: true,
                    external_id: Some("batch-1".to_string()),
                    error: None,
                }
            } else {
                SendOutcome {
                    accepted: false,
                    external_id: None,
                    error: Some("device offline".to_string()),
                }
            }
        }
    }

    async fn outbox_with(accept: bool) -> (Outbox, Store) {
        let store = Store::in_memory().await.unwrap();
        let sender = Arc::new(RecordingSender {
            sent: Mutex::new(Vec::new()),
            accept,
        });
        let outbox = Outbox::new(
            store.clone(),
            sender,
            Some("op-test".to_string()),
            Duration::ZERO,
        );
        (outbox, store)
    }

    #[tokio::test]
    async fn test_accepted_send_logs_pending_with_external_id() {
        let (outbox, store) = outbox_with(true).await;
        let phone = phone::normalize("254712345678").unwrap();

        let (id, outcome) = outbox
            .send_logged(&phone, "hello", MessageCategory::General)
            .await
            .unwrap();
        assert!(outcome.accepted);

        let row = store.get_outbound(id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Pending);
        assert_eq!(row.external_id.as_deref(), Some("v-1"));
        assert_eq!(row.sender_id.as_deref(), Some("op-test"));
    }

    #[tokio::test]
    async fn test_rejected_send_is_logged_failed_not_an_error() {
        let (outbox, store) = outbox_with(false).await;
        let phone = phone::normalize("254712345678").unwrap();

        let (id, outcome) = outbox
            .send_logged(&phone, "hello", MessageCategory::Alert)
            .await
            .unwrap();
        assert!(!outcome.accepted);

        let row = store.get_outbound(id).await.unwrap().unwrap();
        assert_eq!(row.status, DeliveryStatus::Failed);
        assert_eq!(row.error.as_deref(), Some("device offline"));
    }

    #[tokio::test]
    async fn test_bulk_reports_counts() {
        let (outbox, _store) = outbox_with(true).await;
        let phones = vec![
            phone::normalize("254712345678").unwrap(),
            phone::normalize("254722000111").unwrap(),
        ];

        let report = outbox
            .send_bulk_logged(&phones, "market update", MessageCategory::Update)
            .await
            .unwrap();
        assert_eq!(report.sent, 2);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_rejected_broadcast_fails_every_row() {
        let (outbox, store) = outbox_with(false).await;
        let phones = vec![
            phone::normalize("254712345678").unwrap(),
            phone::normalize("254722000111").unwrap(),
        ];

        let report = outbox
            .broadcast_logged(&phones, "frost alert", MessageCategory::Alert)
            .await
            .unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 2);

        let counts = store.outbound_status_counts().await.unwrap();
        assert!(counts.contains(&("failed".to_string(), 2)));
    }

    #[tokio::test]
    async fn test_broadcast_rows_carry_no_external_id() {
        let (outbox, store) = outbox_with(true).await;
        let phones = vec![
            phone::normalize("254712345678").unwrap(),
            phone::normalize("254722000111").unwrap(),
        ];

        outbox
            .broadcast_logged(&phones, "rain outlook", MessageCategory::Weather)
            .await
            .unwrap();

        for row in store.recent_outbound(10).await.unwrap() {
            assert!(row.external_id.is_none(), "batch id is not unique per row");
            assert_eq!(row.status, DeliveryStatus::Pending);
        }
    }
}
