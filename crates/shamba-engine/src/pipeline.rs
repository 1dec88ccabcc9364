//! The shared inbound pipeline: classify → persist → conversation touch →
//! command engine. Both the webhook router and the polling loop feed through
//! here, and the inbound table's unique vendor id is the single idempotency
//! guard between them.

use crate::command::{CommandAction, CommandEngine};
use crate::conversation::ConversationStore;
use chrono::{DateTime, Utc};
use shamba_core::classify::{self, Decision};
use shamba_core::config::ClassifierConfig;
use shamba_core::error::ShambaError;
use shamba_core::message::Direction;
use shamba_core::phone::{self, PhoneNumber};
use shamba_store::Store;
use std::sync::Arc;
use tracing::debug;

/// What the pipeline did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Classifier rejected it; nothing reached the command engine.
    Rejected(Decision),
    /// The vendor id was already processed through either ingest path.
    Duplicate,
    /// Accepted and handled; the command engine took this action.
    Processed(CommandAction),
}

/// Classify → store → command pipeline shared by both ingest paths.
pub struct InboundPipeline {
    self_number: PhoneNumber,
    system_senders: Vec<String>,
    system_keywords: Vec<String>,
    store: Store,
    conversations: Arc<ConversationStore>,
    engine: CommandEngine,
}

impl InboundPipeline {
    pub fn new(
        classifier: &ClassifierConfig,
        store: Store,
        conversations: Arc<ConversationStore>,
        engine: CommandEngine,
    ) -> Result<Self, ShambaError> {
        let self_number = phone::normalize(&classifier.self_number).map_err(|_| {
            ShambaError::Config(
                "classifier.self_number must be a valid phone number".to_string(),
            )
        })?;

        Ok(Self {
            self_number,
            system_senders: classifier.system_senders.clone(),
            system_keywords: classifier.system_keywords.clone(),
            store,
            conversations: Arc::clone(&conversations),
            engine,
        })
    }

    /// Run one inbound message through the full pipeline.
    pub async fn process(
        &self,
        sender: &str,
        text: &str,
        vendor_id: &str,
        received_at: &DateTime<Utc>,
    ) -> Result<PipelineOutcome, ShambaError> {
        let decision = classify::classify(
            &self.self_number,
            sender,
            text,
            &self.system_senders,
            &self.system_keywords,
        );

        if decision != Decision::Accept {
            debug!(sender, vendor_id, decision = decision.as_str(), "inbound rejected");
            // Rejected messages from real phones are still persisted
            // (accepted = 0) so reprocessing stays cheap; noise from
            // alphanumeric senders is dropped outright.
            if let Ok(from) = phone::normalize(sender) {
                self.store
                    .insert_inbound(vendor_id, &from, text, false, received_at)
                    .await?;
            }
            return Ok(PipelineOutcome::Rejected(decision));
        }

        // classify() only accepts senders that normalize.
        let from = phone::normalize(sender)?;

        let Some(inbound_id) = self
            .store
            .insert_inbound(vendor_id, &from, text, true, received_at)
            .await?
        else {
            debug!(vendor_id, "inbound already processed, skipping");
            return Ok(PipelineOutcome::Duplicate);
        };

        // Best-effort link to the outbound message this replies to.
        if let Some(outbound_id) = self.store.recent_outbound_to(&from).await? {
            self.store.link_reply_to(inbound_id, outbound_id).await?;
        }

        self.conversations.touch(&from, text, Direction::Incoming);

        let action = self.engine.handle(&from, text).await?;
        Ok(PipelineOutcome::Processed(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::PriceProvider;
    use crate::outbox::{Outbox, SmsSender};
    use async_trait::async_trait;
    use shamba_core::message::MessageCategory;
    use shamba_gateway::SendOutcome;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every send; accepts or rejects per the `accept` flag.
    struct MockSender {
        sent: Mutex<Vec<(PhoneNumber, String)>>,
        accept: bool,
    }

    impl MockSender {
        fn accepting() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                accept: true,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                accept: false,
            })
        }

        fn sent(&self) -> Vec<(PhoneNumber, String)> {
            self.sent.lock().unwrap().clone()
        }

        fn outcome(&self) -> SendOutcome {
            if self.accept {
                SendOutcome {
                    accepted: true,
                    external_id: Some(format!("mock-{}", self.sent.lock().unwrap().len())),
                    error: None,
                }
            } else {
                SendOutcome {
                    accepted: false,
                    external_id: None,
                    error: Some("mock gateway down".to_string()),
                }
            }
        }
    }

    #[async_trait]
    impl SmsSender for MockSender {
        async fn send(&self, phone: &PhoneNumber, text: &str) -> SendOutcome {
            self.sent
                .lock()
                .unwrap()
                .push((phone.clone(), text.to_string()));
            self.outcome()
        }

        async fn send_many(&self, phones: &[PhoneNumber], text: &str) -> SendOutcome {
            for phone in phones {
                self.sent
                    .lock()
                    .unwrap()
                    .push((phone.clone(), text.to_string()));
            }
            self.outcome()
        }
    }

    /// Knows Nairobi, errors on "broken", otherwise no data.
    struct MockPrices;

    #[async_trait]
    impl PriceProvider for MockPrices {
        async fn prices_for(&self, location: &str) -> Result<Option<String>, ShambaError> {
            match location {
                "nairobi" => Ok(Some(
                    "NAIROBI today: Maize 4,200 KES/90kg, Beans 8,100 KES/90kg".to_string(),
                )),
                "broken" => Err(ShambaError::Prices("feed offline".to_string())),
                _ => Ok(None),
            }
        }
    }

    async fn build_pipeline(
        sender: Arc<MockSender>,
    ) -> (InboundPipeline, Store, Arc<ConversationStore>) {
        let store = Store::in_memory().await.unwrap();
        let conversations = Arc::new(ConversationStore::new());
        let outbox = Outbox::new(
            store.clone(),
            sender,
            Some("dev-test".to_string()),
            Duration::from_millis(0),
        );
        let engine = CommandEngine::new(
            store.clone(),
            outbox,
            Arc::new(MockPrices),
            Arc::clone(&conversations),
        );
        let classifier = ClassifierConfig {
            self_number: "254700000001".to_string(),
            ..Default::default()
        };
        let pipeline = InboundPipeline::new(
            &classifier,
            store.clone(),
            Arc::clone(&conversations),
            engine,
        )
        .unwrap();
        (pipeline, store, conversations)
    }

    #[tokio::test]
    async fn test_location_query_sends_prices() {
        let sender = MockSender::accepting();
        let (pipeline, _store, conversations) = build_pipeline(Arc::clone(&sender)).await;

        let outcome = pipeline
            .process("254712345678", "NAIROBI", "v-1", &Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Processed(CommandAction::PricesSent)
        );

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Maize 4,200"));
        assert!(
            sent[0].1.contains("Reply JOIN"),
            "non-subscriber gets the upsell"
        );

        let phone = phone::normalize("254712345678").unwrap();
        let ctx = conversations.get(&phone).unwrap();
        assert_eq!(ctx.last_message.as_deref(), Some("NAIROBI"));
        assert!(ctx.last_reply.as_deref().unwrap().contains("Maize"));
        assert_eq!(ctx.message_count, 2);
    }

    #[tokio::test]
    async fn test_unknown_text_mentions_help() {
        let sender = MockSender::accepting();
        let (pipeline, _store, _conversations) = build_pipeline(Arc::clone(&sender)).await;

        let outcome = pipeline
            .process("254712345678", "ZZZ", "v-2", &Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Processed(CommandAction::UnknownMessage)
        );
        assert!(sender.sent()[0].1.contains("HELP"));
    }

    #[tokio::test]
    async fn test_unmatched_location_not_found() {
        let sender = MockSender::accepting();
        let (pipeline, _store, _conversations) = build_pipeline(Arc::clone(&sender)).await;

        let outcome = pipeline
            .process("254712345678", "kisumu", "v-3", &Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Processed(CommandAction::LocationNotFound)
        );
        assert!(sender.sent()[0].1.contains("No price data for KISUMU"));
    }

    #[tokio::test]
    async fn test_unroutable_sender_is_rejected_not_an_error() {
        let sender = MockSender::accepting();
        let (pipeline, store, _conversations) = build_pipeline(Arc::clone(&sender)).await;

        // Digit-leading carrier noise that is neither a short code nor a
        // subscriber number must classify out, never error out.
        let outcome = pipeline
            .process("7123456789012", "NAIROBI", "v-noise", &Utc::now())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PipelineOutcome::Rejected(Decision::MalformedSender)
        );
        assert!(sender.sent().is_empty(), "no reply to unroutable senders");
        assert!(
            !store.inbound_exists("v-noise").await.unwrap(),
            "nothing to persist without a normalizable phone"
        );
    }

    #[tokio::test]
    async fn test_same_vendor_id_processed_once() {
        let sender = MockSender::accepting();
        let (pipeline, _store, _conversations) = build_pipeline(Arc::clone(&sender)).await;

        // First via "webhook", second via "polling" — same vendor id.
        let first = pipeline
            .process("254712345678", "HELP", "dup-1", &Utc::now())
            .await
            .unwrap();
        let second = pipeline
            .process("254712345678", "HELP", "dup-1", &Utc::now())
            .await
            .unwrap();

        assert_eq!(first, PipelineOutcome::Processed(CommandAction::HelpSent));
        assert_eq!(second, PipelineOutcome::Duplicate);
        assert_eq!(sender.sent().len(), 1, "reply goes out at most once");
    }

    #[tokio::test]
    async fn test_stop_then_join_leaves_active_with_two_replies() {
        let sender = MockSender::accepting();
        let (pipeline, store, _conversations) = build_pipeline(Arc::clone(&sender)).await;
        let phone = phone::normalize("254712345678").unwrap();

        store.activate_subscription(&phone, None).await.unwrap();

        let stop = pipeline
            .process("254712345678", "STOP", "s-1", &Utc::now())
            .await
            .unwrap();
        let join = pipeline
            .process("254712345678", "JOIN", "s-2", &Utc::now())
            .await
            .unwrap();

        assert_eq!(stop, PipelineOutcome::Processed(CommandAction::Unsubscribed));
        assert_eq!(join, PipelineOutcome::Processed(CommandAction::Subscribed));
        assert!(store.is_subscribed(&phone).await.unwrap());
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_inbound_never_reaches_engine() {
        let sender = MockSender::accepting();
        let (pipeline, store, conversations) = build_pipeline(Arc::clone(&sender)).await;

        let spam = pipeline
            .process(
                "254712345678",
                "URGENT send money to claim your prize",
                "r-1",
                &Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(spam, PipelineOutcome::Rejected(Decision::Spam));

        let self_loop = pipeline
            .process("254700000001", "NAIROBI", "r-2", &Utc::now())
            .await
            .unwrap();
        assert_eq!(self_loop, PipelineOutcome::Rejected(Decision::SelfLoop));

        let short_code = pipeline
            .process("40404", "NAIROBI", "r-3", &Utc::now())
            .await
            .unwrap();
        assert_eq!(
            short_code,
            PipelineOutcome::Rejected(Decision::ShortCodeSender)
        );

        assert!(sender.sent().is_empty());
        assert!(conversations.is_empty());
        // The spam from a real phone is still on record, unaccepted.
        assert!(store.inbound_exists("r-1").await.unwrap());
        let (accepted, rejected) = store.inbound_counts().await.unwrap();
        assert_eq!(accepted, 0);
        assert!(rejected >= 2);
    }

    #[tokio::test]
    async fn test_reply_send_failure_keeps_subscription() {
        let sender = MockSender::failing();
        let (pipeline, store, _conversations) = build_pipeline(Arc::clone(&sender)).await;
        let phone = phone::normalize("254712345678").unwrap();

        let outcome = pipeline
            .process("254712345678", "JOIN", "f-1", &Utc::now())
            .await
            .unwrap();

        // The gateway rejected the confirmation, but the subscription write
        // stays applied and the action is still reported.
        assert_eq!(outcome, PipelineOutcome::Processed(CommandAction::Subscribed));
        assert!(store.is_subscribed(&phone).await.unwrap());

        let recent = store.recent_outbound(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(
            recent[0].status,
            shamba_core::message::DeliveryStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_inbound_links_to_recent_outbound() {
        let sender = MockSender::accepting();
        let (pipeline, store, _conversations) = build_pipeline(Arc::clone(&sender)).await;
        let phone = phone::normalize("254712345678").unwrap();

        let alert_id = store
            .log_outbound(&phone, "Maize price alert", MessageCategory::Alert, None)
            .await
            .unwrap();

        pipeline
            .process("254712345678", "asante", "l-1", &Utc::now())
            .await
            .unwrap();

        let row: (Option<String>,) =
            sqlx::query_as("SELECT reply_to FROM inbound_messages WHERE vendor_id = 'l-1'")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(row.0.as_deref(), Some(alert_id.to_string().as_str()));
    }
}
