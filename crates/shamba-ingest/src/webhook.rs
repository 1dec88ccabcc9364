//! Webhook ingest — normalizes the vendor's payload dialects into one
//! internal event, optionally verifies the HMAC signature, and dispatches to
//! the pipeline or the reconciler.
//!
//! The vendor has shipped two body shapes over time: the current nested
//! `{"event": "message.received", "data": {...}}` and the legacy flat
//! `{"webhookEvent": "MESSAGE_RECEIVED", ...fields}`. Adding a third dialect
//! means adding one adapter here, not branching deeper in the dispatcher.

use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use shamba_core::error::ShambaError;
use shamba_core::message::{LifecycleEvent, LifecycleKind};
use shamba_core::phone;
use shamba_engine::{InboundPipeline, PipelineOutcome};
use shamba_store::{ReconcileOutcome, Store};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One normalized inbound webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum WebhookEvent {
    MessageReceived {
        sender: String,
        message: String,
        vendor_id: String,
        received_at: DateTime<Utc>,
    },
    Lifecycle(LifecycleEvent),
    /// Recognized as a webhook but not an event we process. Accepted so the
    /// vendor does not retry indefinitely.
    Unknown(String),
}

/// Body of the always-200 webhook response.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookReply {
    pub success: bool,
    pub message: String,
    /// Whether the event actually changed anything.
    pub processed: bool,
}

impl WebhookReply {
    fn ok(message: &str, processed: bool) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            processed,
        }
    }

    fn rejected(message: String) -> Self {
        Self {
            success: false,
            message,
            processed: false,
        }
    }
}

/// Parse either payload dialect into a [`WebhookEvent`].
pub fn parse_payload(body: &Value) -> Result<WebhookEvent, ShambaError> {
    // Nested dialect: {"event": "message.received", "data": {...}}.
    if let Some(event) = body.get("event").and_then(Value::as_str) {
        let data = body.get("data").unwrap_or(&Value::Null);
        return Ok(build_event(event, data));
    }

    // Legacy flat dialect: {"webhookEvent": "MESSAGE_RECEIVED", ...}.
    if let Some(event) = body.get("webhookEvent").and_then(Value::as_str) {
        return Ok(build_event(event, body));
    }

    Err(ShambaError::Webhook(
        "payload carries neither 'event' nor 'webhookEvent'".to_string(),
    ))
}

/// Canonicalize an event name: lowercased, dots and dashes to underscores.
fn canonical_event(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(['.', '-'], "_")
}

fn build_event(event: &str, fields: &Value) -> WebhookEvent {
    match canonical_event(event).as_str() {
        "message_received" | "sms_received" => WebhookEvent::MessageReceived {
            sender: first_str(fields, &["sender", "from", "phoneNumber"]).unwrap_or_default(),
            message: first_str(fields, &["message", "text", "body"]).unwrap_or_default(),
            vendor_id: first_str(fields, &["_id", "id", "messageId", "smsId"]).unwrap_or_default(),
            received_at: timestamp_of(fields),
        },
        "message_sent" => WebhookEvent::Lifecycle(lifecycle(LifecycleKind::Sent, fields)),
        "message_delivered" => WebhookEvent::Lifecycle(lifecycle(LifecycleKind::Delivered, fields)),
        "message_failed" => WebhookEvent::Lifecycle(lifecycle(LifecycleKind::Failed, fields)),
        other => WebhookEvent::Unknown(other.to_string()),
    }
}

fn lifecycle(kind: LifecycleKind, fields: &Value) -> LifecycleEvent {
    LifecycleEvent {
        kind,
        external_id: first_str(fields, &["smsBatchId", "_id", "id", "messageId"]),
        recipient: first_str(fields, &["recipient", "to", "phoneNumber"])
            .and_then(|raw| phone::normalize(&raw).ok()),
        timestamp: timestamp_of(fields),
        error: first_str(fields, &["errorMessage", "error", "failureReason"]),
    }
}

/// First present-and-string field among the candidate names.
fn first_str(fields: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| fields.get(name).and_then(Value::as_str))
        .map(str::to_string)
}

/// Event timestamp: RFC 3339 string or unix seconds, else now.
fn timestamp_of(fields: &Value) -> DateTime<Utc> {
    for name in ["timestamp", "receivedAt", "sentAt", "deliveredAt"] {
        match fields.get(name) {
            Some(Value::String(s)) => {
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return dt.with_timezone(&Utc);
                }
            }
            Some(Value::Number(n)) => {
                if let Some(secs) = n.as_i64() {
                    if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
                        return dt;
                    }
                }
            }
            _ => {}
        }
    }
    Utc::now()
}

/// Verify the vendor's HMAC-SHA256 signature over `timestamp + "." + body`.
///
/// The hex digest comparison happens inside `verify_slice`, which is
/// constant-time. Events older than `max_skew_secs` are rejected to bound
/// replay.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    signature: &str,
    raw_body: &str,
    now: DateTime<Utc>,
    max_skew_secs: u64,
) -> Result<(), ShambaError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| ShambaError::Webhook(format!("bad signature timestamp '{timestamp}'")))?;

    if (now.timestamp() - ts).unsigned_abs() > max_skew_secs {
        return Err(ShambaError::Webhook("signature timestamp outside window".to_string()));
    }

    let digest_hex = signature.trim().trim_start_matches("sha256=");
    let digest = decode_hex(digest_hex)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| ShambaError::Webhook(format!("hmac init failed: {e}")))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body.as_bytes());
    mac.verify_slice(&digest)
        .map_err(|_| ShambaError::Webhook("signature mismatch".to_string()))
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, ShambaError> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return Err(ShambaError::Webhook("malformed signature digest".to_string()));
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&raw[i..i + 2], 16)
                .map_err(|_| ShambaError::Webhook("malformed signature digest".to_string()))
        })
        .collect()
}

/// Routes verified webhook bodies to the pipeline or the reconciler.
pub struct WebhookRouter {
    pipeline: Arc<InboundPipeline>,
    store: Store,
    secret: Option<String>,
    max_skew_secs: u64,
    warned_no_secret: AtomicBool,
}

impl WebhookRouter {
    pub fn new(
        pipeline: Arc<InboundPipeline>,
        store: Store,
        secret: Option<String>,
        max_skew_secs: u64,
    ) -> Self {
        Self {
            pipeline,
            store,
            secret,
            max_skew_secs,
            warned_no_secret: AtomicBool::new(false),
        }
    }

    /// Handle one raw webhook delivery. Never errors — internal failures
    /// come back as a reply body, and the HTTP layer answers 200 regardless
    /// so the vendor does not retry-storm us.
    pub async fn handle(
        &self,
        raw_body: &str,
        timestamp: Option<&str>,
        signature: Option<&str>,
    ) -> WebhookReply {
        match &self.secret {
            Some(secret) => {
                let (Some(ts), Some(sig)) = (timestamp, signature) else {
                    return WebhookReply::rejected("missing signature headers".to_string());
                };
                if let Err(e) =
                    verify_signature(secret, ts, sig, raw_body, Utc::now(), self.max_skew_secs)
                {
                    warn!("webhook signature rejected: {e}");
                    return WebhookReply::rejected("invalid signature".to_string());
                }
            }
            None => {
                if !self.warned_no_secret.swap(true, Ordering::Relaxed) {
                    info!("no webhook secret configured, signature verification disabled");
                }
            }
        }

        let body: Value = match serde_json::from_str(raw_body) {
            Ok(v) => v,
            Err(e) => return WebhookReply::rejected(format!("invalid json: {e}")),
        };

        let event = match parse_payload(&body) {
            Ok(ev) => ev,
            Err(e) => return WebhookReply::rejected(e.to_string()),
        };

        self.dispatch(event).await
    }

    async fn dispatch(&self, event: WebhookEvent) -> WebhookReply {
        match event {
            WebhookEvent::MessageReceived {
                sender,
                message,
                vendor_id,
                received_at,
            } => {
                if vendor_id.is_empty() {
                    return WebhookReply::rejected("message event without an id".to_string());
                }
                match self
                    .pipeline
                    .process(&sender, &message, &vendor_id, &received_at)
                    .await
                {
                    Ok(PipelineOutcome::Processed(action)) => {
                        WebhookReply::ok(action.as_str(), true)
                    }
                    Ok(PipelineOutcome::Duplicate) => WebhookReply::ok("duplicate", false),
                    Ok(PipelineOutcome::Rejected(decision)) => {
                        WebhookReply::ok(decision.as_str(), false)
                    }
                    Err(e) => {
                        warn!("webhook pipeline failed: {e}");
                        WebhookReply::ok("internal error", false)
                    }
                }
            }
            WebhookEvent::Lifecycle(lifecycle_event) => {
                match self.store.apply_lifecycle(&lifecycle_event).await {
                    Ok(ReconcileOutcome::Applied) => WebhookReply::ok("status updated", true),
                    Ok(ReconcileOutcome::Duplicate) => WebhookReply::ok("already applied", false),
                    Ok(ReconcileOutcome::Miss) => WebhookReply::ok("no matching message", false),
                    Err(e) => {
                        warn!("webhook reconciliation failed: {e}");
                        WebhookReply::ok("internal error", false)
                    }
                }
            }
            WebhookEvent::Unknown(name) => {
                debug!(event = %name, "unknown webhook event accepted unprocessed");
                WebhookReply::ok(&format!("event '{name}' ignored"), false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_and_flat_dialects_agree() {
        let nested: Value = serde_json::from_str(
            r#"{
                "event": "message.received",
                "data": {
                    "_id": "m-1",
                    "sender": "+254712345678",
                    "message": "NAIROBI",
                    "receivedAt": "2026-08-20T08:30:00Z"
                }
            }"#,
        )
        .unwrap();
        let flat: Value = serde_json::from_str(
            r#"{
                "webhookEvent": "MESSAGE_RECEIVED",
                "messageId": "m-1",
                "sender": "+254712345678",
                "message": "NAIROBI",
                "receivedAt": "2026-08-20T08:30:00Z"
            }"#,
        )
        .unwrap();

        let a = parse_payload(&nested).unwrap();
        let b = parse_payload(&flat).unwrap();
        match (&a, &b) {
            (
                WebhookEvent::MessageReceived {
                    sender: s1,
                    message: m1,
                    vendor_id: v1,
                    received_at: t1,
                },
                WebhookEvent::MessageReceived {
                    sender: s2,
                    message: m2,
                    vendor_id: v2,
                    received_at: t2,
                },
            ) => {
                assert_eq!(s1, s2);
                assert_eq!(m1, m2);
                assert_eq!(v1, v2);
                assert_eq!(t1, t2);
            }
            other => panic!("expected two message events, got {other:?}"),
        }
    }

    #[test]
    fn test_lifecycle_events_parse() {
        let body: Value = serde_json::from_str(
            r#"{
                "event": "message.delivered",
                "data": {
                    "smsBatchId": "batch-1",
                    "recipient": "+254712345678",
                    "deliveredAt": "2026-08-20T08:31:00Z"
                }
            }"#,
        )
        .unwrap();
        match parse_payload(&body).unwrap() {
            WebhookEvent::Lifecycle(ev) => {
                assert_eq!(ev.kind, LifecycleKind::Delivered);
                assert_eq!(ev.external_id.as_deref(), Some("batch-1"));
                assert_eq!(
                    ev.recipient.as_ref().map(|p| p.to_string()).as_deref(),
                    Some("+254712345678")
                );
            }
            other => panic!("expected lifecycle, got {other:?}"),
        }

        let failed: Value = serde_json::from_str(
            r#"{"webhookEvent": "MESSAGE_FAILED", "messageId": "m-9", "errorMessage": "no credit"}"#,
        )
        .unwrap();
        match parse_payload(&failed).unwrap() {
            WebhookEvent::Lifecycle(ev) => {
                assert_eq!(ev.kind, LifecycleKind::Failed);
                assert_eq!(ev.error.as_deref(), Some("no credit"));
            }
            other => panic!("expected lifecycle, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_is_tolerated() {
        let body: Value =
            serde_json::from_str(r#"{"event": "device.registered", "data": {}}"#).unwrap();
        assert_eq!(
            parse_payload(&body).unwrap(),
            WebhookEvent::Unknown("device_registered".to_string())
        );
    }

    #[test]
    fn test_shapeless_payload_is_an_error() {
        let body: Value = serde_json::from_str(r#"{"hello": "world"}"#).unwrap();
        assert!(parse_payload(&body).is_err());
    }

    #[test]
    fn test_timestamp_unix_seconds() {
        let body: Value = serde_json::from_str(
            r#"{"event": "message.received", "data": {"_id": "t", "sender": "x", "message": "y", "timestamp": 1755678600}}"#,
        )
        .unwrap();
        match parse_payload(&body).unwrap() {
            WebhookEvent::MessageReceived { received_at, .. } => {
                assert_eq!(received_at.timestamp(), 1755678600);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn sign(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body.as_bytes());
        mac.finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    #[test]
    fn test_signature_round_trip() {
        let now = Utc::now();
        let ts = now.timestamp().to_string();
        let body = r#"{"event":"message.received"}"#;
        let sig = sign("topsecret", &ts, body);

        assert!(verify_signature("topsecret", &ts, &sig, body, now, 300).is_ok());
        assert!(
            verify_signature("topsecret", &ts, &format!("sha256={sig}"), body, now, 300).is_ok(),
            "prefixed digests are accepted"
        );
        assert!(verify_signature("wrong", &ts, &sig, body, now, 300).is_err());
        assert!(verify_signature("topsecret", &ts, &sig, "tampered", now, 300).is_err());
    }

    #[test]
    fn test_signature_skew_window() {
        let now = Utc::now();
        let stale = (now.timestamp() - 301).to_string();
        let body = "{}";
        let sig = sign("topsecret", &stale, body);
        assert!(verify_signature("topsecret", &stale, &sig, body, now, 300).is_err());

        let fresh = (now.timestamp() - 299).to_string();
        let sig = sign("topsecret", &fresh, body);
        assert!(verify_signature("topsecret", &fresh, &sig, body, now, 300).is_ok());
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert!(decode_hex("").is_err());
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
        assert_eq!(decode_hex("0aff").unwrap(), vec![0x0a, 0xff]);
    }
}
