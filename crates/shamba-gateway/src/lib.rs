//! # shamba-gateway
//!
//! Thin typed wrapper over the SMS vendor's HTTP API (TextBee-shaped):
//! send, bulk send, account balance, and pull-fetch of received messages.
//!
//! The client owns credentials and the base URL and converts vendor response
//! shapes into uniform outcome types. It holds no business logic: it never
//! classifies messages and never writes to the store. Send-path failures are
//! folded into [`SendOutcome`] with `accepted = false` rather than raised, so
//! callers can persist a terminal `failed` log row without retry plumbing.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use shamba_core::config::GatewayConfig;
use shamba_core::error::ShambaError;
use shamba_core::phone::PhoneNumber;
use std::time::Duration;
use tracing::{debug, warn};

/// Uniform result of a send attempt.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// Whether the vendor accepted the message (or batch) for delivery.
    pub accepted: bool,
    /// Vendor-assigned batch/message id, when accepted.
    pub external_id: Option<String>,
    /// Descriptive error when not accepted.
    pub error: Option<String>,
}

impl SendOutcome {
    fn rejected(error: String) -> Self {
        Self {
            accepted: false,
            external_id: None,
            error: Some(error),
        }
    }
}

/// A message pulled from the vendor's received-SMS list.
#[derive(Debug, Clone)]
pub struct ReceivedSms {
    pub vendor_id: String,
    pub sender: String,
    pub message: String,
    pub received_at: DateTime<Utc>,
}

// --- Vendor API types ---

#[derive(Debug, Deserialize)]
struct SendResponse {
    data: Option<SendData>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendData {
    #[serde(rename = "smsBatchId")]
    sms_batch_id: Option<String>,
    #[serde(rename = "_id")]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReceivedResponse {
    #[serde(default)]
    data: Vec<ReceivedEntry>,
}

#[derive(Debug, Deserialize)]
struct ReceivedEntry {
    #[serde(rename = "_id")]
    id: String,
    sender: Option<String>,
    message: Option<String>,
    #[serde(rename = "receivedAt")]
    received_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    data: Option<BalanceData>,
}

#[derive(Debug, Deserialize)]
struct BalanceData {
    balance: f64,
}

/// Client for the vendor gateway.
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    device_id: String,
}

impl GatewayClient {
    /// Create a client from config. All requests carry the configured timeout.
    pub fn new(config: &GatewayConfig) -> Result<Self, ShambaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ShambaError::Gateway(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            device_id: config.device_id.clone(),
        })
    }

    fn device_url(&self, endpoint: &str) -> String {
        format!("{}/gateway/devices/{}/{endpoint}", self.base_url, self.device_id)
    }

    /// Send a single SMS. Never errors — failures come back as a rejected
    /// [`SendOutcome`].
    pub async fn send_one(&self, phone: &PhoneNumber, text: &str) -> SendOutcome {
        self.post_send(&[phone.to_string()], text).await
    }

    /// Send the same text to many recipients as one vendor batch. The whole
    /// batch shares a single outcome and external id; callers that need
    /// per-recipient log rows loop [`Self::send_one`] instead.
    pub async fn send_bulk(&self, phones: &[PhoneNumber], text: &str) -> SendOutcome {
        if phones.is_empty() {
            return SendOutcome::rejected("no recipients".to_string());
        }
        let recipients: Vec<String> = phones.iter().map(|p| p.to_string()).collect();
        self.post_send(&recipients, text).await
    }

    async fn post_send(&self, recipients: &[String], text: &str) -> SendOutcome {
        let url = self.device_url("send-sms");
        let body = serde_json::json!({
            "recipients": recipients,
            "message": text,
        });

        let resp = match self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return SendOutcome::rejected(format!("send request failed: {e}")),
        };

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return SendOutcome::rejected(format!("send got {status}: {text}"));
        }

        let parsed: SendResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => return SendOutcome::rejected(format!("send response parse failed: {e}")),
        };

        if let Some(err) = parsed.error {
            return SendOutcome::rejected(format!("vendor rejected send: {err}"));
        }

        let external_id = parsed.data.and_then(|d| d.sms_batch_id.or(d.id));
        debug!(external_id = external_id.as_deref().unwrap_or("-"), "send accepted");
        SendOutcome {
            accepted: true,
            external_id,
            error: None,
        }
    }

    /// Pull the vendor's received-messages list.
    pub async fn fetch_received(
        &self,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ReceivedSms>, ShambaError> {
        let url = self.device_url("get-received-sms");
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await
            .map_err(|e| ShambaError::Gateway(format!("fetch-received request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ShambaError::Gateway(format!(
                "fetch-received got {status}: {text}"
            )));
        }

        let parsed: ReceivedResponse = resp
            .json()
            .await
            .map_err(|e| ShambaError::Gateway(format!("fetch-received parse failed: {e}")))?;

        let messages = parsed
            .data
            .into_iter()
            .filter_map(|entry| {
                let sender = entry.sender?;
                let message = entry.message?;
                Some(ReceivedSms {
                    vendor_id: entry.id,
                    sender,
                    message,
                    received_at: entry.received_at.unwrap_or_else(Utc::now),
                })
            })
            .collect::<Vec<_>>();

        if !messages.is_empty() {
            debug!(count = messages.len(), "fetched received messages");
        }
        Ok(messages)
    }

    /// Remaining sending credit at the vendor.
    pub async fn get_balance(&self) -> Result<f64, ShambaError> {
        let url = format!("{}/account/balance", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| ShambaError::Gateway(format!("balance request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ShambaError::Gateway(format!("balance got {status}: {text}")));
        }

        let parsed: BalanceResponse = resp
            .json()
            .await
            .map_err(|e| ShambaError::Gateway(format!("balance parse failed: {e}")))?;

        parsed
            .data
            .map(|d| d.balance)
            .ok_or_else(|| {
                warn!("balance response carried no data object");
                ShambaError::Gateway("balance response missing data".to_string())
            })
    }
}
