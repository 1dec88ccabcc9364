//! Price platform client backing the reply engine's lookups.

use async_trait::async_trait;
use serde::Deserialize;
use shamba_core::config::PricesConfig;
use shamba_core::error::ShambaError;
use shamba_engine::PriceProvider;
use std::time::Duration;

/// Fetches current market prices from the platform's price API and formats
/// them into an SMS-sized reply.
pub struct HttpPriceProvider {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    crop: String,
    price: f64,
    unit: String,
}

#[derive(Debug, Deserialize)]
struct PricesResponse {
    #[serde(default)]
    prices: Vec<PriceEntry>,
}

impl HttpPriceProvider {
    pub fn new(config: &PricesConfig) -> Result<Self, ShambaError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ShambaError::Prices(format!("failed to build http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Keep replies to a handful of crops so they fit a few SMS segments.
const MAX_CROPS_PER_REPLY: usize = 6;

fn format_prices(location: &str, prices: &[PriceEntry]) -> String {
    let mut lines = vec![format!("{} prices today (KES):", location.to_uppercase())];
    for entry in prices.iter().take(MAX_CROPS_PER_REPLY) {
        lines.push(format!("{}: {:.0}/{}", entry.crop, entry.price, entry.unit));
    }
    lines.join("\n")
}

#[async_trait]
impl PriceProvider for HttpPriceProvider {
    async fn prices_for(&self, location: &str) -> Result<Option<String>, ShambaError> {
        let url = format!("{}/prices/{location}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ShambaError::Prices(format!("price request failed: {e}")))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(ShambaError::Prices(format!(
                "price api returned {}",
                resp.status()
            )));
        }

        let body: PricesResponse = resp
            .json()
            .await
            .map_err(|e| ShambaError::Prices(format!("bad price response: {e}")))?;

        if body.prices.is_empty() {
            return Ok(None);
        }
        Ok(Some(format_prices(location, &body.prices)))
    }
}

/// Stand-in provider for deployments without a price API configured. Every
/// lookup answers "no data yet".
pub struct NoPriceData;

#[async_trait]
impl PriceProvider for NoPriceData {
    async fn prices_for(&self, _location: &str) -> Result<Option<String>, ShambaError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prices_caps_crop_count() {
        let prices: Vec<PriceEntry> = (0..10)
            .map(|i| PriceEntry {
                crop: format!("crop{i}"),
                price: 100.0 + i as f64,
                unit: "kg".to_string(),
            })
            .collect();

        let text = format_prices("nakuru", &prices);
        assert!(text.starts_with("NAKURU prices today"));
        assert_eq!(text.lines().count(), 1 + MAX_CROPS_PER_REPLY);
    }

    #[test]
    fn test_format_prices_rounds_to_whole_shillings() {
        let prices = vec![PriceEntry {
            crop: "maize".to_string(),
            price: 54.6,
            unit: "kg".to_string(),
        }];
        assert!(format_prices("nairobi", &prices).contains("maize: 55/kg"));
    }
}
