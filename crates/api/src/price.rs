//! External price API client.
//!
//! Any HTTPS endpoint returning a JSON body with a numeric USD price can be
//! used. The endpoint is described by a URL template and a JSON pointer to
//! the price field; both may contain `{address}` (lowercase hex) and
//! `{symbol}` placeholders.

use alloy::primitives::Address;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument};

/// Source of USD token prices.
#[async_trait]
pub trait PriceApi: Send + Sync + std::fmt::Debug {
    /// Name for logs and price-source attribution.
    fn name(&self) -> &str;

    /// Fetch the USD price of `token`.
    ///
    /// `Ok(None)` means the API answered but had no usable price.
    async fn fetch_price(&self, token: Address, symbol: &str) -> Result<Option<Decimal>>;
}

/// Endpoint description for a JSON price API.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PriceApiConfig {
    pub name: String,
    /// e.g. `https://coins.llama.fi/prices/current/ethereum:{address}`
    pub url_template: String,
    /// JSON pointer to the price field, e.g. `/coins/ethereum:{address}/price`
    pub price_pointer: String,
    /// Optional header carrying an API key.
    #[serde(default)]
    pub api_key_header: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    2_000
}

impl PriceApiConfig {
    /// DefiLlama current-price endpoint for a chain slug (e.g. `ethereum`).
    pub fn defillama(chain: &str) -> Self {
        Self {
            name: "defillama".to_string(),
            url_template: format!("https://coins.llama.fi/prices/current/{chain}:{{address}}"),
            price_pointer: format!("/coins/{chain}:{{address}}/price"),
            api_key_header: None,
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    /// CoinGecko token-price endpoint for a platform (e.g. `ethereum`).
    pub fn coingecko(platform: &str) -> Self {
        Self {
            name: "coingecko".to_string(),
            url_template: format!(
                "https://api.coingecko.com/api/v3/simple/token_price/{platform}?contract_addresses={{address}}&vs_currencies=usd"
            ),
            price_pointer: "/{address}/usd".to_string(),
            api_key_header: None,
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    fn render(template: &str, token: Address, symbol: &str) -> String {
        let address = format!("{}", token).to_lowercase();
        template
            .replace("{address}", &address)
            .replace("{symbol}", symbol)
    }
}

/// HTTP client for one configured price API.
#[derive(Clone)]
pub struct PriceApiClient {
    client: reqwest::Client,
    config: PriceApiConfig,
}

impl std::fmt::Debug for PriceApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceApiClient")
            .field("name", &self.config.name)
            .field("url_template", &self.config.url_template)
            .finish()
    }
}

impl PriceApiClient {
    pub fn new(config: PriceApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &PriceApiConfig {
        &self.config
    }
}

#[async_trait]
impl PriceApi for PriceApiClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(skip(self), fields(api = %self.config.name, token = %token))]
    async fn fetch_price(&self, token: Address, symbol: &str) -> Result<Option<Decimal>> {
        let url = PriceApiConfig::render(&self.config.url_template, token, symbol);
        let pointer = PriceApiConfig::render(&self.config.price_pointer, token, symbol);

        let mut request = self.client.get(&url);
        if let (Some(header), Some(key)) = (&self.config.api_key_header, &self.config.api_key) {
            request = request.header(header.as_str(), key.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} API error: {} - {}", self.config.name, status, body);
        }

        let body: Value = response.json().await?;
        let price = extract_price(&body, &pointer);
        debug!(price = ?price, "Price API response");
        Ok(price)
    }
}

/// Pull a positive decimal price out of a JSON body.
///
/// Accepts JSON numbers and numeric strings, including scientific notation.
pub fn extract_price(body: &Value, pointer: &str) -> Option<Decimal> {
    let price = match body.pointer(pointer)? {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }?;
    (price > Decimal::ZERO).then_some(price)
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}
