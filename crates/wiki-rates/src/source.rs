//! ---
//! wiki_section: "05-exchange-rates"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Exchange-rate model, codec, fetch unit and bus client."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;
use wiki_common::ExchangeRateConfig;

use crate::model::Rates;
use crate::RatesError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the exchange-rate unit gets its quotes from.
#[async_trait]
pub trait RateSource: Send + Sync + 'static {
    /// Fetch the latest rates.
    async fn fetch(&self) -> Result<Rates, RatesError>;
}

/// Fetches rates from an HTTP endpoint with `?base=<currency>`.
#[derive(Debug, Clone)]
pub struct HttpRateSource {
    client: Client,
    url: Url,
}

impl HttpRateSource {
    pub fn new(endpoint: &str, base: &str) -> Result<Self, RatesError> {
        let mut url = Url::parse(endpoint)?;
        url.query_pairs_mut().append_pair("base", base);
        let client = Client::builder().timeout(FETCH_TIMEOUT).build()?;
        Ok(Self { client, url })
    }

    pub fn from_config(config: &ExchangeRateConfig) -> Result<Self, RatesError> {
        Self::new(&config.endpoint, &config.base)
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch(&self) -> Result<Rates, RatesError> {
        debug!(url = %self.url, "fetching exchange rates");
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RatesError::Status(status.as_u16()));
        }
        Ok(response.json::<Rates>().await?)
    }
}
