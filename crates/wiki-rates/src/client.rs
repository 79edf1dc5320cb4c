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

use wiki_msg::{Body, Bus, DeliveryOptions};
use wiki_service::ACTION_HEADER;

use crate::model::Rates;
use crate::unit::{RatesAction, EXCHANGE_RATES_ADDRESS};
use crate::RatesError;

/// Pulls the latest rates from the exchange-rate unit.
#[derive(Debug, Clone)]
pub struct RatesClient {
    bus: Bus,
    timeout: Option<Duration>,
}

impl RatesClient {
    pub fn new(bus: Bus) -> Self {
        Self { bus, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Latest rates, or `None` when the unit has none yet.
    pub async fn latest(&self) -> Result<Option<Rates>, RatesError> {
        let mut options =
            DeliveryOptions::new().with_header(ACTION_HEADER, RatesAction::LatestRates.as_ref());
        options.timeout = self.timeout;
        let reply = self
            .bus
            .request(EXCHANGE_RATES_ADDRESS, Body::Empty, options)
            .await?;
        if reply.body().is_empty() {
            return Ok(None);
        }
        Ok(Some(reply.body_as::<Rates>()?))
    }

    /// Whether an exchange-rate unit is deployed on this bus.
    pub fn is_available(&self) -> bool {
        self.bus.is_registered(EXCHANGE_RATES_ADDRESS)
    }
}
