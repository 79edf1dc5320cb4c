//! ---
//! wiki_section: "05-exchange-rates"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Exchange-rate model, codec, fetch unit and bus client."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Single owner of the latest exchange rates.
//!
//! The unit fetches once during start and keeps the result on its event
//! loop. Other units pull it on demand with `latest-rates`. With a refresh
//! interval configured, a background task fetches again and hands the
//! result to the loop as a fire-and-forget `update-rates` message, so the
//! rates are only ever touched by the loop.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::{AsRefStr, Display, EnumString};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wiki_msg::{Body, Bus, DeliveryOptions, Handler, Message};
use wiki_runtime::{Unit, UnitContext, UnitError};
use wiki_service::{ServiceError, ACTION_HEADER};

use crate::model::{register_codecs, Rates};
use crate::source::{HttpRateSource, RateSource};

/// Identifier the exchange-rate unit is deployed under.
pub const EXCHANGE_RATES_UNIT: &str = "wiki-rates";

/// Address the exchange-rate unit answers on.
pub const EXCHANGE_RATES_ADDRESS: &str = "wiki.exchange-rates";

/// Operations behind [`EXCHANGE_RATES_ADDRESS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum RatesAction {
    /// Reply with the current rates, or an empty body before the first fetch.
    LatestRates,
    /// Replace the current rates with the encoded body.
    UpdateRates,
}

/// Unit fetching exchange rates and serving them over the bus.
#[derive(Default)]
pub struct ExchangeRateUnit {
    source: Option<Arc<dyn RateSource>>,
    refresh: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ExchangeRateUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeRateUnit")
            .field("source", &self.source.is_some())
            .field("refreshing", &self.refresh.is_some())
            .finish()
    }
}

impl ExchangeRateUnit {
    /// Unit fetching from the configured HTTP endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit fetching from `source` instead of the configured endpoint.
    pub fn with_source(source: Arc<dyn RateSource>) -> Self {
        Self {
            source: Some(source),
            refresh: None,
        }
    }
}

#[async_trait]
impl Unit for ExchangeRateUnit {
    fn name(&self) -> &str {
        EXCHANGE_RATES_UNIT
    }

    async fn init(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        register_codecs(ctx.bus().codecs())
            .map_err(|err| UnitError::Configuration(format!("rates codec: {err}")))?;
        if self.source.is_none() {
            let source = HttpRateSource::from_config(&ctx.config().exchange_rates)
                .map_err(|err| UnitError::Configuration(err.to_string()))?;
            self.source = Some(Arc::new(source));
        }
        Ok(())
    }

    async fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let source = self
            .source
            .clone()
            .ok_or_else(|| UnitError::Configuration("rate source not initialised".into()))?;
        let rates = source.fetch().await.map_err(|err| {
            warn!(error = %err, "cannot fetch exchange rates");
            UnitError::Connection(err.to_string())
        })?;
        info!(
            address = EXCHANGE_RATES_ADDRESS,
            base = %rates.base,
            currencies = rates.rates.len(),
            "exchange rates loaded"
        );
        ctx.register(EXCHANGE_RATES_ADDRESS, RatesHandler::new(Some(rates)))?;

        if let Some(interval) = ctx.config().exchange_rates.refresh_interval {
            self.refresh = Some(tokio::spawn(refresh_loop(
                ctx.bus().clone(),
                source,
                interval,
            )));
        }
        Ok(())
    }

    async fn stop(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        if let Some(task) = self.refresh.take() {
            task.abort();
        }
        Ok(())
    }
}

async fn refresh_loop(bus: Bus, source: Arc<dyn RateSource>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match source.fetch().await {
            Ok(rates) => {
                let options = DeliveryOptions::new()
                    .with_header(ACTION_HEADER, RatesAction::UpdateRates.as_ref());
                if let Err(err) = bus.send_typed(EXCHANGE_RATES_ADDRESS, &rates, options) {
                    warn!(error = %err, "cannot publish refreshed rates");
                }
            }
            Err(err) => warn!(error = %err, "exchange rate refresh failed; keeping previous rates"),
        }
    }
}

/// Handler owning the current rates on the unit's event loop.
#[derive(Debug, Default)]
pub struct RatesHandler {
    current: Option<Rates>,
}

impl RatesHandler {
    pub fn new(current: Option<Rates>) -> Self {
        Self { current }
    }

    fn dispatch(&mut self, message: &Message) -> Result<Option<Body>, ServiceError> {
        let action = match message.header(ACTION_HEADER) {
            None => return Err(ServiceError::NoActionSpecified),
            Some(raw) => raw
                .parse::<RatesAction>()
                .map_err(|_| ServiceError::BadAction(raw.to_owned()))?,
        };
        match action {
            RatesAction::LatestRates => Ok(None),
            RatesAction::UpdateRates => {
                let rates: Rates = message
                    .body_as()
                    .map_err(|err| ServiceError::InvalidRequest(err.to_string()))?;
                debug!(base = %rates.base, date = ?rates.date, "exchange rates replaced");
                self.current = Some(rates);
                Ok(Some(Body::Empty))
            }
        }
    }
}

#[async_trait]
impl Handler for RatesHandler {
    async fn handle(&mut self, message: Message) {
        match self.dispatch(&message) {
            Ok(Some(body)) => message.reply(body),
            Ok(None) => match &self.current {
                Some(rates) => {
                    if let Err(err) = message.reply_typed(rates) {
                        warn!(error = %err, "cannot encode exchange rates");
                    }
                }
                None => message.reply(Body::Empty),
            },
            Err(err) => {
                let failure = err.to_failure();
                warn!(code = failure.code, error = %failure.message, "exchange rate request failed");
                message.fail(failure.code, failure.message);
            }
        }
    }
}
