//! ---
//! wiki_section: "05-exchange-rates"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Exchange-rate model, codec, fetch unit and bus client."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Optional exchange-rate unit and the [`Rates`] bus type.

pub mod client;
pub mod model;
pub mod source;
pub mod unit;

/// Failures fetching or exchanging rates.
#[derive(Debug, thiserror::Error)]
pub enum RatesError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate endpoint answered with status {0}")]
    Status(u16),
    #[error("invalid rate endpoint: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Bus(#[from] wiki_msg::BusError),
    #[error(transparent)]
    Codec(#[from] wiki_msg::CodecError),
}

pub use client::RatesClient;
pub use model::{register_codecs, Rates, RATES_CODEC};
pub use source::{HttpRateSource, RateSource};
pub use unit::{
    ExchangeRateUnit, RatesAction, RatesHandler, EXCHANGE_RATES_ADDRESS, EXCHANGE_RATES_UNIT,
};
