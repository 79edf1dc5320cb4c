//! ---
//! wiki_section: "05-exchange-rates"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Exchange-rate model, codec, fetch unit and bus client."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use wiki_msg::{CodecError, CodecRegistry, JsonFrameCodec};

/// Name the [`Rates`] codec is registered under.
pub const RATES_CODEC: &str = "rates";

/// Exchange rates quoted against one base currency.
///
/// Unknown fields in upstream payloads are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rates {
    pub base: String,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub rates: BTreeMap<String, Decimal>,
}

impl Rates {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            date: None,
            rates: BTreeMap::new(),
        }
    }

    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn with_rate(mut self, currency: impl Into<String>, rate: Decimal) -> Self {
        self.rates.insert(currency.into(), rate);
        self
    }

    /// Rate for `currency`, if quoted.
    pub fn rate(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }
}

/// Register the codecs for the exchange-rate types. Already registered
/// codecs are left in place.
pub fn register_codecs(registry: &CodecRegistry) -> Result<(), CodecError> {
    if registry.codec_name_for::<Rates>().is_some() {
        return Ok(());
    }
    registry.register(JsonFrameCodec::<Rates>::new(RATES_CODEC))
}
