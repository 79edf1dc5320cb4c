//! ---
//! wiki_section: "02-messaging-bus"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Address-routed bus, envelopes and codecs."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{BusError, Result};

/// Small string headers carried next to the body, e.g. `action`.
pub type Headers = BTreeMap<String, String>;

/// Payload carried by an envelope.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Body {
    /// No payload, used for acknowledgements and parameterless requests.
    #[default]
    Empty,
    /// Natively representable JSON value.
    Json(JsonValue),
    /// Custom type that went through a registered codec.
    Encoded {
        /// Name of the codec that produced the bytes.
        codec: String,
        /// Encoded frame.
        bytes: Bytes,
    },
}

impl Body {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Empty => "empty",
            Body::Json(_) => "json",
            Body::Encoded { .. } => "encoded",
        }
    }

    /// Whether the body carries nothing.
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty | Body::Json(JsonValue::Null))
    }
}

impl From<JsonValue> for Body {
    fn from(value: JsonValue) -> Self {
        Body::Json(value)
    }
}

impl From<()> for Body {
    fn from(_: ()) -> Self {
        Body::Empty
    }
}

/// Unit of transfer on the bus.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Unique identifier for tracing.
    pub id: Uuid,
    /// Destination address.
    pub address: String,
    /// Delivery headers.
    pub headers: Headers,
    /// Payload.
    pub body: Body,
    /// Where the handler's answer goes, present only for requests.
    pub reply_address: Option<String>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    /// Build an envelope for `address`, rejecting empty addresses.
    pub fn new(address: impl Into<String>, body: Body) -> Result<Self> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(BusError::InvalidAddress);
        }
        Ok(Self {
            id: Uuid::new_v4(),
            address,
            headers: Headers::new(),
            body,
            reply_address: None,
            timestamp: Utc::now(),
        })
    }

    /// Replace the headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Look up a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Per-call delivery settings.
#[derive(Debug, Clone, Default)]
pub struct DeliveryOptions {
    /// Headers copied onto the envelope.
    pub headers: Headers,
    /// Request deadline; the bus default applies when unset.
    pub timeout: Option<Duration>,
}

impl DeliveryOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Failure reported by a handler instead of a reply body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("recipient failure ({code}): {message}")]
pub struct ReplyFailure {
    /// Application-defined failure code.
    pub code: i32,
    /// Human readable cause.
    pub message: String,
}

impl ReplyFailure {
    /// Construct a failure.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_address_is_rejected() {
        assert!(matches!(
            Envelope::new("  ", Body::Empty),
            Err(BusError::InvalidAddress)
        ));
    }

    #[test]
    fn envelope_headers_are_queryable() {
        let envelope = Envelope::new("wiki.database", Body::Empty)
            .expect("valid address")
            .with_headers(DeliveryOptions::new().with_header("action", "all-pages").headers);
        assert_eq!(envelope.header("action"), Some("all-pages"));
        assert_eq!(envelope.header("missing"), None);
        assert!(envelope.reply_address.is_none());
    }

    #[test]
    fn null_json_counts_as_empty() {
        assert!(Body::from(JsonValue::Null).is_empty());
        assert!(Body::from(()).is_empty());
        assert!(!Body::from(serde_json::json!({"page": "Home"})).is_empty());
    }
}
