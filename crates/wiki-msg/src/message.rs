//! ---
//! wiki_section: "02-messaging-bus"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Address-routed bus, envelopes and codecs."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::bus::Bus;
use crate::codec::CodecError;
use crate::types::{Body, Envelope, Headers, ReplyFailure};
use crate::Result;

/// An envelope as seen by a handler or a requester, bound to the bus it
/// came from so it can be answered.
#[derive(Debug)]
pub struct Message {
    envelope: Envelope,
    bus: Bus,
}

impl Message {
    pub(crate) fn new(envelope: Envelope, bus: Bus) -> Self {
        Self { envelope, bus }
    }

    /// Message identifier.
    pub fn id(&self) -> Uuid {
        self.envelope.id
    }

    /// Address the message was sent to.
    pub fn address(&self) -> &str {
        &self.envelope.address
    }

    /// All headers.
    pub fn headers(&self) -> &Headers {
        &self.envelope.headers
    }

    /// Look up one header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.envelope.header(name)
    }

    /// Raw body.
    pub fn body(&self) -> &Body {
        &self.envelope.body
    }

    /// Reply address, present when the sender waits for an answer.
    pub fn reply_address(&self) -> Option<&str> {
        self.envelope.reply_address.as_deref()
    }

    /// Underlying envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Take the body out of the message.
    pub fn into_body(self) -> Body {
        self.envelope.body
    }

    /// Deserialize a JSON body. An empty body reads as JSON `null`, so
    /// `Option<T>` accepts it.
    pub fn body_json<T: DeserializeOwned>(&self) -> std::result::Result<T, CodecError> {
        match &self.envelope.body {
            Body::Json(value) => Ok(T::deserialize(value)?),
            Body::Empty => Ok(T::deserialize(&JsonValue::Null)?),
            other => Err(CodecError::UnexpectedBody {
                expected: "json",
                found: other.kind(),
            }),
        }
    }

    /// Decode an encoded body through the bus codec registry.
    pub fn body_as<T: 'static>(&self) -> std::result::Result<T, CodecError> {
        match &self.envelope.body {
            Body::Encoded { codec, bytes } => self.bus.codecs().decode(codec, bytes),
            other => Err(CodecError::UnexpectedBody {
                expected: "encoded",
                found: other.kind(),
            }),
        }
    }

    /// Answer the sender. Ignored when the sender did not ask for a reply.
    pub fn reply(self, body: impl Into<Body>) {
        let Some(reply_address) = self.envelope.reply_address else {
            debug!(address = %self.envelope.address, "reply ignored; sender expects none");
            return;
        };
        let envelope = Envelope {
            id: Uuid::new_v4(),
            address: reply_address.clone(),
            headers: Headers::new(),
            body: body.into(),
            reply_address: None,
            timestamp: Utc::now(),
        };
        self.bus.complete(&reply_address, Ok(envelope));
    }

    /// Answer with a value encoded through its registered codec.
    pub fn reply_typed<T: 'static>(self, value: &T) -> Result<()> {
        let body = self.bus.codecs().encode(value)?;
        self.reply(body);
        Ok(())
    }

    /// Answer with a failure code and text.
    pub fn fail(self, code: i32, message: impl Into<String>) {
        let Some(reply_address) = self.envelope.reply_address else {
            debug!(address = %self.envelope.address, code, "failure ignored; sender expects no reply");
            return;
        };
        self.bus
            .complete(&reply_address, Err(ReplyFailure::new(code, message)));
    }
}
