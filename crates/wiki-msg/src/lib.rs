//! ---
//! wiki_section: "02-messaging-bus"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Address-routed bus, envelopes and codecs."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! In-process message bus.
//!
//! Units never hold references to each other. They bind handlers to string
//! addresses on a shared [`Bus`] and talk through fire-and-forget
//! [`Bus::send`] or correlated [`Bus::request`]. Payloads that are not plain
//! JSON cross the bus as bytes produced by a codec from the
//! [`CodecRegistry`], so call sites stay the same if a unit later moves out
//! of process.
#![warn(missing_docs)]

use std::time::Duration;

pub mod bus;
pub mod codec;
pub mod event_loop;
pub mod logging;
pub mod message;
pub mod types;

/// Shared result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors raised by the bus itself, as opposed to failures a handler reports.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Envelopes must name a destination.
    #[error("address must not be empty")]
    InvalidAddress,
    /// Nothing is bound to the destination address.
    #[error("no handler registered for address '{address}'")]
    NoHandler {
        /// Destination that had no handler.
        address: String,
    },
    /// The address already has a live handler.
    #[error("address '{address}' already has a registered handler")]
    AddressInUse {
        /// Address that was requested twice.
        address: String,
    },
    /// The reply did not arrive before the deadline.
    #[error("request to '{address}' timed out after {timeout:?}")]
    Timeout {
        /// Destination of the request.
        address: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The destination mailbox is at capacity.
    #[error("mailbox for '{address}' is full")]
    MailboxFull {
        /// Destination whose mailbox rejected the message.
        address: String,
    },
    /// The handler answered with a failure.
    #[error(transparent)]
    Recipient(#[from] types::ReplyFailure),
    /// A payload could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] codec::CodecError),
    /// The handler panicked before answering.
    #[error("handler for '{address}' panicked")]
    HandlerPanicked {
        /// Address whose handler panicked.
        address: String,
    },
    /// The event loop behind an address stopped before answering.
    #[error("event loop '{0}' is closed")]
    Closed(String),
    /// Bus metrics could not be registered.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub use bus::{Bus, REPLY_ADDRESS_PREFIX};
pub use codec::{CodecError, CodecRegistry, JsonFrameCodec, MessageCodec, FRAME_HEADER_LEN};
pub use event_loop::{handler_fn, EventLoop, Handler, HandlerFn};
pub use logging::{log_message, BusMetrics, BusStats, MessageDirection};
pub use message::Message;
pub use types::{Body, DeliveryOptions, Envelope, Headers, ReplyFailure};
