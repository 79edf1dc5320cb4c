//! ---
//! wiki_section: "02-messaging-bus"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Address-routed bus, envelopes and codecs."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;
use wiki_common::BusConfig;

use crate::codec::CodecRegistry;
use crate::event_loop::{EventLoop, Handler, LoopSender};
use crate::logging::{log_message, BusMetrics, MessageDirection};
use crate::message::Message;
use crate::types::{Body, DeliveryOptions, Envelope, ReplyFailure};
use crate::{BusError, Result};

/// Prefix of the one-shot addresses allocated for request replies.
pub const REPLY_ADDRESS_PREFIX: &str = "__reply.";

type ReplyResult = Result<Envelope>;

struct PendingReply {
    address: String,
    started: Instant,
    tx: oneshot::Sender<ReplyResult>,
}

struct BusInner {
    routes: RwLock<HashMap<String, LoopSender>>,
    pending: Mutex<HashMap<String, PendingReply>>,
    codecs: CodecRegistry,
    metrics: BusMetrics,
    request_timeout: Duration,
    mailbox_capacity: usize,
}

/// Process-wide address-routed bus. Cloning is cheap and every clone routes
/// through the same tables.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("addresses", &self.inner.routes.read().len())
            .field("pending", &self.inner.pending.lock().len())
            .field("request_timeout", &self.inner.request_timeout)
            .finish()
    }
}

/// Removes the pending entry when a request finishes for any reason,
/// including the caller dropping the future.
struct PendingGuard<'a> {
    bus: &'a Bus,
    reply_address: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.bus.inner.pending.lock().remove(&self.reply_address);
    }
}

impl Bus {
    /// Create a bus with the given timeouts and mailbox sizing.
    pub fn new(config: &BusConfig) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(BusInner {
                routes: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                codecs: CodecRegistry::new(),
                metrics: BusMetrics::new()?,
                request_timeout: config.request_timeout,
                mailbox_capacity: config.mailbox_capacity.max(1),
            }),
        })
    }

    /// Codec table shared by every clone of this bus.
    pub fn codecs(&self) -> &CodecRegistry {
        &self.inner.codecs
    }

    /// Bus metrics.
    pub fn metrics(&self) -> &BusMetrics {
        &self.inner.metrics
    }

    /// Deadline applied to requests that do not set their own.
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Capacity of each event loop mailbox.
    pub fn mailbox_capacity(&self) -> usize {
        self.inner.mailbox_capacity
    }

    /// Whether a handler is bound to `address`.
    pub fn is_registered(&self, address: &str) -> bool {
        self.inner.routes.read().contains_key(address)
    }

    /// Number of requests still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Spawn a dedicated event loop and bind `handler` to `address` on it.
    pub fn register<H: Handler>(&self, address: impl Into<String>, handler: H) -> Result<EventLoop> {
        let address = address.into();
        let event_loop = EventLoop::spawn(self, address.clone());
        event_loop.register(address, handler)?;
        Ok(event_loop)
    }

    /// Fire-and-forget send of a JSON or empty body.
    pub fn send(&self, address: &str, body: impl Into<Body>) -> Result<()> {
        self.send_with(address, body, DeliveryOptions::default())
    }

    /// Fire-and-forget send with headers. A missing handler or a full mailbox
    /// drops the message; only malformed envelopes are reported.
    pub fn send_with(
        &self,
        address: &str,
        body: impl Into<Body>,
        options: DeliveryOptions,
    ) -> Result<()> {
        let envelope = Envelope::new(address, body.into())?.with_headers(options.headers);
        log_message(MessageDirection::Outbound, &envelope);
        self.inner.metrics.observe_sent();
        match self.dispatch(envelope) {
            Ok(()) => Ok(()),
            Err(err @ (BusError::NoHandler { .. } | BusError::MailboxFull { .. })) => {
                self.inner.metrics.observe_dropped();
                debug!(address = %address, error = %err, "send dropped");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Fire-and-forget send of a value through its registered codec.
    pub fn send_typed<T: 'static>(
        &self,
        address: &str,
        value: &T,
        options: DeliveryOptions,
    ) -> Result<()> {
        let body = self.inner.codecs.encode(value)?;
        self.send_with(address, body, options)
    }

    /// Send `body` and wait for the handler's reply.
    ///
    /// Fails immediately when nothing is bound to `address` or its mailbox
    /// is full, with [`BusError::Recipient`] when the handler calls
    /// [`Message::fail`], and with [`BusError::Timeout`] once the deadline
    /// passes. A reply arriving after the deadline is discarded.
    pub async fn request(
        &self,
        address: &str,
        body: impl Into<Body>,
        options: DeliveryOptions,
    ) -> Result<Message> {
        let timeout = options.timeout.unwrap_or(self.inner.request_timeout);
        let mut envelope = Envelope::new(address, body.into())?.with_headers(options.headers);
        let reply_address = format!("{REPLY_ADDRESS_PREFIX}{}", Uuid::new_v4().simple());
        envelope.reply_address = Some(reply_address.clone());

        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(
            reply_address.clone(),
            PendingReply {
                address: address.to_owned(),
                started: Instant::now(),
                tx,
            },
        );
        let _guard = PendingGuard {
            bus: self,
            reply_address,
        };

        log_message(MessageDirection::Outbound, &envelope);
        self.inner.metrics.observe_sent();
        if let Err(err) = self.dispatch(envelope) {
            self.inner.metrics.observe_dropped();
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply.map(|envelope| Message::new(envelope, self.clone())),
            Ok(Err(_)) => Err(BusError::Closed(address.to_owned())),
            Err(_) => {
                self.inner.metrics.observe_timeout();
                warn!(address = %address, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(BusError::Timeout {
                    address: address.to_owned(),
                    timeout,
                })
            }
        }
    }

    /// Request with a body encoded through its registered codec.
    pub async fn request_typed<T: 'static>(
        &self,
        address: &str,
        value: &T,
        options: DeliveryOptions,
    ) -> Result<Message> {
        let body = self.inner.codecs.encode(value)?;
        self.request(address, body, options).await
    }

    fn dispatch(&self, envelope: Envelope) -> Result<()> {
        let route = self.inner.routes.read().get(&envelope.address).cloned();
        let Some(route) = route else {
            return Err(BusError::NoHandler {
                address: envelope.address,
            });
        };
        route.mailbox.try_send(envelope).map_err(|err| match err {
            mpsc::error::TrySendError::Full(envelope) => BusError::MailboxFull {
                address: envelope.address,
            },
            mpsc::error::TrySendError::Closed(_) => BusError::Closed(route.name.to_string()),
        })
    }

    pub(crate) fn bind(
        &self,
        address: &str,
        make_route: impl FnOnce() -> Result<LoopSender>,
    ) -> Result<()> {
        let mut routes = self.inner.routes.write();
        if routes.contains_key(address) {
            return Err(BusError::AddressInUse {
                address: address.to_owned(),
            });
        }
        let route = make_route()?;
        routes.insert(address.to_owned(), route);
        Ok(())
    }

    pub(crate) fn unbind(&self, address: &str) {
        if self.inner.routes.write().remove(address).is_some() {
            debug!(address = %address, "address unbound");
        }
    }

    /// Hand a reply (or a recipient failure) back to the waiting requester.
    pub(crate) fn complete(&self, reply_address: &str, reply: std::result::Result<Envelope, ReplyFailure>) {
        let pending = self.inner.pending.lock().remove(reply_address);
        let Some(pending) = pending else {
            self.inner.metrics.observe_late_reply();
            debug!(reply_address = %reply_address, "late reply dropped");
            return;
        };
        self.inner.metrics.observe_latency(pending.started.elapsed());
        self.inner.metrics.observe_reply(reply.is_ok());
        if let Ok(envelope) = &reply {
            log_message(MessageDirection::Reply, envelope);
        } else {
            debug!(address = %pending.address, reply_address = %reply_address, "failure reply");
        }
        let _ = pending.tx.send(reply.map_err(BusError::from));
    }

    /// Fail the requester of an envelope that will never be handled.
    pub(crate) fn abandon(&self, envelope: Envelope, error: BusError) {
        self.inner.metrics.observe_dropped();
        debug!(address = %envelope.address, message_id = %envelope.id, error = %error, "envelope abandoned");
        if let Some(reply_address) = envelope.reply_address {
            self.fail_pending(&reply_address, error);
        }
    }

    /// Fail a requester still waiting on `reply_address`. No-op once the
    /// request was answered or timed out.
    pub(crate) fn fail_pending(&self, reply_address: &str, error: BusError) {
        if let Some(pending) = self.inner.pending.lock().remove(reply_address) {
            let _ = pending.tx.send(Err(error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::handler_fn;
    use serde_json::json;

    fn bus() -> Bus {
        Bus::new(&BusConfig::default()).expect("bus")
    }

    #[tokio::test]
    async fn request_reaches_handler_and_returns_reply() {
        let bus = bus();
        let _loop = bus
            .register(
                "echo",
                handler_fn(|message: Message| async move {
                    let body = message.body().clone();
                    message.reply(body);
                }),
            )
            .expect("register");

        let reply = bus
            .request("echo", json!({"hello": "world"}), DeliveryOptions::new())
            .await
            .expect("reply");
        assert_eq!(reply.body(), &Body::Json(json!({"hello": "world"})));
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn request_without_handler_fails_fast() {
        let bus = bus();
        let err = bus
            .request("nowhere", Body::Empty, DeliveryOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoHandler { address } if address == "nowhere"));
        assert_eq!(bus.pending_requests(), 0);
    }

    #[tokio::test]
    async fn send_without_handler_is_dropped_and_counted() {
        let bus = bus();
        bus.send("nowhere", json!(1)).expect("send is fire-and-forget");
        assert_eq!(bus.metrics().snapshot().dropped, 1);
        assert!(matches!(bus.send("", json!(1)), Err(BusError::InvalidAddress)));
    }

    #[tokio::test]
    async fn second_binding_of_a_live_address_fails() {
        let bus = bus();
        let first = bus
            .register("db", handler_fn(|_m: Message| async {}))
            .expect("first");
        let second = bus.register("db", handler_fn(|_m: Message| async {}));
        assert!(matches!(second, Err(BusError::AddressInUse { .. })));

        first.shutdown().await;
        assert!(!bus.is_registered("db"));
        bus.register("db", handler_fn(|_m: Message| async {}))
            .expect("address free after shutdown");
    }

    #[tokio::test]
    async fn handler_failure_reaches_requester() {
        let bus = bus();
        let _loop = bus
            .register(
                "db",
                handler_fn(|message: Message| async move {
                    message.fail(3, "disk on fire");
                }),
            )
            .expect("register");
        let err = bus
            .request("db", Body::Empty, DeliveryOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Recipient(ReplyFailure { code: 3, ref message }) if message == "disk on fire"));
        assert_eq!(bus.metrics().snapshot().failures, 1);
    }
}
