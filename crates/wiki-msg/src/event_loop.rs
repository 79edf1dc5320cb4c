//! ---
//! wiki_section: "02-messaging-bus"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Address-routed bus, envelopes and codecs."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Single-task event loops.
//!
//! Every unit instance owns one [`EventLoop`]. All handlers registered on it
//! run on the loop's task, one message at a time in arrival order, so a
//! handler may keep plain `&mut self` state without locks.
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::bus::Bus;
use crate::logging::{log_message, MessageDirection};
use crate::message::Message;
use crate::types::Envelope;
use crate::{BusError, Result};

/// Consumer bound to one address.
#[async_trait]
pub trait Handler: Send + 'static {
    /// Process one inbound message. Replying is done through the message.
    async fn handle(&mut self, message: Message);
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

/// Wrap `f` so it can be registered as a handler.
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: FnMut(Message) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: FnMut(Message) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&mut self, message: Message) {
        (self.0)(message).await
    }
}

pub(crate) enum Control {
    Register {
        address: String,
        handler: Box<dyn Handler>,
    },
    Unregister(String),
    Stop,
}

/// Routing entry held by the bus for each bound address.
#[derive(Clone)]
pub(crate) struct LoopSender {
    pub(crate) name: Arc<str>,
    pub(crate) mailbox: mpsc::Sender<Envelope>,
}

/// Handle to a running event loop.
pub struct EventLoop {
    name: Arc<str>,
    bus: Bus,
    mailbox: mpsc::Sender<Envelope>,
    control: mpsc::UnboundedSender<Control>,
    addresses: Mutex<Vec<String>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("addresses", &*self.addresses.lock())
            .finish()
    }
}

impl EventLoop {
    /// Spawn an empty loop on the current tokio runtime.
    pub fn spawn(bus: &Bus, name: impl Into<String>) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let (mailbox, inbox) = mpsc::channel(bus.mailbox_capacity());
        let (control, controls) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(name.clone(), bus.clone(), inbox, controls));
        debug!(event_loop = %name, "event loop started");
        Self {
            name,
            bus: bus.clone(),
            mailbox,
            control,
            addresses: Mutex::new(Vec::new()),
            task: Mutex::new(Some(task)),
        }
    }

    /// Name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Addresses currently bound to this loop.
    pub fn addresses(&self) -> Vec<String> {
        self.addresses.lock().clone()
    }

    /// Bind `handler` to `address`. Fails if the address is already bound
    /// anywhere on the bus.
    pub fn register<H: Handler>(&self, address: impl Into<String>, handler: H) -> Result<()> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err(BusError::InvalidAddress);
        }
        // The handler is queued on the control channel before the route is
        // visible, so no envelope can reach the loop ahead of its handler.
        self.bus.bind(&address, || {
            self.control
                .send(Control::Register {
                    address: address.clone(),
                    handler: Box::new(handler),
                })
                .map_err(|_| BusError::Closed(self.name.to_string()))?;
            Ok(LoopSender {
                name: self.name.clone(),
                mailbox: self.mailbox.clone(),
            })
        })?;
        self.addresses.lock().push(address.clone());
        debug!(event_loop = %self.name, address = %address, "handler registered");
        Ok(())
    }

    /// Unbind `address`, returning whether this loop owned it.
    pub fn unregister(&self, address: &str) -> bool {
        let owned = {
            let mut addresses = self.addresses.lock();
            let before = addresses.len();
            addresses.retain(|a| a != address);
            before != addresses.len()
        };
        if owned {
            self.bus.unbind(address);
            let _ = self.control.send(Control::Unregister(address.to_owned()));
        }
        owned
    }

    /// Unbind every address and wait for the loop task to finish.
    pub async fn shutdown(&self) {
        let addresses = std::mem::take(&mut *self.addresses.lock());
        for address in &addresses {
            self.bus.unbind(address);
        }
        let _ = self.control.send(Control::Stop);
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(event_loop = %self.name, error = %err, "event loop task ended abnormally");
            }
        }
        debug!(event_loop = %self.name, "event loop stopped");
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        for address in self.addresses.get_mut().drain(..) {
            self.bus.unbind(&address);
        }
        let _ = self.control.send(Control::Stop);
    }
}

async fn run(
    name: Arc<str>,
    bus: Bus,
    mut inbox: mpsc::Receiver<Envelope>,
    mut controls: mpsc::UnboundedReceiver<Control>,
) {
    let mut handlers: HashMap<String, Box<dyn Handler>> = HashMap::new();
    loop {
        tokio::select! {
            biased;
            control = controls.recv() => match control {
                Some(Control::Register { address, handler }) => {
                    handlers.insert(address, handler);
                }
                Some(Control::Unregister(address)) => {
                    handlers.remove(&address);
                }
                Some(Control::Stop) | None => break,
            },
            envelope = inbox.recv() => {
                let Some(envelope) = envelope else { break };
                dispatch(&name, &bus, &mut handlers, envelope).await;
            }
        }
    }

    inbox.close();
    while let Ok(envelope) = inbox.try_recv() {
        bus.abandon(envelope, BusError::Closed(name.to_string()));
    }
}

async fn dispatch(
    name: &str,
    bus: &Bus,
    handlers: &mut HashMap<String, Box<dyn Handler>>,
    envelope: Envelope,
) {
    let Some(handler) = handlers.get_mut(&envelope.address) else {
        let address = envelope.address.clone();
        bus.abandon(envelope, BusError::NoHandler { address });
        return;
    };
    log_message(MessageDirection::Inbound, &envelope);
    bus.metrics().observe_delivered();

    let address = envelope.address.clone();
    let message_id = envelope.id;
    let reply_address = envelope.reply_address.clone();
    let message = Message::new(envelope, bus.clone());
    if AssertUnwindSafe(handler.handle(message))
        .catch_unwind()
        .await
        .is_err()
    {
        error!(
            event_loop = %name,
            address = %address,
            message_id = %message_id,
            "handler panicked; message discarded"
        );
        if let Some(reply_address) = reply_address {
            bus.fail_pending(&reply_address, BusError::HandlerPanicked { address });
        }
    }
}
