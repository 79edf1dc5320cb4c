//! ---
//! wiki_section: "06-http-surface"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "HTTP-facing unit serving pages over the bus."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Listening sockets shared by the replicas of one deployment.
//!
//! The first replica binds the port; the others accept on a duplicate of the
//! same socket. The entry disappears once every replica dropped its share.
//! The table below is the only process-wide state replicas have in common; it
//! holds operating-system sockets, never request or page state.
use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

static BINDINGS: Lazy<Mutex<HashMap<String, Weak<StdTcpListener>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// One replica's share of a deployment's listening socket.
#[derive(Debug, Clone)]
pub struct PortBinding {
    listener: Arc<StdTcpListener>,
    local_addr: SocketAddr,
}

impl PortBinding {
    /// Join the socket bound for `deployment_id`, binding `addr` if this is
    /// the first replica.
    pub fn acquire(deployment_id: &str, addr: SocketAddr) -> io::Result<Self> {
        let mut bindings = BINDINGS.lock();
        bindings.retain(|_, listener| listener.strong_count() > 0);
        let listener = match bindings.get(deployment_id).and_then(Weak::upgrade) {
            Some(listener) => listener,
            None => {
                let listener = StdTcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                let listener = Arc::new(listener);
                bindings.insert(deployment_id.to_owned(), Arc::downgrade(&listener));
                debug!(deployment = %deployment_id, %addr, "http port bound");
                listener
            }
        };
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Address actually bound, with the real port when 0 was configured.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Tokio listener accepting on this binding.
    pub fn tokio_listener(&self) -> io::Result<tokio::net::TcpListener> {
        let listener = self.listener.try_clone()?;
        listener.set_nonblocking(true)?;
        tokio::net::TcpListener::from_std(listener)
    }
}

/// Address bound for `deployment_id` while any of its replicas runs.
pub fn bound_address(deployment_id: &str) -> Option<SocketAddr> {
    BINDINGS
        .lock()
        .get(deployment_id)
        .and_then(Weak::upgrade)
        .and_then(|listener| listener.local_addr().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn loopback() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    #[test]
    fn replicas_of_one_deployment_share_the_port() {
        let first = PortBinding::acquire("dep-shared", loopback()).expect("first");
        let second = PortBinding::acquire("dep-shared", loopback()).expect("second");
        assert_eq!(first.local_addr(), second.local_addr());
        assert_eq!(bound_address("dep-shared"), Some(first.local_addr()));
    }

    #[test]
    fn binding_is_released_with_the_last_replica() {
        let binding = PortBinding::acquire("dep-released", loopback()).expect("bind");
        assert!(bound_address("dep-released").is_some());
        drop(binding);
        assert!(bound_address("dep-released").is_none());
    }

    #[test]
    fn occupied_port_fails_to_bind() {
        let taken = PortBinding::acquire("dep-owner", loopback()).expect("bind");
        assert!(PortBinding::acquire("dep-intruder", taken.local_addr()).is_err());
    }
}
