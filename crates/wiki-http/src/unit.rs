//! ---
//! wiki_section: "06-http-surface"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "HTTP-facing unit serving pages over the bus."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use wiki_rates::RatesClient;
use wiki_runtime::{Unit, UnitContext, UnitError};
use wiki_service::PageServiceProxy;

use crate::binding::PortBinding;
use crate::routes::{router, HttpState};

/// Identifier the HTTP unit is deployed under.
pub const HTTP_UNIT: &str = "wiki-http";

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One running HTTP server replica.
#[derive(Debug)]
struct HttpServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<std::io::Result<()>>,
    _binding: PortBinding,
}

impl HttpServer {
    async fn shutdown(mut self) -> Result<(), UnitError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(join)) => Err(UnitError::Other(format!("http server task failed: {join}"))),
            Err(_) => {
                warn!(address = %self.addr, "http server did not drain in time; aborting");
                self.task.abort();
                Ok(())
            }
        }
    }
}

/// Thin HTTP-facing unit. Every replica serves the same port and talks to
/// the page service only through its own proxy.
#[derive(Debug, Default)]
pub struct HttpUnit {
    server: Option<HttpServer>,
}

impl HttpUnit {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Unit for HttpUnit {
    fn name(&self) -> &str {
        HTTP_UNIT
    }

    async fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let configured = ctx.config().http.listen_addr();
        let binding = PortBinding::acquire(ctx.deployment_id(), configured).map_err(|err| {
            error!(address = %configured, error = %err, "cannot bind http listener");
            UnitError::Io(err)
        })?;
        let listener = binding.tokio_listener()?;
        let addr = binding.local_addr();

        let bus = ctx.bus().clone();
        let state = Arc::new(HttpState::new(
            PageServiceProxy::new(bus.clone()),
            RatesClient::new(bus.clone()),
            bus.metrics().registry().clone(),
        ));
        let app = router(state);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let replica = ctx.replica();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .inspect_err(|err| {
                    error!(address = %addr, replica, error = %err, "http server exited with error")
                })
        });

        info!(address = %addr, replica, replicas = ctx.replicas(), "http server listening");
        self.server = Some(HttpServer {
            addr,
            shutdown: Some(shutdown_tx),
            task,
            _binding: binding,
        });
        Ok(())
    }

    async fn stop(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        match self.server.take() {
            Some(server) => server.shutdown().await,
            None => Ok(()),
        }
    }
}
