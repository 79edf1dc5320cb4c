//! ---
//! wiki_section: "03-persistence-logging"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Persistence unit, page store and query templates."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use wiki_runtime::{Unit, UnitContext, UnitError};
use wiki_service::{PageServiceFacade, DATABASE_ADDRESS};

use crate::metrics::StoreMetrics;
use crate::queries::QueryTemplates;
use crate::service::DatabaseService;
use crate::store::{MemoryStore, PageStore};

/// Identifier the persistence unit is deployed under.
pub const DATABASE_UNIT: &str = "wiki-db";

/// Unit owning the page store and binding the page service façade.
#[derive(Debug, Default)]
pub struct DatabaseUnit {
    queries: Option<Arc<QueryTemplates>>,
    store: Option<Arc<MemoryStore>>,
    metrics: Option<StoreMetrics>,
}

impl DatabaseUnit {
    /// Fresh, uninitialised unit.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Unit for DatabaseUnit {
    fn name(&self) -> &str {
        DATABASE_UNIT
    }

    async fn init(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let path = ctx.config().database.queries_resource_path.clone();
        let queries = ctx
            .execute_blocking(move || QueryTemplates::load(path.as_deref()))
            .await?
            .map_err(|err| UnitError::Configuration(format!("query templates: {err}")))?;
        self.queries = Some(Arc::new(queries));
        Ok(())
    }

    async fn start(&mut self, ctx: &UnitContext) -> Result<(), UnitError> {
        let queries = self
            .queries
            .clone()
            .ok_or_else(|| UnitError::Configuration("query templates not loaded".into()))?;
        let database = &ctx.config().database;
        let store = match &database.snapshot_path {
            Some(path) => MemoryStore::open(database.max_pool_size, path.clone())
                .await
                .map_err(|err| UnitError::Connection(err.to_string()))?,
            None => MemoryStore::new(database.max_pool_size),
        };
        let store = Arc::new(store);

        let service = DatabaseService::new(store.clone(), queries);
        service
            .prepare()
            .await
            .map_err(|err| UnitError::Connection(err.to_string()))?;

        // No await past this point: a start deadline cannot strand the
        // registration.
        let metrics = StoreMetrics::register(ctx.bus().metrics().registry())
            .map_err(|err| UnitError::Other(err.to_string()))?;
        let service = service.with_metrics(metrics.clone());
        if let Err(err) = ctx.register(DATABASE_ADDRESS, PageServiceFacade::new(service)) {
            metrics.unregister();
            return Err(err);
        }

        info!(
            address = DATABASE_ADDRESS,
            max_pool_size = database.max_pool_size,
            persistent = database.snapshot_path.is_some(),
            "page store ready"
        );
        self.store = Some(store);
        self.metrics = Some(metrics);
        Ok(())
    }

    async fn stop(&mut self, _ctx: &UnitContext) -> Result<(), UnitError> {
        if let Some(store) = self.store.take() {
            store.close();
        }
        if let Some(metrics) = self.metrics.take() {
            metrics.unregister();
        }
        Ok(())
    }
}
