//! ---
//! wiki_section: "03-persistence-logging"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Persistence unit, page store and query templates."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, warn};
use wiki_service::{Action, PageId, PageLookup, PageService, SavePage, ServiceError};

use crate::metrics::StoreMetrics;
use crate::queries::{QueryTemplates, SqlQuery};
use crate::store::PageStore;
use crate::StoreError;

/// Local [`PageService`] running each operation against the page store.
#[derive(Clone)]
pub struct DatabaseService {
    store: Arc<dyn PageStore>,
    queries: Arc<QueryTemplates>,
    metrics: Option<StoreMetrics>,
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("metrics", &self.metrics.is_some())
            .finish_non_exhaustive()
    }
}

impl DatabaseService {
    /// Service over `store` using `queries` for statement text.
    pub fn new(store: Arc<dyn PageStore>, queries: Arc<QueryTemplates>) -> Self {
        Self {
            store,
            queries,
            metrics: None,
        }
    }

    /// Record operation counts and latency.
    pub fn with_metrics(mut self, metrics: StoreMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Run the table preparation statement.
    pub async fn prepare(&self) -> Result<(), StoreError> {
        self.store
            .prepare(self.queries.get(SqlQuery::CreatePagesTable))
            .await
    }

    fn statement(&self, query: SqlQuery) -> &str {
        self.queries.get(query)
    }

    async fn observed<T, F>(&self, action: Action, operation: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, StoreError>> + Send,
        T: Send,
    {
        let started = Instant::now();
        let result = operation.await;
        if let Some(metrics) = &self.metrics {
            metrics.observe(action.as_ref(), result.is_ok(), started.elapsed());
        }
        result.map_err(|err| {
            warn!(action = %action, error = %err, "store operation failed");
            ServiceError::Store(err.to_string())
        })
    }
}

#[async_trait]
impl PageService for DatabaseService {
    async fn all_pages(&self) -> Result<Vec<String>, ServiceError> {
        let mut titles = self
            .observed(
                Action::AllPages,
                self.store.titles(self.statement(SqlQuery::AllPages)),
            )
            .await?;
        titles.sort();
        Ok(titles)
    }

    async fn get_page(&self, title: &str) -> Result<PageLookup, ServiceError> {
        let page = self
            .observed(
                Action::GetPage,
                self.store.find(self.statement(SqlQuery::GetPage), title),
            )
            .await?;
        Ok(match page {
            Some(page) => PageLookup::found(page.id, page.markdown),
            None => PageLookup::missing(),
        })
    }

    async fn create_page(&self, title: &str, markdown: &str) -> Result<(), ServiceError> {
        let id = self
            .observed(
                Action::CreatePage,
                self.store
                    .insert(self.statement(SqlQuery::CreatePage), title, markdown),
            )
            .await?;
        debug!(page = %title, id, "page created");
        Ok(())
    }

    async fn save_page(&self, request: SavePage) -> Result<(), ServiceError> {
        match request {
            SavePage::Insert { title, markdown } => {
                let id = self
                    .observed(
                        Action::SavePage,
                        self.store
                            .insert(self.statement(SqlQuery::CreatePage), &title, &markdown),
                    )
                    .await?;
                debug!(page = %title, id, "page inserted");
            }
            SavePage::Update { id, markdown } => {
                let touched = self
                    .observed(
                        Action::SavePage,
                        self.store
                            .update(self.statement(SqlQuery::SavePage), id, &markdown),
                    )
                    .await?;
                debug!(id, touched, "page updated");
            }
        }
        Ok(())
    }

    async fn delete_page(&self, id: PageId) -> Result<(), ServiceError> {
        let touched = self
            .observed(
                Action::DeletePage,
                self.store.delete(self.statement(SqlQuery::DeletePage), id),
            )
            .await?;
        debug!(id, touched, "page deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn service() -> DatabaseService {
        DatabaseService::new(
            Arc::new(MemoryStore::new(4)),
            Arc::new(QueryTemplates::bundled().expect("queries")),
        )
    }

    #[tokio::test]
    async fn titles_come_back_sorted() {
        let service = service();
        service.create_page("Zebra", "z").await.expect("zebra");
        service.create_page("Apple", "a").await.expect("apple");
        assert_eq!(
            service.all_pages().await.expect("list"),
            vec!["Apple".to_owned(), "Zebra".to_owned()]
        );
    }

    #[tokio::test]
    async fn duplicate_title_reports_the_store_cause() {
        let service = service();
        service.create_page("Home", "a").await.expect("first");
        let err = service.create_page("Home", "b").await.unwrap_err();
        assert!(matches!(err, ServiceError::Store(ref cause) if cause.contains("'Home' already exists")));
    }

    #[tokio::test]
    async fn update_of_a_missing_id_is_acknowledged() {
        let service = service();
        service
            .save_page(SavePage::Update {
                id: 42,
                markdown: "nothing here".into(),
            })
            .await
            .expect("zero-row update is not an error");
        service.delete_page(42).await.expect("zero-row delete");
    }
}
