//! ---
//! wiki_section: "03-persistence-logging"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Persistence unit, page store and query templates."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as WriteLock, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};
use wiki_service::PageId;

use crate::snapshot::{load_snapshot, save_snapshot};
use crate::{Result, StoreError};

/// Stored page row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Primary key.
    pub id: PageId,
    /// Unique title.
    pub title: String,
    /// Markdown content.
    pub markdown: String,
}

/// Backing store for pages. Every call receives the statement text a SQL
/// backend would execute for it.
#[async_trait]
pub trait PageStore: Send + Sync + 'static {
    /// Prepare storage.
    async fn prepare(&self, statement: &str) -> Result<()>;
    /// Every title, in store order.
    async fn titles(&self, statement: &str) -> Result<Vec<String>>;
    /// Page with this title.
    async fn find(&self, statement: &str, title: &str) -> Result<Option<Page>>;
    /// Insert a page, returning its id.
    async fn insert(&self, statement: &str, title: &str, markdown: &str) -> Result<PageId>;
    /// Replace content; returns the number of rows touched.
    async fn update(&self, statement: &str, id: PageId, markdown: &str) -> Result<u64>;
    /// Delete by id; returns the number of rows touched.
    async fn delete(&self, statement: &str, id: PageId) -> Result<u64>;
    /// Refuse further work.
    fn close(&self);
}

#[derive(Debug, Default, Clone)]
struct Table {
    next_id: PageId,
    rows: BTreeMap<PageId, Page>,
}

impl Table {
    fn from_pages(pages: Vec<Page>) -> Self {
        let next_id = pages.iter().map(|page| page.id).max().unwrap_or(0);
        Self {
            next_id,
            rows: pages.into_iter().map(|page| (page.id, page)).collect(),
        }
    }

    fn pages(&self) -> Vec<Page> {
        self.rows.values().cloned().collect()
    }
}

/// In-process page table behind a bounded connection pool, optionally
/// persisted to a snapshot file after every change.
///
/// Changes are staged on a copy of the table and only become visible once
/// the snapshot holding them was written.
#[derive(Debug)]
pub struct MemoryStore {
    table: Mutex<Table>,
    writer: WriteLock<()>,
    pool: Arc<Semaphore>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Empty, non-persistent store with `max_pool_size` connections.
    pub fn new(max_pool_size: u32) -> Self {
        Self {
            table: Mutex::new(Table::default()),
            writer: WriteLock::new(()),
            pool: Arc::new(Semaphore::new(max_pool_size.max(1) as usize)),
            snapshot_path: None,
        }
    }

    /// Store persisted at `path`, loading any existing snapshot.
    ///
    /// An unreadable or tampered snapshot makes the store unavailable.
    pub async fn open(max_pool_size: u32, path: PathBuf) -> Result<Self> {
        let probe = path.clone();
        let pages = tokio::task::spawn_blocking(move || {
            if probe.exists() {
                load_snapshot(&probe).map(Some)
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|err| StoreError::Unavailable(err.to_string()))?
        .map_err(|err| StoreError::Unavailable(format!("{}: {err}", path.display())))?;

        let table = match pages {
            Some(pages) => {
                debug!(snapshot = %path.display(), pages = pages.len(), "page snapshot loaded");
                Table::from_pages(pages)
            }
            None => Table::default(),
        };
        Ok(Self {
            table: Mutex::new(table),
            writer: WriteLock::new(()),
            pool: Arc::new(Semaphore::new(max_pool_size.max(1) as usize)),
            snapshot_path: Some(path),
        })
    }

    /// Connections not currently in use.
    pub fn idle_connections(&self) -> usize {
        self.pool.available_permits()
    }

    async fn connection(&self, statement: &str) -> Result<OwnedSemaphorePermit> {
        let permit = self
            .pool
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::PoolClosed)?;
        trace!(statement, "executing statement");
        Ok(permit)
    }

    async fn persist(&self, table: &Table) -> Result<()> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        let pages = table.pages();
        tokio::task::spawn_blocking(move || save_snapshot(&pages, &path))
            .await
            .map_err(|err| StoreError::Io(std::io::Error::other(err)))?
    }

    /// Apply `change` to a staged copy of the table. The copy replaces the
    /// live table only when `change` reports a touched row and the snapshot
    /// was saved.
    async fn write<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut Table) -> Result<(T, bool)> + Send,
        T: Send,
    {
        let _writer = self.writer.lock().await;
        let mut staged = self.table.lock().clone();
        let (value, touched) = change(&mut staged)?;
        if touched {
            self.persist(&staged).await?;
            *self.table.lock() = staged;
        }
        Ok(value)
    }
}

#[async_trait]
impl PageStore for MemoryStore {
    async fn prepare(&self, statement: &str) -> Result<()> {
        let _conn = self.connection(statement).await?;
        Ok(())
    }

    async fn titles(&self, statement: &str) -> Result<Vec<String>> {
        let _conn = self.connection(statement).await?;
        let table = self.table.lock();
        Ok(table.rows.values().map(|page| page.title.clone()).collect())
    }

    async fn find(&self, statement: &str, title: &str) -> Result<Option<Page>> {
        let _conn = self.connection(statement).await?;
        let table = self.table.lock();
        Ok(table.rows.values().find(|page| page.title == title).cloned())
    }

    async fn insert(&self, statement: &str, title: &str, markdown: &str) -> Result<PageId> {
        let _conn = self.connection(statement).await?;
        self.write(|table| {
            if table.rows.values().any(|page| page.title == title) {
                return Err(StoreError::Constraint(format!(
                    "unique constraint violated: title '{title}' already exists"
                )));
            }
            table.next_id += 1;
            let id = table.next_id;
            table.rows.insert(
                id,
                Page {
                    id,
                    title: title.to_owned(),
                    markdown: markdown.to_owned(),
                },
            );
            Ok((id, true))
        })
        .await
    }

    async fn update(&self, statement: &str, id: PageId, markdown: &str) -> Result<u64> {
        let _conn = self.connection(statement).await?;
        self.write(|table| {
            Ok(match table.rows.get_mut(&id) {
                Some(page) => {
                    page.markdown = markdown.to_owned();
                    (1, true)
                }
                None => (0, false),
            })
        })
        .await
    }

    async fn delete(&self, statement: &str, id: PageId) -> Result<u64> {
        let _conn = self.connection(statement).await?;
        self.write(|table| {
            let removed = table.rows.remove(&id).is_some();
            Ok((u64::from(removed), removed))
        })
        .await
    }

    fn close(&self) {
        self.pool.close();
    }
}
