//! ---
//! wiki_section: "03-persistence-logging"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Persistence unit, page store and query templates."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Statement templates loaded from a `.properties` file.
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use strum::{AsRefStr, EnumIter, IntoEnumIterator};
use tracing::debug;

use crate::{Result, StoreError};

/// Query file shipped with the crate, used when no path is configured.
pub const DEFAULT_QUERIES: &str = include_str!("../resources/db-queries.properties");

/// One statement per store operation. The kebab-case name is the key in the
/// properties file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum SqlQuery {
    /// Prepare the pages table.
    CreatePagesTable,
    /// Select every title.
    AllPages,
    /// Select id and content by title.
    GetPage,
    /// Insert title and content.
    CreatePage,
    /// Update content by id.
    SavePage,
    /// Delete by id.
    DeletePage,
}

/// Loaded statement text for every [`SqlQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplates {
    statements: HashMap<SqlQuery, String>,
}

impl QueryTemplates {
    /// Templates from the bundled query file.
    pub fn bundled() -> Result<Self> {
        Self::parse(DEFAULT_QUERIES)
    }

    /// Read templates from `path`, or the bundled file when `None`.
    ///
    /// This does blocking file I/O.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                debug!(queries = %path.display(), "loading query templates");
                Self::parse(&fs::read_to_string(path)?)
            }
            None => Self::bundled(),
        }
    }

    /// Parse properties text. Every [`SqlQuery`] key must be present.
    pub fn parse(text: &str) -> Result<Self> {
        let properties = parse_properties(text);
        let statements = SqlQuery::iter()
            .map(|query| {
                properties
                    .get(query.as_ref())
                    .filter(|statement| !statement.is_empty())
                    .map(|statement| (query, statement.clone()))
                    .ok_or_else(|| StoreError::MissingQuery(query.as_ref().to_owned()))
            })
            .collect::<Result<HashMap<_, _>>>()?;
        Ok(Self { statements })
    }

    /// Statement text for `query`.
    pub fn get(&self, query: SqlQuery) -> &str {
        self.statements
            .get(&query)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// Minimal `.properties` reader: `key=value` or `key: value`, `#` and `!`
/// comments, trailing backslash continues a line.
fn parse_properties(text: &str) -> HashMap<String, String> {
    let mut properties = HashMap::new();
    let mut pending = String::new();
    for raw in text.lines() {
        let line = raw.trim();
        if pending.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
            continue;
        }
        if let Some(stripped) = line.strip_suffix('\\') {
            pending.push_str(stripped);
            continue;
        }
        pending.push_str(line);
        let logical = std::mem::take(&mut pending);
        if let Some(index) = logical.find(['=', ':']) {
            let (key, value) = logical.split_at(index);
            properties.insert(key.trim().to_owned(), value[1..].trim().to_owned());
        }
    }
    properties
}
