//! ---
//! wiki_section: "03-services"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Page service contract, action facade and bus proxy."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! Request and reply bodies exchanged with the page service.
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};

use crate::ServiceError;

/// Page primary key.
pub type PageId = i64;

/// Reply to `get-page`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLookup {
    /// Whether a page with the title exists.
    pub found: bool,
    /// Page id when found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PageId>,
    /// Stored markdown when found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

impl PageLookup {
    /// Lookup result for a title with no page.
    pub fn missing() -> Self {
        Self::default()
    }

    /// Lookup result for an existing page.
    pub fn found(id: PageId, raw_content: impl Into<String>) -> Self {
        Self {
            found: true,
            id: Some(id),
            raw_content: Some(raw_content.into()),
        }
    }
}

/// What `save-page` should do. The variant follows the caller's `newPage`
/// flag and is not checked against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavePage {
    /// Insert a new page.
    Insert {
        /// Unique title.
        title: String,
        /// Markdown content.
        markdown: String,
    },
    /// Replace the content of an existing page.
    Update {
        /// Page id.
        id: PageId,
        /// Markdown content.
        markdown: String,
    },
}

/// Body of `get-page`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetPageRequest {
    /// Title to look up.
    pub page: String,
}

/// Body of `create-page`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePageRequest {
    /// Unique title.
    pub title: String,
    /// Markdown content.
    pub markdown: String,
}

/// Body of `save-page` as it travels on the bus.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePageRequest {
    /// Page id, required for updates.
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PageId>,
    /// Title, required for inserts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Markdown content.
    pub markdown: String,
    /// Caller's claim that the page does not exist yet.
    #[serde(default)]
    pub new_page: bool,
}

impl From<SavePage> for SavePageRequest {
    fn from(save: SavePage) -> Self {
        match save {
            SavePage::Insert { title, markdown } => Self {
                id: None,
                title: Some(title),
                markdown,
                new_page: true,
            },
            SavePage::Update { id, markdown } => Self {
                id: Some(id),
                title: None,
                markdown,
                new_page: false,
            },
        }
    }
}

impl TryFrom<SavePageRequest> for SavePage {
    type Error = ServiceError;

    fn try_from(request: SavePageRequest) -> Result<Self, Self::Error> {
        if request.new_page {
            let title = request.title.ok_or_else(|| {
                ServiceError::InvalidRequest("newPage requires a title".into())
            })?;
            Ok(SavePage::Insert {
                title,
                markdown: request.markdown,
            })
        } else {
            let id = request
                .id
                .ok_or_else(|| ServiceError::InvalidRequest("update requires an id".into()))?;
            Ok(SavePage::Update {
                id,
                markdown: request.markdown,
            })
        }
    }
}

/// Body of `delete-page`.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePageRequest {
    /// Page id.
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: PageId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_accepted_as_numbers_or_numeric_strings() {
        let numeric: DeletePageRequest = serde_json::from_value(json!({"id": 7})).expect("number");
        let text: DeletePageRequest = serde_json::from_value(json!({"id": "7"})).expect("string");
        assert_eq!(numeric, text);
        assert!(serde_json::from_value::<DeletePageRequest>(json!({"id": "seven"})).is_err());
    }

    #[test]
    fn save_branches_on_the_new_page_flag() {
        let insert: SavePageRequest = serde_json::from_value(
            json!({"title": "Home", "markdown": "# Home", "newPage": true}),
        )
        .expect("insert body");
        assert_eq!(
            SavePage::try_from(insert).expect("insert"),
            SavePage::Insert {
                title: "Home".into(),
                markdown: "# Home".into()
            }
        );

        let update: SavePageRequest =
            serde_json::from_value(json!({"id": "3", "title": "Home", "markdown": "new"}))
                .expect("update body");
        assert_eq!(
            SavePage::try_from(update).expect("update"),
            SavePage::Update {
                id: 3,
                markdown: "new".into()
            }
        );
    }

    #[test]
    fn update_without_id_is_invalid() {
        let request: SavePageRequest =
            serde_json::from_value(json!({"markdown": "x"})).expect("body");
        assert!(matches!(
            SavePage::try_from(request),
            Err(ServiceError::InvalidRequest(_))
        ));
    }

    #[test]
    fn lookup_omits_absent_fields() {
        assert_eq!(
            serde_json::to_value(PageLookup::missing()).expect("json"),
            json!({"found": false})
        );
        assert_eq!(
            serde_json::to_value(PageLookup::found(1, "text")).expect("json"),
            json!({"found": true, "id": 1, "rawContent": "text"})
        );
    }

    #[test]
    fn save_request_round_trips_through_the_wire_shape() {
        let save = SavePage::Update {
            id: 9,
            markdown: "body".into(),
        };
        let wire = serde_json::to_value(SavePageRequest::from(save.clone())).expect("json");
        assert_eq!(wire, json!({"id": 9, "markdown": "body", "newPage": false}));
        let back: SavePageRequest = serde_json::from_value(wire).expect("parse");
        assert_eq!(SavePage::try_from(back).expect("save"), save);
    }
}
