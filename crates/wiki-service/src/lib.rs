//! ---
//! wiki_section: "03-services"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Page service contract, action facade and bus proxy."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! The page service as seen from both ends of the bus.
//!
//! [`PageService`] is the one contract. The persistence unit implements it
//! locally and exposes it through a [`PageServiceFacade`] bound at
//! [`DATABASE_ADDRESS`]; every other unit uses a [`PageServiceProxy`], which
//! turns each call into a request carrying the matching [`Action`] header.
#![warn(missing_docs)]

use async_trait::async_trait;
use thiserror::Error;
use wiki_msg::{BusError, ReplyFailure};

pub mod action;
pub mod facade;
pub mod model;
pub mod proxy;

pub use action::{Action, ErrorCode, ACTION_HEADER};
pub use facade::PageServiceFacade;
pub use model::{PageId, PageLookup, SavePage};
pub use proxy::PageServiceProxy;

/// Well-known address of the page service façade.
pub const DATABASE_ADDRESS: &str = "wiki.database";

const BAD_ACTION_PREFIX: &str = "Bad action: ";

/// Failures of a page service call, on either side of the bus.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The request carried no action header.
    #[error("no action header specified")]
    NoActionSpecified,
    /// The action header named no known operation.
    #[error("bad action: {0}")]
    BadAction(String),
    /// The body did not match the action's request shape.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The store rejected the operation; the text is its own message.
    #[error("database error: {0}")]
    Store(String),
    /// The bus failed before the façade could answer.
    #[error(transparent)]
    Bus(BusError),
}

impl ServiceError {
    /// Wire code reported for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::NoActionSpecified => ErrorCode::NoActionSpecified,
            ServiceError::BadAction(_) => ErrorCode::BadAction,
            ServiceError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            ServiceError::Store(_) | ServiceError::Bus(_) => ErrorCode::DbError,
        }
    }

    /// Failure sent back over the bus.
    pub fn to_failure(&self) -> ReplyFailure {
        let message = match self {
            ServiceError::NoActionSpecified => "No action header specified".to_owned(),
            ServiceError::BadAction(action) => format!("{BAD_ACTION_PREFIX}{action}"),
            ServiceError::InvalidRequest(cause) | ServiceError::Store(cause) => cause.clone(),
            ServiceError::Bus(err) => err.to_string(),
        };
        ReplyFailure::new(self.code().into(), message)
    }

    /// Whether the caller sent something the façade could not accept.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ServiceError::NoActionSpecified
                | ServiceError::BadAction(_)
                | ServiceError::InvalidRequest(_)
        )
    }

    /// Whether the call gave up waiting for the façade.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ServiceError::Bus(BusError::Timeout { .. }))
    }
}

impl From<BusError> for ServiceError {
    fn from(err: BusError) -> Self {
        let BusError::Recipient(failure) = err else {
            return ServiceError::Bus(err);
        };
        match ErrorCode::try_from(failure.code) {
            Ok(ErrorCode::NoActionSpecified) => ServiceError::NoActionSpecified,
            Ok(ErrorCode::BadAction) => ServiceError::BadAction(
                failure
                    .message
                    .strip_prefix(BAD_ACTION_PREFIX)
                    .unwrap_or(&failure.message)
                    .to_owned(),
            ),
            Ok(ErrorCode::DbError) => ServiceError::Store(failure.message),
            Ok(ErrorCode::InvalidRequest) => ServiceError::InvalidRequest(failure.message),
            Err(_) => ServiceError::Bus(BusError::Recipient(failure)),
        }
    }
}

impl From<wiki_msg::CodecError> for ServiceError {
    fn from(err: wiki_msg::CodecError) -> Self {
        ServiceError::Bus(BusError::Codec(err))
    }
}

/// Operations on wiki pages.
#[async_trait]
pub trait PageService: Send + Sync + 'static {
    /// Every page title, ascending.
    async fn all_pages(&self) -> Result<Vec<String>, ServiceError>;

    /// Look a page up by title.
    async fn get_page(&self, title: &str) -> Result<PageLookup, ServiceError>;

    /// Insert a page. Titles are unique.
    async fn create_page(&self, title: &str, markdown: &str) -> Result<(), ServiceError>;

    /// Insert or update depending on the caller's `newPage` assertion.
    async fn save_page(&self, request: SavePage) -> Result<(), ServiceError>;

    /// Remove a page by id.
    async fn delete_page(&self, id: PageId) -> Result<(), ServiceError>;
}
