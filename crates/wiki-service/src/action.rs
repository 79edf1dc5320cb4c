//! ---
//! wiki_section: "03-services"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Page service contract, action facade and bus proxy."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Header carrying the operation name.
pub const ACTION_HEADER: &str = "action";

/// Operations behind the page service address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Action {
    /// List every title.
    AllPages,
    /// Fetch one page by title.
    GetPage,
    /// Insert a page.
    CreatePage,
    /// Insert or update a page.
    SavePage,
    /// Delete a page by id.
    DeletePage,
}

/// Failure codes reported by the façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    /// No action header.
    NoActionSpecified = 1,
    /// Unknown action.
    BadAction = 2,
    /// Store failure.
    DbError = 3,
    /// Malformed request body.
    InvalidRequest = 4,
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code as i32
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = i32;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(ErrorCode::NoActionSpecified),
            2 => Ok(ErrorCode::BadAction),
            3 => Ok(ErrorCode::DbError),
            4 => Ok(ErrorCode::InvalidRequest),
            other => Err(other),
        }
    }
}
