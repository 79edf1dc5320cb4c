//! ---
//! wiki_section: "06-http-surface"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "HTTP-facing unit serving pages over the bus."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
//! JSON routes over the page service proxy, plus the metrics scrape.

pub mod binding;
pub mod routes;
pub mod unit;

pub use binding::{bound_address, PortBinding};
pub use routes::{router, HttpState, EMPTY_PAGE_MARKDOWN};
pub use unit::{HttpUnit, HTTP_UNIT};
