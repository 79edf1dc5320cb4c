//! ---
//! wiki_section: "06-http-surface"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "HTTP-facing unit serving pages over the bus."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use chrono::Utc;
use prometheus::{Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use url::Url;
use wiki_rates::{Rates, RatesClient};
use wiki_service::model::SavePageRequest;
use wiki_service::{PageService, PageServiceProxy, SavePage, ServiceError};

/// Markdown offered for a page that does not exist yet.
pub const EMPTY_PAGE_MARKDOWN: &str = "# A new page\n\nFeel-free to write in Markdown!\n";

/// Per-replica handler state. Nothing here is shared with other replicas.
pub struct HttpState {
    pages: Arc<dyn PageService>,
    rates: RatesClient,
    metrics: Registry,
}

impl HttpState {
    pub fn new(pages: PageServiceProxy, rates: RatesClient, metrics: Registry) -> Self {
        Self {
            pages: Arc::new(pages),
            rates,
            metrics,
        }
    }

    async fn latest_rates(&self) -> Option<Rates> {
        if !self.rates.is_available() {
            return None;
        }
        match self.rates.latest().await {
            Ok(rates) => rates,
            Err(err) => {
                warn!(error = %err, "exchange rates unavailable");
                None
            }
        }
    }
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState").finish_non_exhaustive()
    }
}

/// Build the wiki router over `state`.
pub fn router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/wiki/:page", get(page))
        .route("/create", post(create))
        .route("/save", post(save))
        .route("/delete", post(delete))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Serialize)]
struct HomeView {
    title: &'static str,
    pages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rates: Option<Rates>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageView {
    title: String,
    id: i64,
    new_page: bool,
    raw_content: String,
    timestamp: String,
}

#[derive(Debug, Deserialize)]
struct CreateForm {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveForm {
    #[serde(default)]
    id: String,
    title: String,
    markdown: String,
    #[serde(default)]
    new_page: String,
}

#[derive(Debug, Deserialize)]
struct DeleteForm {
    id: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        let status = if err.is_caller_error() {
            StatusCode::BAD_REQUEST
        } else if err.is_timeout() {
            StatusCode::GATEWAY_TIMEOUT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            error!(error = %err, status = status.as_u16(), "page service call failed");
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

async fn home(State(state): State<Arc<HttpState>>) -> Result<Json<HomeView>, ApiError> {
    let pages = state.pages.all_pages().await?;
    Ok(Json(HomeView {
        title: "Wiki home",
        pages,
        rates: state.latest_rates().await,
    }))
}

async fn page(
    State(state): State<Arc<HttpState>>,
    Path(title): Path<String>,
) -> Result<Json<PageView>, ApiError> {
    let lookup = state.pages.get_page(&title).await?;
    Ok(Json(PageView {
        title,
        id: lookup.id.unwrap_or(-1),
        new_page: !lookup.found,
        raw_content: lookup
            .raw_content
            .unwrap_or_else(|| EMPTY_PAGE_MARKDOWN.to_owned()),
        timestamp: Utc::now().to_rfc3339(),
    }))
}

async fn create(Form(form): Form<CreateForm>) -> Redirect {
    let name = form.name.trim();
    if name.is_empty() {
        Redirect::to("/")
    } else {
        Redirect::to(&page_location(name))
    }
}

async fn save(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<SaveForm>,
) -> Result<Redirect, ApiError> {
    let id = parse_id(&form.id)?;
    let request = SavePageRequest {
        id,
        title: Some(form.title.clone()),
        markdown: form.markdown,
        new_page: form.new_page == "true",
    };
    state.pages.save_page(SavePage::try_from(request)?).await?;
    Ok(Redirect::to(&page_location(&form.title)))
}

async fn delete(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<DeleteForm>,
) -> Result<Redirect, ApiError> {
    let id = parse_id(&form.id)?.ok_or_else(|| ApiError::bad_request("id is required"))?;
    state.pages.delete_page(id).await?;
    Ok(Redirect::to("/"))
}

async fn metrics(State(state): State<Arc<HttpState>>) -> Response {
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&state.metrics.gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `/wiki/<title>` with the title percent-encoded as one path segment.
fn page_location(title: &str) -> String {
    let Ok(mut url) = Url::parse("http://wiki.invalid/wiki") else {
        return "/".to_owned();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.push(title);
    }
    url.path().to_owned()
}

fn parse_id(raw: &str) -> Result<Option<i64>, ApiError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| ApiError::bad_request(format!("'{raw}' is not a page id")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_optional_but_numeric() {
        assert_eq!(parse_id("").expect("blank"), None);
        assert_eq!(parse_id(" 7 ").expect("seven"), Some(7));
        let err = parse_id("seven").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn page_locations_are_percent_encoded() {
        assert_eq!(page_location("Home"), "/wiki/Home");
        assert_eq!(page_location("Hello World"), "/wiki/Hello%20World");
        assert_eq!(page_location("a/b"), "/wiki/a%2Fb");
    }

    #[test]
    fn service_errors_map_onto_status_codes() {
        let status = |err: ServiceError| ApiError::from(err).status;
        assert_eq!(status(ServiceError::NoActionSpecified), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(ServiceError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ServiceError::Store("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(ServiceError::Bus(wiki_msg::BusError::Timeout {
                address: "wiki.database".into(),
                timeout: std::time::Duration::from_millis(5),
            })),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
