//! ---
//! wiki_section: "03-services"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Page service contract, action facade and bus proxy."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wiki_msg::{Body, Bus, DeliveryOptions, Message};

use crate::action::{Action, ACTION_HEADER};
use crate::model::{PageId, PageLookup, SavePage, SavePageRequest};
use crate::{PageService, ServiceError, DATABASE_ADDRESS};

/// [`PageService`] implementation that forwards every call to the façade
/// over the bus.
#[derive(Debug, Clone)]
pub struct PageServiceProxy {
    bus: Bus,
    address: String,
    timeout: Option<Duration>,
}

impl PageServiceProxy {
    /// Proxy for the façade at [`DATABASE_ADDRESS`] using the bus timeout.
    pub fn new(bus: Bus) -> Self {
        Self {
            bus,
            address: DATABASE_ADDRESS.to_owned(),
            timeout: None,
        }
    }

    /// Target a façade bound somewhere else.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn call(&self, action: Action, body: impl Into<Body>) -> Result<Message, ServiceError> {
        let mut options = DeliveryOptions::new().with_header(ACTION_HEADER, action.as_ref());
        options.timeout = self.timeout;
        Ok(self.bus.request(&self.address, body, options).await?)
    }
}

#[async_trait]
impl PageService for PageServiceProxy {
    async fn all_pages(&self) -> Result<Vec<String>, ServiceError> {
        let reply = self.call(Action::AllPages, Body::Empty).await?;
        Ok(reply.body_json()?)
    }

    async fn get_page(&self, title: &str) -> Result<PageLookup, ServiceError> {
        let reply = self.call(Action::GetPage, json!({ "page": title })).await?;
        Ok(reply.body_json()?)
    }

    async fn create_page(&self, title: &str, markdown: &str) -> Result<(), ServiceError> {
        self.call(
            Action::CreatePage,
            json!({ "title": title, "markdown": markdown }),
        )
        .await?;
        Ok(())
    }

    async fn save_page(&self, request: SavePage) -> Result<(), ServiceError> {
        let body = serde_json::to_value(SavePageRequest::from(request))
            .map_err(|err| ServiceError::InvalidRequest(err.to_string()))?;
        self.call(Action::SavePage, body).await?;
        Ok(())
    }

    async fn delete_page(&self, id: PageId) -> Result<(), ServiceError> {
        self.call(Action::DeletePage, json!({ "id": id })).await?;
        Ok(())
    }
}
