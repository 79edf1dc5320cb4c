//! ---
//! wiki_section: "03-services"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Page service contract, action facade and bus proxy."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};
use wiki_msg::{Body, Handler, Message};

use crate::action::{Action, ACTION_HEADER};
use crate::model::{CreatePageRequest, DeletePageRequest, GetPageRequest, SavePage, SavePageRequest};
use crate::{PageService, ServiceError};

/// Bus consumer that demultiplexes requests by their action header onto a
/// [`PageService`].
#[derive(Debug)]
pub struct PageServiceFacade<S> {
    service: S,
}

impl<S: PageService> PageServiceFacade<S> {
    /// Expose `service` behind the façade.
    pub fn new(service: S) -> Self {
        Self { service }
    }

    /// The wrapped service.
    pub fn service(&self) -> &S {
        &self.service
    }

    async fn dispatch(&self, message: &Message) -> Result<Body, ServiceError> {
        let action = match message.header(ACTION_HEADER) {
            None => return Err(ServiceError::NoActionSpecified),
            Some(raw) => raw
                .parse::<Action>()
                .map_err(|_| ServiceError::BadAction(raw.to_owned()))?,
        };
        debug!(action = %action, message_id = %message.id(), "page service request");

        match action {
            Action::AllPages => {
                let titles = self.service.all_pages().await?;
                Ok(json!(titles).into())
            }
            Action::GetPage => {
                let request: GetPageRequest = parse(message)?;
                let lookup = self.service.get_page(&request.page).await?;
                Ok(json!(lookup).into())
            }
            Action::CreatePage => {
                let request: CreatePageRequest = parse(message)?;
                self.service
                    .create_page(&request.title, &request.markdown)
                    .await?;
                Ok(Body::Empty)
            }
            Action::SavePage => {
                let request: SavePageRequest = parse(message)?;
                self.service.save_page(SavePage::try_from(request)?).await?;
                Ok(Body::Empty)
            }
            Action::DeletePage => {
                let request: DeletePageRequest = parse(message)?;
                self.service.delete_page(request.id).await?;
                Ok(Body::Empty)
            }
        }
    }
}

fn parse<T: DeserializeOwned>(message: &Message) -> Result<T, ServiceError> {
    message
        .body_json()
        .map_err(|err| ServiceError::InvalidRequest(err.to_string()))
}

#[async_trait]
impl<S: PageService> Handler for PageServiceFacade<S> {
    async fn handle(&mut self, message: Message) {
        match self.dispatch(&message).await {
            Ok(body) => message.reply(body),
            Err(err) => {
                let failure = err.to_failure();
                warn!(
                    action = message.header(ACTION_HEADER).unwrap_or("-"),
                    code = failure.code,
                    error = %failure.message,
                    "page service request failed"
                );
                message.fail(failure.code, failure.message);
            }
        }
    }
}
