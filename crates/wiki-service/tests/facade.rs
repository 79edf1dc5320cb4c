//! ---
//! wiki_section: "03-services"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Page service contract, action facade and bus proxy."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use wiki_common::BusConfig;
use wiki_msg::{Body, Bus, BusError, DeliveryOptions, EventLoop};
use wiki_service::{
    PageId, PageLookup, PageService, PageServiceFacade, PageServiceProxy, SavePage, ServiceError,
    ACTION_HEADER, DATABASE_ADDRESS,
};

#[derive(Default)]
struct Pages {
    next_id: PageId,
    by_title: BTreeMap<String, (PageId, String)>,
    calls: usize,
}

/// Title-keyed map standing in for the store.
#[derive(Clone, Default)]
struct FakeService {
    pages: Arc<Mutex<Pages>>,
}

impl FakeService {
    fn calls(&self) -> usize {
        self.pages.lock().calls
    }
}

#[async_trait]
impl PageService for FakeService {
    async fn all_pages(&self) -> Result<Vec<String>, ServiceError> {
        let mut pages = self.pages.lock();
        pages.calls += 1;
        Ok(pages.by_title.keys().cloned().collect())
    }

    async fn get_page(&self, title: &str) -> Result<PageLookup, ServiceError> {
        let mut pages = self.pages.lock();
        pages.calls += 1;
        Ok(match pages.by_title.get(title) {
            Some((id, markdown)) => PageLookup::found(*id, markdown.clone()),
            None => PageLookup::missing(),
        })
    }

    async fn create_page(&self, title: &str, markdown: &str) -> Result<(), ServiceError> {
        let mut pages = self.pages.lock();
        pages.calls += 1;
        if pages.by_title.contains_key(title) {
            return Err(ServiceError::Store(format!("duplicate title {title}")));
        }
        pages.next_id += 1;
        let id = pages.next_id;
        pages.by_title.insert(title.to_owned(), (id, markdown.to_owned()));
        Ok(())
    }

    async fn save_page(&self, request: SavePage) -> Result<(), ServiceError> {
        match request {
            SavePage::Insert { title, markdown } => self.create_page(&title, &markdown).await,
            SavePage::Update { id, markdown } => {
                let mut pages = self.pages.lock();
                pages.calls += 1;
                for (page_id, content) in pages.by_title.values_mut() {
                    if *page_id == id {
                        *content = markdown.clone();
                    }
                }
                Ok(())
            }
        }
    }

    async fn delete_page(&self, id: PageId) -> Result<(), ServiceError> {
        let mut pages = self.pages.lock();
        pages.calls += 1;
        pages.by_title.retain(|_, (page_id, _)| *page_id != id);
        Ok(())
    }
}

struct Fixture {
    bus: Bus,
    service: FakeService,
    proxy: PageServiceProxy,
    _event_loop: EventLoop,
}

fn fixture() -> Fixture {
    let bus = Bus::new(&BusConfig::default()).expect("bus");
    let service = FakeService::default();
    let event_loop = bus
        .register(DATABASE_ADDRESS, PageServiceFacade::new(service.clone()))
        .expect("bind facade");
    let proxy = PageServiceProxy::new(bus.clone()).with_timeout(Duration::from_secs(2));
    Fixture {
        bus,
        service,
        proxy,
        _event_loop: event_loop,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn proxy_calls_reach_the_service_through_the_facade() {
    let f = fixture();
    f.proxy.create_page("Home", "# Welcome").await.expect("create");
    let lookup = f.proxy.get_page("Home").await.expect("get");
    assert!(lookup.found);
    assert_eq!(lookup.raw_content.as_deref(), Some("# Welcome"));

    let id = lookup.id.expect("id");
    f.proxy
        .save_page(SavePage::Update {
            id,
            markdown: "# Updated".into(),
        })
        .await
        .expect("save");
    assert_eq!(
        f.proxy.get_page("Home").await.expect("get").raw_content.as_deref(),
        Some("# Updated")
    );

    f.proxy.delete_page(id).await.expect("delete");
    assert!(!f.proxy.get_page("Home").await.expect("get").found);
    assert!(f.proxy.all_pages().await.expect("list").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_action_header_is_rejected_without_touching_the_service() {
    let f = fixture();
    let err = f
        .bus
        .request(DATABASE_ADDRESS, json!({"page": "Home"}), DeliveryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Recipient(ref failure) if failure.code == 1));
    assert!(matches!(
        ServiceError::from(err),
        ServiceError::NoActionSpecified
    ));
    assert_eq!(f.service.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_action_is_rejected_with_its_name() {
    let f = fixture();
    let err = f
        .bus
        .request(
            DATABASE_ADDRESS,
            Body::Empty,
            DeliveryOptions::new().with_header(ACTION_HEADER, "frobnicate"),
        )
        .await
        .unwrap_err();
    let BusError::Recipient(failure) = &err else {
        panic!("expected recipient failure, got {err:?}");
    };
    assert_eq!(failure.code, 2);
    assert!(failure.message.contains("frobnicate"));
    assert!(matches!(ServiceError::from(err), ServiceError::BadAction(action) if action == "frobnicate"));
    assert_eq!(f.service.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_body_is_an_invalid_request() {
    let f = fixture();
    let err = f
        .bus
        .request(
            DATABASE_ADDRESS,
            json!({"title": 12}),
            DeliveryOptions::new().with_header(ACTION_HEADER, "create-page"),
        )
        .await
        .unwrap_err();
    let err = ServiceError::from(err);
    assert!(matches!(err, ServiceError::InvalidRequest(_)));
    assert!(err.is_caller_error());
    assert_eq!(f.service.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn store_failures_come_back_with_their_cause() {
    let f = fixture();
    f.proxy.create_page("Home", "a").await.expect("first");
    let err = f.proxy.create_page("Home", "b").await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(ref cause) if cause == "duplicate title Home"));
    assert!(!err.is_caller_error());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn proxy_without_facade_fails_fast() {
    let bus = Bus::new(&BusConfig::default()).expect("bus");
    let proxy = PageServiceProxy::new(bus);
    let err = proxy.all_pages().await.unwrap_err();
    assert!(matches!(err, ServiceError::Bus(BusError::NoHandler { .. })));
}
