//! ---
//! wiki_section: "03-persistence-logging"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Persistence unit, page store and query templates."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::tempdir;
use wiki_common::AppConfig;
use wiki_db::{verify_snapshot, DatabaseUnit, DATABASE_UNIT};
use wiki_msg::{Body, Bus, DeliveryOptions};
use wiki_runtime::{DeployError, DeploymentOptions, Runtime, UnitError};
use wiki_service::{
    PageService, PageServiceProxy, SavePage, ServiceError, ACTION_HEADER, DATABASE_ADDRESS,
};

async fn deploy(config: AppConfig) -> (Runtime, Result<String, DeployError>) {
    let bus = Bus::new(&config.bus).expect("bus");
    let runtime = Runtime::new(bus, Arc::new(config));
    runtime.register_factory(DATABASE_UNIT, DatabaseUnit::new);
    let deployed = runtime.deploy(DATABASE_UNIT, DeploymentOptions::new(1)).await;
    (runtime, deployed)
}

async fn running() -> (Runtime, PageServiceProxy) {
    let (runtime, deployed) = deploy(AppConfig::default()).await;
    deployed.expect("database unit starts");
    let proxy = PageServiceProxy::new(runtime.bus().clone());
    (runtime, proxy)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn create_then_get_returns_the_last_saved_content() {
    let (runtime, pages) = running().await;
    pages.create_page("Home", "# First").await.expect("create");
    let lookup = pages.get_page("Home").await.expect("get");
    assert!(lookup.found);
    assert_eq!(lookup.raw_content.as_deref(), Some("# First"));

    pages
        .save_page(SavePage::Update {
            id: lookup.id.expect("id"),
            markdown: "# Second".into(),
        })
        .await
        .expect("save");
    let lookup = pages.get_page("Home").await.expect("get");
    assert_eq!(lookup.raw_content.as_deref(), Some("# Second"));

    assert!(!pages.get_page("Nowhere").await.expect("get").found);
    runtime.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn all_pages_are_sorted_by_title() {
    let (runtime, pages) = running().await;
    pages.create_page("Zebra", "z").await.expect("zebra");
    pages.create_page("Apple", "a").await.expect("apple");
    assert_eq!(pages.all_pages().await.expect("list"), ["Apple", "Zebra"]);
    runtime.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_actions_leave_the_store_untouched() {
    let (runtime, pages) = running().await;
    pages.create_page("Home", "kept").await.expect("create");

    let no_action = runtime
        .bus()
        .request(
            DATABASE_ADDRESS,
            json!({"title": "Sneaky", "markdown": "x"}),
            DeliveryOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        ServiceError::from(no_action),
        ServiceError::NoActionSpecified
    ));

    let bad_action = runtime
        .bus()
        .request(
            DATABASE_ADDRESS,
            json!({"id": 1}),
            DeliveryOptions::new().with_header(ACTION_HEADER, "frobnicate"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        ServiceError::from(bad_action),
        ServiceError::BadAction(action) if action == "frobnicate"
    ));

    let invalid = runtime
        .bus()
        .request(
            DATABASE_ADDRESS,
            Body::Empty,
            DeliveryOptions::new().with_header(ACTION_HEADER, "delete-page"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        ServiceError::from(invalid),
        ServiceError::InvalidRequest(_)
    ));

    assert_eq!(pages.all_pages().await.expect("list"), ["Home"]);
    assert_eq!(
        pages.get_page("Home").await.expect("get").raw_content.as_deref(),
        Some("kept")
    );
    runtime.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ids_may_arrive_as_numeric_strings() {
    let (runtime, pages) = running().await;
    pages.create_page("Home", "bye").await.expect("create");
    let id = pages.get_page("Home").await.expect("get").id.expect("id");

    runtime
        .bus()
        .request(
            DATABASE_ADDRESS,
            json!({ "id": id.to_string() }),
            DeliveryOptions::new().with_header(ACTION_HEADER, "delete-page"),
        )
        .await
        .expect("delete with string id");
    assert!(pages.all_pages().await.expect("list").is_empty());
    runtime.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_query_file_fails_startup_as_configuration_error() {
    let dir = tempdir().expect("tempdir");
    let mut config = AppConfig::default();
    config.database.queries_resource_path = Some(dir.path().join("absent.properties"));

    let (runtime, deployed) = deploy(config).await;
    assert!(matches!(
        deployed,
        Err(DeployError::Unit {
            source: UnitError::Configuration(_),
            ..
        })
    ));
    assert!(!runtime.bus().is_registered(DATABASE_ADDRESS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_snapshot_is_a_connection_error() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("pages.json");
    std::fs::write(&path, b"{ definitely not a snapshot").expect("write");
    let mut config = AppConfig::default();
    config.database.snapshot_path = Some(path);

    let (_runtime, deployed) = deploy(config).await;
    assert!(matches!(
        deployed,
        Err(DeployError::Unit {
            source: UnitError::Connection(_),
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pages_persist_across_redeployments() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("pages.json");
    let mut config = AppConfig::default();
    config.database.snapshot_path = Some(path.clone());

    let (runtime, deployed) = deploy(config.clone()).await;
    deployed.expect("first deployment");
    let pages = PageServiceProxy::new(runtime.bus().clone());
    pages.create_page("Home", "persisted").await.expect("create");
    runtime.close().await;
    assert!(verify_snapshot(&path));

    let (runtime, deployed) = deploy(config).await;
    deployed.expect("second deployment");
    let pages = PageServiceProxy::new(runtime.bus().clone());
    assert_eq!(
        pages.get_page("Home").await.expect("get").raw_content.as_deref(),
        Some("persisted")
    );
    runtime.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_deadline_never_strands_store_metrics() {
    let config = AppConfig::default();
    let bus = Bus::new(&config.bus).expect("bus");
    let runtime = Runtime::new(bus, Arc::new(config));
    runtime.register_factory(DATABASE_UNIT, DatabaseUnit::new);
    let store_metrics_registered = |runtime: &Runtime| {
        runtime
            .bus()
            .metrics()
            .registry()
            .gather()
            .iter()
            .any(|family| family.get_name() == "wiki_store_operations_total")
    };

    for micros in [1, 10, 100, 1_000, 10_000] {
        let options =
            DeploymentOptions::new(1).with_start_timeout(Duration::from_micros(micros));
        match runtime.deploy(DATABASE_UNIT, options).await {
            Ok(id) => runtime.undeploy(&id).await.expect("undeploy"),
            Err(err) => assert!(matches!(
                err,
                DeployError::Unit {
                    source: UnitError::StartTimeout(_),
                    ..
                }
            )),
        }
        assert!(!store_metrics_registered(&runtime), "deadline {micros}us");
    }

    runtime
        .deploy(DATABASE_UNIT, DeploymentOptions::new(1))
        .await
        .expect("deploys after timed out attempts");
    assert!(store_metrics_registered(&runtime));
    runtime.close().await;
}
