//! ---
//! wiki_section: "05-exchange-rates"
//! wiki_subsection: "module"
//! wiki_type: "source"
//! wiki_scope: "code"
//! wiki_description: "Exchange-rate model, codec, fetch unit and bus client."
//! wiki_version: "v0.0.0-prealpha"
//! wiki_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use wiki_common::AppConfig;
use wiki_msg::{Body, Bus, DeliveryOptions};
use wiki_rates::{
    ExchangeRateUnit, RateSource, Rates, RatesAction, RatesClient, RatesError,
    EXCHANGE_RATES_ADDRESS, EXCHANGE_RATES_UNIT,
};
use wiki_runtime::{DeployError, DeploymentOptions, Runtime, UnitError};
use wiki_service::{ServiceError, ACTION_HEADER};

/// Hands out queued answers; the last one repeats.
struct ScriptedSource {
    answers: Mutex<VecDeque<Option<Rates>>>,
}

impl ScriptedSource {
    fn new(answers: impl IntoIterator<Item = Option<Rates>>) -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(answers.into_iter().collect()),
        })
    }
}

#[async_trait]
impl RateSource for ScriptedSource {
    async fn fetch(&self) -> Result<Rates, RatesError> {
        let mut answers = self.answers.lock();
        let answer = if answers.len() > 1 {
            answers.pop_front().flatten()
        } else {
            answers.front().cloned().flatten()
        };
        answer.ok_or(RatesError::Status(503))
    }
}

fn euro(rate: i64) -> Rates {
    Rates::new("BGN")
        .with_date(NaiveDate::from_ymd_opt(2020, 3, 27).expect("date"))
        .with_rate("EUR", Decimal::new(rate, 5))
}

async fn deploy(
    config: AppConfig,
    source: Arc<ScriptedSource>,
) -> (Runtime, Result<String, DeployError>) {
    let bus = Bus::new(&config.bus).expect("bus");
    let runtime = Runtime::new(bus, Arc::new(config));
    runtime.register_factory(EXCHANGE_RATES_UNIT, move || {
        ExchangeRateUnit::with_source(source.clone() as Arc<dyn RateSource>)
    });
    let deployed = runtime
        .deploy(EXCHANGE_RATES_UNIT, DeploymentOptions::new(1))
        .await;
    (runtime, deployed)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn latest_rates_come_from_the_startup_fetch() {
    let (runtime, deployed) = deploy(AppConfig::default(), ScriptedSource::new([Some(euro(51129))])).await;
    deployed.expect("rates unit starts");

    let client = RatesClient::new(runtime.bus().clone());
    assert!(client.is_available());
    let rates = client.latest().await.expect("latest").expect("rates present");
    assert_eq!(rates, euro(51129));
    runtime.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_startup_fetch_is_a_connection_error() {
    let (runtime, deployed) = deploy(AppConfig::default(), ScriptedSource::new([None])).await;
    assert!(matches!(
        deployed,
        Err(DeployError::Unit {
            source: UnitError::Connection(_),
            ..
        })
    ));
    assert!(!runtime.bus().is_registered(EXCHANGE_RATES_ADDRESS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_rates_replaces_the_current_value() {
    let (runtime, deployed) = deploy(AppConfig::default(), ScriptedSource::new([Some(euro(1))])).await;
    deployed.expect("rates unit starts");

    runtime
        .bus()
        .send_typed(
            EXCHANGE_RATES_ADDRESS,
            &euro(2),
            DeliveryOptions::new().with_header(ACTION_HEADER, RatesAction::UpdateRates.as_ref()),
        )
        .expect("send");

    // Same address, same loop: the update is handled before this request.
    let rates = RatesClient::new(runtime.bus().clone())
        .latest()
        .await
        .expect("latest")
        .expect("rates present");
    assert_eq!(rates, euro(2));
    runtime.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refresh_task_keeps_rates_current() {
    let mut config = AppConfig::default();
    config.exchange_rates.refresh_interval = Some(Duration::from_millis(20));
    let source = ScriptedSource::new([Some(euro(1)), None, Some(euro(3))]);
    let (runtime, deployed) = deploy(config, source).await;
    deployed.expect("rates unit starts");

    let client = RatesClient::new(runtime.bus().clone());
    let refreshed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(rates) = client.latest().await.expect("latest") {
                if rates == euro(3) {
                    return rates;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("refresh happens");
    assert_eq!(refreshed.rate("EUR"), Some(Decimal::new(3, 5)));
    runtime.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_without_a_known_action_are_rejected() {
    let (runtime, deployed) = deploy(AppConfig::default(), ScriptedSource::new([Some(euro(1))])).await;
    deployed.expect("rates unit starts");

    let missing = runtime
        .bus()
        .request(EXCHANGE_RATES_ADDRESS, Body::Empty, DeliveryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(ServiceError::from(missing), ServiceError::NoActionSpecified));

    let unknown = runtime
        .bus()
        .request(
            EXCHANGE_RATES_ADDRESS,
            Body::Empty,
            DeliveryOptions::new().with_header(ACTION_HEADER, "all-pages"),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        ServiceError::from(unknown),
        ServiceError::BadAction(action) if action == "all-pages"
    ));

    let not_rates = runtime
        .bus()
        .request(
            EXCHANGE_RATES_ADDRESS,
            serde_json::json!({"base": "BGN"}),
            DeliveryOptions::new().with_header(ACTION_HEADER, RatesAction::UpdateRates.as_ref()),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        ServiceError::from(not_rates),
        ServiceError::InvalidRequest(_)
    ));
    runtime.close().await;
}
