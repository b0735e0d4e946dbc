use std::time::Duration;

use core_test_support::FakeApi;
use core_test_support::FakeIdentifier;
use core_test_support::FakeObserver;
use core_test_support::dodgeball;
use core_test_support::register_identifier;
use core_test_support::register_observer;
use dodgeball_core::integration::Observation;
use dodgeball_protocol::FingerprintSource;
use dodgeball_protocol::InitConfig;
use dodgeball_protocol::IntegrationName;
use dodgeball_protocol::IntegrationPurpose;
use dodgeball_protocol::LibConfig;
use pretty_assertions::assert_eq;

fn init_with(names: &[IntegrationName]) -> InitConfig {
    InitConfig {
        request_id: "req-1".to_string(),
        libs: names
            .iter()
            .map(|name| LibConfig {
                name: name.to_string(),
                ..LibConfig::default()
            })
            .collect(),
    }
}

fn anonymous(token: &str) -> Observation {
    Observation {
        session_id: token.to_string(),
        user_id: None,
        source_token: token.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn initialize_loads_integrations_and_sources_the_client() {
    let api = FakeApi::new();
    api.set_init_config(init_with(&[IntegrationName::Fingerprintjs, IntegrationName::Sift]));
    let client = dodgeball(api.clone());
    let identifier = FakeIdentifier::new(FingerprintSource::Fingerprintjs);
    let observer = FakeObserver::new();
    register_identifier(&client, IntegrationName::Fingerprintjs, identifier.clone());
    register_observer(&client, IntegrationName::Sift, observer.clone());

    assert!(!client.is_sourced());
    client.initialize().await;

    assert!(client.is_sourced());
    assert_eq!(client.registry().all().await.len(), 2);
    assert_eq!(
        client
            .registry()
            .with_purpose(IntegrationPurpose::Identify)
            .await
            .len(),
        1
    );
    assert_eq!(api.exchange_count(), 1);
    assert_eq!(identifier.calls(), 1);
    assert_eq!(observer.observations(), vec![anonymous("token-1")]);
}

#[tokio::test(start_paused = true)]
async fn initialize_runs_once() {
    let api = FakeApi::new();
    let client = dodgeball(api.clone());

    client.initialize().await;
    client.initialize().await;

    assert_eq!(api.exchange_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_init_config_still_sources_the_client() {
    let api = FakeApi::new();
    api.fail_init();
    let client = dodgeball(api.clone());

    client.initialize().await;

    assert!(client.is_sourced());
    assert!(client.registry().all().await.is_empty());
    assert_eq!(api.exchange_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn get_source_token_initializes_lazily() {
    let api = FakeApi::new();
    let client = dodgeball(api.clone());

    assert_eq!(client.get_source_token().await, Ok("token-1".to_string()));
    assert!(client.is_sourced());
    assert_eq!(api.exchange_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn track_after_sourcing_observes_immediately() {
    let api = FakeApi::new();
    api.set_init_config(init_with(&[IntegrationName::Sift]));
    let client = dodgeball(api.clone());
    let observer = FakeObserver::new();
    register_observer(&client, IntegrationName::Sift, observer.clone());
    client.initialize().await;

    client.track("session-1", Some("user-1".to_string())).await;

    assert_eq!(
        observer.observations(),
        vec![
            anonymous("token-1"),
            Observation {
                session_id: "session-1".to_string(),
                user_id: Some("user-1".to_string()),
                source_token: "token-1".to_string(),
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn track_before_sourcing_is_deferred() {
    let api = FakeApi::new();
    api.set_init_config(init_with(&[IntegrationName::Sift]));
    let client = dodgeball(api.clone());
    let observer = FakeObserver::new();
    register_observer(&client, IntegrationName::Sift, observer.clone());

    client.track("session-1", None).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(observer.observations().is_empty());
    assert_eq!(
        client.session().map(|session| session.session_id),
        Some("session-1".to_string())
    );

    client.initialize().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let observations = observer.observations();
    assert_eq!(observations.len(), 2);
    assert_eq!(
        observations[1],
        Observation {
            session_id: "session-1".to_string(),
            user_id: None,
            source_token: "token-1".to_string(),
        }
    );
}

#[tokio::test(start_paused = true)]
async fn dropped_first_call_does_not_strand_later_callers() {
    let api = FakeApi::new();
    api.set_token_delay(Duration::from_secs(1));
    let client = dodgeball(api.clone());

    let first =
        tokio::time::timeout(Duration::from_millis(10), client.get_source_token()).await;
    assert!(first.is_err());
    assert!(!client.is_sourced());

    let second = tokio::time::timeout(Duration::from_secs(60), client.get_source_token())
        .await
        .expect("second call resolves");
    assert_eq!(second, Ok("token-1".to_string()));
    assert!(client.is_sourced());
    assert_eq!(api.exchange_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn aborted_initialize_still_releases_deferred_track() {
    let api = FakeApi::new();
    api.set_init_config(init_with(&[IntegrationName::Sift]));
    api.set_token_delay(Duration::from_secs(1));
    let client = dodgeball(api.clone());
    let observer = FakeObserver::new();
    register_observer(&client, IntegrationName::Sift, observer.clone());
    client.track("session-1", None).await;

    let background = client.clone();
    let init = tokio::spawn(async move { background.initialize().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    init.abort();

    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(client.is_sourced());
    assert_eq!(
        observer.observations(),
        vec![
            anonymous("token-1"),
            Observation {
                session_id: "session-1".to_string(),
                user_id: None,
                source_token: "token-1".to_string(),
            },
        ]
    );
}
