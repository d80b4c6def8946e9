use hoverfly_core::model::{
    DelaySetting, Journal, JournalEntry, JournalQuery, JournalRequest, ModeArguments, RequestDetails, RequestMatcher,
    RequestResponsePair, Response, ResponseDiff, Simulation, SimulationMode,
};
use hoverfly_core::{AdminClient, HoverflyError};
use std::collections::BTreeMap;
use std::time::Duration;
use workspace_tests::{spawn_admin, StubOptions, StubState};

async fn client_for(options: StubOptions, token: Option<&str>) -> (AdminClient, StubState) {
    let (addr, state) = spawn_admin(options).await.unwrap();
    let client = AdminClient::new(
        format!("http://{}", addr),
        token.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap();
    (client, state)
}

fn pair(path: &str) -> RequestResponsePair {
    RequestResponsePair::new(
        RequestMatcher::new().method("GET").path(path),
        Response::ok(format!("{{\"path\":\"{}\"}}", path)),
    )
}

fn journal_entry(method: &str, path: &str) -> JournalEntry {
    JournalEntry {
        id: None,
        request: JournalRequest {
            path: path.to_string(),
            method: method.to_string(),
            destination: "api.example.com".to_string(),
            scheme: "http".to_string(),
            ..JournalRequest::default()
        },
        response: Response::ok("ok"),
        mode: "simulate".to_string(),
        time_started: None,
        latency: 0.5,
    }
}

#[tokio::test]
async fn test_set_mode_is_reflected_in_instance_info() {
    let (client, _state) = client_for(StubOptions::default(), None).await;

    client
        .set_mode(SimulationMode::Capture, Some(ModeArguments::default().capture_all_headers()))
        .await
        .unwrap();

    let info = client.get_info().await.unwrap();
    assert_eq!(info.mode, SimulationMode::Capture);
    assert_eq!(info.arguments.headers_whitelist, Some(vec!["*".to_string()]));
    assert_eq!(client.get_mode().await.unwrap().mode, SimulationMode::Capture);
}

#[tokio::test]
async fn test_simulation_crud() {
    let (client, state) = client_for(StubOptions::default(), None).await;

    let simulation = Simulation::from_pairs([pair("/a"), pair("/b")]).with_delay(DelaySetting::new("api.example.com", 100));
    client.set_simulation(&simulation).await.unwrap();
    assert_eq!(state.simulation().pairs().len(), 2);

    client
        .add_simulation(&Simulation::from_pairs([pair("/b"), pair("/c")]))
        .await
        .unwrap();
    let fetched = client.get_simulation().await.unwrap();
    assert_eq!(fetched.pairs().len(), 3);
    assert_eq!(fetched.delays().len(), 1);

    client.delete_simulation().await.unwrap();
    assert!(client.get_simulation().await.unwrap().pairs().is_empty());
}

#[tokio::test]
async fn test_simulation_without_schema_version_is_not_sent() {
    let (client, state) = client_for(StubOptions::default(), None).await;

    let mut simulation = Simulation::from_pairs([pair("/a")]);
    simulation.meta.schema_version.clear();
    let err = client.set_simulation(&simulation).await.unwrap_err();
    assert!(matches!(err, HoverflyError::Schema(_)));
    assert!(state.simulation().pairs().is_empty());
}

#[tokio::test]
async fn test_non_success_status_becomes_client_error() {
    let (client, _state) = client_for(StubOptions::default(), None).await;

    match client.set_destination("  ").await {
        Err(HoverflyError::Client(err)) => {
            assert_eq!(err.operation, "set destination");
            assert_eq!(err.status, Some(422));
            assert_eq!(err.message, "Destination must not be empty");
        }
        other => panic!("expected client error, got {:?}", other),
    }

    client.set_destination("api.example.com").await.unwrap();
    assert_eq!(client.get_destination().await.unwrap(), "api.example.com");
}

#[tokio::test]
async fn test_bearer_token_is_attached_to_every_call() {
    let options = StubOptions {
        auth_token: Some("secret".to_string()),
        ..StubOptions::default()
    };
    let (client, state) = client_for(options, Some("secret")).await;

    assert!(client.health().await);
    client.delete_journal().await.unwrap();
    client.get_info().await.unwrap();

    let seen = state.seen_authorization();
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|h| h.as_deref() == Some("Bearer secret")));
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let options = StubOptions {
        auth_token: Some("secret".to_string()),
        ..StubOptions::default()
    };
    let (addr, _state) = spawn_admin(options).await.unwrap();
    let client = AdminClient::new(format!("http://{}", addr), None, Duration::from_secs(5)).unwrap();

    match client.get_info().await {
        Err(HoverflyError::Client(err)) => assert_eq!(err.status, Some(401)),
        other => panic!("expected client error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_health_reflects_readiness() {
    let (client, _state) = client_for(StubOptions::default(), None).await;
    assert!(client.health().await);

    let never = StubOptions {
        never_healthy: true,
        ..StubOptions::default()
    };
    let (client, _state) = client_for(never, None).await;
    assert!(!client.health().await);
}

#[tokio::test]
async fn test_journal_paging_search_and_delete() {
    let (client, state) = client_for(StubOptions::default(), None).await;
    state.record(journal_entry("GET", "/api/bookings"));
    state.record(journal_entry("POST", "/api/bookings"));
    state.record(journal_entry("GET", "/api/users"));

    let page: Journal = client.get_journal(&JournalQuery::new().offset(1).limit(1)).await.unwrap();
    assert_eq!(page.entries().len(), 1);
    assert_eq!(page.total, 3);
    assert_eq!(page.entries()[0].request.method, "POST");

    let found = client
        .search_journal(&RequestMatcher::new().method("GET").path("/api/bookings"))
        .await
        .unwrap();
    assert_eq!(found.entries().len(), 1);

    client.delete_journal().await.unwrap();
    assert_eq!(state.journal_len(), 0);
}

#[tokio::test]
async fn test_diff_and_state() {
    let (client, state) = client_for(StubOptions::default(), None).await;
    state.push_diff(ResponseDiff {
        request: RequestDetails {
            method: "GET".into(),
            host: "api.example.com".into(),
            path: "/api/bookings".into(),
            query: String::new(),
        },
        diff_reports: Vec::new(),
    });

    assert_eq!(client.get_diff().await.unwrap().diff.len(), 1);
    client.delete_diff().await.unwrap();
    assert!(client.get_diff().await.unwrap().is_empty());

    let mut values = BTreeMap::new();
    values.insert("basket".to_string(), "empty".to_string());
    client.set_state(values.clone()).await.unwrap();
    assert_eq!(client.get_state().await.unwrap().state, values);
    client.delete_state().await.unwrap();
    assert!(client.get_state().await.unwrap().state.is_empty());
}
