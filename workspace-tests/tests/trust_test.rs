//! Outbound trust is process-wide, so everything touching it lives in this
//! one test binary and runs in a single test.

use hoverfly_core::model::{RequestMatcher, RequestResponsePair, Response, Simulation};
use hoverfly_core::{BinaryIdentifier, ProcessSupervisor, ProxyConfiguration, SimulationSource, Times, TrustContext};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn binary_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let name = BinaryIdentifier::detect().unwrap().binary_name();
    fs::copy(env!("CARGO_BIN_EXE_hoverfly-stub"), dir.path().join(name)).unwrap();
    dir
}

fn supervisor(dir: &TempDir, web_server: bool) -> ProcessSupervisor {
    let config = ProxyConfiguration::local()
        .binary_location(dir.path())
        .web_server(web_server)
        .register_exit_handler(false)
        .health_check_timeout(Duration::from_secs(10))
        .health_check_retry_interval(Duration::from_millis(50))
        .build()
        .unwrap();
    ProcessSupervisor::new(config).unwrap()
}

#[tokio::test]
async fn test_trust_follows_supervisor_lifecycle() {
    let dir = binary_dir();
    let context = TrustContext::global();
    assert!(!context.is_installed());

    // Proxy mode: test traffic for remote hosts is routed through the instance.
    let mut proxied = supervisor(&dir, false);
    proxied.start().await.unwrap();
    assert!(context.is_installed());
    let settings = context.proxy_settings().unwrap();
    assert_eq!(settings.proxy_url, proxied.config().proxy_url());

    let work = tempfile::tempdir().unwrap();
    let simulation = work.path().join("bookings.json");
    let pair = RequestResponsePair::new(
        RequestMatcher::new().method("GET").path("/api/bookings"),
        Response::ok("routed"),
    );
    fs::write(&simulation, serde_json::to_vec(&Simulation::from_pairs([pair])).unwrap()).unwrap();
    proxied.simulate(&[SimulationSource::file(&simulation)]).await.unwrap();

    let response = context
        .http_client()
        .unwrap()
        .get("http://api.example.com/api/bookings")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "routed");
    proxied
        .verify(
            &RequestMatcher::new().destination("api.example.com").path("/api/bookings"),
            Times::once(),
        )
        .await
        .unwrap();

    proxied.close().await.unwrap();
    assert!(!context.is_installed());
    assert!(context.proxy_settings().is_none());

    // Web server mode: trust is installed but nothing is proxied.
    let mut web = supervisor(&dir, true);
    web.start().await.unwrap();
    assert!(context.is_installed());
    assert!(context.proxy_settings().is_none());

    web.close().await.unwrap();
    assert!(!context.is_installed());
}
