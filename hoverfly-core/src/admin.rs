//! Typed client for the proxy's control plane (admin API)

use crate::config::{ProxyConfiguration, Target};
use crate::error::ClientError;
use crate::health::HealthIndicator;
use crate::tempfiles::ResourceRoots;
use crate::{HoverflyError, Result};
use async_trait::async_trait;
use hoverfly_common::{
    DestinationView, DiffReport, InstanceInfo, Journal, JournalQuery, Meta, ModeArguments, ModeView,
    RequestMatcher, Simulation, SimulationMode, StateView,
};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable holding the bearer token for the admin API.
pub const AUTH_TOKEN_ENV: &str = "HOVERFLY_AUTH_TOKEN";

const HEALTH_PATH: &str = "/api/health";
const SIMULATION_PATH: &str = "/api/v2/simulation";
const JOURNAL_PATH: &str = "/api/v2/journal";
const DIFF_PATH: &str = "/api/v2/diff";
const INFO_PATH: &str = "/api/v2/hoverfly";
const DESTINATION_PATH: &str = "/api/v2/hoverfly/destination";
const MODE_PATH: &str = "/api/v2/hoverfly/mode";
const STATE_PATH: &str = "/api/v2/state";

#[derive(Debug, Clone)]
pub struct AdminClient {
    base_url: String,
    auth_token: Option<String>,
    http: reqwest::Client,
}

impl AdminClient {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let http = Self::http_builder(timeout)
            .build()
            .map_err(|e| HoverflyError::Configuration(format!("Failed to build admin HTTP client: {}", e)))?;
        Ok(Self::with_http(base_url, auth_token, http))
    }

    pub fn with_http(base_url: impl Into<String>, auth_token: Option<String>, http: reqwest::Client) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            auth_token,
            http,
        }
    }

    /// Client for the instance described by `config`. The auth token comes from
    /// the remote settings, falling back to `HOVERFLY_AUTH_TOKEN`.
    pub fn from_config(config: &ProxyConfiguration) -> Result<Self> {
        let env_token = std::env::var(AUTH_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        let mut builder = Self::http_builder(config.common().request_timeout);

        let auth_token = match config.target() {
            Target::Remote(remote) => {
                if let Some(ca) = &remote.ca_cert {
                    let path = ResourceRoots::standard(None).resolve(ca)?;
                    let pem = fs::read(&path)?;
                    let certificate = reqwest::Certificate::from_pem(&pem)
                        .map_err(|e| HoverflyError::Tls(format!("Invalid CA {}: {}", path.display(), e)))?;
                    builder = builder.add_root_certificate(certificate);
                }
                remote.auth_token.clone().or(env_token)
            }
            Target::Local(_) => env_token,
        };

        let http = builder
            .build()
            .map_err(|e| HoverflyError::Configuration(format!("Failed to build admin HTTP client: {}", e)))?;
        Ok(Self::with_http(config.admin_base_url(), auth_token, http))
    }

    // The admin API is never reached through the proxy it controls.
    fn http_builder(timeout: Duration) -> reqwest::ClientBuilder {
        reqwest::Client::builder().timeout(timeout).no_proxy()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn has_auth_token(&self) -> bool {
        self.auth_token.is_some()
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, operation: &str, builder: RequestBuilder) -> std::result::Result<reqwest::Response, ClientError> {
        let response = builder
            .send()
            .await
            .map_err(|e| ClientError::transport(operation, e))?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "Admin API call");
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(ClientError::new(operation, Some(status.as_u16()), error_message(&body)))
    }

    async fn fetch<T: DeserializeOwned>(&self, operation: &str, builder: RequestBuilder) -> Result<T> {
        let response = self.send(operation, builder).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::transport(operation, e))?;
        serde_json::from_slice(&bytes).map_err(|e| {
            ClientError::new(operation, None, format!("Invalid response body: {}", e)).into()
        })
    }

    async fn execute(&self, operation: &str, builder: RequestBuilder) -> Result<()> {
        self.send(operation, builder).await?;
        Ok(())
    }

    /// Any failure, including a non-2xx status, reads as unhealthy.
    pub async fn health(&self) -> bool {
        match self.send("health", self.request(Method::GET, HEALTH_PATH)).await {
            Ok(_) => true,
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }

    pub async fn get_simulation(&self) -> Result<Simulation> {
        let simulation: Simulation = self
            .fetch("get simulation", self.request(Method::GET, SIMULATION_PATH))
            .await?;
        check_schema(&simulation.meta)?;
        Ok(simulation)
    }

    /// Replace the proxy's dataset.
    pub async fn set_simulation(&self, simulation: &Simulation) -> Result<()> {
        check_schema(&simulation.meta)?;
        self.execute(
            "set simulation",
            self.request(Method::PUT, SIMULATION_PATH).json(simulation),
        )
        .await
    }

    /// Append to the proxy's dataset.
    pub async fn add_simulation(&self, simulation: &Simulation) -> Result<()> {
        check_schema(&simulation.meta)?;
        self.execute(
            "add simulation",
            self.request(Method::POST, SIMULATION_PATH).json(simulation),
        )
        .await
    }

    pub async fn delete_simulation(&self) -> Result<()> {
        self.execute("delete simulation", self.request(Method::DELETE, SIMULATION_PATH))
            .await
    }

    pub async fn get_journal(&self, query: &JournalQuery) -> Result<Journal> {
        self.fetch(
            "get journal",
            self.request(Method::GET, JOURNAL_PATH).query(&query.to_params()),
        )
        .await
    }

    /// Journal entries whose request matches `matcher`.
    pub async fn search_journal(&self, matcher: &RequestMatcher) -> Result<Journal> {
        let body = serde_json::json!({ "request": matcher });
        self.fetch("search journal", self.request(Method::POST, JOURNAL_PATH).json(&body))
            .await
    }

    pub async fn delete_journal(&self) -> Result<()> {
        self.execute("delete journal", self.request(Method::DELETE, JOURNAL_PATH))
            .await
    }

    pub async fn get_diff(&self) -> Result<DiffReport> {
        self.fetch("get diff", self.request(Method::GET, DIFF_PATH)).await
    }

    pub async fn delete_diff(&self) -> Result<()> {
        self.execute("delete diff", self.request(Method::DELETE, DIFF_PATH)).await
    }

    pub async fn get_destination(&self) -> Result<String> {
        let view: DestinationView = self
            .fetch("get destination", self.request(Method::GET, DESTINATION_PATH))
            .await?;
        Ok(view.destination)
    }

    pub async fn set_destination(&self, destination: &str) -> Result<()> {
        let view = DestinationView {
            destination: destination.to_string(),
        };
        self.execute(
            "set destination",
            self.request(Method::PUT, DESTINATION_PATH).json(&view),
        )
        .await
    }

    pub async fn set_mode(&self, mode: SimulationMode, arguments: Option<ModeArguments>) -> Result<()> {
        let view = ModeView::new(mode, arguments);
        self.execute("set mode", self.request(Method::PUT, MODE_PATH).json(&view))
            .await
    }

    pub async fn get_mode(&self) -> Result<ModeView> {
        self.fetch("get mode", self.request(Method::GET, MODE_PATH)).await
    }

    pub async fn get_info(&self) -> Result<InstanceInfo> {
        self.fetch("get info", self.request(Method::GET, INFO_PATH)).await
    }

    pub async fn get_state(&self) -> Result<StateView> {
        self.fetch("get state", self.request(Method::GET, STATE_PATH)).await
    }

    pub async fn set_state(&self, state: BTreeMap<String, String>) -> Result<()> {
        let view = StateView { state };
        self.execute("set state", self.request(Method::PUT, STATE_PATH).json(&view))
            .await
    }

    pub async fn delete_state(&self) -> Result<()> {
        self.execute("delete state", self.request(Method::DELETE, STATE_PATH))
            .await
    }
}

#[async_trait]
impl HealthIndicator for AdminClient {
    async fn is_healthy(&self) -> bool {
        self.health().await
    }
}

/// A missing version is an error; an unknown one only warns.
pub(crate) fn check_schema(meta: &Meta) -> Result<()> {
    if meta.schema_version.trim().is_empty() {
        return Err(HoverflyError::Schema(
            "Simulation is missing meta.schemaVersion".to_string(),
        ));
    }
    if !meta.is_supported() {
        warn!(schema_version = %meta.schema_version, "Unrecognised simulation schema version");
    }
    Ok(())
}

// The control plane reports failures as `{"error": "..."}`.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortAllocator;

    #[test]
    fn test_error_message_prefers_error_field() {
        assert_eq!(error_message(r#"{"error":"Invalid mode"}"#), "Invalid mode");
        assert_eq!(error_message("  plain text \n"), "plain text");
        assert_eq!(error_message(r#"{"other":1}"#), r#"{"other":1}"#);
    }

    #[test]
    fn test_schema_check() {
        assert!(check_schema(&Meta::default()).is_ok());

        let blank = Meta {
            schema_version: " ".to_string(),
            ..Meta::default()
        };
        assert!(matches!(check_schema(&blank), Err(HoverflyError::Schema(_))));

        let future = Meta {
            schema_version: "v9".to_string(),
            ..Meta::default()
        };
        assert!(check_schema(&future).is_ok());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = AdminClient::new("http://localhost:8888/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8888");
        assert!(!client.has_auth_token());
    }

    #[tokio::test]
    async fn test_health_is_false_when_nothing_listens() {
        let port = PortAllocator::find_free_port().unwrap();
        let client = AdminClient::new(format!("http://127.0.0.1:{}", port), None, Duration::from_millis(500)).unwrap();
        assert!(!client.health().await);
        assert!(!client.is_healthy().await);
    }

    #[tokio::test]
    async fn test_transport_failure_has_no_status() {
        let port = PortAllocator::find_free_port().unwrap();
        let client = AdminClient::new(format!("http://127.0.0.1:{}", port), None, Duration::from_millis(500)).unwrap();
        match client.delete_journal().await {
            Err(HoverflyError::Client(err)) => {
                assert_eq!(err.operation, "delete journal");
                assert_eq!(err.status, None);
            }
            other => panic!("expected client error, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_token_overrides_environment() {
        let config = ProxyConfiguration::remote()
            .host("hoverfly.example.com")
            .auth_token("explicit")
            .build()
            .unwrap();
        let client = AdminClient::from_config(&config).unwrap();
        assert!(client.has_auth_token());
        assert_eq!(client.base_url(), "http://hoverfly.example.com:8888");
    }
}
