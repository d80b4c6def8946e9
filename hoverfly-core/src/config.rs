//! Configuration types and builders
//!
//! A [`ProxyConfiguration`] is built once per test scope and handed to a
//! supervisor. The `Local` / `Remote` split is a sum type validated in
//! `build()`, which is the only place configuration errors are raised.

use crate::ports::{PortAllocator, PortSpec};
use crate::tempfiles::ResourceRoots;
use crate::{HoverflyError, Result};
use hoverfly_common::{MatchingStrategy, ModeArguments, SimulationMode};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ADMIN_PORT: u16 = 8888;
pub const DEFAULT_PROXY_PORT: u16 = 8500;
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_HEALTH_CHECK_RETRY_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings shared by local and remote instances.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonConfig {
    pub scheme: String,
    pub host: String,
    pub admin_port: PortSpec,
    pub proxy_port: PortSpec,
    /// Route requests for localhost through the proxy too
    pub proxy_local_host: bool,
    pub destination: Option<String>,
    /// Header names to record in capture mode; `*` records all
    pub capture_headers: Vec<String>,
    pub stateful_capture: bool,
    /// Merge captures into an existing export instead of overwriting it
    pub incremental_capture: bool,
    pub matching_strategy: Option<MatchingStrategy>,
    pub mode: SimulationMode,
    pub health_check_timeout: Duration,
    pub health_check_retry_interval: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAuth {
    pub cert: String,
    pub key: String,
    pub destinations: Vec<String>,
    pub ca_cert: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Middleware {
    /// Interpreter or executable, e.g. `python3`
    pub binary: String,
    /// Script resource passed to the binary
    pub script: Option<String>,
}

/// Settings only meaningful for a process this crate spawns.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalConfig {
    /// Directory searched first for the proxy binary and other resources
    pub binary_location: Option<PathBuf>,
    pub resource_roots: ResourceRoots,
    pub web_server: bool,
    pub tls_verification_disabled: bool,
    pub plain_http_tunneling: bool,
    pub upstream_proxy: Option<String>,
    /// CA certificate and key the proxy signs intercepted traffic with
    pub ssl_cert: Option<String>,
    pub ssl_key: Option<String>,
    pub client_auth: Option<ClientAuth>,
    pub middleware: Option<Middleware>,
    pub log_level: Option<String>,
    /// Raw flags appended to the command line
    pub extra_commands: Vec<String>,
    /// Install the process-exit cleanup handler on start
    pub register_exit_handler: bool,
}

/// Settings for an externally hosted instance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteConfig {
    /// Overrides `HOVERFLY_AUTH_TOKEN`
    pub auth_token: Option<String>,
    /// CA the remote instance signs intercepted traffic with
    pub ca_cert: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Local(LocalConfig),
    Remote(RemoteConfig),
}

/// Immutable, validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfiguration {
    common: CommonConfig,
    target: Target,
}

impl ProxyConfiguration {
    pub fn local() -> ConfigBuilder<LocalSettings> {
        ConfigBuilder::new(LocalSettings::default())
    }

    pub fn remote() -> ConfigBuilder<RemoteSettings> {
        ConfigBuilder::new(RemoteSettings::default())
    }

    pub fn common(&self) -> &CommonConfig {
        &self.common
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.target, Target::Remote(_))
    }

    pub fn admin_port(&self) -> u16 {
        self.common.admin_port.port
    }

    pub fn proxy_port(&self) -> u16 {
        self.common.proxy_port.port
    }

    /// Base URL of the control plane, without trailing slash.
    pub fn admin_base_url(&self) -> String {
        format!("{}://{}:{}", self.common.scheme, self.common.host, self.admin_port())
    }

    /// Address test traffic should be proxied through.
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.common.host, self.proxy_port())
    }

    /// Arguments sent with the initial mode change, if any apply.
    pub fn mode_arguments(&self) -> Option<ModeArguments> {
        mode_arguments_for(&self.common, self.common.mode)
    }
}

pub(crate) fn mode_arguments_for(common: &CommonConfig, mode: SimulationMode) -> Option<ModeArguments> {
    let mut arguments = ModeArguments::default();
    match mode {
        SimulationMode::Capture => {
            if !common.capture_headers.is_empty() {
                arguments.headers_whitelist = Some(common.capture_headers.clone());
            }
            if common.stateful_capture {
                arguments.stateful = Some(true);
            }
        }
        SimulationMode::Simulate | SimulationMode::Spy => {
            arguments.matching_strategy = common.matching_strategy;
        }
        SimulationMode::Diff => {
            if !common.capture_headers.is_empty() {
                arguments.headers_whitelist = Some(common.capture_headers.clone());
            }
        }
        SimulationMode::Modify => {}
    }
    if arguments.is_empty() {
        None
    } else {
        Some(arguments)
    }
}

/// Common builder fields; `T` carries the target-specific part.
#[derive(Debug, Clone)]
pub struct ConfigBuilder<T> {
    scheme: String,
    host: Option<String>,
    admin_port: Option<u16>,
    proxy_port: Option<u16>,
    proxy_local_host: bool,
    destination: Option<String>,
    capture_headers: Vec<String>,
    stateful_capture: bool,
    incremental_capture: bool,
    matching_strategy: Option<MatchingStrategy>,
    mode: SimulationMode,
    health_check_timeout: Duration,
    health_check_retry_interval: Duration,
    request_timeout: Duration,
    target: T,
}

#[derive(Debug, Clone)]
pub struct LocalSettings {
    binary_location: Option<PathBuf>,
    web_server: bool,
    tls_verification_disabled: bool,
    plain_http_tunneling: bool,
    upstream_proxy: Option<String>,
    ssl_cert: Option<String>,
    ssl_key: Option<String>,
    client_auth: Option<ClientAuth>,
    middleware: Option<Middleware>,
    log_level: Option<String>,
    extra_commands: Vec<String>,
    register_exit_handler: bool,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            binary_location: None,
            web_server: false,
            tls_verification_disabled: false,
            plain_http_tunneling: false,
            upstream_proxy: None,
            ssl_cert: None,
            ssl_key: None,
            client_auth: None,
            middleware: None,
            log_level: None,
            extra_commands: Vec::new(),
            register_exit_handler: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoteSettings {
    auth_token: Option<String>,
    ca_cert: Option<String>,
}

impl<T> ConfigBuilder<T> {
    fn new(target: T) -> Self {
        Self {
            scheme: "http".to_string(),
            host: None,
            admin_port: None,
            proxy_port: None,
            proxy_local_host: false,
            destination: None,
            capture_headers: Vec::new(),
            stateful_capture: false,
            incremental_capture: false,
            matching_strategy: None,
            mode: SimulationMode::Simulate,
            health_check_timeout: DEFAULT_HEALTH_CHECK_TIMEOUT,
            health_check_retry_interval: DEFAULT_HEALTH_CHECK_RETRY_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            target,
        }
    }

    pub fn scheme(mut self, scheme: &str) -> Self {
        self.scheme = scheme.to_ascii_lowercase();
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn admin_port(mut self, port: u16) -> Self {
        self.admin_port = Some(port);
        self
    }

    pub fn proxy_port(mut self, port: u16) -> Self {
        self.proxy_port = Some(port);
        self
    }

    pub fn proxy_local_host(mut self, enabled: bool) -> Self {
        self.proxy_local_host = enabled;
        self
    }

    /// Regex of hosts the proxy should act on; others pass through untouched.
    pub fn destination(mut self, destination: &str) -> Self {
        self.destination = Some(destination.to_string());
        self
    }

    pub fn capture_headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.capture_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn capture_all_headers(mut self) -> Self {
        self.capture_headers = vec!["*".to_string()];
        self
    }

    pub fn stateful_capture(mut self, enabled: bool) -> Self {
        self.stateful_capture = enabled;
        self
    }

    pub fn incremental_capture(mut self, enabled: bool) -> Self {
        self.incremental_capture = enabled;
        self
    }

    pub fn matching_strategy(mut self, strategy: MatchingStrategy) -> Self {
        self.matching_strategy = Some(strategy);
        self
    }

    pub fn mode(mut self, mode: SimulationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = timeout;
        self
    }

    pub fn health_check_retry_interval(mut self, interval: Duration) -> Self {
        self.health_check_retry_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn build_common(&self, default_host: &str, admin_port: PortSpec, proxy_port: PortSpec) -> Result<CommonConfig> {
        if self.scheme != "http" && self.scheme != "https" {
            return Err(HoverflyError::Configuration(format!(
                "Unsupported admin scheme '{}'",
                self.scheme
            )));
        }

        let host = self.host.clone().unwrap_or_else(|| default_host.to_string());
        if host.trim().is_empty() {
            return Err(HoverflyError::Configuration("Host must not be empty".to_string()));
        }

        if admin_port.port == proxy_port.port {
            return Err(HoverflyError::Configuration(format!(
                "Admin and proxy port must differ (both {})",
                admin_port.port
            )));
        }

        if let Some(destination) = &self.destination {
            regex::Regex::new(destination).map_err(|e| {
                HoverflyError::Configuration(format!("Invalid destination '{}': {}", destination, e))
            })?;
        }

        if self.health_check_retry_interval.is_zero() {
            return Err(HoverflyError::Configuration(
                "Health check retry interval must be positive".to_string(),
            ));
        }

        Ok(CommonConfig {
            scheme: self.scheme.clone(),
            host,
            admin_port,
            proxy_port,
            proxy_local_host: self.proxy_local_host,
            destination: self.destination.clone(),
            capture_headers: self.capture_headers.clone(),
            stateful_capture: self.stateful_capture,
            incremental_capture: self.incremental_capture,
            matching_strategy: self.matching_strategy,
            mode: self.mode,
            health_check_timeout: self.health_check_timeout,
            health_check_retry_interval: self.health_check_retry_interval,
            request_timeout: self.request_timeout,
        })
    }
}

impl ConfigBuilder<LocalSettings> {
    /// Directory holding the proxy binary, searched before the standard roots.
    pub fn binary_location(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target.binary_location = Some(dir.into());
        self
    }

    /// Serve simulations as a web server instead of acting as a proxy.
    pub fn web_server(mut self, enabled: bool) -> Self {
        self.target.web_server = enabled;
        self
    }

    pub fn disable_tls_verification(mut self) -> Self {
        self.target.tls_verification_disabled = true;
        self
    }

    pub fn plain_http_tunneling(mut self, enabled: bool) -> Self {
        self.target.plain_http_tunneling = enabled;
        self
    }

    pub fn upstream_proxy(mut self, address: &str) -> Self {
        self.target.upstream_proxy = Some(address.to_string());
        self
    }

    /// Replace the default CA with a certificate / key pair (resource names or paths).
    pub fn ssl_certificate(mut self, cert: &str, key: &str) -> Self {
        self.target.ssl_cert = Some(cert.to_string());
        self.target.ssl_key = Some(key.to_string());
        self
    }

    pub fn ssl_cert_path(mut self, cert: &str) -> Self {
        self.target.ssl_cert = Some(cert.to_string());
        self
    }

    pub fn ssl_key_path(mut self, key: &str) -> Self {
        self.target.ssl_key = Some(key.to_string());
        self
    }

    pub fn client_auth(mut self, auth: ClientAuth) -> Self {
        self.target.client_auth = Some(auth);
        self
    }

    pub fn middleware(mut self, binary: &str, script: Option<&str>) -> Self {
        self.target.middleware = Some(Middleware {
            binary: binary.to_string(),
            script: script.map(str::to_string),
        });
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.target.log_level = Some(level.to_string());
        self
    }

    pub fn add_commands(mut self, commands: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.target.extra_commands.extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn register_exit_handler(mut self, enabled: bool) -> Self {
        self.target.register_exit_handler = enabled;
        self
    }

    pub fn build(self) -> Result<ProxyConfiguration> {
        let settings = &self.target;

        if let Some(dir) = &settings.binary_location {
            if !dir.is_dir() {
                return Err(HoverflyError::Configuration(format!(
                    "Binary location {} is not a directory",
                    dir.display()
                )));
            }
        }
        let resource_roots = ResourceRoots::standard(settings.binary_location.as_deref());

        match (&settings.ssl_cert, &settings.ssl_key) {
            (Some(cert), Some(key)) => {
                resource_roots.resolve(cert)?;
                resource_roots.resolve(key)?;
            }
            (None, None) => {}
            _ => {
                return Err(HoverflyError::Configuration(
                    "Both SSL certificate and key must be provided".to_string(),
                ))
            }
        }

        if let Some(auth) = &settings.client_auth {
            if auth.cert.is_empty() || auth.key.is_empty() {
                return Err(HoverflyError::Configuration(
                    "Client authentication requires both a certificate and a key".to_string(),
                ));
            }
            resource_roots.resolve(&auth.cert)?;
            resource_roots.resolve(&auth.key)?;
            if let Some(ca) = &auth.ca_cert {
                resource_roots.resolve(ca)?;
            }
        }

        if let Some(middleware) = &settings.middleware {
            if middleware.binary.trim().is_empty() {
                return Err(HoverflyError::Configuration(
                    "Middleware binary must not be empty".to_string(),
                ));
            }
            if let Some(script) = &middleware.script {
                resource_roots.resolve(script)?;
            }
        }

        // Explicit ports are checked for availability at start, not here.
        let admin_port = PortAllocator::resolve(self.admin_port)?;
        let mut proxy_port = PortAllocator::resolve(self.proxy_port)?;
        while !proxy_port.explicit && proxy_port.port == admin_port.port {
            proxy_port = PortAllocator::resolve(None)?;
        }
        let common = self.build_common("localhost", admin_port, proxy_port)?;

        let settings = self.target;
        Ok(ProxyConfiguration {
            common,
            target: Target::Local(LocalConfig {
                binary_location: settings.binary_location,
                resource_roots,
                web_server: settings.web_server,
                tls_verification_disabled: settings.tls_verification_disabled,
                plain_http_tunneling: settings.plain_http_tunneling,
                upstream_proxy: settings.upstream_proxy,
                ssl_cert: settings.ssl_cert,
                ssl_key: settings.ssl_key,
                client_auth: settings.client_auth,
                middleware: settings.middleware,
                log_level: settings.log_level,
                extra_commands: settings.extra_commands,
                register_exit_handler: settings.register_exit_handler,
            }),
        })
    }
}

impl ConfigBuilder<RemoteSettings> {
    pub fn auth_token(mut self, token: &str) -> Self {
        self.target.auth_token = Some(token.to_string());
        self
    }

    /// CA used by the remote instance, trusted by this process's HTTP clients.
    pub fn ca_cert(mut self, path: &str) -> Self {
        self.target.ca_cert = Some(path.to_string());
        self
    }

    pub fn build(self) -> Result<ProxyConfiguration> {
        if self.host.is_none() {
            return Err(HoverflyError::Configuration(
                "Remote instance requires a host".to_string(),
            ));
        }

        if let Some(ca) = &self.target.ca_cert {
            ResourceRoots::standard(None).resolve(ca)?;
        }

        let admin_port = PortSpec {
            port: non_zero(self.admin_port.unwrap_or(DEFAULT_ADMIN_PORT))?,
            explicit: true,
        };
        let proxy_port = PortSpec {
            port: non_zero(self.proxy_port.unwrap_or(DEFAULT_PROXY_PORT))?,
            explicit: true,
        };
        let common = self.build_common("localhost", admin_port, proxy_port)?;

        let base = format!("{}://{}:{}", common.scheme, common.host, common.admin_port.port);
        url::Url::parse(&base)
            .map_err(|e| HoverflyError::Configuration(format!("Invalid remote address '{}': {}", base, e)))?;

        Ok(ProxyConfiguration {
            common,
            target: Target::Remote(RemoteConfig {
                auth_token: self.target.auth_token,
                ca_cert: self.target.ca_cert,
            }),
        })
    }
}

fn non_zero(port: u16) -> Result<u16> {
    if port == 0 {
        Err(HoverflyError::Configuration(
            "Port must be a positive integer".to_string(),
        ))
    } else {
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_local_defaults_resolve_ephemeral_ports_once() {
        let config = ProxyConfiguration::local().build().unwrap();
        let common = config.common();
        assert!(!common.admin_port.explicit);
        assert!(!common.proxy_port.explicit);
        assert_ne!(config.admin_port(), config.proxy_port());
        assert_eq!(config.admin_port(), config.clone().admin_port());
        assert_eq!(common.host, "localhost");
        assert_eq!(common.mode, SimulationMode::Simulate);
        assert!(!config.is_remote());
    }

    #[test]
    fn test_explicit_ports_are_kept() {
        let config = ProxyConfiguration::local()
            .admin_port(18888)
            .proxy_port(18500)
            .build()
            .unwrap();
        assert_eq!(config.admin_port(), 18888);
        assert!(config.common().admin_port.explicit);
        assert_eq!(config.admin_base_url(), "http://localhost:18888");
        assert_eq!(config.proxy_url(), "http://localhost:18500");
    }

    #[test]
    fn test_same_ports_conflict() {
        let err = ProxyConfiguration::local()
            .admin_port(9000)
            .proxy_port(9000)
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_zero_port_rejected() {
        assert!(ProxyConfiguration::local().admin_port(0).build().is_err());
        assert!(ProxyConfiguration::remote().host("h").proxy_port(0).build().is_err());
    }

    #[test]
    fn test_cert_without_key_is_rejected() {
        let dir = tempdir().unwrap();
        let cert = dir.path().join("ca.pem");
        fs::write(&cert, "cert").unwrap();
        let err = ProxyConfiguration::local()
            .ssl_cert_path(cert.to_str().unwrap())
            .build()
            .unwrap_err();
        assert!(matches!(err, HoverflyError::Configuration(_)));
    }

    #[test]
    fn test_missing_cert_path_is_rejected() {
        let err = ProxyConfiguration::local()
            .ssl_certificate("/definitely/missing/ca.pem", "/definitely/missing/ca.key")
            .build()
            .unwrap_err();
        assert!(matches!(err, HoverflyError::ResourceNotFound { .. }));
    }

    #[test]
    fn test_invalid_destination_regex() {
        let err = ProxyConfiguration::local().destination("([").build().unwrap_err();
        assert!(matches!(err, HoverflyError::Configuration(_)));
    }

    #[test]
    fn test_binary_location_must_be_directory() {
        let err = ProxyConfiguration::local()
            .binary_location("/definitely/missing/dir")
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_remote_defaults() {
        let config = ProxyConfiguration::remote()
            .host("hoverfly.example.com")
            .scheme("https")
            .auth_token("secret")
            .build()
            .unwrap();
        assert!(config.is_remote());
        assert_eq!(config.admin_port(), DEFAULT_ADMIN_PORT);
        assert_eq!(config.proxy_port(), DEFAULT_PROXY_PORT);
        assert_eq!(config.admin_base_url(), "https://hoverfly.example.com:8888");
        match config.target() {
            Target::Remote(remote) => assert_eq!(remote.auth_token.as_deref(), Some("secret")),
            other => panic!("expected remote target, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_requires_host() {
        assert!(ProxyConfiguration::remote().build().is_err());
    }

    #[test]
    fn test_capture_mode_arguments() {
        let config = ProxyConfiguration::local()
            .mode(SimulationMode::Capture)
            .capture_all_headers()
            .stateful_capture(true)
            .build()
            .unwrap();
        let arguments = config.mode_arguments().unwrap();
        assert_eq!(arguments.headers_whitelist, Some(vec!["*".to_string()]));
        assert_eq!(arguments.stateful, Some(true));

        let config = ProxyConfiguration::local().build().unwrap();
        assert!(config.mode_arguments().is_none());
    }

    #[test]
    fn test_zero_retry_interval_rejected() {
        let err = ProxyConfiguration::local()
            .health_check_retry_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
