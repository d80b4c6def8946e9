//! Lifecycle of one proxy instance
//!
//! A supervisor owns the child process, its temp directory and the installed
//! outbound trust from `start()` until `close()`. Remote targets skip the
//! binary extraction and spawn, and are only driven over the admin API.

use crate::admin::AdminClient;
use crate::aggregator::{merge_for_recapture, SimulationAggregator, SimulationPreprocessor, SimulationSource};
use crate::config::{mode_arguments_for, LocalConfig, ProxyConfiguration, Target};
use crate::exit::ExitRegistry;
use crate::health::HealthChecker;
use crate::logging::CHILD_LOG_TARGET;
use crate::platform::BinaryIdentifier;
use crate::ports::PortAllocator;
use crate::tempfiles::{ResourceKind, ResourceRoots, TempFileManager};
use crate::trust::{proxy_ca_pem, ProxySettings, TrustContext, TrustHandle};
use crate::verify::Times;
use crate::{HoverflyError, Result};
use hoverfly_common::{Journal, JournalQuery, ModeArguments, RequestMatcher, Simulation, SimulationMode};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SupervisorState::Created => "CREATED",
            SupervisorState::Starting => "STARTING",
            SupervisorState::Running => "RUNNING",
            SupervisorState::Stopping => "STOPPING",
            SupervisorState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// Paths of auxiliary files copied into the temp directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedFiles {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub client_ca: Option<PathBuf>,
    pub middleware_script: Option<PathBuf>,
}

pub struct ProcessSupervisor {
    config: ProxyConfiguration,
    state: SupervisorState,
    admin: AdminClient,
    aggregator: SimulationAggregator,
    temp_files: TempFileManager,
    child: Option<Child>,
    pid: Option<u32>,
    forwarders: Vec<JoinHandle<()>>,
    trust: Option<TrustHandle>,
    exit_id: Option<Uuid>,
    current_mode: SimulationMode,
}

impl ProcessSupervisor {
    pub fn new(config: ProxyConfiguration) -> Result<Self> {
        let admin = AdminClient::from_config(&config)?;
        let roots = match config.target() {
            Target::Local(local) => local.resource_roots.clone(),
            Target::Remote(_) => ResourceRoots::standard(None),
        };
        let http = reqwest::Client::builder()
            .timeout(config.common().request_timeout)
            .build()
            .map_err(|e| HoverflyError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        let current_mode = config.common().mode;

        Ok(Self {
            config,
            state: SupervisorState::Created,
            admin,
            aggregator: SimulationAggregator::new(roots, http),
            temp_files: TempFileManager::new(),
            child: None,
            pid: None,
            forwarders: Vec::new(),
            trust: None,
            exit_id: None,
            current_mode,
        })
    }

    /// Hook applied to every aggregated simulation before it is pushed.
    pub fn with_simulation_preprocessor(mut self, preprocessor: impl SimulationPreprocessor + 'static) -> Self {
        self.aggregator.set_preprocessor(Some(Box::new(preprocessor)));
        self
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn config(&self) -> &ProxyConfiguration {
        &self.config
    }

    pub fn admin(&self) -> &AdminClient {
        &self.admin
    }

    /// Pid of the spawned child. Kept after `close()` for inspection.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_files.path()
    }

    pub fn admin_port(&self) -> u16 {
        self.config.admin_port()
    }

    pub fn proxy_port(&self) -> u16 {
        self.config.proxy_port()
    }

    /// Last mode this supervisor set. The running instance is authoritative.
    pub fn current_mode(&self) -> SimulationMode {
        self.current_mode
    }

    pub async fn start(&mut self) -> Result<()> {
        match self.state {
            SupervisorState::Created => {}
            SupervisorState::Running => {
                warn!(pid = ?self.pid, "Proxy is already running, ignoring start");
                return Ok(());
            }
            state => {
                return Err(HoverflyError::InvalidState {
                    operation: "start".to_string(),
                    state: state.to_string(),
                })
            }
        }

        self.state = SupervisorState::Starting;
        match self.start_sequence().await {
            Ok(()) => {
                self.state = SupervisorState::Running;
                info!(
                    admin_port = self.admin_port(),
                    proxy_port = self.proxy_port(),
                    pid = ?self.pid,
                    remote = self.config.is_remote(),
                    "Proxy started"
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to start proxy: {}", e);
                self.shutdown().await;
                Err(e)
            }
        }
    }

    async fn start_sequence(&mut self) -> Result<()> {
        let common = self.config.common().clone();

        match self.config.target().clone() {
            Target::Local(local) => {
                let binary = BinaryIdentifier::detect()?;

                for requested in [common.admin_port, common.proxy_port] {
                    if requested.explicit {
                        PortAllocator::ensure_free(requested.port)?;
                    }
                }

                let binary_path = self.temp_files.copy_resource(
                    &binary.binary_name(),
                    &local.resource_roots,
                    ResourceKind::Executable,
                )?;
                let files = self.extract_files(&local)?;

                self.install_trust(!local.web_server)?;

                let args = command_args(&self.config, &local, &files);
                self.spawn(&binary_path, &args)?;
            }
            Target::Remote(_) => {
                self.install_trust(true)?;
            }
        }

        let checker = HealthChecker::new(common.health_check_timeout, common.health_check_retry_interval);
        checker.wait_until_healthy(&self.admin).await?;

        if self.config.is_remote() {
            if let Some(destination) = &common.destination {
                self.admin.set_destination(destination).await?;
            }
        }

        self.admin
            .set_mode(common.mode, self.config.mode_arguments())
            .await?;
        self.current_mode = common.mode;

        if let Target::Local(local) = self.config.target() {
            self.reset_journal().await;
            if local.register_exit_handler {
                let registry = ExitRegistry::global();
                self.exit_id = Some(registry.register(self.pid, self.temp_files.path().map(Path::to_path_buf)));
                registry.install_signal_handler();
            }
        }
        Ok(())
    }

    fn extract_files(&mut self, local: &LocalConfig) -> Result<ExtractedFiles> {
        let roots = &local.resource_roots;
        let mut files = ExtractedFiles::default();

        if let (Some(cert), Some(key)) = (&local.ssl_cert, &local.ssl_key) {
            files.cert = Some(self.temp_files.copy_resource(cert, roots, ResourceKind::Data)?);
            files.key = Some(self.temp_files.copy_resource(key, roots, ResourceKind::Data)?);
        }

        if let Some(auth) = &local.client_auth {
            files.client_cert = Some(self.temp_files.copy_resource(&auth.cert, roots, ResourceKind::Data)?);
            files.client_key = Some(self.temp_files.copy_resource(&auth.key, roots, ResourceKind::Data)?);
            if let Some(ca) = &auth.ca_cert {
                files.client_ca = Some(self.temp_files.copy_resource(ca, roots, ResourceKind::Data)?);
            }
        }

        if let Some(script) = local.middleware.as_ref().and_then(|m| m.script.as_ref()) {
            files.middleware_script = Some(self.temp_files.copy_resource(script, roots, ResourceKind::Data)?);
        }
        Ok(files)
    }

    fn install_trust(&mut self, route_through_proxy: bool) -> Result<()> {
        let pem = proxy_ca_pem(&self.config)?;
        let proxy = route_through_proxy.then(|| ProxySettings {
            proxy_url: self.config.proxy_url(),
            proxy_local_host: self.config.common().proxy_local_host,
        });
        self.trust = Some(TrustContext::global().install(pem.as_deref(), proxy)?);
        Ok(())
    }

    fn spawn(&mut self, binary: &Path, args: &[String]) -> Result<()> {
        info!(binary = %binary.display(), ?args, "Spawning proxy");

        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = self.temp_files.path() {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| HoverflyError::Spawn {
            binary: binary.to_path_buf(),
            source,
        })?;
        self.pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            self.forwarders.push(tokio::spawn(forward_lines(stdout, false)));
        }
        if let Some(stderr) = child.stderr.take() {
            self.forwarders.push(tokio::spawn(forward_lines(stderr, true)));
        }
        self.child = Some(child);
        Ok(())
    }

    /// Stop the proxy and release everything it holds. Always ends `STOPPED`.
    pub async fn close(&mut self) -> Result<()> {
        match self.state {
            SupervisorState::Stopped => {
                debug!("Proxy already stopped");
                return Ok(());
            }
            SupervisorState::Created => {
                self.state = SupervisorState::Stopped;
                return Ok(());
            }
            _ => {}
        }
        self.shutdown().await;
        info!(pid = ?self.pid, "Proxy stopped");
        Ok(())
    }

    async fn shutdown(&mut self) {
        self.state = SupervisorState::Stopping;

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                debug!("Kill signal not delivered: {}", e);
            }
            // The binary is deleted only once the process has exited.
            match child.wait().await {
                Ok(status) => debug!(%status, "Proxy process exited"),
                Err(e) => warn!("Failed to wait for proxy process: {}", e),
            }
        }
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }

        if let Err(e) = self.temp_files.purge() {
            warn!("Failed to purge temp files: {}", e);
        }
        if let Some(id) = self.exit_id.take() {
            ExitRegistry::global().deregister(&id);
        }
        if let Some(handle) = self.trust.take() {
            TrustContext::global().reset(handle);
        }

        self.state = SupervisorState::Stopped;
    }

    fn ensure_running(&self, operation: &str) -> Result<()> {
        if self.state == SupervisorState::Running {
            Ok(())
        } else {
            Err(HoverflyError::InvalidState {
                operation: operation.to_string(),
                state: self.state.to_string(),
            })
        }
    }

    /// Aggregate `sources` and replace the proxy's simulation with the result.
    pub async fn simulate(&self, sources: &[SimulationSource]) -> Result<()> {
        self.ensure_running("simulate")?;
        self.reset_journal().await;
        let simulation = self.aggregator.aggregate(sources).await?;
        self.admin.set_simulation(&simulation).await
    }

    /// Switch mode with the arguments the configuration implies for it.
    pub async fn set_mode(&mut self, mode: SimulationMode) -> Result<()> {
        let arguments = mode_arguments_for(self.config.common(), mode);
        self.apply_mode(mode, arguments).await
    }

    /// Switch mode with explicit arguments, ignoring the configured ones.
    pub async fn set_mode_with_arguments(&mut self, mode: SimulationMode, arguments: ModeArguments) -> Result<()> {
        self.apply_mode(mode, Some(arguments)).await
    }

    async fn apply_mode(&mut self, mode: SimulationMode, arguments: Option<ModeArguments>) -> Result<()> {
        self.ensure_running("set mode")?;
        self.reset_journal().await;
        self.admin.set_mode(mode, arguments).await?;
        self.current_mode = mode;
        Ok(())
    }

    pub async fn get_mode(&self) -> Result<SimulationMode> {
        self.ensure_running("get mode")?;
        Ok(self.admin.get_mode().await?.mode)
    }

    pub async fn set_destination(&self, destination: &str) -> Result<()> {
        self.ensure_running("set destination")?;
        self.admin.set_destination(destination).await
    }

    /// Clear simulation, journal and state. Failures are logged.
    pub async fn reset(&self) {
        if let Err(e) = self.admin.delete_simulation().await {
            warn!("Failed to reset simulation: {}", e);
        }
        self.reset_journal().await;
        self.reset_state().await;
    }

    pub async fn reset_journal(&self) {
        if let Err(e) = self.admin.delete_journal().await {
            warn!("Failed to reset journal: {}", e);
        }
    }

    pub async fn reset_diff(&self) {
        if let Err(e) = self.admin.delete_diff().await {
            warn!("Failed to reset diff: {}", e);
        }
    }

    pub async fn reset_state(&self) {
        if let Err(e) = self.admin.delete_state().await {
            warn!("Failed to reset state: {}", e);
        }
    }

    pub async fn get_journal(&self, query: &JournalQuery) -> Result<Journal> {
        self.ensure_running("get journal")?;
        self.admin.get_journal(query).await
    }

    /// Check the number of journaled requests matching `matcher`.
    pub async fn verify(&self, matcher: &RequestMatcher, times: Times) -> Result<()> {
        self.ensure_running("verify")?;
        let journal = self.admin.search_journal(matcher).await?;
        let count = journal.entries().len();
        if times.matches(count) {
            return Ok(());
        }
        let shape = serde_json::to_string(matcher)?;
        Err(HoverflyError::Verification(format!(
            "Expected {} request(s) matching {}, but found {}",
            times, shape, count
        )))
    }

    pub async fn verify_zero_requests(&self) -> Result<()> {
        self.ensure_running("verify")?;
        let journal = self.admin.get_journal(&JournalQuery::new()).await?;
        if journal.is_empty() {
            Ok(())
        } else {
            Err(HoverflyError::Verification(format!(
                "Expected no requests, but found {}",
                journal.entries().len()
            )))
        }
    }

    /// Write the proxy's current simulation to `path`. With incremental
    /// capture an existing export is merged rather than overwritten.
    pub async fn export_simulation(&self, path: &Path) -> Result<Simulation> {
        self.ensure_running("export simulation")?;
        let captured = self.admin.get_simulation().await?;

        let simulation = if self.config.common().incremental_capture && path.is_file() {
            let existing = SimulationSource::file(path)
                .load(&ResourceRoots::default(), &reqwest::Client::new())
                .await?;
            merge_for_recapture(existing, captured)
        } else {
            captured
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&simulation)?;
        tokio::fs::write(path, body).await?;
        info!(path = %path.display(), pairs = simulation.pairs().len(), "Exported simulation");
        Ok(simulation)
    }
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("state", &self.state)
            .field("pid", &self.pid)
            .field("admin", &self.admin.base_url())
            .field("temp_dir", &self.temp_files.path())
            .finish()
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        if !matches!(self.state, SupervisorState::Starting | SupervisorState::Running) {
            return;
        }
        warn!(pid = ?self.pid, "Supervisor dropped without close, cleaning up");

        // kill_on_drop reaps the child if it has not exited yet.
        if let Some(mut child) = self.child.take() {
            let _ = child.start_kill();
            let _ = child.try_wait();
        }
        for forwarder in self.forwarders.drain(..) {
            forwarder.abort();
        }
        if let Err(e) = self.temp_files.purge() {
            warn!("Failed to purge temp files: {}", e);
        }
        if let Some(id) = self.exit_id.take() {
            ExitRegistry::global().deregister(&id);
        }
        if let Some(handle) = self.trust.take() {
            TrustContext::global().reset(handle);
        }
        self.state = SupervisorState::Stopped;
    }
}

async fn forward_lines<R>(reader: R, is_stderr: bool)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if is_stderr => warn!(target: CHILD_LOG_TARGET, "{}", line),
            Ok(Some(line)) => info!(target: CHILD_LOG_TARGET, "{}", line),
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading proxy output: {}", e);
                break;
            }
        }
    }
}

/// Command line for a local instance.
pub fn command_args(config: &ProxyConfiguration, local: &LocalConfig, files: &ExtractedFiles) -> Vec<String> {
    let common = config.common();
    let mut args: Vec<String> = vec![
        "-db".into(),
        "memory".into(),
        "-pp".into(),
        config.proxy_port().to_string(),
        "-ap".into(),
        config.admin_port().to_string(),
    ];

    if local.web_server {
        args.push("-webserver".into());
    }
    if local.tls_verification_disabled {
        args.push("-tls-verification=false".into());
    }
    if local.plain_http_tunneling {
        args.push("-plain-http-tunneling".into());
    }
    if let Some(upstream) = &local.upstream_proxy {
        args.extend(["-upstream-proxy".into(), upstream.clone()]);
    }
    if let Some(destination) = &common.destination {
        args.extend(["-destination".into(), destination.clone()]);
    }
    if let (Some(cert), Some(key)) = (&files.cert, &files.key) {
        args.extend([
            "-cert".into(),
            cert.display().to_string(),
            "-key".into(),
            key.display().to_string(),
        ]);
    }
    if let (Some(auth), Some(cert), Some(key)) = (&local.client_auth, &files.client_cert, &files.client_key) {
        args.extend([
            "-client-authentication-client-cert".into(),
            cert.display().to_string(),
            "-client-authentication-client-key".into(),
            key.display().to_string(),
        ]);
        if !auth.destinations.is_empty() {
            args.extend([
                "-client-authentication-destination".into(),
                auth.destinations.join("|"),
            ]);
        }
        if let Some(ca) = &files.client_ca {
            args.extend(["-client-authentication-ca-cert".into(), ca.display().to_string()]);
        }
    }
    if let Some(middleware) = &local.middleware {
        let value = match &files.middleware_script {
            Some(script) => format!("{} {}", middleware.binary, script.display()),
            None => middleware.binary.clone(),
        };
        args.extend(["-middleware".into(), value]);
    }
    if let Some(level) = &local.log_level {
        args.extend(["-log-level".into(), level.clone()]);
    }
    args.extend(local.extra_commands.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientAuth;
    use std::time::Duration;

    fn local_of(config: &ProxyConfiguration) -> LocalConfig {
        match config.target() {
            Target::Local(local) => local.clone(),
            Target::Remote(_) => panic!("expected local target"),
        }
    }

    fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_command_args_defaults() {
        let config = ProxyConfiguration::local()
            .admin_port(18888)
            .proxy_port(18500)
            .build()
            .unwrap();
        let args = command_args(&config, &local_of(&config), &ExtractedFiles::default());
        assert_eq!(args, vec!["-db", "memory", "-pp", "18500", "-ap", "18888"]);
    }

    #[test]
    fn test_command_args_with_options() {
        let config = ProxyConfiguration::local()
            .web_server(true)
            .disable_tls_verification()
            .upstream_proxy("corp-proxy:8080")
            .destination("api.example.com")
            .log_level("debug")
            .add_commands(["-disable-cache"])
            .build()
            .unwrap();
        let mut local = local_of(&config);
        local.client_auth = Some(ClientAuth {
            cert: "client.pem".into(),
            key: "client.key".into(),
            destinations: vec!["a.com".into(), "b.com".into()],
            ca_cert: None,
        });
        let files = ExtractedFiles {
            cert: Some(PathBuf::from("/tmp/ca.pem")),
            key: Some(PathBuf::from("/tmp/ca.key")),
            client_cert: Some(PathBuf::from("/tmp/client.pem")),
            client_key: Some(PathBuf::from("/tmp/client.key")),
            ..ExtractedFiles::default()
        };

        let args = command_args(&config, &local, &files);
        assert!(args.contains(&"-webserver".to_string()));
        assert!(args.contains(&"-tls-verification=false".to_string()));
        assert_eq!(flag_value(&args, "-upstream-proxy"), Some("corp-proxy:8080"));
        assert_eq!(flag_value(&args, "-destination"), Some("api.example.com"));
        assert_eq!(flag_value(&args, "-cert"), Some("/tmp/ca.pem"));
        assert_eq!(flag_value(&args, "-client-authentication-destination"), Some("a.com|b.com"));
        assert_eq!(flag_value(&args, "-log-level"), Some("debug"));
        assert_eq!(args.last().map(String::as_str), Some("-disable-cache"));
    }

    #[test]
    fn test_middleware_flag_joins_binary_and_script() {
        let config = ProxyConfiguration::local().build().unwrap();
        let mut local = local_of(&config);
        local.middleware = Some(crate::config::Middleware {
            binary: "python3".into(),
            script: Some("middleware.py".into()),
        });
        let files = ExtractedFiles {
            middleware_script: Some(PathBuf::from("/tmp/hoverfly.x/middleware.py")),
            ..ExtractedFiles::default()
        };
        let args = command_args(&config, &local, &files);
        assert_eq!(flag_value(&args, "-middleware"), Some("python3 /tmp/hoverfly.x/middleware.py"));
    }

    #[tokio::test]
    async fn test_operations_require_running() {
        let config = ProxyConfiguration::local().build().unwrap();
        let supervisor = ProcessSupervisor::new(config).unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Created);
        let err = supervisor.simulate(&[]).await.unwrap_err();
        assert!(matches!(err, HoverflyError::InvalidState { ref state, .. } if state == "CREATED"));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProxyConfiguration::local()
            .binary_location(dir.path())
            .build()
            .unwrap();
        let mut supervisor = ProcessSupervisor::new(config).unwrap();

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, HoverflyError::ResourceNotFound { .. }));
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(supervisor.pid().is_none());
        assert!(supervisor.temp_dir().is_none());
    }

    #[tokio::test]
    async fn test_stopped_supervisor_cannot_restart() {
        let config = ProxyConfiguration::local().build().unwrap();
        let mut supervisor = ProcessSupervisor::new(config).unwrap();
        supervisor.close().await.unwrap();
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
        assert!(matches!(
            supervisor.start().await,
            Err(HoverflyError::InvalidState { .. })
        ));
        supervisor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_remote_with_zero_timeout_fails_without_extraction() {
        let port = PortAllocator::find_free_port().unwrap();
        let config = ProxyConfiguration::remote()
            .host("127.0.0.1")
            .admin_port(port)
            .proxy_port(port.wrapping_add(1).max(1))
            .health_check_timeout(Duration::ZERO)
            .build()
            .unwrap();
        let mut supervisor = ProcessSupervisor::new(config).unwrap();

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, HoverflyError::HealthCheckTimeout { .. }));
        assert!(supervisor.temp_dir().is_none());
        assert!(supervisor.pid().is_none());
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }
}
