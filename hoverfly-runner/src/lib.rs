//! Hoverfly Runner
//!
//! Starts a supervised (or remote) Hoverfly instance from command line flags
//! and an optional TOML file, loads simulations into it and keeps it running
//! until shut down.

use anyhow::{bail, Context};
use clap::Parser;
use hoverfly_core::model::SimulationMode;
use hoverfly_core::{LoggingConfig, ProcessSupervisor, ProxyConfiguration, SimulationSource};
use serde::Deserialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// TOML file with runner settings; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Initial mode (simulate, capture, spy, diff, modify)
    #[arg(long)]
    pub mode: Option<SimulationMode>,

    #[arg(long)]
    pub admin_port: Option<u16>,

    #[arg(long)]
    pub proxy_port: Option<u16>,

    /// Drive an existing instance on this host instead of spawning one
    #[arg(long)]
    pub remote_host: Option<String>,

    /// Simulation file, resource name or URL (repeatable)
    #[arg(long = "simulation")]
    pub simulations: Vec<String>,

    /// Write the instance's simulation here on shutdown
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Directory searched first for the binary and other resources
    #[arg(long)]
    pub resource_dir: Option<PathBuf>,

    #[arg(long)]
    pub log_level: Option<String>,

    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Only act on hosts matching this regex
    #[arg(long)]
    pub destination: Option<String>,

    #[arg(long)]
    pub webserver: bool,

    #[arg(long)]
    pub capture_all_headers: bool,

    /// Merge the export into an existing file instead of overwriting it
    #[arg(long)]
    pub incremental_capture: bool,

    /// Raw flag passed through to the proxy binary (repeatable)
    #[arg(long = "extra-flag", allow_hyphen_values = true)]
    pub extra_flags: Vec<String>,
}

/// Runner settings as read from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ConfigFile {
    pub mode: Option<SimulationMode>,
    pub admin_port: Option<u16>,
    pub proxy_port: Option<u16>,
    pub remote_host: Option<String>,
    pub simulations: Vec<String>,
    pub export: Option<PathBuf>,
    pub resource_dir: Option<PathBuf>,
    pub destination: Option<String>,
    pub webserver: bool,
    pub capture_all_headers: bool,
    pub incremental_capture: bool,
    pub extra_flags: Vec<String>,
    pub health_check_timeout_secs: Option<u64>,
    pub logging: Option<LoggingConfig>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let body = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&body).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(body: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(body)?)
    }

    /// Apply command line flags on top of the file values.
    pub fn merge_args(mut self, args: &Args) -> Self {
        if args.mode.is_some() {
            self.mode = args.mode;
        }
        if args.admin_port.is_some() {
            self.admin_port = args.admin_port;
        }
        if args.proxy_port.is_some() {
            self.proxy_port = args.proxy_port;
        }
        if args.remote_host.is_some() {
            self.remote_host = args.remote_host.clone();
        }
        if !args.simulations.is_empty() {
            self.simulations = args.simulations.clone();
        }
        if args.export.is_some() {
            self.export = args.export.clone();
        }
        if args.resource_dir.is_some() {
            self.resource_dir = args.resource_dir.clone();
        }
        if args.destination.is_some() {
            self.destination = args.destination.clone();
        }
        self.webserver |= args.webserver;
        self.capture_all_headers |= args.capture_all_headers;
        self.incremental_capture |= args.incremental_capture;
        self.extra_flags.extend(args.extra_flags.iter().cloned());
        self
    }

    pub fn logging_config(&self, args: &Args) -> LoggingConfig {
        let mut logging = self.logging.clone().unwrap_or_default();
        if let Some(level) = &args.log_level {
            logging.level = level.clone();
        }
        if args.log_file.is_some() {
            logging.log_file = args.log_file.clone();
        }
        logging
    }

    pub fn proxy_configuration(&self) -> anyhow::Result<ProxyConfiguration> {
        let mode = self.mode.unwrap_or(SimulationMode::Simulate);
        let timeout = self.health_check_timeout_secs.map(Duration::from_secs);

        let config = match &self.remote_host {
            Some(host) => {
                let mut builder = ProxyConfiguration::remote().host(host).mode(mode);
                if let Some(port) = self.admin_port {
                    builder = builder.admin_port(port);
                }
                if let Some(port) = self.proxy_port {
                    builder = builder.proxy_port(port);
                }
                if let Some(destination) = &self.destination {
                    builder = builder.destination(destination);
                }
                if self.capture_all_headers {
                    builder = builder.capture_all_headers();
                }
                if let Some(timeout) = timeout {
                    builder = builder.health_check_timeout(timeout);
                }
                if self.webserver || !self.extra_flags.is_empty() {
                    warn!("Web server and extra flags only apply to a local instance");
                }
                builder.incremental_capture(self.incremental_capture).build()?
            }
            None => {
                let mut builder = ProxyConfiguration::local()
                    .mode(mode)
                    .web_server(self.webserver)
                    .add_commands(self.extra_flags.iter().cloned())
                    .register_exit_handler(false);
                if let Some(port) = self.admin_port {
                    builder = builder.admin_port(port);
                }
                if let Some(port) = self.proxy_port {
                    builder = builder.proxy_port(port);
                }
                if let Some(dir) = &self.resource_dir {
                    builder = builder.binary_location(dir);
                }
                if let Some(destination) = &self.destination {
                    builder = builder.destination(destination);
                }
                if self.capture_all_headers {
                    builder = builder.capture_all_headers();
                }
                if let Some(timeout) = timeout {
                    builder = builder.health_check_timeout(timeout);
                }
                builder.incremental_capture(self.incremental_capture).build()?
            }
        };
        Ok(config)
    }

    pub fn simulation_sources(&self) -> Vec<SimulationSource> {
        self.simulations.iter().map(|s| parse_source(s)).collect()
    }
}

/// URLs by scheme, existing paths as files, anything else as a resource name.
pub fn parse_source(value: &str) -> SimulationSource {
    if value.starts_with("http://") || value.starts_with("https://") {
        SimulationSource::url(value)
    } else if Path::new(value).is_file() {
        SimulationSource::file(value)
    } else {
        SimulationSource::resource(value)
    }
}

/// Load the settings for `args`, reading the config file if one is named.
pub fn load_settings(args: &Args) -> anyhow::Result<ConfigFile> {
    let file = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };
    Ok(file.merge_args(args))
}

/// Run until `shutdown` resolves, then export if asked to and stop the proxy.
pub async fn run_runner<F>(settings: ConfigFile, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let config = settings.proxy_configuration()?;
    info!("Starting Hoverfly Runner...");
    info!("  Admin: {}", config.admin_base_url());
    info!("  Proxy: {}", config.proxy_url());
    info!("  Mode:  {}", config.common().mode);

    let mut supervisor = ProcessSupervisor::new(config)?;
    supervisor.start().await?;

    let result = serve(&supervisor, &settings, shutdown).await;
    if let Err(e) = supervisor.close().await {
        warn!("Failed to stop proxy cleanly: {}", e);
    }
    result
}

async fn serve<F>(supervisor: &ProcessSupervisor, settings: &ConfigFile, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()>,
{
    let sources = settings.simulation_sources();
    if !sources.is_empty() {
        supervisor.simulate(&sources).await?;
        info!("Loaded {} simulation source(s)", sources.len());
    }

    shutdown.await;
    info!("Shutdown signal received, stopping proxy...");

    if let Some(path) = &settings.export {
        if supervisor.state() != hoverfly_core::SupervisorState::Running {
            bail!("Proxy is not running, cannot export to {}", path.display());
        }
        supervisor.export_simulation(path).await?;
    }
    Ok(())
}
