use crate::{HoverflyError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing_subscriber::{
    fmt,
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

/// Log target under which the child process's output is forwarded.
pub const CHILD_LOG_TARGET: &str = "hoverfly";

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Logging configuration for supervisors and the runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` takes precedence
    pub level: String,

    /// Whether to enable JSON formatted logs
    pub json_format: bool,

    /// Whether to include thread names in logs
    pub include_thread_names: bool,

    /// Whether to include file and line number information
    pub include_file_info: bool,

    /// Whether to enable colored output (only for non-JSON format)
    pub enable_colors: bool,

    /// Also write logs to this file, without rotation
    pub log_file: Option<PathBuf>,

    /// Module-specific log levels
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let mut module_levels = BTreeMap::new();
        module_levels.insert("hoverfly_core".to_string(), "info".to_string());
        module_levels.insert(CHILD_LOG_TARGET.to_string(), "info".to_string());
        module_levels.insert("reqwest".to_string(), "warn".to_string());
        module_levels.insert("hyper".to_string(), "warn".to_string());

        Self {
            level: "info".to_string(),
            json_format: false,
            include_thread_names: false,
            include_file_info: false,
            enable_colors: true,
            log_file: None,
            module_levels,
        }
    }
}

/// Initialize logging; a second call leaves the first subscriber in place.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let stdout = fmt::layer()
        .with_target(true)
        .with_thread_names(config.include_thread_names)
        .with_file(config.include_file_info)
        .with_line_number(config.include_file_info);
    if config.json_format {
        layers.push(stdout.json().boxed());
    } else {
        layers.push(stdout.with_ansi(config.enable_colors).boxed());
    }

    if let Some(log_file) = &config.log_file {
        let appender = create_file_appender(log_file)?;
        layers.push(
            fmt::layer()
                .with_target(true)
                .with_ansi(false)
                .with_writer(appender)
                .boxed(),
        );
    }

    match tracing_subscriber::registry().with(filter).with(layers).try_init() {
        Ok(_) => tracing::info!("Logging initialized with level: {}", config.level),
        Err(_) => tracing::debug!("Logging already initialized, skipping"),
    }
    Ok(())
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| HoverflyError::Configuration(format!("Invalid log level '{}': {}", config.level, e)))?;
    for (module, level) in &config.module_levels {
        let directive = format!("{}={}", module, level);
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| HoverflyError::Configuration(format!("Invalid log directive '{}': {}", directive, e)))?,
        );
    }
    Ok(filter)
}

fn create_file_appender(log_file: &std::path::Path) -> Result<tracing_appender::rolling::RollingFileAppender> {
    let directory = match log_file.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let filename = log_file
        .file_name()
        .ok_or_else(|| HoverflyError::Configuration(format!("Invalid log file path {}", log_file.display())))?;

    std::fs::create_dir_all(&directory)
        .map_err(|e| HoverflyError::Configuration(format!("Failed to create log directory: {}", e)))?;
    Ok(tracing_appender::rolling::never(directory, filename))
}

/// Log level utilities
pub mod levels {
    pub fn is_valid_level(level: &str) -> bool {
        matches!(
            level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        )
    }
}
