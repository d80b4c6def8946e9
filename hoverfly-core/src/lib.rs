//! Hoverfly Supervisor Core Library
//!
//! This library spawns and supervises a Hoverfly proxy process, drives it over
//! its admin API and keeps it loaded with simulations merged from any number
//! of sources.

/// Control plane client
pub mod admin;
pub mod aggregator;

/// Configuration types and builders
pub mod config;

/// Error types for supervisor operations
pub mod error;
pub mod exit;
pub mod health;
pub mod logging;
pub mod platform;
pub mod ports;

/// Process lifecycle
pub mod supervisor;
pub mod tempfiles;
pub mod trust;
pub mod verify;

pub use admin::{AdminClient, AUTH_TOKEN_ENV};
pub use aggregator::{merge_for_recapture, SimulationAggregator, SimulationPreprocessor, SimulationSource};
pub use config::{ClientAuth, ConfigBuilder, Middleware, ProxyConfiguration, Target};
pub use error::{ClientError, HoverflyError};
pub use exit::ExitRegistry;
pub use health::{HealthChecker, HealthIndicator};
pub use logging::{init_logging, LoggingConfig};
pub use platform::BinaryIdentifier;
pub use ports::{PortAllocator, PortSpec};
pub use supervisor::{ProcessSupervisor, SupervisorState};
pub use tempfiles::{ResourceKind, ResourceRoots, TempFileManager};
pub use trust::{ProxySettings, TrustContext, TrustHandle};
pub use verify::Times;

pub use hoverfly_common as model;

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, HoverflyError>;
