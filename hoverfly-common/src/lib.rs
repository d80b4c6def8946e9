//! Common data model shared by the Hoverfly supervisor crates
//!
//! This crate holds the serde types exchanged with the proxy's control plane:
//! - Simulation datasets (request/response pairs and global actions)
//! - Journal entries reported by the running proxy
//! - Mode, destination, state and diff views

pub mod canonical;
pub mod info;
pub mod journal;
pub mod mode;
pub mod simulation;

pub use info::{
    DestinationView, DiffEntry, DiffReport, DiffReportEntry, InstanceInfo, RequestDetails,
    ResponseDiff, StateView,
};
pub use journal::{Journal, JournalEntry, JournalQuery, JournalRequest, SortDirection};
pub use mode::{MatchingStrategy, ModeArguments, ModeView, SimulationMode};
pub use simulation::{
    DelaySetting, Extensions, FieldMatcher, GlobalActions, Meta, RequestMatcher,
    RequestResponsePair, Response, Simulation, SimulationData, SCHEMA_VERSION,
    SUPPORTED_SCHEMA_VERSIONS,
};
