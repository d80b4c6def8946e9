//! Merging of independently loaded simulation sources
//!
//! Pairs are unioned with structural equality, so a pair defined identically
//! in two sources is pushed once. Delays are concatenated in source order and
//! never deduplicated.

use crate::tempfiles::ResourceRoots;
use crate::{HoverflyError, Result};
use hoverfly_common::Simulation;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// Where a simulation comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationSource {
    File(PathBuf),
    Url(String),
    /// Name resolved against the resource roots
    Resource(String),
    /// Inline JSON document; `name` identifies it in errors.
    Json { name: String, body: String },
    Simulation(Simulation),
    Empty,
}

impl SimulationSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn resource(name: impl Into<String>) -> Self {
        Self::Resource(name.into())
    }

    pub fn json(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Json {
            name: name.into(),
            body: body.into(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => format!("file:{}", path.display()),
            Self::Url(url) => format!("url:{}", url),
            Self::Resource(name) => format!("resource:{}", name),
            Self::Json { name, .. } => format!("json:{}", name),
            Self::Simulation(_) => "simulation".to_string(),
            Self::Empty => "empty".to_string(),
        }
    }

    /// Load this source on its own. Errors name the source.
    pub async fn load(&self, roots: &ResourceRoots, http: &reqwest::Client) -> Result<Simulation> {
        let name = self.describe();
        let fail = |message: String| HoverflyError::source_error(name.clone(), message);

        match self {
            Self::File(path) => {
                let body = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                parse_simulation(&body).map_err(fail)
            }
            Self::Url(url) => {
                let response = http
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| fail(e.to_string()))?;
                let body = response.text().await.map_err(|e| fail(e.to_string()))?;
                parse_simulation(&body).map_err(fail)
            }
            Self::Resource(resource) => {
                let path = roots.resolve(resource).map_err(|e| fail(e.to_string()))?;
                let body = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| fail(e.to_string()))?;
                parse_simulation(&body).map_err(fail)
            }
            Self::Json { body, .. } => parse_simulation(body).map_err(fail),
            Self::Simulation(simulation) => Ok(simulation.clone()),
            Self::Empty => Ok(Simulation::empty()),
        }
    }
}

impl fmt::Display for SimulationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl From<Simulation> for SimulationSource {
    fn from(simulation: Simulation) -> Self {
        Self::Simulation(simulation)
    }
}

fn parse_simulation(body: &str) -> std::result::Result<Simulation, String> {
    let document: Value = serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;
    let version = document
        .pointer("/meta/schemaVersion")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if version.trim().is_empty() {
        return Err("missing meta.schemaVersion".to_string());
    }
    serde_json::from_value(document).map_err(|e| format!("invalid simulation: {}", e))
}

/// Hook run once on the merged simulation before it is pushed.
pub trait SimulationPreprocessor: Send + Sync {
    fn process(&self, simulation: &mut Simulation);
}

impl<F> SimulationPreprocessor for F
where
    F: Fn(&mut Simulation) + Send + Sync,
{
    fn process(&self, simulation: &mut Simulation) {
        self(simulation)
    }
}

pub struct SimulationAggregator {
    roots: ResourceRoots,
    http: reqwest::Client,
    preprocessor: Option<Box<dyn SimulationPreprocessor>>,
}

impl SimulationAggregator {
    pub fn new(roots: ResourceRoots, http: reqwest::Client) -> Self {
        Self {
            roots,
            http,
            preprocessor: None,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: impl SimulationPreprocessor + 'static) -> Self {
        self.preprocessor = Some(Box::new(preprocessor));
        self
    }

    pub fn set_preprocessor(&mut self, preprocessor: Option<Box<dyn SimulationPreprocessor>>) {
        self.preprocessor = preprocessor;
    }

    /// Load every source in order and merge them into one simulation.
    /// No sources yields an empty simulation.
    pub async fn aggregate(&self, sources: &[SimulationSource]) -> Result<Simulation> {
        let mut loaded = Vec::with_capacity(sources.len());
        for source in sources {
            let simulation = source.load(&self.roots, &self.http).await?;
            debug!(
                source = %source,
                pairs = simulation.pairs().len(),
                delays = simulation.delays().len(),
                "Loaded simulation source"
            );
            loaded.push(simulation);
        }

        let mut merged = merge(loaded);
        if let Some(preprocessor) = &self.preprocessor {
            preprocessor.process(&mut merged);
        }

        info!(
            sources = sources.len(),
            pairs = merged.pairs().len(),
            delays = merged.delays().len(),
            "Aggregated simulation"
        );
        Ok(merged)
    }
}

impl fmt::Debug for SimulationAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationAggregator")
            .field("roots", &self.roots)
            .field("preprocessor", &self.preprocessor.is_some())
            .finish()
    }
}

/// Union pairs and concatenate global actions, in the given order.
pub fn merge(simulations: impl IntoIterator<Item = Simulation>) -> Simulation {
    let mut merged = Simulation::empty();
    for simulation in simulations {
        let data = simulation.data;
        merged.data.pairs.extend(data.pairs);
        merged.data.global_actions.delays.extend(data.global_actions.delays);
        merged
            .data
            .global_actions
            .delays_log_normal
            .extend(data.global_actions.delays_log_normal);
    }
    merged
}

/// Incremental capture: keep what was exported before, append newly captured
/// pairs that are not already present. Existing delays stay first; captured
/// delays are appended unless an identical one exists.
pub fn merge_for_recapture(existing: Simulation, captured: Simulation) -> Simulation {
    let mut merged = existing;
    merged.meta = captured.meta;
    merged.data.pairs.extend(captured.data.pairs);

    let actions = &mut merged.data.global_actions;
    for delay in captured.data.global_actions.delays {
        if !actions.delays.contains(&delay) {
            actions.delays.push(delay);
        }
    }
    for delay in captured.data.global_actions.delays_log_normal {
        if !actions.delays_log_normal.contains(&delay) {
            actions.delays_log_normal.push(delay);
        }
    }
    merged
}
