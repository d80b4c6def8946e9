//! Proxy operating modes and their arguments

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationMode {
    /// Answer from stored rules only
    Simulate,
    /// Forward traffic and record it
    Capture,
    /// Simulate, falling back to the real service on a miss
    Spy,
    /// Compare live responses against simulated ones
    Diff,
    /// Forward traffic through middleware
    Modify,
}

impl SimulationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationMode::Simulate => "simulate",
            SimulationMode::Capture => "capture",
            SimulationMode::Spy => "spy",
            SimulationMode::Diff => "diff",
            SimulationMode::Modify => "modify",
        }
    }
}

impl fmt::Display for SimulationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimulationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulate" | "simulation" => Ok(SimulationMode::Simulate),
            "capture" => Ok(SimulationMode::Capture),
            "spy" => Ok(SimulationMode::Spy),
            "diff" => Ok(SimulationMode::Diff),
            "modify" => Ok(SimulationMode::Modify),
            other => Err(format!("Unknown mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchingStrategy {
    Strongest,
    First,
}

/// Optional arguments sent alongside a mode change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeArguments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers_whitelist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stateful: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_strategy: Option<MatchingStrategy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overwrite_duplicate: Option<bool>,
}

impl ModeArguments {
    pub fn is_empty(&self) -> bool {
        self == &ModeArguments::default()
    }

    /// Capture every request header.
    pub fn capture_all_headers(mut self) -> Self {
        self.headers_whitelist = Some(vec!["*".to_string()]);
        self
    }

    pub fn capture_headers(mut self, headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.headers_whitelist = Some(headers.into_iter().map(Into::into).collect());
        self
    }

    pub fn stateful(mut self, stateful: bool) -> Self {
        self.stateful = Some(stateful);
        self
    }

    pub fn matching_strategy(mut self, strategy: MatchingStrategy) -> Self {
        self.matching_strategy = Some(strategy);
        self
    }

    pub fn overwrite_duplicate(mut self, overwrite: bool) -> Self {
        self.overwrite_duplicate = Some(overwrite);
        self
    }
}

/// Body of `PUT /api/v2/hoverfly/mode` and of its GET counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeView {
    pub mode: SimulationMode,
    #[serde(default)]
    pub arguments: ModeArguments,
}

impl ModeView {
    pub fn new(mode: SimulationMode, arguments: Option<ModeArguments>) -> Self {
        Self {
            mode,
            arguments: arguments.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_view_wire_format() {
        let view = ModeView::new(
            SimulationMode::Capture,
            Some(ModeArguments::default().capture_all_headers().stateful(true)),
        );
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["mode"], "capture");
        assert_eq!(json["arguments"]["headersWhitelist"][0], "*");
        assert_eq!(json["arguments"]["stateful"], true);
        assert!(json["arguments"].get("matchingStrategy").is_none());
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("SPY".parse::<SimulationMode>().unwrap(), SimulationMode::Spy);
        assert_eq!("simulation".parse::<SimulationMode>().unwrap(), SimulationMode::Simulate);
        assert!("replay".parse::<SimulationMode>().is_err());
    }

    #[test]
    fn test_mode_view_without_arguments() {
        let view: ModeView = serde_json::from_str(r#"{"mode": "diff"}"#).unwrap();
        assert_eq!(view.mode, SimulationMode::Diff);
        assert!(view.arguments.is_empty());
    }
}
