//! Instance, destination, state and diff views returned by the control plane

use crate::mode::{ModeArguments, SimulationMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// `GET /api/v2/hoverfly`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    #[serde(default)]
    pub destination: String,
    pub mode: SimulationMode,
    #[serde(default)]
    pub arguments: ModeArguments,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub upstream_proxy: String,
    #[serde(default, rename = "isWebServer")]
    pub is_webserver: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub middleware: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub usage: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationView {
    pub destination: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateView {
    #[serde(default)]
    pub state: BTreeMap<String, String>,
}

/// Request identity a diff report refers to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetails {
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffEntry {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub actual: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReportEntry {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub diff_entries: Vec<DiffEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDiff {
    pub request: RequestDetails,
    #[serde(default)]
    pub diff_reports: Vec<DiffReportEntry>,
}

/// `GET /api/v2/diff`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiffReport {
    #[serde(default)]
    pub diff: Vec<ResponseDiff>,
}

impl DiffReport {
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }
}
