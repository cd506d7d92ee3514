//! Structured state and plan documents
//!
//! The subset of `terraform show -json` output the harness consumes.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::value::AttributeValue;

/// Output of `terraform show -json` against a state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub terraform_version: String,
    #[serde(default)]
    pub values: Option<StateValues>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateValues {
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValue>,
    #[serde(default)]
    pub root_module: ModuleDocument,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputValue {
    #[serde(default)]
    pub sensitive: bool,
    #[serde(default)]
    pub value: AttributeValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleDocument {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub resources: Vec<ResourceDocument>,
    #[serde(default)]
    pub child_modules: Vec<ModuleDocument>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMode {
    #[default]
    Managed,
    Data,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceDocument {
    pub address: String,
    #[serde(default)]
    pub mode: ResourceMode,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    /// `count` index (number) or `for_each` key (string)
    #[serde(default)]
    pub index: Option<serde_json::Value>,
    #[serde(default)]
    pub provider_name: String,
    #[serde(default)]
    pub schema_version: u64,
    #[serde(default)]
    pub values: AttributeValue,
    #[serde(default)]
    pub tainted: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StateDocument {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Output of `terraform show -json` against a saved plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanDocument {
    #[serde(default)]
    pub format_version: String,
    #[serde(default)]
    pub resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceChange {
    pub address: String,
    #[serde(default)]
    pub change: Change,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub actions: Vec<String>,
}

impl PlanDocument {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// A plan is empty when every proposed action is a no-op
    pub fn is_empty(&self) -> bool {
        self.resource_changes
            .iter()
            .flat_map(|rc| rc.change.actions.iter())
            .all(|action| action == "no-op")
    }

    /// Addresses with a proposed change
    pub fn changed_addresses(&self) -> Vec<&str> {
        self.resource_changes
            .iter()
            .filter(|rc| rc.change.actions.iter().any(|a| a != "no-op"))
            .map(|rc| rc.address.as_str())
            .collect()
    }
}
