//! Shimmed state
//!
//! Converts a [`StateDocument`] into the flat, legacy-shaped [`State`] that
//! check functions run against.

use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::{ModuleDocument, ResourceDocument, ResourceMode, StateDocument};
use crate::error::{Error, Result};
use crate::shim::{to_flat_map, FlatAttributeMap, MAP_COUNT};
use crate::value::AttributeValue;

/// Flattened view of a whole state document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub terraform_version: String,
    pub root: ModuleState,
    /// Set once the state was produced through the structured JSON path
    /// rather than legacy text parsing
    #[serde(default)]
    pub binary_driven: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    pub outputs: BTreeMap<String, OutputState>,
    /// Keyed by `[data.]<type>.<name>[.<index>]`
    pub resources: BTreeMap<String, InstanceRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    String,
    List,
    Map,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputState {
    pub kind: OutputKind,
    pub sensitive: bool,
    pub value: AttributeValue,
}

impl OutputState {
    /// Flattened under the output's name, as check helpers see it
    pub fn flatten(&self, name: &str) -> FlatAttributeMap {
        crate::shim::to_flat_map_at(name, &self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub address: String,
    pub mode: ResourceMode,
    pub resource_type: String,
    pub name: String,
    pub index: Option<i64>,
    pub provider: String,
    pub dependencies: Vec<String>,
    pub primary: Option<PrimaryInstance>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryInstance {
    pub id: String,
    pub attributes: FlatAttributeMap,
    pub meta: BTreeMap<String, String>,
    pub tainted: bool,
}

impl InstanceRecord {
    pub fn id(&self) -> Option<&str> {
        self.primary.as_ref().map(|p| p.id.as_str())
    }

    pub fn attributes(&self) -> Option<&FlatAttributeMap> {
        self.primary.as_ref().map(|p| &p.attributes)
    }
}

impl State {
    /// Shim a structured state document
    pub fn from_document(doc: &StateDocument) -> Result<Self> {
        let mut state = State {
            terraform_version: doc.terraform_version.clone(),
            ..Default::default()
        };

        let Some(values) = &doc.values else {
            return Ok(state);
        };

        for (name, output) in &values.outputs {
            let shimmed = shim_output(name, &output.value, output.sensitive)?;
            state.root.outputs.insert(name.clone(), shimmed);
        }

        shim_module(&values.root_module, &mut state.root)?;

        debug!(
            "Shimmed state: {} resource(s), {} output(s)",
            state.root.resources.len(),
            state.root.outputs.len()
        );
        Ok(state)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Self::from_document(&StateDocument::from_json(data)?)
    }

    /// True when no resources are tracked; outputs alone don't count
    pub fn is_empty(&self) -> bool {
        self.root.resources.is_empty()
    }

    pub fn resource(&self, key: &str) -> Option<&InstanceRecord> {
        self.root.resources.get(key)
    }

    pub fn output(&self, name: &str) -> Option<&OutputState> {
        self.root.outputs.get(name)
    }

    /// Records that carry a primary instance
    pub fn primary_instances(&self) -> Vec<&InstanceRecord> {
        self.root
            .resources
            .values()
            .filter(|r| r.primary.is_some())
            .collect()
    }

    pub fn mark_binary_driven(&mut self) {
        self.binary_driven = true;
    }
}

fn shim_module(module: &ModuleDocument, out: &mut ModuleState) -> Result<()> {
    let address = ModuleAddress::parse(&module.address)?;

    if !module.child_modules.is_empty() {
        for child in &module.child_modules {
            ModuleAddress::parse(&child.address)?;
        }
        return Err(Error::NestedModules {
            parent: address.to_string(),
            count: module.child_modules.len(),
        });
    }

    for resource in &module.resources {
        let record = shim_resource(resource)?;
        let key = resource_key(resource, record.index);
        out.resources.insert(key, record);
    }
    Ok(())
}

fn shim_resource(res: &ResourceDocument) -> Result<InstanceRecord> {
    let index = resource_index(res)?;
    let (id, attributes) = shim_resource_attributes(&res.address, &res.values)?;

    let mut meta = BTreeMap::new();
    meta.insert("schema_version".to_string(), res.schema_version.to_string());

    Ok(InstanceRecord {
        address: res.address.clone(),
        mode: res.mode,
        resource_type: res.resource_type.clone(),
        name: res.name.clone(),
        index,
        provider: res.provider_name.clone(),
        dependencies: res.depends_on.clone(),
        primary: Some(PrimaryInstance {
            id,
            attributes,
            meta,
            tainted: res.tainted,
        }),
    })
}

/// Flatten a resource's attributes; the root must be an object carrying `id`
pub fn shim_resource_attributes(
    address: &str,
    values: &AttributeValue,
) -> Result<(String, FlatAttributeMap)> {
    let attributes = to_flat_map(values);

    if !attributes.contains_key(MAP_COUNT) {
        return Err(Error::MissingAttributeCount {
            address: address.to_string(),
        });
    }

    let id = attributes
        .get("id")
        .ok_or_else(|| Error::MissingId {
            address: address.to_string(),
        })?
        .to_string();

    Ok((id, attributes))
}

/// Outputs may only be strings, lists or maps; no `id` is required
pub fn shim_output(name: &str, value: &AttributeValue, sensitive: bool) -> Result<OutputState> {
    let kind = match value {
        AttributeValue::String(_) => OutputKind::String,
        AttributeValue::List(_) => OutputKind::List,
        AttributeValue::Map(_) => OutputKind::Map,
        other => {
            return Err(Error::UnsupportedOutputType {
                name: name.to_string(),
                kind: other.kind(),
            })
        }
    };

    Ok(OutputState {
        kind,
        sensitive,
        value: value.clone(),
    })
}

fn resource_index(res: &ResourceDocument) -> Result<Option<i64>> {
    match &res.index {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n.as_i64().map(Some).ok_or(Error::UnsupportedIndex {
            address: res.address.clone(),
            kind: "non-integer number",
        }),
        Some(serde_json::Value::String(key)) => Err(Error::StringIndex {
            address: res.address.clone(),
            key: key.clone(),
        }),
        Some(serde_json::Value::Bool(_)) => Err(Error::UnsupportedIndex {
            address: res.address.clone(),
            kind: "bool",
        }),
        Some(serde_json::Value::Array(_)) => Err(Error::UnsupportedIndex {
            address: res.address.clone(),
            kind: "list",
        }),
        Some(serde_json::Value::Object(_)) => Err(Error::UnsupportedIndex {
            address: res.address.clone(),
            kind: "map",
        }),
    }
}

fn resource_key(res: &ResourceDocument, index: Option<i64>) -> String {
    let mut key = match res.mode {
        ResourceMode::Managed => format!("{}.{}", res.resource_type, res.name),
        ResourceMode::Data => format!("data.{}.{}", res.resource_type, res.name),
    };
    if let Some(i) = index {
        key.push_str(&format!(".{}", i));
    }
    key
}

/// A module instance path such as `module.net[0].module.subnet`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleAddress {
    pub steps: Vec<ModuleStep>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleStep {
    pub name: String,
    pub key: Option<ModuleKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleKey {
    Int(i64),
    String(String),
}

impl ModuleAddress {
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Parse a module address; the empty string is the root module
    pub fn parse(input: &str) -> Result<Self> {
        let fail = |reason: &str| Error::ModuleAddress {
            address: input.to_string(),
            reason: reason.to_string(),
        };

        let mut steps = Vec::new();
        let mut rest = input;

        while !rest.is_empty() {
            rest = rest
                .strip_prefix("module.")
                .ok_or_else(|| fail("expected \"module.\""))?;

            let name_len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
                .unwrap_or(rest.len());
            let name = &rest[..name_len];
            if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
                return Err(fail("invalid module name"));
            }
            rest = &rest[name_len..];

            let mut key = None;
            if let Some(after) = rest.strip_prefix('[') {
                let close = after.find(']').ok_or_else(|| fail("unterminated index"))?;
                let raw = &after[..close];
                key = Some(if let Some(quoted) = raw.strip_prefix('"') {
                    let inner = quoted
                        .strip_suffix('"')
                        .ok_or_else(|| fail("unterminated string key"))?;
                    ModuleKey::String(inner.to_string())
                } else {
                    ModuleKey::Int(raw.parse().map_err(|_| fail("invalid index"))?)
                });
                rest = &after[close + 1..];
            }

            steps.push(ModuleStep {
                name: name.to_string(),
                key,
            });

            if !rest.is_empty() {
                rest = rest
                    .strip_prefix('.')
                    .ok_or_else(|| fail("unexpected characters after module step"))?;
                if rest.is_empty() {
                    return Err(fail("trailing \".\""));
                }
            }
        }

        Ok(Self { steps })
    }
}

impl std::fmt::Display for ModuleAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "module.{}", step.name)?;
            match &step.key {
                Some(ModuleKey::Int(n)) => write!(f, "[{}]", n)?,
                Some(ModuleKey::String(s)) => write!(f, "[{:?}]", s)?,
                None => {}
            }
        }
        Ok(())
    }
}
