//! State assertions for step checks
//!
//! Every helper returns a [`CheckFn`] reading the flattened attributes of
//! a resource's primary instance, keyed as in `State::resource`.

use anyhow::{anyhow, bail};
use regex::Regex;
use std::sync::Arc;
use tfacc_common::{FlatAttributeMap, OutputKind, State};

use crate::case::CheckFn;

/// Run checks in order, stopping at the first failure
pub fn compose(checks: Vec<CheckFn>) -> CheckFn {
    Arc::new(move |state| {
        let total = checks.len();
        for (i, check) in checks.iter().enumerate() {
            check(state).map_err(|e| anyhow!("Check {}/{} error: {:#}", i + 1, total, e))?;
        }
        Ok(())
    })
}

/// Run every check and report all failures together
pub fn compose_aggregate(checks: Vec<CheckFn>) -> CheckFn {
    Arc::new(move |state| {
        let total = checks.len();
        let failures: Vec<String> = checks
            .iter()
            .enumerate()
            .filter_map(|(i, check)| {
                check(state)
                    .err()
                    .map(|e| format!("Check {}/{} error: {:#}", i + 1, total, e))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            bail!("{}", failures.join("\n"))
        }
    })
}

fn attributes<'a>(state: &'a State, name: &str) -> anyhow::Result<&'a FlatAttributeMap> {
    let resource = state
        .resource(name)
        .ok_or_else(|| anyhow!("Not found: {} in root module", name))?;
    resource
        .attributes()
        .ok_or_else(|| anyhow!("No primary instance: {} in root module", name))
}

/// Empty collections may be dropped from state entirely
fn is_empty_count(key: &str, value: &str) -> bool {
    (key.ends_with(".#") || key.ends_with(".%")) && value == "0"
}

pub fn resource_attr(name: &str, key: &str, value: &str) -> CheckFn {
    let (name, key, value) = (name.to_string(), key.to_string(), value.to_string());
    Arc::new(move |state| {
        let attrs = attributes(state, &name)?;
        match attrs.get(&key) {
            Some(actual) if actual == value => Ok(()),
            Some(actual) => bail!("{}: Attribute '{}' expected {:?}, got {:?}", name, key, value, actual),
            None if is_empty_count(&key, &value) => Ok(()),
            None => bail!("{}: Attribute '{}' not found", name, key),
        }
    })
}

pub fn resource_attr_set(name: &str, key: &str) -> CheckFn {
    let (name, key) = (name.to_string(), key.to_string());
    Arc::new(move |state| {
        let attrs = attributes(state, &name)?;
        match attrs.get(&key) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => bail!("{}: Attribute '{}' expected to be set", name, key),
        }
    })
}

pub fn no_resource_attr(name: &str, key: &str) -> CheckFn {
    let (name, key) = (name.to_string(), key.to_string());
    Arc::new(move |state| {
        let attrs = attributes(state, &name)?;
        match attrs.get(&key) {
            None => Ok(()),
            Some(value) if is_empty_count(&key, value) => Ok(()),
            Some(value) => bail!("{}: Attribute '{}' found when not expected: {:?}", name, key, value),
        }
    })
}

pub fn resource_attr_match(name: &str, key: &str, pattern: Regex) -> CheckFn {
    let (name, key) = (name.to_string(), key.to_string());
    Arc::new(move |state| {
        let attrs = attributes(state, &name)?;
        let Some(value) = attrs.get(&key) else {
            bail!("{}: Attribute '{}' not found", name, key);
        };
        if !pattern.is_match(value) {
            bail!(
                "{}: Attribute '{}' didn't match {:?}, got {:?}",
                name,
                key,
                pattern.as_str(),
                value
            );
        }
        Ok(())
    })
}

/// The two attributes hold the same value, or are both absent
pub fn resource_attr_pair(name_first: &str, key_first: &str, name_second: &str, key_second: &str) -> CheckFn {
    let first = (name_first.to_string(), key_first.to_string());
    let second = (name_second.to_string(), key_second.to_string());
    Arc::new(move |state| {
        if first == second {
            bail!("comparing self: resource {} attribute {}", first.0, first.1);
        }

        let a = attributes(state, &first.0)?.get(&first.1);
        let b = attributes(state, &second.0)?.get(&second.1);

        match (a, b) {
            (Some(a), Some(b)) if a == b => Ok(()),
            (None, None) => Ok(()),
            (Some(a), Some(b)) => bail!(
                "{}: Attribute '{}' expected {:?}, got {:?}",
                first.0,
                first.1,
                b,
                a
            ),
            (Some(_), None) => bail!("{}: Attribute '{}' not found", second.0, second.1),
            (None, Some(_)) => bail!("{}: Attribute '{}' not found", first.0, first.1),
        }
    })
}

/// A string output with the given value
pub fn output(name: &str, value: &str) -> CheckFn {
    let (name, value) = (name.to_string(), value.to_string());
    Arc::new(move |state| {
        let output = state
            .output(&name)
            .ok_or_else(|| anyhow!("Not found: output {:?} in root module", name))?;
        if output.kind != OutputKind::String {
            bail!("Output '{}' is not a string", name);
        }
        match output.value.as_string() {
            Some(actual) if actual == value => Ok(()),
            actual => bail!(
                "Output '{}': expected {:?}, got {:?}",
                name,
                value,
                actual.unwrap_or_default()
            ),
        }
    })
}
