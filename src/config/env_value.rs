// ABOUTME: Application environment entries from the config file.
// ABOUTME: Values are literal or read from the invoking machine; names must be shell identifiers.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;

/// One `env:` entry. A map form `{ env: VAR, default: ... }` reads `VAR` locally at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        let (var, default) = match self {
            EnvValue::Literal(value) => return Ok(value.clone()),
            EnvValue::FromEnv { var, default } => (var, default),
        };
        std::env::var(var)
            .ok()
            .or_else(|| default.clone())
            .ok_or_else(|| Error::MissingEnvVar(var.clone()))
    }
}

/// Names end up in `env NAME=value` inside the unit, so only `[A-Za-z_][A-Za-z0-9_]*` is allowed.
pub fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_env_names(map: &BTreeMap<String, EnvValue>) -> Result<()> {
    match map.keys().find(|name| !is_env_name(name)) {
        Some(name) => Err(Error::InvalidConfig(format!(
            "env name `{name}` is not a valid shell variable name"
        ))),
        None => Ok(()),
    }
}

pub fn resolve_env_map(map: &BTreeMap<String, EnvValue>) -> Result<BTreeMap<String, String>> {
    let mut resolved = BTreeMap::new();
    for (name, value) in map {
        resolved.insert(name.clone(), value.resolve()?);
    }
    Ok(resolved)
}
