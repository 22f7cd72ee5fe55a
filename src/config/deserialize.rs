// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles application names and short-form server addresses.

use serde::Deserialize;

use super::ServerConfig;
use crate::types::AppName;

pub fn deserialize_app_name<'de, D>(deserializer: D) -> Result<AppName, D::Error>
where
    D: serde::Deserializer<'de>,
{
    String::deserialize(deserializer)?
        .parse::<AppName>()
        .map_err(serde::de::Error::custom)
}

pub fn deserialize_server<'de, D>(deserializer: D) -> Result<ServerConfig, D::Error>
where
    D: serde::Deserializer<'de>,
{
    ServerEntry::deserialize(deserializer)?
        .into_server_config()
        .map_err(serde::de::Error::custom)
}

pub fn deserialize_server_option<'de, D>(deserializer: D) -> Result<Option<ServerConfig>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<ServerEntry>::deserialize(deserializer)?
        .map(ServerEntry::into_server_config)
        .transpose()
        .map_err(serde::de::Error::custom)
}

/// A server written either as `user@host:port` or as a detailed map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerEntry {
    Simple(String),
    Detailed(ServerConfig),
}

impl ServerEntry {
    fn into_server_config(self) -> Result<ServerConfig, String> {
        match self {
            ServerEntry::Simple(s) => ServerConfig::parse(&s),
            ServerEntry::Detailed(c) => Ok(c),
        }
    }
}
