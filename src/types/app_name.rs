// ABOUTME: Validated application name that every unit, lock and database default is derived from.
// ABOUTME: Rules follow what jail(8) accepts for `{app}_{slot}` names and what the unit naming needs.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest jail name accepted across FreeBSD releases.
const JAIL_NAME_LIMIT: usize = 63;

/// Longest suffix appended to form a unit name (`shop_green`).
const LONGEST_UNIT_SUFFIX: &str = "_green";

pub const MAX_APP_NAME_LEN: usize = JAIL_NAME_LIMIT - LONGEST_UNIT_SUFFIX.len();

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AppNameError {
    #[error("application name cannot be empty")]
    Empty,

    #[error("application name is {0} characters; at most {MAX_APP_NAME_LEN} fit in a jail name")]
    TooLong(usize),

    #[error("application name must be lowercase")]
    Uppercase,

    /// jail(8) reads all-digit names as jail ids, so a leading letter is required.
    #[error("application name must start with a letter, not '{0}'")]
    LeadingNonLetter(char),

    #[error("application name cannot end with a hyphen")]
    TrailingHyphen,

    #[error("application name cannot contain '.', which jail(8) reads as a nested jail")]
    NestedJail,

    #[error("application name cannot contain '_', which separates it from the slot in unit names")]
    Underscore,

    #[error("invalid character in application name: '{0}'")]
    InvalidChar(char),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppName(String);

impl AppName {
    pub fn new(value: &str) -> Result<Self, AppNameError> {
        let first = value.chars().next().ok_or(AppNameError::Empty)?;

        if value.len() > MAX_APP_NAME_LEN {
            return Err(AppNameError::TooLong(value.len()));
        }
        if value.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(AppNameError::Uppercase);
        }
        if !first.is_ascii_lowercase() {
            return Err(AppNameError::LeadingNonLetter(first));
        }
        if let Some(err) = value.chars().find_map(reject_char) {
            return Err(err);
        }
        if value.ends_with('-') {
            return Err(AppNameError::TrailingHyphen);
        }

        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn reject_char(c: char) -> Option<AppNameError> {
    match c {
        'a'..='z' | '0'..='9' | '-' => None,
        '.' => Some(AppNameError::NestedJail),
        '_' => Some(AppNameError::Underscore),
        other => Some(AppNameError::InvalidChar(other)),
    }
}

impl FromStr for AppName {
    type Err = AppNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for AppName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AppName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
