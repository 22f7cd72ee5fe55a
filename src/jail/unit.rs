// ABOUTME: Isolated runtime unit model and host filesystem layout.
// ABOUTME: A unit is a jail identified by name, backed by a path, bound to a private address.

use std::fmt;
use std::net::Ipv4Addr;

/// Directory inside a unit that receives the release payload.
pub const PAYLOAD_DIR: &str = "/app";

/// Where jails, templates and their parent directories live on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailLayout {
    pub root: String,
    pub release: String,
    pub interface: String,
}

impl JailLayout {
    pub fn templates_dir(&self) -> String {
        format!("{}/templates", self.root)
    }

    pub fn containers_dir(&self) -> String {
        format!("{}/containers", self.root)
    }

    /// Read-only base filesystem that units are cloned from.
    pub fn template_path(&self) -> String {
        format!("{}/{}", self.templates_dir(), self.release)
    }

    pub fn unit_path(&self, name: &str) -> String {
        format!("{}/{}", self.containers_dir(), name)
    }

    pub fn unit(&self, name: impl Into<String>, address: Ipv4Addr, prefix_len: u8) -> Unit {
        let name = name.into();
        Unit {
            path: self.unit_path(&name),
            name,
            address,
            prefix_len,
        }
    }
}

/// Written last during creation; a unit directory without it is a leftover of an interrupted run.
pub const CREATED_MARKER: &str = "/etc/jailwarden.created";

/// A jail as the orchestrator sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    pub name: String,
    pub path: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

impl Unit {
    /// Host-side path of the payload directory.
    pub fn payload_path(&self) -> String {
        format!("{}{}", self.path, PAYLOAD_DIR)
    }

    /// Host-side path of the file written once creation has finished.
    pub fn created_marker(&self) -> String {
        self.host_path(CREATED_MARKER)
    }

    /// Host-side path of a file inside the unit.
    pub fn host_path(&self, inner: &str) -> String {
        format!("{}/{}", self.path, inner.trim_start_matches('/'))
    }
}

/// Observed state of a unit on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Absent,
    Stopped,
    Running,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Absent => write!(f, "absent"),
            UnitState::Stopped => write!(f, "stopped"),
            UnitState::Running => write!(f, "running"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> JailLayout {
        JailLayout {
            root: "/usr/local/jails".to_string(),
            release: "14.1-RELEASE".to_string(),
            interface: "lo1".to_string(),
        }
    }

    #[test]
    fn template_and_unit_paths() {
        let layout = layout();
        assert_eq!(
            layout.template_path(),
            "/usr/local/jails/templates/14.1-RELEASE"
        );
        assert_eq!(
            layout.unit_path("shop_blue"),
            "/usr/local/jails/containers/shop_blue"
        );
    }

    #[test]
    fn unit_host_paths() {
        let unit = layout().unit("shop_green", Ipv4Addr::new(10, 0, 0, 3), 24);
        assert_eq!(
            unit.payload_path(),
            "/usr/local/jails/containers/shop_green/app"
        );
        assert_eq!(
            unit.host_path("/var/log/shop.log"),
            "/usr/local/jails/containers/shop_green/var/log/shop.log"
        );
    }
}
