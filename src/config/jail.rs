// ABOUTME: Jail host configuration: directory layout, base release and slot network.
// ABOUTME: Builds the JailLayout and SlotTopology the SlotManager is constructed from.

use serde::Deserialize;

use crate::jail::{JailLayout, SlotTopology};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JailConfig {
    #[serde(default = "default_root")]
    pub root: String,

    /// FreeBSD release the template is built from, e.g. `14.1-RELEASE`.
    #[serde(default = "default_release")]
    pub release: String,

    /// Cloned loopback interface the slot addresses are bound to.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Base URL the `{release}/base.txz` distribution set is fetched from.
    #[serde(default = "default_mirror")]
    pub mirror: String,

    #[serde(default)]
    pub network: SlotTopology,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            release: default_release(),
            interface: default_interface(),
            mirror: default_mirror(),
            network: SlotTopology::default(),
        }
    }
}

impl JailConfig {
    pub fn layout(&self) -> JailLayout {
        JailLayout {
            root: self.root.trim_end_matches('/').to_string(),
            release: self.release.clone(),
            interface: self.interface.clone(),
        }
    }

    pub fn base_url(&self) -> String {
        format!("{}/{}/base.txz", self.mirror.trim_end_matches('/'), self.release)
    }
}

fn default_root() -> String {
    "/usr/local/jails".to_string()
}

fn default_release() -> String {
    "14.1-RELEASE".to_string()
}

fn default_interface() -> String {
    "lo1".to_string()
}

fn default_mirror() -> String {
    "https://download.freebsd.org/releases/amd64".to_string()
}
