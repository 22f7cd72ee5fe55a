// ABOUTME: Blue/green slot identity and the fixed per-slot address table.
// ABOUTME: Also holds the pure rotation decision over the two slots' running state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// One of the two rotating identities a unit can occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slot {
    Blue,
    Green,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::Blue, Slot::Green];

    pub fn label(self) -> &'static str {
        match self {
            Slot::Blue => "blue",
            Slot::Green => "green",
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::Blue => Slot::Green,
            Slot::Green => Slot::Blue,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Private addresses assigned to each slot on the host-only network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotTopology {
    #[serde(default = "default_blue")]
    pub blue: Ipv4Addr,
    #[serde(default = "default_green")]
    pub green: Ipv4Addr,
    #[serde(default = "default_prefix_len")]
    pub prefix_len: u8,
}

fn default_blue() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 2)
}

fn default_green() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 3)
}

fn default_prefix_len() -> u8 {
    24
}

impl Default for SlotTopology {
    fn default() -> Self {
        Self {
            blue: default_blue(),
            green: default_green(),
            prefix_len: default_prefix_len(),
        }
    }
}

impl SlotTopology {
    pub fn address(&self, slot: Slot) -> Ipv4Addr {
        match slot {
            Slot::Blue => self.blue,
            Slot::Green => self.green,
        }
    }

    /// The two slots must never share an address.
    pub fn validate(&self) -> Result<(), String> {
        if self.blue == self.green {
            return Err(format!(
                "blue and green slots must use distinct addresses (both are {})",
                self.blue
            ));
        }
        if self.prefix_len == 0 || self.prefix_len > 32 {
            return Err(format!("invalid prefix length: {}", self.prefix_len));
        }
        Ok(())
    }
}

/// Name of the unit occupying `slot` for `app`.
pub fn unit_name(app: &str, slot: Slot) -> String {
    format!("{}_{}", app, slot.label())
}

/// Outcome of the rotation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rotation {
    /// Slot the new release goes into.
    pub next: Slot,
    /// Slot to retire once the new one is serving, if any.
    pub current: Option<Slot>,
}

impl Rotation {
    /// Decide the rotation from each slot's running state. The returned flag
    /// is set when both slots are running, which is not a valid steady state;
    /// blue is replaced in that case.
    pub fn from_running(blue_running: bool, green_running: bool) -> (Self, bool) {
        let rotation = match (blue_running, green_running) {
            (false, false) => Rotation {
                next: Slot::Blue,
                current: None,
            },
            (true, false) => Rotation {
                next: Slot::Green,
                current: Some(Slot::Blue),
            },
            (false, true) | (true, true) => Rotation {
                next: Slot::Blue,
                current: Some(Slot::Green),
            },
        };
        (rotation, blue_running && green_running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_distinct() {
        assert_ne!(Slot::Blue.label(), Slot::Green.label());
    }

    #[test]
    fn other_is_an_involution() {
        for slot in Slot::ALL {
            assert_ne!(slot.other(), slot);
            assert_eq!(slot.other().other(), slot);
        }
    }

    #[test]
    fn default_topology_addresses() {
        let topology = SlotTopology::default();
        assert_eq!(topology.address(Slot::Blue).to_string(), "10.0.0.2");
        assert_eq!(topology.address(Slot::Green).to_string(), "10.0.0.3");
        assert!(topology.validate().is_ok());
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let topology = SlotTopology {
            green: Ipv4Addr::new(10, 0, 0, 2),
            ..SlotTopology::default()
        };
        assert!(topology.validate().is_err());
    }

    #[test]
    fn rotation_table() {
        let cases = [
            ((false, false), Slot::Blue, None, false),
            ((true, false), Slot::Green, Some(Slot::Blue), false),
            ((false, true), Slot::Blue, Some(Slot::Green), false),
            ((true, true), Slot::Blue, Some(Slot::Green), true),
        ];
        for ((blue, green), next, current, anomaly) in cases {
            let (rotation, flagged) = Rotation::from_running(blue, green);
            assert_eq!(rotation.next, next);
            assert_eq!(rotation.current, current);
            assert_eq!(flagged, anomaly);
        }
    }

    #[test]
    fn slot_serializes_as_label() {
        let json = serde_json::to_string(&Slot::Green).unwrap();
        assert_eq!(json, "\"green\"");
    }
}
