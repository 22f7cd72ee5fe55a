// ABOUTME: Jail-based isolated runtime units and the blue/green slot scheme.
// ABOUTME: Exposes slot identity, unit layout, remote command builders and the SlotManager.

pub mod commands;
mod error;
mod manager;
mod slot;
mod unit;

pub use error::{JailError, JailErrorKind};
pub use manager::SlotManager;
pub use slot::{Rotation, Slot, SlotTopology, unit_name};
pub use unit::{CREATED_MARKER, JailLayout, PAYLOAD_DIR, Unit, UnitState};
