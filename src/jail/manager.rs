// ABOUTME: SlotManager: slot naming, liveness queries, rotation decisions and unit lifecycle.
// ABOUTME: Every mutation is preceded by a state probe so re-running converges.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::time::Duration;

use snafu::ResultExt;

use super::commands;
use super::error::{
    BothRunningSnafu, JailError, ListRunningSnafu, NoActiveUnitSnafu, NoPreviousDeploymentSnafu,
    RemoteSnafu,
};
use super::slot::{Rotation, Slot, SlotTopology, unit_name};
use super::unit::{JailLayout, PAYLOAD_DIR, Unit, UnitState};
use crate::ssh::{CommandOutput, DEFAULT_COMMAND_TIMEOUT, Transport, env_assignments};

type Result<T> = std::result::Result<T, JailError>;

/// Owns the two-slot scheme for one application on one host.
#[derive(Debug, Clone)]
pub struct SlotManager {
    app: String,
    layout: JailLayout,
    topology: SlotTopology,
    command_timeout: Duration,
}

impl SlotManager {
    pub fn new(app: impl Into<String>, layout: JailLayout, topology: SlotTopology) -> Self {
        Self {
            app: app.into(),
            layout,
            topology,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn app(&self) -> &str {
        &self.app
    }

    pub fn layout(&self) -> &JailLayout {
        &self.layout
    }

    pub fn topology(&self) -> &SlotTopology {
        &self.topology
    }

    pub fn prefix_len(&self) -> u8 {
        self.topology.prefix_len
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn unit_name(&self, slot: Slot) -> String {
        unit_name(&self.app, slot)
    }

    pub fn private_address(&self, slot: Slot) -> Ipv4Addr {
        self.topology.address(slot)
    }

    pub fn unit(&self, slot: Slot) -> Unit {
        self.layout.unit(
            self.unit_name(slot),
            self.private_address(slot),
            self.topology.prefix_len,
        )
    }

    /// Host-side path of the application log for `slot`.
    pub fn application_log(&self, slot: Slot) -> String {
        self.unit(slot)
            .host_path(&format!("/var/log/{}.log", self.app))
    }

    /// Names of every running jail on the host.
    pub async fn list_active(&self, transport: &dyn Transport) -> Result<BTreeSet<String>> {
        let listing = transport
            .run_checked(&commands::list_running(), self.command_timeout)
            .await
            .context(ListRunningSnafu)?;

        Ok(listing
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Decide which slot receives the next release and which one retires.
    pub async fn determine_next_slot(&self, transport: &dyn Transport) -> Result<Rotation> {
        let active = self.list_active(transport).await?;
        let blue = active.contains(&self.unit_name(Slot::Blue));
        let green = active.contains(&self.unit_name(Slot::Green));

        let (rotation, anomaly) = Rotation::from_running(blue, green);
        if anomaly {
            tracing::warn!(
                app = %self.app,
                "both slots are running; replacing {} and retiring {}",
                rotation.next,
                Slot::Green
            );
        }
        tracing::debug!(app = %self.app, next = %rotation.next, current = ?rotation.current, "rotation decided");
        Ok(rotation)
    }

    /// The slot currently serving traffic, if any.
    pub async fn current_slot(&self, transport: &dyn Transport) -> Result<Option<Slot>> {
        Ok(self.determine_next_slot(transport).await?.current)
    }

    /// Pick the stopped slot to reactivate in a manual rollback.
    ///
    /// Requires exactly one running slot and an existing unit in the other.
    pub async fn rollback_target(&self, transport: &dyn Transport) -> Result<Rotation> {
        let active = self.list_active(transport).await?;
        let blue = active.contains(&self.unit_name(Slot::Blue));
        let green = active.contains(&self.unit_name(Slot::Green));

        let current = match (blue, green) {
            (true, true) => return BothRunningSnafu { app: &self.app }.fail(),
            (false, false) => return NoActiveUnitSnafu { app: &self.app }.fail(),
            (true, false) => Slot::Blue,
            (false, true) => Slot::Green,
        };

        let target = current.other();
        if !self.exists(transport, target).await? {
            return NoPreviousDeploymentSnafu {
                app: &self.app,
                slot: target,
            }
            .fail();
        }

        Ok(Rotation {
            next: target,
            current: Some(current),
        })
    }

    /// Whether the slot's unit is present on disk, running or not.
    pub async fn exists(&self, transport: &dyn Transport, slot: Slot) -> Result<bool> {
        self.unit_exists(transport, &self.unit(slot)).await
    }

    pub async fn state(&self, transport: &dyn Transport, slot: Slot) -> Result<UnitState> {
        self.unit_state(transport, &self.unit(slot)).await
    }

    pub async fn create(&self, transport: &dyn Transport, slot: Slot) -> Result<()> {
        self.create_unit(transport, &self.unit(slot)).await
    }

    pub async fn start(&self, transport: &dyn Transport, slot: Slot) -> Result<()> {
        self.start_unit(transport, &self.unit(slot)).await
    }

    pub async fn stop(&self, transport: &dyn Transport, slot: Slot) -> Result<()> {
        self.stop_unit(transport, &self.unit(slot)).await
    }

    pub async fn destroy(&self, transport: &dyn Transport, slot: Slot) -> Result<()> {
        self.destroy_unit(transport, &self.unit(slot)).await
    }

    /// Extract a previously uploaded archive into the slot's payload directory.
    pub async fn install_payload(
        &self,
        transport: &dyn Transport,
        slot: Slot,
        remote_archive: &str,
    ) -> Result<()> {
        let unit = self.unit(slot);
        let payload = unit.payload_path();
        self.checked(transport, &unit, "prepare payload for", &commands::make_dirs(&[&payload]))
            .await?;
        self.checked(
            transport,
            &unit,
            "install payload into",
            &commands::extract(remote_archive, &payload),
        )
        .await
    }

    /// Launch the application inside the slot's unit, detached from the session.
    pub async fn start_application(
        &self,
        transport: &dyn Transport,
        slot: Slot,
        start_command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let unit = self.unit(slot);
        let script = format!(
            "cd {} && env {} daemon -f -o /var/log/{}.log {}",
            PAYLOAD_DIR,
            env_assignments(env),
            self.app,
            start_command
        );
        tracing::info!(unit = %unit.name, "starting application");
        self.checked(
            transport,
            &unit,
            "start application in",
            &commands::exec_in(&unit.name, &script),
        )
        .await
    }

    /// The `jexec` invocation that runs `script` from the payload directory with `env` set.
    pub fn exec_command(&self, slot: Slot, script: &str, env: &BTreeMap<String, String>) -> String {
        let script = format!("cd {} && env {} {}", PAYLOAD_DIR, env_assignments(env), script);
        commands::exec_in(&self.unit_name(slot), &script)
    }

    /// Run a one-off script in the slot's unit with `env` injected.
    pub async fn run_in(
        &self,
        transport: &dyn Transport,
        slot: Slot,
        script: &str,
        env: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let unit = self.unit(slot);
        transport
            .run(&self.exec_command(slot, script, env), timeout)
            .await
            .context(RemoteSnafu {
                action: "run command in",
                unit: &unit.name,
            })
    }

    pub async fn unit_exists(&self, transport: &dyn Transport, unit: &Unit) -> Result<bool> {
        let out = transport
            .run(&commands::dir_exists(&unit.path), self.command_timeout)
            .await
            .context(RemoteSnafu {
                action: "probe",
                unit: &unit.name,
            })?;
        Ok(out.success() && out.output.trim() == "exists")
    }

    pub async fn unit_state(&self, transport: &dyn Transport, unit: &Unit) -> Result<UnitState> {
        if self.list_active(transport).await?.contains(&unit.name) {
            return Ok(UnitState::Running);
        }
        if self.unit_exists(transport, unit).await? {
            Ok(UnitState::Stopped)
        } else {
            Ok(UnitState::Absent)
        }
    }

    /// Clone the template into a new unit. No-op if a completed unit already exists;
    /// a directory left by an interrupted creation is removed and rebuilt.
    pub async fn create_unit(&self, transport: &dyn Transport, unit: &Unit) -> Result<()> {
        if self.unit_exists(transport, unit).await? {
            if self.unit_complete(transport, unit).await? {
                tracing::info!(unit = %unit.name, "unit already exists, not recreating");
                return Ok(());
            }
            tracing::warn!(unit = %unit.name, path = %unit.path, "unit directory is incomplete, rebuilding");
            self.remove_tree(transport, unit).await?;
        }

        tracing::info!(unit = %unit.name, path = %unit.path, "creating unit from template");
        let template = self.layout.template_path();
        self.checked(
            transport,
            unit,
            "create",
            &commands::clone_template(&template, &unit.path),
        )
        .await?;
        self.checked(
            transport,
            unit,
            "create",
            &commands::make_dirs(&[&unit.payload_path()]),
        )
        .await?;
        self.checked(transport, unit, "create", &commands::seed_resolver(unit))
            .await?;
        self.checked(
            transport,
            unit,
            "create",
            &commands::touch(&unit.created_marker()),
        )
        .await
    }

    async fn unit_complete(&self, transport: &dyn Transport, unit: &Unit) -> Result<bool> {
        let out = transport
            .run(
                &commands::file_exists(&unit.created_marker()),
                self.command_timeout,
            )
            .await
            .context(RemoteSnafu {
                action: "probe",
                unit: &unit.name,
            })?;
        Ok(out.success() && out.output.trim() == "exists")
    }

    /// Bring the unit up on its private address. No-op if already running.
    pub async fn start_unit(&self, transport: &dyn Transport, unit: &Unit) -> Result<()> {
        self.start_unit_with(transport, unit, &[]).await
    }

    pub async fn start_unit_with(
        &self,
        transport: &dyn Transport,
        unit: &Unit,
        params: &[&str],
    ) -> Result<()> {
        if self.list_active(transport).await?.contains(&unit.name) {
            tracing::info!(unit = %unit.name, "unit already running");
            return Ok(());
        }

        tracing::info!(unit = %unit.name, address = %unit.address, "starting unit");
        self.checked(
            transport,
            unit,
            "start",
            &commands::start_with(unit, &self.layout.interface, params),
        )
        .await
    }

    /// Bring the unit down, keeping its filesystem. No-op if not running.
    pub async fn stop_unit(&self, transport: &dyn Transport, unit: &Unit) -> Result<()> {
        if !self.list_active(transport).await?.contains(&unit.name) {
            tracing::debug!(unit = %unit.name, "unit not running, nothing to stop");
            return Ok(());
        }

        tracing::info!(unit = %unit.name, "stopping unit");
        self.checked(transport, unit, "stop", &commands::stop(&unit.name))
            .await
    }

    /// Stop the unit and remove its filesystem.
    pub async fn destroy_unit(&self, transport: &dyn Transport, unit: &Unit) -> Result<()> {
        self.stop_unit(transport, unit).await?;

        if !self.unit_exists(transport, unit).await? {
            return Ok(());
        }

        tracing::info!(unit = %unit.name, path = %unit.path, "destroying unit");
        self.remove_tree(transport, unit).await
    }

    async fn remove_tree(&self, transport: &dyn Transport, unit: &Unit) -> Result<()> {
        self.checked(transport, unit, "destroy", &commands::clear_flags(&unit.path))
            .await?;
        self.checked(transport, unit, "destroy", &commands::remove(&unit.path))
            .await
    }

    async fn checked(
        &self,
        transport: &dyn Transport,
        unit: &Unit,
        action: &'static str,
        command: &str,
    ) -> Result<()> {
        transport
            .run_checked(command, self.command_timeout)
            .await
            .map(|_| ())
            .context(RemoteSnafu {
                action,
                unit: &unit.name,
            })
    }
}
