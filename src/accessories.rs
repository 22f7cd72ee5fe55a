// ABOUTME: Database accessory jail provisioning and per-deploy migrations.
// ABOUTME: Provisioning probes each piece of state first so setup can be re-run safely.
// ABOUTME: Slots reach the database with a generated password kept in a root-only file on the host.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::DatabaseConfig;
use crate::jail::{JailError, Slot, SlotManager, Unit, commands};
use crate::secrets::random_hex;
use crate::ssh::{self, CommandOutput, LONG_COMMAND_TIMEOUT, Transport, shell_quote};

pub const DATABASE_PORT: u16 = 5432;

/// Random bytes in a generated role password; hex-encoded, so safe in URLs and SQL literals.
const PASSWORD_BYTES: usize = 24;

/// PostgreSQL needs its own System V IPC namespace inside a jail.
const POSTGRES_JAIL_PARAMS: &[&str] = &["sysvshm=new", "sysvsem=new", "sysvmsg=new"];

#[derive(Debug, thiserror::Error)]
pub enum AccessoryError {
    #[error(transparent)]
    Jail(#[from] JailError),

    #[error("database accessory: {0}")]
    Transport(#[from] ssh::Error),

    #[error("database credentials not found at {path}; run `jailwarden setup` first")]
    MissingCredentials { path: String },

    #[error("migration `{command}` failed with exit code {exit_code}: {output}")]
    Migration {
        command: String,
        exit_code: i32,
        output: String,
    },
}

/// The database jail that sits beside the application's slots.
#[derive(Debug, Clone)]
pub struct DatabaseAccessory<'a> {
    app: &'a str,
    config: &'a DatabaseConfig,
    slots: &'a SlotManager,
    timeout: Duration,
}

impl<'a> DatabaseAccessory<'a> {
    pub fn new(slots: &'a SlotManager, config: &'a DatabaseConfig, timeout: Duration) -> Self {
        Self {
            app: slots.app(),
            config,
            slots,
            timeout,
        }
    }

    pub fn unit_name(&self) -> String {
        format!("{}_db", self.app)
    }

    pub fn unit(&self) -> Unit {
        self.slots.layout().unit(
            self.unit_name(),
            self.config.address,
            self.slots.prefix_len(),
        )
    }

    pub fn database(&self) -> &str {
        self.config.name.as_deref().unwrap_or(self.app)
    }

    pub fn role(&self) -> &str {
        self.config.user.as_deref().unwrap_or(self.app)
    }

    /// Major version encoded in a package name like `postgresql16-server`.
    fn major_version(&self) -> String {
        self.config
            .package
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect()
    }

    fn data_dir(&self) -> String {
        format!("/var/db/postgres/data{}", self.major_version())
    }

    /// Connection URL injected into the application environment.
    pub fn url(&self, password: &str) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.role(),
            password,
            self.config.address,
            DATABASE_PORT,
            self.database()
        )
    }

    /// Host file holding the role password, outside every jail root.
    pub fn credentials_path(&self) -> String {
        format!("{}/{}.password", self.slots.layout().root, self.unit_name())
    }

    /// Password written by `provision`.
    pub async fn password(&self, transport: &dyn Transport) -> Result<String, AccessoryError> {
        self.stored_password(transport)
            .await?
            .ok_or_else(|| AccessoryError::MissingCredentials {
                path: self.credentials_path(),
            })
    }

    async fn stored_password(
        &self,
        transport: &dyn Transport,
    ) -> Result<Option<String>, AccessoryError> {
        let out = transport
            .run(
                &format!("cat {}", shell_quote(&self.credentials_path())),
                self.timeout,
            )
            .await?;
        let password = out.output.trim();
        Ok((out.success() && !password.is_empty()).then(|| password.to_string()))
    }

    async fn ensure_password(&self, transport: &dyn Transport) -> Result<String, AccessoryError> {
        if let Some(password) = self.stored_password(transport).await? {
            return Ok(password);
        }

        let path = self.credentials_path();
        tracing::info!(path = %path, "generating database password");
        let password = random_hex(PASSWORD_BYTES);
        // Create it 0600 first; the upload then writes into the existing file.
        transport
            .run_checked(
                &format!("install -m 600 /dev/null {}", shell_quote(&path)),
                self.timeout,
            )
            .await?;
        transport
            .write_file(&path, format!("{password}\n").as_bytes())
            .await?;
        Ok(password)
    }

    /// `pg_hba.conf` lines admitting the app's role from each slot address only.
    fn access_rules(&self) -> Vec<String> {
        Slot::ALL
            .iter()
            .map(|&slot| {
                format!(
                    "host {} {} {}/32 scram-sha-256",
                    quote_ident(self.database()),
                    quote_ident(self.role()),
                    self.slots.private_address(slot)
                )
            })
            .collect()
    }

    /// Bring the accessory jail to a running, initialised database with the app's role.
    pub async fn provision(&self, transport: &dyn Transport) -> Result<(), AccessoryError> {
        let unit = self.unit();
        self.slots.create_unit(transport, &unit).await?;
        self.slots
            .start_unit_with(transport, &unit, POSTGRES_JAIL_PARAMS)
            .await?;

        // pkg -c runs from the host, so the jail itself needs no outbound network.
        let root = shell_quote(&unit.path);
        let package = shell_quote(&self.config.package);
        let installed = transport
            .run(&format!("pkg -c {} info -e {}", root, package), self.timeout)
            .await?;
        if !installed.success() {
            tracing::info!(unit = %unit.name, package = %self.config.package, "installing database package");
            transport
                .run_checked(
                    &format!("pkg -c {} install -y {}", root, package),
                    self.timeout.max(LONG_COMMAND_TIMEOUT),
                )
                .await?;
        }

        transport
            .run_checked(
                &format!("sysrc -j {} postgresql_enable=YES", shell_quote(&unit.name)),
                self.timeout,
            )
            .await?;

        let initialised = format!("test -f {}/PG_VERSION", self.data_dir());
        if !self.in_jail(transport, &unit, &initialised).await?.success() {
            tracing::info!(unit = %unit.name, "initialising database cluster");
            self.in_jail_checked(transport, &unit, "service postgresql initdb").await?;
            self.allow_slots(transport, &unit).await?;
        }

        if !self.in_jail(transport, &unit, "service postgresql status").await?.success() {
            self.in_jail_checked(transport, &unit, "service postgresql start").await?;
        }

        self.ensure_role_and_database(transport, &unit).await
    }

    async fn allow_slots(&self, transport: &dyn Transport, unit: &Unit) -> Result<(), AccessoryError> {
        let data = self.data_dir();
        let settings = [
            format!("listen_addresses = '{}'", self.config.address),
            "password_encryption = 'scram-sha-256'".to_string(),
        ];
        let quoted = |lines: &[String]| {
            lines
                .iter()
                .map(|line| shell_quote(line))
                .collect::<Vec<_>>()
                .join(" ")
        };
        let script = format!(
            "printf '%s\\n' {} >> {data}/postgresql.conf && printf '%s\\n' {} >> {data}/pg_hba.conf",
            quoted(&settings[..]),
            quoted(&self.access_rules()[..]),
        );
        self.in_jail_checked(transport, unit, &script).await
    }

    async fn ensure_role_and_database(
        &self,
        transport: &dyn Transport,
        unit: &Unit,
    ) -> Result<(), AccessoryError> {
        let role = self.role();
        let database = self.database();
        let password = self.ensure_password(transport).await?;

        // The password is set on every run so the role always matches the credentials file.
        let role_query = format!("SELECT 1 FROM pg_roles WHERE rolname = {}", sql_literal(role));
        let verb = if self.psql_value(transport, unit, &role_query).await? == "1" {
            "ALTER"
        } else {
            tracing::info!(role, "creating database role");
            "CREATE"
        };
        let role_statement = format!(
            "{verb} ROLE {} WITH LOGIN PASSWORD {}",
            quote_ident(role),
            sql_literal(&password)
        );
        self.psql(transport, unit, &role_statement).await?;

        let db_query = format!(
            "SELECT 1 FROM pg_database WHERE datname = {}",
            sql_literal(database)
        );
        if self.psql_value(transport, unit, &db_query).await? != "1" {
            tracing::info!(database, "creating database");
            let create = format!(
                "CREATE DATABASE {} OWNER {}",
                quote_ident(database),
                quote_ident(role)
            );
            self.psql(transport, unit, &create).await?;
        }
        Ok(())
    }

    async fn psql_value(
        &self,
        transport: &dyn Transport,
        unit: &Unit,
        query: &str,
    ) -> Result<String, AccessoryError> {
        let psql = format!("psql -tAc {}", shell_quote(query));
        let out = self
            .in_jail(transport, unit, &format!("su -m postgres -c {}", shell_quote(&psql)))
            .await?;
        Ok(out.output.trim().to_string())
    }

    async fn psql(
        &self,
        transport: &dyn Transport,
        unit: &Unit,
        statement: &str,
    ) -> Result<(), AccessoryError> {
        let psql = format!("psql -v ON_ERROR_STOP=1 -qc {}", shell_quote(statement));
        let script = format!("su -m postgres -c {}", shell_quote(&psql));
        self.in_jail_checked(transport, unit, &script).await
    }

    async fn in_jail(
        &self,
        transport: &dyn Transport,
        unit: &Unit,
        script: &str,
    ) -> Result<CommandOutput, AccessoryError> {
        Ok(transport
            .run(&commands::exec_in(&unit.name, script), self.timeout)
            .await?)
    }

    async fn in_jail_checked(
        &self,
        transport: &dyn Transport,
        unit: &Unit,
        script: &str,
    ) -> Result<(), AccessoryError> {
        transport
            .run_checked(&commands::exec_in(&unit.name, script), self.timeout)
            .await?;
        Ok(())
    }
}

/// SQL identifier in double quotes, embedded quotes doubled.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// SQL string literal, embedded quotes doubled.
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Run the migration command in the new slot's unit before the application starts.
pub async fn migrate(
    transport: &dyn Transport,
    slots: &SlotManager,
    slot: Slot,
    command: &str,
    env: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<(), AccessoryError> {
    tracing::info!(unit = %slots.unit_name(slot), command, "running migrations");
    let out = slots.run_in(transport, slot, command, env, timeout).await?;
    if out.success() {
        return Ok(());
    }
    Err(AccessoryError::Migration {
        command: command.to_string(),
        exit_code: out.exit_code,
        output: ssh::excerpt(out.output.trim(), ssh::OUTPUT_EXCERPT_LIMIT),
    })
}
