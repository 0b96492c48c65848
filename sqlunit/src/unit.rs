//! The lifecycle of a single migration unit.
//!
//! A [MigrationUnit] pairs a forward (`up`) script with an optional reverse (`down`) script
//! and the database they target. The orchestration layer drives it through four transitions
//! on the [Lifecycle] trait:
//!
//! | Transition | From → To | SQL executed |
//! |------------|-----------|--------------|
//! | `create` | absent → materialized | `up` |
//! | `read` | unchanged | none |
//! | `update` | materialized → materialized | none |
//! | `delete` | materialized → absent | `down`, if any |
//!
//! The `up` script is locked once the unit is materialized. `database` and `down` may be
//! edited afterwards, but the edit is only recorded; a warning says the database was not
//! touched.

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::executor::{Connector, Executor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Version of the persisted [Materialized] layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Number of hex characters of the `up` digest kept as the identity.
pub const IDENTITY_LEN: usize = 8;

/// Describes one attribute of a [MigrationUnit] for hosts that render schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSchema {
    pub name: &'static str,
    pub required: bool,
    pub description: &'static str,
}

/// The declared attributes of a migration unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationUnit {
    /// The database to run the migration against.
    pub database: String,
    /// SQL run once, when the unit is created.
    pub up: String,
    /// SQL run when the unit is deleted. Blank counts as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub down: Option<String>,
}

impl MigrationUnit {
    pub const ATTRIBUTES: [AttributeSchema; 3] = [
        AttributeSchema {
            name: "database",
            required: true,
            description: "The database to run the migration against.",
        },
        AttributeSchema {
            name: "up",
            required: true,
            description: "The SQL command to run when migrating up.",
        },
        AttributeSchema {
            name: "down",
            required: false,
            description: "The SQL command to run when migrating down.",
        },
    ];

    pub fn new(database: impl Into<String>, up: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            up: up.into(),
            down: None,
        }
    }

    pub fn with_down(mut self, down: impl Into<String>) -> Self {
        self.down = Some(down.into());
        self
    }

    /// The reverse script, unless it is missing or blank.
    pub fn reverse_script(&self) -> Option<&str> {
        self.down.as_deref().filter(|down| !down.trim().is_empty())
    }

    fn validate(&self) -> Result<(), Error> {
        if self.database.trim().is_empty() {
            return Err(Error::MissingAttribute("database"));
        }
        if self.up.trim().is_empty() {
            return Err(Error::MissingAttribute("up"));
        }
        Ok(())
    }
}

/// Stable, content-derived handle of a materialized unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Derive the identity of a forward script: the first [IDENTITY_LEN] hex characters of
    /// its SHA-256 digest.
    pub fn of(up: &str) -> Self {
        let digest = format!("{:x}", Sha256::digest(up.as_bytes()));
        Self(digest[..IDENTITY_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit whose `up` script has been applied. This is what the orchestration layer persists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Materialized {
    #[serde(default = "schema_version")]
    pub schema_version: u32,
    pub id: Identity,
    #[serde(flatten)]
    pub unit: MigrationUnit,
}

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Materialized {
    fn new(unit: MigrationUnit) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            id: Identity::of(&unit.up),
            unit,
        }
    }
}

/// Tracked state of a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Absent,
    Materialized(Materialized),
}

impl UnitState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Absent => None,
            Self::Materialized(m) => Some(&m.id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// A message for the orchestration layer. Warnings never fail a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    /// The attribute the diagnostic is about, if any.
    pub attribute: Option<&'static str>,
}

impl Diagnostic {
    pub fn warning(attribute: &'static str, summary: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            attribute: Some(attribute),
        }
    }
}

impl From<&Error> for Diagnostic {
    fn from(value: &Error) -> Self {
        let attribute = match value {
            Error::MissingAttribute(name) => Some(*name),
            Error::ImmutableForwardScript => Some("up"),
            _ => None,
        };
        Self {
            severity: Severity::Error,
            summary: value.to_string(),
            attribute,
        }
    }
}

pub type Diagnostics = Vec<Diagnostic>;

/// Transitions the orchestration layer invokes on a migration unit.
pub trait Lifecycle {
    /// Apply `up` and return the materialized state with its identity.
    fn create(&self, unit: MigrationUnit, cancel: &CancelToken) -> Result<Materialized, Error>;

    /// Observe the unit. Never touches the database.
    fn read(&self, state: &UnitState) -> Diagnostics;

    /// Record new attributes. Never touches the database.
    fn update(
        &self,
        current: &Materialized,
        proposed: MigrationUnit,
    ) -> Result<(Materialized, Diagnostics), Error>;

    /// Apply `down` (if any) against the current database. On error the unit stays
    /// materialized.
    fn delete(&self, current: &Materialized, cancel: &CancelToken) -> Result<UnitState, Error>;
}

/// Reject a change to `up` once one has been recorded. Hosts call this before accepting a
/// proposed update; [Lifecycle::update] calls it as well.
pub fn check_update(recorded_up: &str, proposed_up: &str) -> Result<(), Error> {
    if !recorded_up.is_empty() && recorded_up != proposed_up {
        return Err(Error::ImmutableForwardScript);
    }
    Ok(())
}

/// [Lifecycle] implementation that runs scripts through an [Executor].
#[derive(Debug)]
pub struct SqlMigration<C> {
    executor: Executor<C>,
}

impl<C: Connector> SqlMigration<C> {
    pub fn new(executor: Executor<C>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Executor<C> {
        &self.executor
    }
}

impl<C: Connector> Lifecycle for SqlMigration<C> {
    fn create(&self, unit: MigrationUnit, cancel: &CancelToken) -> Result<Materialized, Error> {
        unit.validate()?;

        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!("sql_unit_create", database = %unit.database).entered();

        self.executor.apply(&unit.database, &unit.up, cancel)?;

        let materialized = Materialized::new(unit);

        #[cfg(feature = "tracing")]
        tracing::info!(id = %materialized.id, "Migration unit created");

        Ok(materialized)
    }

    fn read(&self, _state: &UnitState) -> Diagnostics {
        // The effect of a script cannot be introspected, so there is nothing to refresh.
        Diagnostics::new()
    }

    fn update(
        &self,
        current: &Materialized,
        proposed: MigrationUnit,
    ) -> Result<(Materialized, Diagnostics), Error> {
        check_update(&current.unit.up, &proposed.up)?;
        proposed.validate()?;

        let mut diagnostics = Diagnostics::new();
        if current.unit.database != proposed.database {
            diagnostics.push(drift_warning("database"));
        }
        if current.unit.reverse_script() != proposed.reverse_script() {
            diagnostics.push(drift_warning("down"));
        }

        #[cfg(feature = "tracing")]
        for diagnostic in &diagnostics {
            tracing::warn!(id = %current.id, attribute = ?diagnostic.attribute, "{}", diagnostic.summary);
        }

        let updated = Materialized {
            schema_version: SCHEMA_VERSION,
            id: current.id.clone(),
            unit: proposed,
        };

        Ok((updated, diagnostics))
    }

    fn delete(&self, current: &Materialized, cancel: &CancelToken) -> Result<UnitState, Error> {
        #[cfg(feature = "tracing")]
        let _span = tracing::info_span!(
            "sql_unit_delete",
            id = %current.id,
            database = %current.unit.database
        )
        .entered();

        match current.unit.reverse_script() {
            Some(down) => self.executor.apply(&current.unit.database, down, cancel)?,
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!("No down script, nothing to run");
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Migration unit deleted");

        Ok(UnitState::Absent)
    }
}

fn drift_warning(attribute: &'static str) -> Diagnostic {
    Diagnostic::warning(
        attribute,
        format!(
            "Changing the '{}' will change the recorded state but won't affect the database",
            attribute
        ),
    )
}
