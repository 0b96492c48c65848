#![cfg_attr(docsrs, feature(doc_cfg))]
//! `sqlunit` manages the lifecycle of a single idempotent SQL migration unit: a forward
//! (`up`) script applied once when the unit is created, and an optional reverse (`down`)
//! script applied when it is deleted.
//!
//! Core concepts:
//! - A [MigrationUnit] targets one logical database. The base connection string in [Config]
//!   is rewritten per unit by [resolve], so one configuration can serve many databases.
//! - Scripts are opaque. They are split into statements by [split_statements] and executed
//!   in order by an [Executor] on a single connection, without parsing the SQL.
//! - The unit's [Identity] is derived from the content of `up`, which is locked once applied.
//!   Edits to `database` or `down` after that are recorded with a warning [Diagnostic] but
//!   never re-run anything.
//!
//! # Lifecycle
//!
//! An orchestration layer (a provisioning tool, a deploy script, ...) owns persistence and
//! drives the unit through the [Lifecycle] trait, implemented by [SqlMigration]:
//!
//! ```
//! # #[cfg(feature = "testing")]
//! # fn main() {
//! use sqlunit::testing::ScriptedConnector;
//! use sqlunit::{CancelToken, Config, Executor, Lifecycle, MigrationUnit, SqlMigration};
//!
//! let connector = ScriptedConnector::new();
//! let migration = SqlMigration::new(Executor::new(
//!     Config::new("postgresql://user@localhost"),
//!     connector.clone(),
//! ));
//!
//! let unit = MigrationUnit::new("app", "CREATE TABLE users (id INT);\nINSERT INTO users VALUES (1);")
//!     .with_down("DROP TABLE users;");
//! let materialized = migration.create(unit, &CancelToken::new()).unwrap();
//! assert_eq!(materialized.id.as_str().len(), 8);
//!
//! let (materialized, warnings) = migration
//!     .update(
//!         &materialized,
//!         MigrationUnit::new("app", "CREATE TABLE users (id INT);\nINSERT INTO users VALUES (1);")
//!             .with_down("DROP TABLE IF EXISTS users;"),
//!     )
//!     .unwrap();
//! assert_eq!(warnings.len(), 1);
//!
//! migration.delete(&materialized, &CancelToken::new()).unwrap();
//! assert_eq!(connector.targets(), vec!["postgresql://user@localhost/app"; 2]);
//! # }
//! # #[cfg(not(feature = "testing"))]
//! # fn main() {}
//! ```
//!
//! # Features
//!
//! - `postgres`: [`PostgresConnector`](postgres::PostgresConnector), a driver built on the
//!   `postgres` crate.
//! - `tracing`: structured logging of connections, statements and transitions using the
//!   `tracing` crate.
//! - `testing`: an in-memory [`ScriptedConnector`](testing::ScriptedConnector) for testing
//!   code that drives migration units.

mod cancel;
pub use cancel::{CancelReason, CancelToken};

mod config;
pub use config::{Config, DEFAULT_TIMEOUT_SECS, DSN_ENV, TIMEOUT_ENV};

mod error;
pub use error::{DriverError, Error};

mod executor;
pub use executor::{ConnectPolicy, Connection, Connector, Executor, Interrupt};

mod split;
pub use split::{count_statements, split_statements};

mod target;
pub use target::resolve;

mod unit;
pub use unit::{
    check_update, AttributeSchema, Diagnostic, Diagnostics, Identity, Lifecycle, Materialized,
    MigrationUnit, Severity, SqlMigration, UnitState, IDENTITY_LEN, SCHEMA_VERSION,
};

#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

#[cfg(any(test, feature = "testing"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testing")))]
pub mod testing;

#[cfg(all(test, feature = "postgres"))]
pub(crate) mod test_postgres;
