//!
//! # PostgreSQL driver
//!
//! This module provides a [Connector] backed by the [`postgres`](https://crates.io/crates/postgres)
//! crate's synchronous client.
//!
//! Both connection string shapes accepted by [resolve](crate::resolve) are understood by the
//! driver, so the resolved target is handed to [`postgres::Config`] verbatim.
//!
//! ## Behavior
//!
//! | Step | Implementation |
//! |------|----------------|
//! | Connect | `postgres::Config::connect` with `NoTls`, `connect_timeout` from the config |
//! | Liveness probe | `SELECT 1` |
//! | Statement | `batch_execute` (simple query protocol, rows discarded) |
//! | Interrupt | `CancelToken::cancel_query` on the server-side backend |
//!
//! Statements run outside any explicit transaction. A script that needs atomicity should
//! issue `BEGIN;` and `COMMIT;` itself.
//!
//! ## Example
//!
//! ```ignore
//! use sqlunit::postgres::PostgresConnector;
//! use sqlunit::{CancelToken, Config, Executor, Lifecycle, MigrationUnit, SqlMigration};
//!
//! let config = Config::from_env()?;
//! let migration = SqlMigration::new(Executor::new(config, PostgresConnector::new()));
//!
//! let unit = MigrationUnit::new("app", "CREATE TABLE users (id SERIAL PRIMARY KEY);")
//!     .with_down("DROP TABLE users;");
//! let materialized = migration.create(unit, &CancelToken::new())?;
//! println!("created {}", materialized.id);
//! ```

use crate::error::DriverError;
use crate::executor::{ConnectPolicy, Connection, Connector, Interrupt};
use postgres::{Client, NoTls};
use std::str::FromStr;

// Re-export postgres types for hosts that need to configure the driver further
pub use postgres::Client as PostgresClient;
pub use postgres::Config as PostgresConfig;

/// Opens unencrypted PostgreSQL connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

impl PostgresConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for PostgresConnector {
    type Connection = PostgresConnection;

    fn connect(
        &self,
        target: &str,
        policy: &ConnectPolicy,
    ) -> Result<Self::Connection, DriverError> {
        let mut config = postgres::Config::from_str(target)?;
        if let Some(timeout) = policy.connect_timeout {
            config.connect_timeout(timeout);
        }

        let client = config.connect(NoTls)?;
        Ok(PostgresConnection { client })
    }
}

/// A live PostgreSQL session. Dropping it terminates the session.
pub struct PostgresConnection {
    client: Client,
}

impl PostgresConnection {
    /// The underlying client.
    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl Connection for PostgresConnection {
    type Interrupt = PostgresInterrupt;

    fn ping(&mut self) -> Result<(), DriverError> {
        self.client.batch_execute("SELECT 1")?;
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> Result<(), DriverError> {
        self.client.batch_execute(statement)?;
        Ok(())
    }

    fn interrupt_handle(&self) -> Self::Interrupt {
        PostgresInterrupt {
            token: self.client.cancel_token(),
        }
    }
}

/// Asks the server to cancel whatever the session is running.
pub struct PostgresInterrupt {
    token: postgres::CancelToken,
}

impl Interrupt for PostgresInterrupt {
    fn interrupt(&self) {
        // Cancellation is best effort; the watcher retries while the statement is running.
        if let Err(_error) = self.token.cancel_query(NoTls) {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %_error, "Failed to send cancel request");
        }
    }
}
