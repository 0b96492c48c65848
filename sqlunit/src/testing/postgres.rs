//! Assertion helpers for checking what a migration unit did to a PostgreSQL database.
//!
//! ```ignore
//! use sqlunit::testing::postgres::PostgresInspector;
//!
//! let mut inspector = PostgresInspector::connect("postgresql://postgres@localhost/app")?;
//! inspector.assert_table_exists("users")?;
//! let count: i64 = inspector.query_one("SELECT COUNT(*) FROM users")?;
//! ```

use crate::error::DriverError;
use postgres::types::FromSql;
use postgres::{Client, NoTls};

/// A direct client connection used to inspect database state in tests.
pub struct PostgresInspector {
    client: Client,
}

impl PostgresInspector {
    /// Connect to `target`, a URI or keyword connection string naming the database.
    pub fn connect(target: &str) -> Result<Self, DriverError> {
        Ok(Self::new(Client::connect(target, NoTls)?))
    }

    /// Wrap an existing client, which can be obtained any way you like.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Execute a SQL statement (for setting up test data).
    pub fn execute(&mut self, sql: &str) -> Result<(), DriverError> {
        self.client.batch_execute(sql)?;
        Ok(())
    }

    /// Query a single value from the database.
    ///
    /// Note: The type `T` must be an owned type (e.g., `String` not `&str`).
    pub fn query_one<T>(&mut self, sql: &str) -> Result<T, DriverError>
    where
        T: for<'a> FromSql<'a>,
    {
        let row = self.client.query_one(sql, &[])?;
        Ok(row.try_get(0)?)
    }

    pub fn table_exists(&mut self, table_name: &str) -> Result<bool, DriverError> {
        let exists: bool = self
            .client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_schema = 'public' AND table_name = $1)",
                &[&table_name],
            )?
            .get(0);
        Ok(exists)
    }

    /// Assert that a table exists in the database.
    pub fn assert_table_exists(&mut self, table_name: &str) -> Result<(), DriverError> {
        if !self.table_exists(table_name)? {
            return Err(format!("Table '{}' does not exist", table_name).into());
        }
        Ok(())
    }

    /// Assert that a table does not exist in the database.
    pub fn assert_table_not_exists(&mut self, table_name: &str) -> Result<(), DriverError> {
        if self.table_exists(table_name)? {
            return Err(format!("Table '{}' exists but should not", table_name).into());
        }
        Ok(())
    }
}
