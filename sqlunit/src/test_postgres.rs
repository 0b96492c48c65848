#![allow(dead_code)]

//! PostgreSQL test infrastructure module.
//!
//! This module provides shared infrastructure for PostgreSQL integration tests,
//! including testcontainer management and database setup utilities.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Once, OnceLock};

use postgres::{Client, NoTls};
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

/// Global PostgreSQL container port, set once the container is started
static POSTGRES_PORT: AtomicU16 = AtomicU16::new(0);

/// Ensures the container is started only once
static POSTGRES_INIT: Once = Once::new();

/// Tokio runtime for container management (kept alive for container lifecycle)
static TOKIO_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();

/// Default credentials for testcontainers-modules postgres
const PG_USER: &str = "postgres";
const PG_PASSWORD: &str = "postgres";
const PG_DB: &str = "postgres";

/// Start the shared PostgreSQL container once and record its mapped port.
fn ensure_postgres_started() {
    POSTGRES_INIT.call_once(|| {
        let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

        let port = rt.block_on(async {
            let container = Postgres::default()
                .start()
                .await
                .expect("failed to start postgres container");

            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("failed to get postgres port");

            // Leak the container to keep it alive for the test duration
            std::mem::forget(container);

            port
        });

        POSTGRES_PORT.store(port, Ordering::SeqCst);
        let _ = TOKIO_RT.set(rt);
    });
}

fn get_postgres_port() -> u16 {
    ensure_postgres_started();
    POSTGRES_PORT.load(Ordering::SeqCst)
}

/// URI of the container's default database, suitable as a base connection string.
pub fn base_url() -> String {
    url_with_db(PG_DB)
}

/// URI of a specific database in the container.
pub fn url_with_db(db: &str) -> String {
    let port = get_postgres_port();
    format!(
        "postgresql://{}:{}@127.0.0.1:{}/{}",
        PG_USER, PG_PASSWORD, port, db
    )
}

/// Create an empty database with a unique name and return that name.
///
/// Each test should call this to get an isolated database.
pub fn fresh_database() -> String {
    let mut admin = Client::connect(&base_url(), NoTls).expect("failed to connect as admin");

    let db_name = format!("test_{}", Uuid::new_v4().simple());

    admin
        .execute(&format!("CREATE DATABASE \"{}\"", db_name), &[])
        .expect("failed to create test database");

    db_name
}
