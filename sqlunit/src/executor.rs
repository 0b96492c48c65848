//! Execution of a script against a single database.
//!
//! The [Executor] resolves a per-database target from its [Config], opens one connection
//! through an injected [Connector], probes it, then runs each statement of the script in
//! order on that connection. The connection is dropped (and so released) on every path out
//! of [Executor::apply].
//!
//! Statements are not wrapped in a transaction. Each one commits according to the database's
//! autocommit behavior unless the script issues its own transaction control, so a failure
//! part-way through leaves the earlier statements applied.

use crate::cancel::{CancelReason, CancelToken};
use crate::config::Config;
use crate::error::{DriverError, Error};
use crate::split::split_statements;
use crate::target::resolve;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// How often the watcher repeats an interrupt that has not yet ended the in-flight call.
const INTERRUPT_RETRY: Duration = Duration::from_millis(100);

/// Connection settings derived from [Config] and handed to the [Connector].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectPolicy {
    /// How long to wait for the connection to be established. `None` means unbounded.
    pub connect_timeout: Option<Duration>,
}

/// Aborts whatever a [Connection] is currently doing. Called from a watcher thread.
pub trait Interrupt: Send + 'static {
    fn interrupt(&self);
}

/// A single open database session.
///
/// Dropping the connection must release it.
pub trait Connection {
    type Interrupt: Interrupt;

    /// Lightweight round-trip verifying the session is usable.
    fn ping(&mut self) -> Result<(), DriverError>;

    /// Execute one statement, discarding any rows it returns.
    fn execute(&mut self, statement: &str) -> Result<(), DriverError>;

    /// A handle able to interrupt an in-flight [Connection::ping] or [Connection::execute].
    fn interrupt_handle(&self) -> Self::Interrupt;
}

/// Opens connections to a concrete target. This is the driver seam: production code uses a
/// real driver (see `PostgresConnector` with the `postgres` feature), tests inject a fake.
pub trait Connector: Send + Sync {
    type Connection: Connection;

    fn connect(&self, target: &str, policy: &ConnectPolicy)
        -> Result<Self::Connection, DriverError>;
}

type StatementHook = Box<dyn Fn(usize, &str) + Send + Sync>;
type StatementCompleteHook = Box<dyn Fn(usize, &str, Duration) + Send + Sync>;
type StatementErrorHook = Box<dyn Fn(usize, &str, &Error) + Send + Sync>;

/// Runs scripts against databases reachable through a [Config] and a [Connector].
pub struct Executor<C> {
    config: Config,
    connector: C,
    on_statement_start: Option<StatementHook>,
    on_statement_complete: Option<StatementCompleteHook>,
    on_statement_error: Option<StatementErrorHook>,
}

// Manual Debug impl since closures don't implement Debug
impl<C> std::fmt::Debug for Executor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("on_statement_start", &self.on_statement_start.is_some())
            .field(
                "on_statement_complete",
                &self.on_statement_complete.is_some(),
            )
            .field("on_statement_error", &self.on_statement_error.is_some())
            .finish()
    }
}

impl<C: Connector> Executor<C> {
    pub fn new(config: Config, connector: C) -> Self {
        Self {
            config,
            connector,
            on_statement_start: None,
            on_statement_complete: None,
            on_statement_error: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Set a callback to be invoked before each statement is dispatched.
    /// The callback receives the zero-based statement index and the statement text.
    pub fn on_statement_start<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &str) + Send + Sync + 'static,
    {
        self.on_statement_start = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a statement completes successfully.
    /// The callback receives the statement index, text, and duration.
    pub fn on_statement_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &str, Duration) + Send + Sync + 'static,
    {
        self.on_statement_complete = Some(Box::new(callback));
        self
    }

    /// Set a callback to be invoked when a statement fails.
    /// The callback receives the statement index, text, and the error being returned.
    pub fn on_statement_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, &str, &Error) + Send + Sync + 'static,
    {
        self.on_statement_error = Some(Box::new(callback));
        self
    }

    /// Run `script` against `database`.
    ///
    /// Fails with [Error::Connectivity] if the connection cannot be opened or probed (no
    /// statement is attempted), and with [Error::Statement] for the first statement the
    /// database rejects. The configured timeout only bounds connection establishment; how
    /// long the script may run is up to `cancel`. Once it fires, the in-flight call is
    /// interrupted and [Error::Cancelled] or [Error::DeadlineExceeded] is returned.
    pub fn apply(&self, database: &str, script: &str, cancel: &CancelToken) -> Result<(), Error> {
        let target = resolve(&self.config.dsn, database)?;
        check_cancelled(cancel)?;

        let policy = ConnectPolicy {
            connect_timeout: self.config.connect_timeout(),
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            database = database,
            connect_timeout = ?policy.connect_timeout,
            "Opening connection"
        );

        let mut conn = self
            .connector
            .connect(&target, &policy)
            .map_err(|source| Error::Connectivity {
                database: database.to_string(),
                source,
            })?;

        let scope = cancel.child(None);
        let interrupt = conn.interrupt_handle();
        let watch = Watch::default();

        let result = thread::scope(|s| {
            let watch = &watch;
            let scope = &scope;
            s.spawn(move || {
                scope.wait();
                // An interrupt that lands between calls is lost, so keep
                // interrupting until the run notices the cancellation.
                let mut finished = watch.finished.lock();
                while !*finished {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Interrupting in-flight database call");
                    MutexGuard::unlocked(&mut finished, || interrupt.interrupt());
                    if !*finished {
                        watch.done.wait_for(&mut finished, INTERRUPT_RETRY);
                    }
                }
            });

            let _watch = WatchGuard { watch, scope };
            self.run(&mut conn, database, script, scope)
        });

        // Release the connection before reporting back.
        drop(conn);

        result
    }

    fn run(
        &self,
        conn: &mut C::Connection,
        database: &str,
        script: &str,
        scope: &CancelToken,
    ) -> Result<(), Error> {
        check_cancelled(scope)?;

        if let Err(source) = conn.ping() {
            check_cancelled(scope)?;
            #[cfg(feature = "tracing")]
            tracing::error!(database = database, error = %source, "Liveness probe failed");
            return Err(Error::Connectivity {
                database: database.to_string(),
                source,
            });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(database = database, "Connected, executing script");

        #[cfg(feature = "tracing")]
        let started = Instant::now();

        for (index, statement) in split_statements(script).enumerate() {
            check_cancelled(scope)?;

            #[cfg(feature = "tracing")]
            tracing::debug!(index = index, statement = statement, "Executing statement");

            if let Some(ref callback) = self.on_statement_start {
                callback(index, statement);
            }

            let statement_started = Instant::now();

            if let Err(source) = conn.execute(statement) {
                let error = match scope.reason() {
                    Some(reason) => reason.into(),
                    None => Error::Statement {
                        index,
                        statement: statement.to_string(),
                        source,
                    },
                };

                #[cfg(feature = "tracing")]
                tracing::error!(index = index, error = %error, "Statement failed");

                if let Some(ref callback) = self.on_statement_error {
                    callback(index, statement, &error);
                }

                return Err(error);
            }

            if let Some(ref callback) = self.on_statement_complete {
                callback(index, statement, statement_started.elapsed());
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            database = database,
            duration_ms = started.elapsed().as_millis(),
            "Script completed successfully"
        );

        Ok(())
    }
}

#[derive(Default)]
struct Watch {
    finished: Mutex<bool>,
    done: Condvar,
}

/// Stops the interrupt watcher when execution ends, including by panic.
struct WatchGuard<'a> {
    watch: &'a Watch,
    scope: &'a CancelToken,
}

impl Drop for WatchGuard<'_> {
    fn drop(&mut self) {
        *self.watch.finished.lock() = true;
        self.watch.done.notify_all();
        self.scope.cancel();
    }
}

fn check_cancelled(token: &CancelToken) -> Result<(), Error> {
    match token.reason() {
        Some(reason) => Err(reason.into()),
        None => Ok(()),
    }
}

impl From<CancelReason> for Error {
    fn from(value: CancelReason) -> Self {
        match value {
            CancelReason::Cancelled => Self::Cancelled,
            CancelReason::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnector;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn executor(dsn: &str, connector: &ScriptedConnector) -> Executor<ScriptedConnector> {
        Executor::new(Config::new(dsn).with_timeout(1), connector.clone())
    }

    #[test]
    fn runs_statements_in_order_against_the_scoped_target() {
        let connector = ScriptedConnector::new();
        let executor = executor("postgresql://localhost", &connector);

        executor
            .apply(
                "foo",
                "CREATE TABLE test;\nINSERT INTO test values(1);",
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(connector.targets(), vec!["postgresql://localhost/foo"]);
        assert_eq!(connector.pings(), 1);
        assert_eq!(
            connector.statements(),
            vec!["CREATE TABLE test", "INSERT INTO test values(1)"]
        );
        assert_eq!(connector.released(), 1);
    }

    #[test]
    fn passes_the_configured_connect_timeout_to_the_connector() {
        let connector = ScriptedConnector::new();
        Executor::new(Config::new("user=foo").with_timeout(30), connector.clone())
            .apply("bar", "SELECT 1;", &CancelToken::new())
            .unwrap();
        Executor::new(Config::new("user=foo").with_timeout(0), connector.clone())
            .apply("bar", "SELECT 1;", &CancelToken::new())
            .unwrap();

        assert_eq!(
            connector.policies(),
            vec![
                ConnectPolicy {
                    connect_timeout: Some(Duration::from_secs(30))
                },
                ConnectPolicy {
                    connect_timeout: None
                },
            ]
        );
        assert_eq!(connector.targets(), vec!["user=foo dbname=bar"; 2]);
    }

    #[test]
    fn huge_timeout_is_passed_through_without_overflowing() {
        let connector = ScriptedConnector::new();
        let config = Config::from_lookup(|key| {
            (key == crate::TIMEOUT_ENV).then(|| u64::MAX.to_string())
        })
        .unwrap();

        Executor::new(config, connector.clone())
            .apply("foo", "SELECT 1;", &CancelToken::new())
            .unwrap();

        assert_eq!(
            connector.policies(),
            vec![ConnectPolicy {
                connect_timeout: Some(Duration::from_secs(u64::MAX))
            }]
        );
        assert_eq!(connector.statements(), vec!["SELECT 1"]);
    }

    #[test]
    fn script_may_run_longer_than_the_connect_timeout() {
        let connector = ScriptedConnector::new().delay_statement(0, Duration::from_millis(1500));
        let executor = executor("user=foo", &connector);

        executor
            .apply("foo", "SELECT pg_sleep(1.5);\nSELECT 1;", &CancelToken::new())
            .unwrap();

        assert_eq!(connector.statements(), vec!["SELECT pg_sleep(1.5)", "SELECT 1"]);
        assert_eq!(connector.released(), 1);
    }

    #[test]
    fn stops_at_the_first_failing_statement() {
        let connector = ScriptedConnector::new().fail_statement(1, "relation \"missing\" does not exist");
        let executor = executor("postgresql://localhost", &connector);

        let err = executor
            .apply(
                "foo",
                "CREATE TABLE a (id int);\nINSERT INTO missing values(1);\nDROP TABLE a;",
                &CancelToken::new(),
            )
            .unwrap_err();

        match err {
            Error::Statement {
                index,
                statement,
                source,
            } => {
                assert_eq!(index, 1);
                assert_eq!(statement, "INSERT INTO missing values(1)");
                assert_eq!(source.to_string(), "relation \"missing\" does not exist");
            }
            other => panic!("expected statement error, got {:?}", other),
        }

        // The first statement stays applied and the third is never sent.
        assert_eq!(
            connector.statements(),
            vec!["CREATE TABLE a (id int)", "INSERT INTO missing values(1)"]
        );
        assert_eq!(connector.released(), 1);
    }

    #[test]
    fn failed_ping_runs_nothing_and_releases() {
        let connector = ScriptedConnector::new().fail_ping("connection reset by peer");
        let executor = executor("postgresql://localhost", &connector);

        let err = executor
            .apply("foo", "CREATE TABLE test;", &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, Error::Connectivity { ref database, .. } if database == "foo"));
        assert!(connector.statements().is_empty());
        assert_eq!(connector.released(), 1);
    }

    #[test]
    fn failed_connect_is_a_connectivity_error() {
        let connector = ScriptedConnector::new().fail_connect("connection refused");
        let executor = executor("user=foo", &connector);

        let err = executor
            .apply("foo", "CREATE TABLE test;", &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, Error::Connectivity { .. }));
        assert!(err.is_retryable());
        assert_eq!(connector.pings(), 0);
    }

    #[test]
    fn malformed_uri_fails_before_connecting() {
        let connector = ScriptedConnector::new();
        let executor = executor("postgresql://user@[::1/db", &connector);

        let err = executor
            .apply("foo", "CREATE TABLE test;", &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, Error::InvalidConnectionString(_)));
        assert!(connector.targets().is_empty());
    }

    #[test]
    fn already_cancelled_token_never_connects() {
        let connector = ScriptedConnector::new();
        let executor = executor("user=foo", &connector);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = executor.apply("foo", "SELECT 1;", &cancel).unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert!(connector.targets().is_empty());
    }

    #[test]
    fn cancellation_interrupts_an_in_flight_statement() {
        let connector = ScriptedConnector::new().block_statement(1);
        let executor = executor("user=foo", &connector);
        let cancel = CancelToken::new();

        let err = thread::scope(|s| {
            let handle = s.spawn(|| executor.apply("foo", "SELECT 1;\nSELECT pg_sleep(60);\nSELECT 2;", &cancel));
            connector.wait_until_blocked();
            cancel.cancel();
            handle.join().unwrap()
        })
        .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(connector.statements(), vec!["SELECT 1", "SELECT pg_sleep(60)"]);
        assert_eq!(connector.released(), 1);
    }

    #[test]
    fn cancellation_between_statements_still_interrupts_the_next_one() {
        let connector = ScriptedConnector::new().block_statement(1);
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let executor = executor("user=foo", &connector).on_statement_start(move |index, _| {
            if index == 1 {
                trigger.cancel();
            }
        });

        let err = executor
            .apply("foo", "SELECT 1;\nSELECT pg_sleep(60);\nSELECT 2;", &cancel)
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(connector.statements(), vec!["SELECT 1", "SELECT pg_sleep(60)"]);
        assert_eq!(connector.released(), 1);
    }

    #[test]
    fn deadline_interrupts_an_in_flight_statement() {
        let connector = ScriptedConnector::new().block_statement(0);
        let executor = executor("user=foo", &connector);

        let err = executor
            .apply(
                "foo",
                "SELECT pg_sleep(60);",
                &CancelToken::with_timeout(Duration::from_millis(50)),
            )
            .unwrap_err();

        assert!(matches!(err, Error::DeadlineExceeded));
        assert_eq!(connector.released(), 1);
    }

    #[test]
    fn hooks_observe_each_statement() {
        let connector = ScriptedConnector::new().fail_statement(2, "syntax error");
        let events = Arc::new(Mutex::new(Vec::new()));

        let start_events = events.clone();
        let complete_events = events.clone();
        let error_events = events.clone();
        let executor = Executor::new(Config::new("user=foo"), connector.clone())
            .on_statement_start(move |i, _| start_events.lock().push(format!("start {}", i)))
            .on_statement_complete(move |i, _, _| {
                complete_events.lock().push(format!("complete {}", i))
            })
            .on_statement_error(move |i, statement, _| {
                error_events.lock().push(format!("error {} {}", i, statement))
            });

        let result = executor.apply("foo", "SELECT 1;\nSELECT 2;\nSELEC 3;", &CancelToken::new());

        assert!(result.is_err());
        assert_eq!(
            *events.lock(),
            vec![
                "start 0",
                "complete 0",
                "start 1",
                "complete 1",
                "start 2",
                "error 2 SELEC 3",
            ]
        );
    }

    #[test]
    fn empty_script_still_pings_the_connection() {
        let connector = ScriptedConnector::new();
        executor("user=foo", &connector)
            .apply("foo", "  \n", &CancelToken::new())
            .unwrap();

        assert_eq!(connector.pings(), 1);
        assert!(connector.statements().is_empty());
        assert_eq!(connector.released(), 1);
    }
}
