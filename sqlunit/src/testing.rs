//! Testing utilities for code built on sqlunit.
//!
//! [ScriptedConnector] is an in-memory [Connector] that records everything the
//! [Executor](crate::Executor) asks of it and can be told to fail at a chosen step, so that
//! lifecycle logic can be tested without a running database.
//!
//! ```
//! use sqlunit::testing::ScriptedConnector;
//! use sqlunit::{CancelToken, Config, Executor};
//!
//! let connector = ScriptedConnector::new();
//! let executor = Executor::new(Config::new("postgresql://localhost"), connector.clone());
//! executor
//!     .apply("foo", "CREATE TABLE test;\nINSERT INTO test values(1);", &CancelToken::new())
//!     .unwrap();
//!
//! assert_eq!(connector.targets(), vec!["postgresql://localhost/foo"]);
//! assert_eq!(connector.statements(), vec!["CREATE TABLE test", "INSERT INTO test values(1)"]);
//! ```

#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::DriverError;
use crate::executor::{ConnectPolicy, Connection, Connector, Interrupt};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Error returned by a statement that was interrupted while blocked.
pub const INTERRUPTED_MESSAGE: &str = "canceling statement due to user request";

/// A fake [Connector] that records calls and fails on demand.
///
/// Clones share their recording, so keep one clone for assertions and hand the other to
/// the executor.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    plan: Mutex<Plan>,
    log: Mutex<Log>,
    blocked: Condvar,
}

#[derive(Default)]
struct Plan {
    connect_error: Option<String>,
    ping_error: Option<String>,
    statement_errors: Vec<(usize, String)>,
    block_at: Option<usize>,
    delays: Vec<(usize, Duration)>,
}

#[derive(Default)]
struct Log {
    targets: Vec<String>,
    policies: Vec<ConnectPolicy>,
    pings: usize,
    statements: Vec<String>,
    released: usize,
    blocked: bool,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connection attempt fail with `message`.
    pub fn fail_connect(self, message: impl Into<String>) -> Self {
        self.shared.plan.lock().connect_error = Some(message.into());
        self
    }

    /// Make the liveness probe fail with `message`.
    pub fn fail_ping(self, message: impl Into<String>) -> Self {
        self.shared.plan.lock().ping_error = Some(message.into());
        self
    }

    /// Make the statement at zero-based `index` (counted per connection) fail with `message`.
    pub fn fail_statement(self, index: usize, message: impl Into<String>) -> Self {
        self.shared
            .plan
            .lock()
            .statement_errors
            .push((index, message.into()));
        self
    }

    /// Make the statement at zero-based `index` block until the connection is interrupted.
    pub fn block_statement(self, index: usize) -> Self {
        self.shared.plan.lock().block_at = Some(index);
        self
    }

    /// Make the statement at zero-based `index` take `delay` to complete, unless the
    /// connection is interrupted first.
    pub fn delay_statement(self, index: usize, delay: Duration) -> Self {
        self.shared.plan.lock().delays.push((index, delay));
        self
    }

    /// Block until some connection is stuck in a statement set up with [Self::block_statement].
    pub fn wait_until_blocked(&self) {
        let mut log = self.shared.log.lock();
        while !log.blocked {
            self.shared.blocked.wait(&mut log);
        }
    }

    /// Connection targets requested so far, in order.
    pub fn targets(&self) -> Vec<String> {
        self.shared.log.lock().targets.clone()
    }

    pub fn policies(&self) -> Vec<ConnectPolicy> {
        self.shared.log.lock().policies.clone()
    }

    pub fn pings(&self) -> usize {
        self.shared.log.lock().pings
    }

    /// Every statement dispatched, across all connections, including ones that failed.
    pub fn statements(&self) -> Vec<String> {
        self.shared.log.lock().statements.clone()
    }

    /// Number of successfully opened connections.
    pub fn connections(&self) -> usize {
        self.shared.log.lock().policies.len()
    }

    /// Number of connections that have been dropped.
    pub fn released(&self) -> usize {
        self.shared.log.lock().released
    }
}

impl Connector for ScriptedConnector {
    type Connection = ScriptedConnection;

    fn connect(
        &self,
        target: &str,
        policy: &ConnectPolicy,
    ) -> Result<Self::Connection, DriverError> {
        let connect_error = self.shared.plan.lock().connect_error.clone();

        let mut log = self.shared.log.lock();
        log.targets.push(target.to_string());
        if let Some(message) = connect_error {
            return Err(message.into());
        }
        log.policies.push(*policy);

        Ok(ScriptedConnection {
            shared: self.shared.clone(),
            interrupt: ScriptedInterrupt::default(),
            executed: 0,
        })
    }
}

/// Connection handed out by [ScriptedConnector].
pub struct ScriptedConnection {
    shared: Arc<Shared>,
    interrupt: ScriptedInterrupt,
    executed: usize,
}

impl Connection for ScriptedConnection {
    type Interrupt = ScriptedInterrupt;

    fn ping(&mut self) -> Result<(), DriverError> {
        self.shared.log.lock().pings += 1;
        match self.shared.plan.lock().ping_error.clone() {
            Some(message) => Err(message.into()),
            None => Ok(()),
        }
    }

    fn execute(&mut self, statement: &str) -> Result<(), DriverError> {
        let index = self.executed;
        self.executed += 1;
        self.shared.log.lock().statements.push(statement.to_string());

        let (failure, blocks, delay) = {
            let plan = self.shared.plan.lock();
            let failure = plan
                .statement_errors
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, message)| message.clone());
            let delay = plan
                .delays
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, delay)| *delay);
            (failure, plan.block_at == Some(index), delay)
        };

        let _call = self.interrupt.begin();

        if blocks {
            {
                let mut log = self.shared.log.lock();
                log.blocked = true;
            }
            self.shared.blocked.notify_all();
            self.interrupt.wait_until(None);
            return Err(INTERRUPTED_MESSAGE.into());
        }

        if let Some(delay) = delay {
            if self.interrupt.wait_until(Instant::now().checked_add(delay)) {
                return Err(INTERRUPTED_MESSAGE.into());
            }
        }

        match failure {
            Some(message) => Err(message.into()),
            None => Ok(()),
        }
    }

    fn interrupt_handle(&self) -> Self::Interrupt {
        self.interrupt.clone()
    }
}

impl Drop for ScriptedConnection {
    fn drop(&mut self) {
        self.shared.log.lock().released += 1;
    }
}

/// Interrupt handle for a [ScriptedConnection].
///
/// Like a server-side cancel request, an interrupt only affects a call that is in flight
/// when it arrives. One sent while the connection is idle is dropped.
#[derive(Clone, Default)]
pub struct ScriptedInterrupt {
    state: Arc<(Mutex<CallState>, Condvar)>,
}

#[derive(Default)]
struct CallState {
    in_flight: bool,
    interrupted: bool,
}

/// Marks a call as in flight until dropped.
struct InFlight<'a>(&'a ScriptedInterrupt);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut call = self.0.state.0.lock();
        call.in_flight = false;
        call.interrupted = false;
    }
}

impl ScriptedInterrupt {
    fn begin(&self) -> InFlight<'_> {
        let mut call = self.state.0.lock();
        call.in_flight = true;
        call.interrupted = false;
        InFlight(self)
    }

    /// Wait for an interrupt, giving up at `deadline`. Returns whether one arrived.
    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let (call, changed) = &*self.state;
        let mut call = call.lock();
        while !call.interrupted {
            match deadline {
                Some(deadline) => {
                    if changed.wait_until(&mut call, deadline).timed_out() {
                        return call.interrupted;
                    }
                }
                None => changed.wait(&mut call),
            }
        }
        true
    }
}

impl Interrupt for ScriptedInterrupt {
    fn interrupt(&self) {
        let (call, changed) = &*self.state;
        let mut call = call.lock();
        if call.in_flight {
            call.interrupted = true;
            changed.notify_all();
        }
    }
}
