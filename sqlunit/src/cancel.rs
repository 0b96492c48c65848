//! Cooperative cancellation for blocking executions.
//!
//! A [CancelToken] fires either when [CancelToken::cancel] is called or when its deadline
//! passes. Child tokens fire with their parent, and may carry a tighter deadline of their own.

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Why a [CancelToken] fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

/// A cloneable cancellation signal with an optional deadline.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    changed: Condvar,
    deadline: Option<Instant>,
}

#[derive(Default)]
struct State {
    cancelled: bool,
    children: Vec<Weak<Inner>>,
}

impl CancelToken {
    /// A token that only fires when cancelled explicitly.
    pub fn new() -> Self {
        Self::with_deadline_opt(None)
    }

    /// A token that fires at `deadline` at the latest.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::with_deadline_opt(Some(deadline))
    }

    /// A token that fires once `timeout` has elapsed from now at the latest. A timeout too
    /// large to represent as an [Instant] never fires on its own.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline_opt(Instant::now().checked_add(timeout))
    }

    fn with_deadline_opt(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                changed: Condvar::new(),
                deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Create a child token. The child fires when this token fires, or at `deadline` if that
    /// is earlier. Cancelling the child does not affect this token.
    pub fn child(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let child = Self::with_deadline_opt(deadline);

        let mut state = self.inner.state.lock();
        if state.cancelled {
            child.inner.state.lock().cancelled = true;
        } else {
            state.children.retain(|c| c.strong_count() > 0);
            state.children.push(Arc::downgrade(&child.inner));
        }
        drop(state);

        child
    }

    /// Fire this token and every live child, waking anyone blocked in [CancelToken::wait].
    pub fn cancel(&self) {
        let children = {
            let mut state = self.inner.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            std::mem::take(&mut state.children)
        };
        self.inner.changed.notify_all();

        for child in children.iter().filter_map(Weak::upgrade) {
            CancelToken { inner: child }.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// The reason this token has fired, or `None` while it is still live.
    /// An explicit cancel takes precedence over an elapsed deadline.
    pub fn reason(&self) -> Option<CancelReason> {
        if self.inner.state.lock().cancelled {
            Some(CancelReason::Cancelled)
        } else if self.deadline_passed() {
            Some(CancelReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Block the calling thread until the token fires.
    pub fn wait(&self) -> CancelReason {
        let mut state = self.inner.state.lock();
        loop {
            if state.cancelled {
                return CancelReason::Cancelled;
            }
            match self.inner.deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return CancelReason::DeadlineExceeded;
                    }
                    self.inner.changed.wait_until(&mut state, deadline);
                }
                None => self.inner.changed.wait(&mut state),
            }
        }
    }

    fn deadline_passed(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("deadline", &self.inner.deadline)
            .field("reason", &self.reason())
            .finish()
    }
}
