//! The per-channel request state machine (§4.3) — the hardest part of this
//! crate.
//!
//! [`StateMachine`] owns exactly the state tuple `(State, Async, Interest,
//! flags)` of §3/§4.3 behind a [`parking_lot::Mutex`], and nothing else: no
//! listener list, no throwable, no timeout handle. Those live in
//! [`crate::async_event::AsyncEvent`], which [`crate::channel::Channel`]
//! manages in a *separate* lock, so that invoking user-supplied listener
//! callbacks never happens while this mutex is held — matching §5's "a
//! handler executing doScope/doHandle holds no Channel lock (the state
//! machine's lock guards only the state tuple, not user code)".
//!
//! Every transition method here is a pure decision: it mutates the tuple
//! and returns an [`Action`] (for `handling`/`unhandle`) or a set of
//! [`Directives`] telling the caller what to do *after* releasing the
//! lock — schedule or cancel a timeout, register read interest with the
//! transport, enqueue a dispatch run. The scheduler and the transport are
//! never touched from inside this module, matching §4.6's "the scheduler
//! must not hold the channel lock when firing".
//!
//! This mirrors, structurally, `rama-http-core::proto::h1::conn::Conn`'s
//! `State` struct: a plain struct of small enums (`Reading`, `Writing`,
//! `KA`) driving a poll loop through explicit transition methods — except
//! that struct is single-threaded-by-construction (only ever touched from
//! the task polling the connection), while this one is deliberately
//! multi-threaded: handler threads, the reactor, and the timeout thread
//! all drive it concurrently, hence the explicit mutex here where the
//! teacher needed none.

use std::fmt;

use parking_lot::Mutex;

/// The primary per-channel state of §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Dispatched,
    AsyncWait,
    AsyncWoken,
    AsyncIo,
    Completing,
    Completed,
    Upgraded,
}

/// The async sub-state of §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncState {
    NotAsync,
    Started,
    Dispatch,
    Complete,
    Expiring,
    Expired,
    Erroring,
    Errored,
}

/// Read demand, as distinct from read *readiness* (`read_possible`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadInterest {
    None,
    Needed,
    Registered,
}

/// The action set returned by `handling()`/`unhandle()`. Per invariant 4,
/// a transition returns exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Dispatch,
    AsyncDispatch,
    ErrorDispatch,
    AsyncError,
    ReadCallback,
    WriteCallback,
    Complete,
    Wait,
    Terminated,
}

/// Side effects a caller must perform once it has released the lock.
/// Never acted on from inside this module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Directives {
    /// Schedule a new timeout for the current async cycle.
    pub schedule_timeout: bool,
    /// Cancel whatever timeout is currently pending.
    pub cancel_timeout: bool,
    /// Register read interest with the transport ("wait for content").
    pub register_read_interest: bool,
    /// Enqueue a run of `handling()` on the executor (a wakeup occurred).
    pub enqueue_dispatch: bool,
}

/// `handling()`/`unhandle()`'s return value: the action plus any
/// directives the caller owes the scheduler/transport.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub action: Action,
    pub directives: Directives,
}

impl Outcome {
    fn new(action: Action) -> Self {
        Self {
            action,
            directives: Directives::default(),
        }
    }

    fn with(action: Action, directives: Directives) -> Self {
        Self { action, directives }
    }
}

/// A transition was attempted from a state the spec does not allow it
/// from.
#[derive(Debug)]
pub struct IllegalStateError {
    pub method: &'static str,
    pub state: State,
    pub async_state: AsyncState,
}

impl fmt::Display for IllegalStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} is illegal from state={:?} async={:?}",
            self.method, self.state, self.async_state
        )
    }
}

impl std::error::Error for IllegalStateError {}

struct Inner {
    state: State,
    async_state: AsyncState,
    read_interest: ReadInterest,
    read_possible: bool,
    write_possible: bool,
    initial: bool,
}

impl Inner {
    fn initial() -> Self {
        Self {
            state: State::Idle,
            async_state: AsyncState::NotAsync,
            read_interest: ReadInterest::None,
            read_possible: false,
            write_possible: false,
            initial: true,
        }
    }

    /// The read/write-callback priority shared by `handling()`'s
    /// `ASYNC_WOKEN` branch and `unhandle()`'s `STARTED` branch (tie-break
    /// rule: read beats write beats async transitions).
    fn poll_io(&mut self) -> Option<Action> {
        if self.read_interest != ReadInterest::None && self.read_possible {
            self.state = State::AsyncIo;
            self.read_interest = ReadInterest::None;
            return Some(Action::ReadCallback);
        }
        if self.write_possible {
            self.state = State::AsyncIo;
            self.write_possible = false;
            return Some(Action::WriteCallback);
        }
        None
    }
}

/// Per-channel state machine. See the module docs for the lock-splitting
/// rationale.
pub struct StateMachine {
    inner: Mutex<Inner>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::initial()),
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    #[must_use]
    pub fn async_state(&self) -> AsyncState {
        self.inner.lock().async_state
    }

    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.inner.lock().initial
    }

    /// Called when the reactor wishes to give the channel CPU time.
    pub fn handling(&self) -> Result<Outcome, IllegalStateError> {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Idle => {
                inner.state = State::Dispatched;
                Ok(Outcome::new(Action::Dispatch))
            }
            State::Completing | State::Completed => Ok(Outcome::new(Action::Terminated)),
            State::AsyncWoken => {
                if let Some(action) = inner.poll_io() {
                    return Ok(Outcome::new(action));
                }
                let outcome = match inner.async_state {
                    AsyncState::Complete => {
                        inner.state = State::Completing;
                        Outcome::new(Action::Complete)
                    }
                    AsyncState::Dispatch => {
                        inner.state = State::Dispatched;
                        inner.async_state = AsyncState::NotAsync;
                        Outcome::new(Action::AsyncDispatch)
                    }
                    AsyncState::Expired => {
                        inner.state = State::Dispatched;
                        inner.async_state = AsyncState::NotAsync;
                        Outcome::new(Action::ErrorDispatch)
                    }
                    AsyncState::Erroring => {
                        inner.state = State::Dispatched;
                        Outcome::new(Action::AsyncError)
                    }
                    AsyncState::Started | AsyncState::Expiring | AsyncState::NotAsync => {
                        Outcome::new(Action::Wait)
                    }
                    AsyncState::Errored => {
                        inner.state = State::Dispatched;
                        inner.async_state = AsyncState::NotAsync;
                        Outcome::new(Action::ErrorDispatch)
                    }
                };
                Ok(outcome)
            }
            other => Err(IllegalStateError {
                method: "handling",
                state: other,
                async_state: inner.async_state,
            }),
        }
    }

    /// Called once the handler thread returns from a dispatch.
    pub fn unhandle(&self) -> Result<Outcome, IllegalStateError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, State::Dispatched | State::AsyncIo) {
            return Err(IllegalStateError {
                method: "unhandle",
                state: inner.state,
                async_state: inner.async_state,
            });
        }
        inner.initial = false;

        let outcome = match inner.async_state {
            AsyncState::Complete => {
                inner.state = State::Completing;
                inner.async_state = AsyncState::NotAsync;
                Outcome::new(Action::Complete)
            }
            AsyncState::Dispatch => {
                inner.state = State::Dispatched;
                inner.async_state = AsyncState::NotAsync;
                Outcome::new(Action::AsyncDispatch)
            }
            AsyncState::Expired => {
                inner.state = State::Dispatched;
                inner.async_state = AsyncState::NotAsync;
                Outcome::new(Action::ErrorDispatch)
            }
            AsyncState::Started => {
                if let Some(action) = inner.poll_io() {
                    Outcome::new(action)
                } else {
                    inner.state = State::AsyncWait;
                    let mut directives = Directives {
                        schedule_timeout: true,
                        ..Directives::default()
                    };
                    if inner.read_interest == ReadInterest::Needed {
                        inner.read_interest = ReadInterest::Registered;
                        directives.register_read_interest = true;
                    }
                    Outcome::with(Action::Wait, directives)
                }
            }
            AsyncState::Expiring => {
                inner.state = State::AsyncWait;
                Outcome::new(Action::Wait)
            }
            AsyncState::Erroring => {
                inner.state = State::Dispatched;
                Outcome::new(Action::AsyncError)
            }
            AsyncState::Errored => {
                inner.state = State::Dispatched;
                inner.async_state = AsyncState::NotAsync;
                Outcome::new(Action::ErrorDispatch)
            }
            AsyncState::NotAsync => {
                inner.state = State::Completing;
                Outcome::new(Action::Complete)
            }
        };
        Ok(outcome)
    }

    /// Only from `DISPATCHED` with `Async=NOT_ASYNC`.
    pub fn start_async(&self) -> Result<(), IllegalStateError> {
        let mut inner = self.inner.lock();
        if inner.state != State::Dispatched || inner.async_state != AsyncState::NotAsync {
            return Err(IllegalStateError {
                method: "start_async",
                state: inner.state,
                async_state: inner.async_state,
            });
        }
        inner.async_state = AsyncState::Started;
        Ok(())
    }

    /// From `Async ∈ {STARTED, EXPIRING, ERRORED}`.
    pub fn dispatch(&self) -> Result<Directives, IllegalStateError> {
        let mut inner = self.inner.lock();
        if !matches!(
            inner.async_state,
            AsyncState::Started | AsyncState::Expiring | AsyncState::Errored
        ) {
            return Err(IllegalStateError {
                method: "dispatch",
                state: inner.state,
                async_state: inner.async_state,
            });
        }
        inner.async_state = AsyncState::Dispatch;
        let mut directives = Directives {
            cancel_timeout: true,
            ..Directives::default()
        };
        if inner.state == State::AsyncWait {
            inner.state = State::AsyncWoken;
            directives.enqueue_dispatch = true;
        }
        Ok(directives)
    }

    /// Idempotent for `Async ∈ {STARTED, EXPIRING, ERRORED}`; a no-op
    /// (not an error) for any other async state, since an application may
    /// legitimately call `complete()` more than once.
    pub fn complete(&self) -> Directives {
        let mut inner = self.inner.lock();
        if !matches!(
            inner.async_state,
            AsyncState::Started | AsyncState::Expiring | AsyncState::Errored
        ) {
            return Directives::default();
        }
        inner.async_state = AsyncState::Complete;
        let mut directives = Directives {
            cancel_timeout: true,
            ..Directives::default()
        };
        if inner.state == State::AsyncWait {
            inner.state = State::AsyncWoken;
            directives.enqueue_dispatch = true;
        }
        directives
    }

    /// Phase one of `onTimeout()`: acts only when `Async=STARTED`, moving
    /// to `EXPIRING`. Returns `true` iff it acted; the caller must then
    /// invoke the registered `onTimeout` listeners (outside any lock) and
    /// call [`StateMachine::finish_timeout`] with whether a throwable was
    /// set.
    pub fn begin_timeout(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.async_state != AsyncState::Started {
            return false;
        }
        inner.async_state = AsyncState::Expiring;
        true
    }

    /// Phase two of `onTimeout()`. `throwable_set` reflects whether any
    /// `onTimeout` listener attached a cause to the event.
    pub fn finish_timeout(&self, throwable_set: bool) -> Directives {
        let mut inner = self.inner.lock();
        // A dispatch()/complete() may have raced ahead of us while
        // listeners ran without the lock held; only finalize if we're
        // still the ones driving this cycle.
        if inner.async_state != AsyncState::Expiring {
            return Directives::default();
        }
        inner.async_state = if throwable_set {
            AsyncState::Erroring
        } else {
            AsyncState::Expired
        };
        let mut directives = Directives::default();
        if inner.state == State::AsyncWait {
            inner.state = State::AsyncWoken;
            directives.enqueue_dispatch = true;
        }
        directives
    }

    /// From `ASYNC_WAIT`; other states ignore (the eventual dispatch will
    /// observe the error via the `AsyncEvent`'s cause slot).
    pub fn async_error(&self) -> Directives {
        let mut inner = self.inner.lock();
        if inner.state != State::AsyncWait {
            return Directives::default();
        }
        inner.state = State::AsyncWoken;
        inner.async_state = AsyncState::Erroring;
        Directives {
            cancel_timeout: true,
            enqueue_dispatch: true,
            ..Directives::default()
        }
    }

    /// `true` if the reactor must immediately register read interest
    /// with the transport ("signal transport to wait-for-content");
    /// `false` if the registration was deferred to the next `unhandle()`.
    pub fn on_read_unready(&self) -> Directives {
        let mut inner = self.inner.lock();
        if inner.read_interest != ReadInterest::Registered {
            inner.read_possible = false;
        }
        if inner.state == State::AsyncWait {
            inner.read_interest = ReadInterest::Registered;
            Directives {
                register_read_interest: true,
                ..Directives::default()
            }
        } else {
            inner.read_interest = ReadInterest::Needed;
            Directives::default()
        }
    }

    /// Returns `true` ("woken") iff the reactor must schedule the channel.
    pub fn on_read_possible(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.read_possible = true;
        if inner.state == State::AsyncWait && inner.read_interest != ReadInterest::None {
            inner.state = State::AsyncWoken;
            return true;
        }
        false
    }

    /// Force-registers read interest and marks data available; returns
    /// `true` ("woken") iff the reactor must schedule the channel.
    pub fn on_read_ready(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.read_interest = ReadInterest::Registered;
        inner.read_possible = true;
        if inner.state == State::AsyncWait {
            inner.state = State::AsyncWoken;
            return true;
        }
        false
    }

    /// Returns `true` ("woken") iff the reactor must schedule the channel.
    ///
    /// Two consecutive calls before the channel is scheduled collapse into
    /// one `WRITE_CALLBACK`: `write_possible` is a flag, not a counter.
    pub fn on_write_possible(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.write_possible = true;
        if inner.state == State::AsyncWait {
            inner.state = State::AsyncWoken;
            return true;
        }
        false
    }

    /// Only from `COMPLETING`.
    pub fn on_complete(&self) -> Result<(), IllegalStateError> {
        let mut inner = self.inner.lock();
        if inner.state != State::Completing {
            return Err(IllegalStateError {
                method: "on_complete",
                state: inner.state,
                async_state: inner.async_state,
            });
        }
        inner.state = State::Completed;
        inner.async_state = AsyncState::NotAsync;
        Ok(())
    }

    /// From any state except `DISPATCHED`, `ASYNC_IO`, and `UPGRADED`.
    /// Always reports `cancel_timeout: true` so the caller unconditionally
    /// attempts to cancel any lingering timeout (itself idempotent).
    pub fn recycle(&self) -> Result<Directives, IllegalStateError> {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            State::Dispatched | State::AsyncIo | State::Upgraded
        ) {
            return Err(IllegalStateError {
                method: "recycle",
                state: inner.state,
                async_state: inner.async_state,
            });
        }
        *inner = Inner::initial();
        Ok(Directives {
            cancel_timeout: true,
            ..Directives::default()
        })
    }

    /// Only from `IDLE` or `COMPLETED`.
    pub fn upgrade(&self) -> Result<(), IllegalStateError> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, State::Idle | State::Completed) {
            return Err(IllegalStateError {
                method: "upgrade",
                state: inner.state,
                async_state: inner.async_state,
            });
        }
        inner.state = State::Upgraded;
        Ok(())
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("StateMachine")
            .field("state", &inner.state)
            .field("async_state", &inner.async_state)
            .field("read_interest", &inner.read_interest)
            .field("read_possible", &inner.read_possible)
            .field("write_possible", &inner.write_possible)
            .finish()
    }
}
