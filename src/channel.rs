//! [`Channel`]: the request/response bridge of §4.4, tying the
//! [`StateMachine`], [`AsyncEvent`], [`BaseRequest`], and [`Response`]
//! together and driving the handler chain through one dispatch cycle.
//!
//! The execute loop below is the concrete reading of §4.3's `handling()`
//! / `unhandle()` pair: `Channel::run` calls `handling()` to learn what to
//! do, performs it, calls `unhandle()` to learn what comes next, and
//! repeats until the state machine reports `WAIT` or `TERMINATED` — at
//! which point control returns to whatever task called `run` (the
//! connection's read loop, or a timeout/dispatch callback re-entering
//! asynchronously). This mirrors `rama-http-core`'s own `Conn::poll`
//! shape (loop against an explicit `State`, stop when there's nothing
//! left to do this tick) generalized to the richer state set of §4.3.
//!
//! A `Channel` is built with the root [`Handler`] fixed at construction
//! (one handler chain per connection, shared by every request on it via
//! `Server`/`Connection`), so every re-entry point — a timeout firing, a
//! `dispatch()` from another thread, a read/write callback — can resume
//! the chain without needing a handler reference threaded through from
//! the caller.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::async_event::{AsyncEvent, AsyncListener};
use crate::attributes::DispatcherType;
use crate::error::{BoxError, CoreError};
use crate::handler::Handler;
use crate::interceptor::{OutputChain, ResponseLimitInterceptor};
use crate::request::{BaseRequest, RequestBody};
use crate::response::Response;
use crate::rt::Executor;
use crate::state_machine::{Action, AsyncState, Directives, StateMachine};
use crate::timeout;

/// Registered to receive `onReadPossible`/`onWritePossible` while an
/// async cycle has outstanding non-blocking I/O interest (§4.3's
/// `READ_CALLBACK`/`WRITE_CALLBACK` actions).
pub trait IoCallback: Send + Sync {
    fn on_read_possible(&self, channel: &Arc<Channel>) -> Result<(), BoxError>;
    fn on_write_possible(&self, channel: &Arc<Channel>) -> Result<(), BoxError>;
}

struct Exchange {
    request: BaseRequest,
    response: Response,
}

/// Bridges one request/response pair to the handler chain, per §4.4.
/// "Owns a Request and a Response" (guarded together, since a handler
/// routinely needs both in the same critical section) plus the
/// [`StateMachine`] and the current [`AsyncEvent`], if any.
pub struct Channel {
    state: StateMachine,
    async_event: Mutex<Option<Arc<AsyncEvent>>>,
    exchange: Mutex<Exchange>,
    io_callback: Mutex<Option<Arc<dyn IoCallback>>>,
    handler: Arc<dyn Handler>,
    executor: Executor,
    default_timeout: std::time::Duration,
    last_cause: Mutex<Option<String>>,
    completed: tokio::sync::Notify,
}

impl Channel {
    /// Build a fresh channel for one request, wiring `request`'s
    /// `Weak<Channel>` back-reference via `Arc::new_cyclic` so the request
    /// can reach its owning channel without a strong cycle.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        method: http::Method,
        target: String,
        uri: http::Uri,
        version: http::Version,
        headers: http::HeaderMap,
        content_length: Option<u64>,
        body: RequestBody,
        handler: Arc<dyn Handler>,
        executor: Executor,
        default_timeout: std::time::Duration,
        response_limit: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let request = BaseRequest::new(
                method,
                target,
                uri,
                version,
                headers,
                content_length,
                body,
                weak.clone(),
            );
            let mut output = OutputChain::new();
            output.push(Box::new(ResponseLimitInterceptor::new(response_limit)));
            let response = Response::new(Arc::new(output));
            Self {
                state: StateMachine::new(),
                async_event: Mutex::new(None),
                exchange: Mutex::new(Exchange { request, response }),
                io_callback: Mutex::new(None),
                handler,
                executor,
                default_timeout,
                last_cause: Mutex::new(None),
                completed: tokio::sync::Notify::new(),
            }
        })
    }

    /// Wait for the exchange to reach `COMPLETED`, for a connection's read
    /// loop that dispatched a request and must not write the response (or
    /// accept the next one) until any async cycle has finished. Returns
    /// immediately if the channel is already completed.
    ///
    /// Uses the check-register-check pattern `tokio::sync::Notify` itself
    /// documents for this exact race: a `notify_waiters()` that lands
    /// between the first state check and the `.await` below is still
    /// observed, because `notified()` is created (and begins tracking)
    /// before that second check runs.
    pub async fn wait_completed(&self) {
        loop {
            if matches!(self.state.state(), crate::state_machine::State::Completed) {
                return;
            }
            let notified = self.completed.notified();
            if matches!(self.state.state(), crate::state_machine::State::Completed) {
                return;
            }
            notified.await;
        }
    }

    /// Run `f` with exclusive access to the request and response. Never
    /// held across an `.await` by any caller in this crate — the request
    /// body, once taken via [`BaseRequest::take_body`], is read outside
    /// this lock.
    pub fn with_exchange<R>(&self, f: impl FnOnce(&mut BaseRequest, &mut Response) -> R) -> R {
        let mut exchange = self.exchange.lock();
        f(&mut exchange.request, &mut exchange.response)
    }

    #[must_use]
    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    pub fn register_io_callback(&self, callback: Arc<dyn IoCallback>) {
        *self.io_callback.lock() = Some(callback);
    }

    /// Drive the handler chain through one full dispatch cycle, starting
    /// from `IDLE`. Returns once the state machine reports `WAIT` (control
    /// handed back to the caller; a later `dispatch`/`complete`/timeout
    /// will resume it) or the exchange completes.
    pub async fn run(self: &Arc<Self>) -> Result<(), BoxError> {
        let outcome = self.state.handling()?;
        self.step(outcome.action).await
    }

    async fn resume(self: &Arc<Self>) {
        if let Ok(outcome) = self.state.handling() {
            let _ = self.step(outcome.action).await;
        }
    }

    async fn step(self: &Arc<Self>, mut action: Action) -> Result<(), BoxError> {
        loop {
            match action {
                Action::Terminated | Action::Wait => return Ok(()),
                Action::Complete => {
                    self.finish_complete()?;
                    return Ok(());
                }
                Action::Dispatch => {
                    self.run_handler(DispatcherType::Request).await;
                }
                Action::AsyncDispatch => {
                    self.run_handler(DispatcherType::AsyncDispatch).await;
                }
                Action::ErrorDispatch | Action::AsyncError => {
                    self.run_error_dispatch().await;
                }
                Action::ReadCallback => self.run_io_callback(IoEvent::ReadPossible),
                Action::WriteCallback => self.run_io_callback(IoEvent::WritePossible),
            }
            let outcome = self.state.unhandle()?;
            self.apply_directives(outcome.directives);
            if matches!(outcome.action, Action::Wait | Action::Terminated) {
                return Ok(());
            }
            action = outcome.action;
        }
    }

    async fn run_handler(self: &Arc<Self>, dispatcher_type: DispatcherType) {
        let target = self.with_exchange(|req, _resp| {
            req.set_dispatcher_type(dispatcher_type);
            req.target().to_string()
        });
        let result = self.handler.handle(target, self.clone()).await;
        self.record_result(result);
    }

    /// Error dispatch routes through the same handler chain with
    /// `DispatcherType::Error` set (§4.5); a dedicated error handler near
    /// the root of the chain is expected to check
    /// `request.dispatcher_type()` and take over.
    async fn run_error_dispatch(self: &Arc<Self>) {
        self.with_exchange(|req, resp| {
            req.set_dispatcher_type(DispatcherType::Error);
            if resp.status().is_success() {
                resp.set_status(http::StatusCode::INTERNAL_SERVER_ERROR);
            }
        });
        let target = self.with_exchange(|req, _resp| req.target().to_string());
        let result = self.handler.handle(target, self.clone()).await;
        self.record_result(result);
        // §8 scenario 2: the error handler is expected to call
        // `complete()` itself; if it returned without doing so, complete
        // on its behalf so the cycle doesn't hang.
        if matches!(
            self.state.async_state(),
            AsyncState::Erroring | AsyncState::Started
        ) {
            let directives = self.state.complete();
            self.apply_timeout_directives(directives);
        }
    }

    fn record_result(self: &Arc<Self>, result: Result<bool, BoxError>) {
        let Err(e) = result else { return };
        self.with_exchange(|_req, resp| {
            resp.set_status(http::StatusCode::INTERNAL_SERVER_ERROR);
        });
        *self.last_cause.lock() = Some(e.to_string());
        // If an async cycle is in flight, its cause slot carries the error
        // forward to the eventual error dispatch; a synchronous dispatch
        // (no `AsyncEvent` yet) just falls through to `unhandle()`'s
        // `NotAsync -> Completing` branch with the 500 already set.
        if let Some(event) = self.async_event.lock().clone() {
            event.set_cause(e);
        }
    }

    /// The most recently recorded handler error's message, if any, for the
    /// error page's cause chain (§4.7). Checks the live async cycle's
    /// event first since its cause is the one that routed here via
    /// `ERROR_DISPATCH`/`ASYNC_ERROR`; falls back to the last synchronous
    /// dispatch failure otherwise.
    #[must_use]
    pub fn error_cause_message(&self) -> Option<String> {
        if let Some(event) = self.async_event.lock().clone()
            && let Some(msg) = event.cause_message()
        {
            return Some(msg);
        }
        self.last_cause.lock().clone()
    }

    fn run_io_callback(self: &Arc<Self>, event: IoEvent) {
        let Some(callback) = self.io_callback.lock().clone() else {
            return;
        };
        let result = match event {
            IoEvent::ReadPossible => callback.on_read_possible(self),
            IoEvent::WritePossible => callback.on_write_possible(self),
        };
        self.record_result(result.map(|()| false));
    }

    fn finish_complete(&self) -> Result<(), BoxError> {
        self.with_exchange(|_req, resp| resp.close());
        let event = self.async_event.lock().take();
        if let Some(event) = &event {
            for listener in event.listeners() {
                listener.on_complete(event);
            }
        }
        let result = self.state.on_complete().map_err(|_| {
            Box::new(CoreError::HandlerRuntime(
                "on_complete called outside COMPLETING".into(),
            )) as BoxError
        });
        self.completed.notify_waiters();
        result
    }

    /// §4.3's `startAsync`: snapshot the currently-registered listeners
    /// into a fresh [`AsyncEvent`] and flip the state machine into
    /// `Async=STARTED`.
    pub fn start_async(&self, listeners: Vec<Arc<dyn AsyncListener>>) -> Result<(), BoxError> {
        self.state.start_async()?;
        let event = Arc::new(AsyncEvent::new(listeners));
        for listener in event.listeners() {
            listener.on_start_async(&event);
        }
        *self.async_event.lock() = Some(event);
        Ok(())
    }

    /// Register an additional listener on the in-flight async cycle, if
    /// any.
    pub fn add_async_listener(&self, listener: Arc<dyn AsyncListener>) {
        if let Some(event) = self.async_event.lock().clone() {
            event.add_listener(listener);
        }
    }

    /// §4.3's `dispatch()`: re-enter the handler chain for the current
    /// async cycle. The actual re-entry happens on the executor once the
    /// resulting `enqueue_dispatch` directive is honoured.
    pub fn dispatch(self: &Arc<Self>) -> Result<(), BoxError> {
        let directives = self.state.dispatch()?;
        self.apply_directives(directives);
        Ok(())
    }

    /// §4.3's `complete()`: idempotent. Closes the response to further
    /// writes immediately, synchronously with this call — a handler that
    /// calls `complete()` and then tries to write again in the same
    /// invocation must see that write rejected (§8 scenario 6), not only
    /// once `finish_complete` later runs.
    pub fn complete(self: &Arc<Self>) {
        self.with_exchange(|_req, resp| resp.close());
        let directives = self.state.complete();
        self.apply_directives(directives);
    }

    /// §4.3's `asyncError()`, invoked when the transport or a background
    /// task fails a request mid-`ASYNC_WAIT`.
    pub fn async_error(self: &Arc<Self>, cause: BoxError) {
        if let Some(event) = self.async_event.lock().clone() {
            event.set_cause(cause);
        }
        let directives = self.state.async_error();
        self.apply_directives(directives);
    }

    pub fn on_read_possible(self: &Arc<Self>) {
        if self.state.on_read_possible() {
            self.enqueue_resume();
        }
    }

    pub fn on_read_ready(self: &Arc<Self>) {
        if self.state.on_read_ready() {
            self.enqueue_resume();
        }
    }

    pub fn on_write_possible(self: &Arc<Self>) {
        if self.state.on_write_possible() {
            self.enqueue_resume();
        }
    }

    /// Tear down the async event and timeout (if any), returning the
    /// state machine to `IDLE` for reuse by a fresh request on the same
    /// connection (HTTP/1.1 keep-alive).
    pub fn recycle(&self) -> Result<(), BoxError> {
        let directives = self.state.recycle()?;
        self.cancel_pending_timeout(directives);
        Ok(())
    }

    pub fn upgrade(&self) -> Result<(), BoxError> {
        self.state.upgrade()?;
        Ok(())
    }

    fn apply_directives(self: &Arc<Self>, directives: Directives) {
        self.apply_timeout_directives(directives);
        if directives.enqueue_dispatch {
            self.enqueue_resume();
        }
    }

    fn apply_timeout_directives(self: &Arc<Self>, directives: Directives) {
        self.cancel_pending_timeout(directives);
        if directives.schedule_timeout {
            self.schedule_timeout();
        }
    }

    fn cancel_pending_timeout(&self, directives: Directives) {
        if directives.cancel_timeout
            && let Some(event) = self.async_event.lock().clone()
            && let Some(handle) = event.take_timeout_handle()
        {
            handle.cancel();
        }
    }

    fn schedule_timeout(self: &Arc<Self>) {
        let Some(event) = self.async_event.lock().clone() else {
            return;
        };
        let channel = Arc::downgrade(self);
        let delay = self.default_timeout;
        let handle = timeout::schedule(delay, async move {
            if let Some(channel) = channel.upgrade() {
                channel.fire_timeout().await;
            }
        });
        event.set_timeout_handle(handle);
    }

    /// Called from inside the spawned timeout task. Implements the
    /// two-phase `onTimeout()` of §4.3/§5: `begin_timeout` flips
    /// `Async=EXPIRING` under the lock, listeners run with no lock held,
    /// then `finish_timeout` finalizes based on whether a listener set a
    /// cause.
    async fn fire_timeout(self: Arc<Self>) {
        if !self.state.begin_timeout() {
            return;
        }
        let event = self.async_event.lock().clone();
        if let Some(event) = &event {
            for listener in event.listeners() {
                listener.on_timeout(event);
            }
            // No listener attached a cause of its own: the timeout itself
            // is the cause the error page reports (§8 scenario 2).
            event.set_cause(Box::new(CoreError::Timeout));
        }
        let throwable_set = event.as_ref().is_some_and(AsyncEvent::has_cause);
        let directives = self.state.finish_timeout(throwable_set);
        if directives.enqueue_dispatch {
            self.enqueue_resume();
        }
    }

    fn enqueue_resume(self: &Arc<Self>) {
        let channel = self.clone();
        self.executor.spawn_task(async move {
            channel.resume().await;
        });
    }
}

enum IoEvent {
    ReadPossible,
    WritePossible,
}
