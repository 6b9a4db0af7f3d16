//! §8 scenario 2: a handler starts an async cycle and never calls
//! `dispatch`/`complete`; the default timeout elapses, the channel
//! error-dispatches, and the final response carries a `Timeout` cause.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sluice::channel::Channel;
use sluice::error::{BoxError, CoreError};
use sluice::handler::{handler_fn, Handler};
use sluice::request::RequestBody;
use sluice::rt::Executor;
use sluice::state_machine::State;

struct ErrorPageHandler(Arc<Mutex<Option<String>>>);

impl Handler for ErrorPageHandler {
    fn handle(
        &self,
        _target: String,
        channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            // The async event (and its cause) is dropped once `complete()`
            // finishes, so the cause has to be read here, before that.
            *self.0.lock().unwrap() = channel.error_cause_message();
            channel.with_exchange(|_req, resp| {
                resp.write(b"timed out").unwrap();
            });
            channel.complete();
            Ok(true)
        }
    }
}

#[tokio::test(start_paused = true)]
async fn long_running_handler_times_out_with_timeout_cause() {
    let started = std::sync::atomic::AtomicUsize::new(0);
    let started = Arc::new(started);
    let started_clone = started.clone();
    let cause_slot: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let cause_slot_clone = cause_slot.clone();

    let handler: Arc<dyn Handler> = Arc::new(handler_fn(move |target, channel| {
        let started = started_clone.clone();
        let cause_slot = cause_slot_clone.clone();
        async move {
            if matches!(
                channel.with_exchange(|req, _resp| req.dispatcher_type()),
                sluice::attributes::DispatcherType::Error
            ) {
                return ErrorPageHandler(cause_slot).handle(target, channel).await;
            }
            started.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            channel.start_async(Vec::new()).unwrap();
            Ok(false)
        }
    }));

    let channel = Channel::new(
        http::Method::GET,
        "/slow".to_string(),
        http::Uri::from_static("/slow"),
        http::Version::HTTP_11,
        http::HeaderMap::new(),
        None,
        RequestBody::empty(),
        handler,
        Executor::new(),
        Duration::from_millis(50),
        u64::MAX,
    );

    channel.run().await.unwrap();
    assert_eq!(channel.state().state(), State::AsyncWait);
    assert_eq!(started.load(std::sync::atomic::Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(75)).await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    assert_eq!(channel.state().state(), State::Completed);
    channel.with_exchange(|_req, resp| {
        assert_eq!(resp.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(resp.body(), b"timed out");
    });
    let cause = cause_slot.lock().unwrap().take().expect("a cause was recorded");
    assert_eq!(cause, CoreError::Timeout.to_string());
}
