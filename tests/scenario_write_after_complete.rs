//! §8 scenario 6: a handler calls `complete()` then attempts to write; the
//! write must be rejected, and `on_complete` must still fire exactly once.

mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use sluice::async_event::{AsyncEvent, AsyncListener};
use sluice::channel::Channel;
use sluice::error::CoreError;
use sluice::handler::{handler_fn, Handler};
use sluice::request::RequestBody;
use sluice::rt::Executor;
use sluice::state_machine::State;

struct CountingListener(Arc<AtomicUsize>);

impl AsyncListener for CountingListener {
    fn on_complete(&self, _event: &AsyncEvent) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn write_after_complete_is_rejected_and_on_complete_fires_once() {
    let completions = Arc::new(AtomicUsize::new(0));
    let listener = Arc::new(CountingListener(completions.clone()));
    let write_result: Arc<std::sync::Mutex<Option<Result<(), CoreError>>>> =
        Arc::new(std::sync::Mutex::new(None));
    let write_result_clone = write_result.clone();
    let listener_clone = listener.clone();

    let handler: Arc<dyn Handler> = Arc::new(handler_fn(move |_target, channel| {
        let write_result = write_result_clone.clone();
        let listener = listener_clone.clone();
        async move {
            channel
                .start_async(vec![listener as Arc<dyn AsyncListener>])
                .unwrap();
            channel.complete();
            let outcome = channel.with_exchange(|_req, resp| resp.write(b"too late"));
            *write_result.lock().unwrap() = Some(outcome);
            Ok(false)
        }
    }));

    let channel = Channel::new(
        http::Method::GET,
        "/x".to_string(),
        http::Uri::from_static("/x"),
        http::Version::HTTP_11,
        http::HeaderMap::new(),
        None,
        RequestBody::empty(),
        handler,
        Executor::new(),
        Duration::from_secs(5),
        u64::MAX,
    );
    channel.run().await.unwrap();
    channel.wait_completed().await;

    assert_eq!(channel.state().state(), State::Completed);
    assert_eq!(completions.load(Ordering::SeqCst), 1);

    let outcome = write_result.lock().unwrap().take().unwrap();
    assert!(matches!(outcome, Err(CoreError::ResponseClosed)));
    channel.with_exchange(|_req, resp| assert!(resp.body().is_empty()));
}
