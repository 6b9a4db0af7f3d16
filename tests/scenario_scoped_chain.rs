//! §8 scenario 4: a scoped chain `A(scoped) -> B(scoped) -> X(plain) ->
//! C(scoped)`, dispatched through a real `Channel`, must observe
//! `A.doScope, B.doScope, A.doHandle, B.doHandle, X.handle, C.doScope,
//! C.doHandle`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use sluice::channel::Channel;
use sluice::error::BoxError;
use sluice::handler::{handler_fn, Handler, Link, ScopedChain, ScopedHandler};
use sluice::request::RequestBody;
use sluice::rt::Executor;

struct Recorder(Arc<Mutex<Vec<String>>>, &'static str);

impl ScopedHandler for Recorder {
    async fn do_scope(&self, _target: String, _channel: Arc<Channel>) -> Result<(), BoxError> {
        self.0.lock().push(format!("{}.doScope", self.1));
        Ok(())
    }

    async fn do_handle(&self, _target: String, _channel: Arc<Channel>) -> Result<bool, BoxError> {
        self.0.lock().push(format!("{}.doHandle", self.1));
        Ok(false)
    }
}

struct PlainRecorder(Arc<Mutex<Vec<String>>>, &'static str);

impl Handler for PlainRecorder {
    fn handle(
        &self,
        _target: String,
        _channel: Arc<Channel>,
    ) -> impl Future<Output = Result<bool, BoxError>> + Send + '_ {
        async move {
            self.0.lock().push(format!("{}.handle", self.1));
            Ok(false)
        }
    }
}

#[tokio::test]
async fn scoped_chain_ordering_survives_a_real_dispatch_cycle() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let chain = Arc::new(ScopedChain::new(vec![
        Link::scoped(Recorder(log.clone(), "A")),
        Link::scoped(Recorder(log.clone(), "B")),
        Link::plain(PlainRecorder(log.clone(), "X")),
        Link::scoped(Recorder(log.clone(), "C")),
    ]));

    let root: Arc<dyn Handler> = Arc::new(handler_fn(move |target, channel| {
        let chain = chain.clone();
        async move { chain.run(&target, channel).await }
    }));

    let channel = Channel::new(
        http::Method::GET,
        "/x".to_string(),
        http::Uri::from_static("/x"),
        http::Version::HTTP_11,
        http::HeaderMap::new(),
        None,
        RequestBody::empty(),
        root,
        Executor::new(),
        Duration::from_secs(5),
        u64::MAX,
    );
    channel.run().await.unwrap();
    channel.wait_completed().await;

    assert_eq!(
        *log.lock(),
        vec![
            "A.doScope",
            "B.doScope",
            "A.doHandle",
            "B.doHandle",
            "X.handle",
            "C.doScope",
            "C.doHandle",
        ]
    );
}
