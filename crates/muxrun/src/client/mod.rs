//! # Client Session
//!
//! Issues calls over one duplex channel and correlates the frames that answer them.
//!
//! ## Architecture
//!
//! - **Session**: owns the id allocator, the pending-call registry and the
//!   transport. Every strategy holds a handle to it.
//! - **Strategies**: `BlockingInvocation`, `FutureInvocation` and `CallStream`,
//!   one state machine per calling convention.
//! - **Pump**: a task that reads frames off the transport and hands them to the
//!   `ClientDispatcher`. When the channel ends, every in-flight call fails with
//!   `Error::ChannelClosed`.
//!
//! There are no timeouts here. Wrap a `CallFuture` in `tokio::time::timeout` if
//! a call must not wait forever.

mod blocking;
mod dispatcher;
mod future;
mod ids;
mod invocation;
mod registry;
mod session;
mod stream;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

pub use blocking::BlockingInvocation;
pub use dispatcher::ClientDispatcher;
pub use future::CallFuture;
pub use future::FutureInvocation;
pub use ids::CorrelationIdAllocator;
pub use stream::CallStream;
pub use stream::ItemStream;
pub use stream::StreamEvent;
pub use stream::Subscriber;
pub use stream::Subscription;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::error::Result;
use crate::transport::Transport;
use session::Session;

/// The calling side of one channel.
pub struct Client {
    session: Arc<Session>,
    dispatcher: ClientDispatcher,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Client {
    /// Creates a client and spawns its pump. Must be called within a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_config(transport, ClientConfig::default())
    }

    pub fn with_config(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let client = Self::detached_with_config(transport, config);
        let transport = client.session.transport.clone();
        let dispatcher = client.dispatcher.clone();
        let peer = client.session.peer().to_string();
        *client.pump.lock() = Some(tokio::spawn(pump(peer, transport, dispatcher)));
        client
    }

    /// A client without a pump; inbound frames are fed through [`Client::dispatcher`].
    pub fn detached(transport: Arc<dyn Transport>) -> Self {
        Self::detached_with_config(transport, ClientConfig::default())
    }

    pub fn detached_with_config(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        let session = Arc::new(Session::new(transport, config));
        Self {
            dispatcher: ClientDispatcher::new(session.clone()),
            session,
            pump: Mutex::new(None),
        }
    }

    pub fn peer_name(&self) -> &str {
        self.session.peer()
    }

    pub fn dispatcher(&self) -> &ClientDispatcher {
        &self.dispatcher
    }

    pub fn blocking(&self, method: impl Into<String>, params: Value) -> BlockingInvocation {
        BlockingInvocation::new(blocking::BlockingCall::new(self.session.clone(), method.into(), params))
    }

    /// Sends a call and parks the current thread until it resolves.
    ///
    /// Do not call this from the runtime that drives the pump.
    pub fn call_blocking(&self, method: impl Into<String>, params: Value) -> Result<Value> {
        self.blocking(method, params).start()
    }

    pub fn future(&self, method: impl Into<String>, params: Value) -> FutureInvocation {
        FutureInvocation::new(future::FutureCall::new(self.session.clone(), method.into(), params))
    }

    /// Sends a call and returns a future of its result.
    pub fn call(&self, method: impl Into<String>, params: Value) -> CallFuture {
        self.future(method, params).start()
    }

    /// A streaming call. Nothing is sent until it is subscribed.
    pub fn stream(&self, method: impl Into<String>, params: Value) -> CallStream {
        CallStream::new(stream::StreamCall::new(self.session.clone(), method.into(), params))
    }

    /// Calls currently awaiting a response.
    pub fn active_requests(&self) -> usize {
        self.session.registry.count()
    }

    /// Stops the pump and fails every in-flight call with `ChannelClosed`.
    pub fn close(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        self.dispatcher.fail_all(Error::ChannelClosed);
    }
}

/// Dropping a client closes it. Registered calls hold the session alive, so
/// without this they would never resolve.
impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump(peer: String, transport: Arc<dyn Transport>, dispatcher: ClientDispatcher) {
    loop {
        match transport.recv().await {
            Ok(Some(frame)) => {
                // Violations are logged by the dispatcher and concern one call only.
                let _ = dispatcher.receive(&frame);
            }
            Ok(None) => {
                tracing::debug!(peer = %peer, "channel closed by peer");
                break;
            }
            Err(e) => {
                tracing::error!(peer = %peer, error = %e, "transport error in pump");
                break;
            }
        }
    }
    dispatcher.fail_all(Error::ChannelClosed);
}
