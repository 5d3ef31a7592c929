//! # Blocking Invocation
//!
//! Parks the calling thread until the single result of a call arrives.
//!
//! ## Transitions
//!
//! | state      | event        | next       | effect                                  |
//! |------------|--------------|------------|-----------------------------------------|
//! | `Idle`     | `start`      | `Sent`     | allocate, register, send, park          |
//! | `Sent`     | item / error | `Resolved` | deregister, wake the caller             |
//! | `Sent`     | completed    | `Resolved` | deregister, wake with a violation; fail |
//! | `Resolved` | completed    | `Resolved` | nothing                                 |
//! | anything else                           || fail                                    |
//!
//! The wakeup is a `tokio::sync::oneshot`: the value is stored in the channel, so a
//! result delivered before the caller parks is not lost.
//!
//! Never call `start` from the context that drives inbound dispatch; nothing would
//! ever deliver the result.

use std::sync::Arc;

use muxrpc::CorrelationId;
use muxrpc::Request;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::invocation::Invocation;
use super::session::Session;
use crate::error::Error;
use crate::error::ProtocolViolation;
use crate::error::Result;

type Waker = oneshot::Sender<Result<Value>>;

enum State {
    Idle,
    Sent { id: CorrelationId, waker: Waker },
    Resolved { id: CorrelationId },
}

pub(crate) struct BlockingCall {
    session: Arc<Session>,
    method: String,
    params: Mutex<Option<Value>>,
    state: Mutex<State>,
}

impl BlockingCall {
    pub fn new(session: Arc<Session>, method: String, params: Value) -> Arc<Self> {
        Arc::new(Self {
            session,
            method,
            params: Mutex::new(Some(params)),
            state: Mutex::new(State::Idle),
        })
    }

    pub fn id(&self) -> Option<CorrelationId> {
        match &*self.state.lock() {
            State::Idle => None,
            State::Sent { id, .. } | State::Resolved { id } => Some(*id),
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<Value> {
        let rx = self.send()?;
        match rx.blocking_recv() {
            Ok(result) => result,
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    fn send(self: &Arc<Self>) -> Result<oneshot::Receiver<Result<Value>>> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.lock();
            if !matches!(*state, State::Idle) {
                return Err(ProtocolViolation::AlreadyStarted.into());
            }
            let id = self.session.next_id()?;
            *state = State::Sent { id, waker: tx };
            id
        };

        // The state is `Sent` before the id is visible, so a response that races
        // the send always finds a waker.
        if let Err(e) = self.session.register(id, Invocation::Blocking(self.clone())) {
            *self.state.lock() = State::Resolved { id };
            return Err(e);
        }

        let params = self.params.lock().take().unwrap_or(Value::Null);
        if let Err(e) = self.session.send_request(Request::new(id, self.method.clone(), params, false)) {
            tracing::error!(peer = %self.session.peer(), id, method = %self.method, error = %e, "failed to send request");
            // The waker goes with the error; if a response already won, the caller gets it instead.
            self.resolve(id, Err(e));
        }
        Ok(rx)
    }

    fn resolve(&self, id: CorrelationId, result: Result<Value>) -> bool {
        let waker = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Resolved { id }) {
                State::Sent { waker, .. } => waker,
                previous => {
                    *state = previous;
                    return false;
                }
            }
        };
        self.session.deregister(id);
        let _ = waker.send(result);
        true
    }

    fn check(&self, id: CorrelationId) -> Result<()> {
        match &*self.state.lock() {
            State::Idle => Err(ProtocolViolation::NotStarted.into()),
            State::Sent { id: bound, .. } | State::Resolved { id: bound } if *bound != id => {
                Err(ProtocolViolation::IdMismatch { expected: *bound, received: id }.into())
            }
            _ => Ok(()),
        }
    }

    pub fn on_item(&self, id: CorrelationId, value: Value) -> Result<()> {
        self.check(id)?;
        tracing::trace!(peer = %self.session.peer(), id, "blocking call resolved with a value");
        if self.resolve(id, Ok(value)) { Ok(()) } else { Err(ProtocolViolation::AlreadyResolved.into()) }
    }

    pub fn on_error(&self, id: CorrelationId, error: Error) -> Result<()> {
        self.check(id)?;
        tracing::trace!(peer = %self.session.peer(), id, error = %error, "blocking call resolved with an error");
        if self.resolve(id, Err(error)) { Ok(()) } else { Err(ProtocolViolation::AlreadyResolved.into()) }
    }

    pub fn on_completed(&self, id: CorrelationId) -> Result<()> {
        self.check(id)?;
        let violation = ProtocolViolation::CompletedWithoutResult;
        if self.resolve(id, Err(violation.clone().into())) {
            return Err(violation.into());
        }
        Ok(())
    }
}

/// A call that blocks the current thread until its result arrives.
///
/// Single-use: a second `start` fails with `AlreadyStarted`.
#[derive(Clone)]
pub struct BlockingInvocation {
    call: Arc<BlockingCall>,
}

impl BlockingInvocation {
    pub(crate) fn new(call: Arc<BlockingCall>) -> Self {
        Self { call }
    }

    /// Sends the request and parks until a result or error arrives.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; use
    /// `tokio::task::spawn_blocking` or a plain thread.
    pub fn start(&self) -> Result<Value> {
        self.call.start()
    }

    /// The bound id, once started.
    pub fn id(&self) -> Option<CorrelationId> {
        self.call.id()
    }

    pub fn on_item(&self, id: CorrelationId, value: Value) -> Result<()> {
        self.call.on_item(id, value)
    }

    pub fn on_error(&self, id: CorrelationId, error: Error) -> Result<()> {
        self.call.on_error(id, error)
    }

    pub fn on_completed(&self, id: CorrelationId) -> Result<()> {
        self.call.on_completed(id)
    }
}
