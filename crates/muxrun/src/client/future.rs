//! # Future Invocation
//!
//! Sends a call and hands back a single-resolution future without blocking.
//!
//! ## Transitions
//!
//! | state       | event        | next        | effect                            |
//! |-------------|--------------|-------------|-----------------------------------|
//! | `Idle`      | `start`      | `Sent`      | allocate, register, send          |
//! | `Sent`      | item / error | `Resolved`  | deregister, resolve the handle    |
//! | `Sent`      | completed    | `Completed` | deregister, resolve with a violation; fail |
//! | `Resolved`  | completed    | `Completed` | nothing                           |
//! | `Resolved`  | item / error | `Resolved`  | fail, handle keeps its value      |
//! | `Completed` | completed    | `Completed` | fail                              |

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

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

enum State {
    Idle,
    Sent { id: CorrelationId, tx: oneshot::Sender<Result<Value>> },
    Resolved { id: CorrelationId },
    Completed { id: CorrelationId },
}

pub(crate) struct FutureCall {
    session: Arc<Session>,
    method: String,
    params: Mutex<Option<Value>>,
    state: Mutex<State>,
}

impl FutureCall {
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
            State::Sent { id, .. } | State::Resolved { id } | State::Completed { id } => Some(*id),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.state.lock(), State::Resolved { .. } | State::Completed { .. })
    }

    pub fn start(self: &Arc<Self>) -> CallFuture {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.lock();
            if !matches!(*state, State::Idle) {
                return CallFuture::failed(ProtocolViolation::AlreadyStarted.into());
            }
            let id = match self.session.next_id() {
                Ok(id) => id,
                Err(e) => return CallFuture::failed(e),
            };
            *state = State::Sent { id, tx };
            id
        };

        if let Err(e) = self.session.register(id, Invocation::Future(self.clone())) {
            *self.state.lock() = State::Resolved { id };
            return CallFuture::failed(e);
        }

        let params = self.params.lock().take().unwrap_or(Value::Null);
        if let Err(e) = self.session.send_request(Request::new(id, self.method.clone(), params, false)) {
            tracing::error!(peer = %self.session.peer(), id, method = %self.method, error = %e, "failed to send request");
            self.resolve(id, Err(e));
        }
        CallFuture { rx: Some(rx), early: None }
    }

    fn resolve(&self, id: CorrelationId, result: Result<Value>) -> bool {
        let tx = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Resolved { id }) {
                State::Sent { tx, .. } => tx,
                previous => {
                    *state = previous;
                    return false;
                }
            }
        };
        self.session.deregister(id);
        // The caller may have dropped the future; that is not our concern.
        let _ = tx.send(result);
        true
    }

    fn check(&self, id: CorrelationId) -> Result<()> {
        match &*self.state.lock() {
            State::Idle => Err(ProtocolViolation::NotStarted.into()),
            State::Sent { id: bound, .. } | State::Resolved { id: bound } | State::Completed { id: bound }
                if *bound != id =>
            {
                Err(ProtocolViolation::IdMismatch { expected: *bound, received: id }.into())
            }
            _ => Ok(()),
        }
    }

    pub fn on_item(&self, id: CorrelationId, value: Value) -> Result<()> {
        self.check(id)?;
        if !self.resolve(id, Ok(value)) {
            return Err(ProtocolViolation::AlreadyResolved.into());
        }
        tracing::trace!(peer = %self.session.peer(), id, "future resolved with a value");
        Ok(())
    }

    pub fn on_error(&self, id: CorrelationId, error: Error) -> Result<()> {
        self.check(id)?;
        let message = error.to_string();
        if !self.resolve(id, Err(error)) {
            return Err(ProtocolViolation::AlreadyResolved.into());
        }
        tracing::trace!(peer = %self.session.peer(), id, error = %message, "future resolved with an error");
        Ok(())
    }

    pub fn on_completed(&self, id: CorrelationId) -> Result<()> {
        self.check(id)?;
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Completed { id }) {
            State::Resolved { .. } => Ok(()),
            State::Completed { .. } => Err(ProtocolViolation::DuplicateCompletion.into()),
            State::Idle => {
                *state = State::Idle;
                Err(ProtocolViolation::NotStarted.into())
            }
            State::Sent { tx, .. } => {
                drop(state);
                self.session.deregister(id);
                let violation = ProtocolViolation::CompletedWithoutResult;
                let _ = tx.send(Err(violation.clone().into()));
                Err(violation.into())
            }
        }
    }
}

/// Resolves once with the call's value or error.
///
/// Dropping it does not cancel the call; the result is discarded on arrival.
pub struct CallFuture {
    rx: Option<oneshot::Receiver<Result<Value>>>,
    early: Option<Error>,
}

impl CallFuture {
    fn failed(error: Error) -> Self {
        Self { rx: None, early: Some(error) }
    }
}

impl Future for CallFuture {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(error) = self.early.take() {
            return Poll::Ready(Err(error));
        }
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Ready(Err(Error::ChannelClosed));
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(result) => {
                self.rx = None;
                Poll::Ready(result.unwrap_or(Err(Error::ChannelClosed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A call whose result is delivered through a [`CallFuture`].
#[derive(Clone)]
pub struct FutureInvocation {
    call: Arc<FutureCall>,
}

impl FutureInvocation {
    pub(crate) fn new(call: Arc<FutureCall>) -> Self {
        Self { call }
    }

    /// Sends the request and returns immediately.
    ///
    /// A failed send resolves the returned future with the send error.
    pub fn start(&self) -> CallFuture {
        self.call.start()
    }

    pub fn id(&self) -> Option<CorrelationId> {
        self.call.id()
    }

    pub fn is_resolved(&self) -> bool {
        self.call.is_resolved()
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
