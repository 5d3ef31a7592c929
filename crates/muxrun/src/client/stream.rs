//! # Stream Invocation
//!
//! A lazily issued, cancellable call that yields many items.
//!
//! ## Philosophy
//!
//! - **No Consumer, No Traffic**: Building a `CallStream` sends nothing. Every
//!   `subscribe` is its own call with a fresh id and its own binding.
//! - **Inline Delivery**: Items reach the subscriber on the thread that runs
//!   inbound dispatch, in frame order. A slow subscriber stalls every other call
//!   on the channel; hand work off if it is expensive.
//! - **Contained Consumers**: A subscriber that fails or panics on an item is
//!   treated as having cancelled. The multiplexer and other calls carry on.
//!
//! ## Transitions (per subscription)
//!
//! `Sent -> Delivering -> Sent` around each item, `-> Closed` on the first of:
//! completion, error, consumer cancellation, or consumer failure. Only the
//! transition into `Closed` deregisters, and only a cancelling transition sends
//! the cancellation request, so it goes out at most once.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use muxrpc::CorrelationId;
use muxrpc::Request;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::invocation::Invocation;
use super::session::Session;
use crate::error::Error;
use crate::error::ProtocolViolation;
use crate::error::Result;

/// What a subscriber observes.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Item(Value),
    /// Terminal. The call failed.
    Error(Error),
    /// Terminal. The call finished normally.
    Completed,
}

/// Receives the events of one subscription.
///
/// Returning `Err` from an `Item` event cancels the subscription. Errors from
/// terminal events are logged and otherwise ignored.
pub trait Subscriber: Send + 'static {
    fn on_event(&mut self, event: StreamEvent) -> anyhow::Result<()>;
}

impl<F> Subscriber for F
where
    F: FnMut(StreamEvent) -> anyhow::Result<()> + Send + 'static,
{
    fn on_event(&mut self, event: StreamEvent) -> anyhow::Result<()> {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Sent,
    Delivering,
    Closed,
}

struct BindingState {
    phase: Phase,
    cancelled: bool,
}

struct Binding {
    state: Mutex<BindingState>,
    subscriber: Mutex<Box<dyn Subscriber>>,
}

impl Binding {
    fn new(subscriber: Box<dyn Subscriber>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(BindingState { phase: Phase::Sent, cancelled: false }),
            subscriber: Mutex::new(subscriber),
        })
    }

    /// Delivers one event, containing both `Err` and panics.
    fn deliver(&self, event: StreamEvent) -> anyhow::Result<()> {
        let mut subscriber = self.subscriber.lock();
        match std::panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))) {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("subscriber panicked")),
        }
    }
}

pub(crate) struct StreamCall {
    session: Arc<Session>,
    method: String,
    params: Value,
    bindings: Mutex<HashMap<CorrelationId, Arc<Binding>>>,
}

impl StreamCall {
    pub fn new(session: Arc<Session>, method: String, params: Value) -> Arc<Self> {
        Arc::new(Self {
            session,
            method,
            params,
            bindings: Mutex::new(HashMap::new()),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.bindings.lock().len()
    }

    fn binding(&self, id: CorrelationId) -> Result<Arc<Binding>> {
        match self.bindings.lock().get(&id) {
            Some(binding) => Ok(binding.clone()),
            None => {
                tracing::error!(peer = %self.session.peer(), id, method = %self.method, "no subscriber bound to id");
                Err(ProtocolViolation::UnknownSubscription(id).into())
            }
        }
    }

    pub fn subscribe(self: &Arc<Self>, subscriber: Box<dyn Subscriber>) -> Result<CorrelationId> {
        let id = self.session.next_id()?;
        tracing::trace!(peer = %self.session.peer(), id, method = %self.method, "subscription initiated");

        // Bound before registration so the first frame always finds its subscriber.
        self.bindings.lock().insert(id, Binding::new(subscriber));
        if let Err(e) = self.session.register(id, Invocation::Stream(self.clone())) {
            self.bindings.lock().remove(&id);
            return Err(e);
        }

        let request = Request::new(id, self.method.clone(), self.params.clone(), true);
        if let Err(e) = self.session.send_request(request) {
            tracing::error!(peer = %self.session.peer(), id, method = %self.method, error = %e, "failed to send request");
            self.unbind(id);
            return Err(e);
        }
        Ok(id)
    }

    fn unbind(&self, id: CorrelationId) {
        self.bindings.lock().remove(&id);
        self.session.deregister(id);
    }

    /// Cancellation always goes out before the id is released, so the server never
    /// sees the cancel after a new call that reused the id.
    fn close_with_cancel(&self, id: CorrelationId) {
        tracing::trace!(peer = %self.session.peer(), id, "sending stream cancellation");
        self.session.send_cancel(id);
        self.unbind(id);
    }

    pub fn cancel(&self, id: CorrelationId) {
        let Some(binding) = self.bindings.lock().get(&id).cloned() else {
            tracing::trace!(peer = %self.session.peer(), id, "cancel on a closed subscription ignored");
            return;
        };

        let mut state = binding.state.lock();
        state.cancelled = true;
        let phase = state.phase;
        match phase {
            Phase::Sent => {
                state.phase = Phase::Closed;
                drop(state);
                self.close_with_cancel(id);
            }
            // The delivering path observes the flag once the item is handed over.
            Phase::Delivering => {
                tracing::trace!(peer = %self.session.peer(), id, "cancel deferred until delivery returns");
            }
            Phase::Closed => {}
        }
    }

    pub fn is_cancelled(&self, id: CorrelationId) -> bool {
        match self.bindings.lock().get(&id) {
            Some(binding) => binding.state.lock().cancelled,
            None => true,
        }
    }

    pub fn on_item(&self, id: CorrelationId, value: Value) -> Result<()> {
        let binding = self.binding(id)?;
        {
            let mut state = binding.state.lock();
            if state.phase == Phase::Closed {
                return Err(ProtocolViolation::UnknownSubscription(id).into());
            }
            if state.cancelled {
                tracing::trace!(peer = %self.session.peer(), id, "subscriber has cancelled; item dropped");
                state.phase = Phase::Closed;
                drop(state);
                self.close_with_cancel(id);
                return Ok(());
            }
            state.phase = Phase::Delivering;
        }

        let outcome = binding.deliver(StreamEvent::Item(value));

        let mut state = binding.state.lock();
        if let Err(e) = &outcome {
            tracing::error!(peer = %self.session.peer(), id, error = %e, "subscriber failed on an item; cancelling");
            state.cancelled = true;
        }
        if state.cancelled {
            state.phase = Phase::Closed;
            drop(state);
            self.close_with_cancel(id);
        } else {
            state.phase = Phase::Sent;
        }
        Ok(())
    }

    fn on_terminal(&self, id: CorrelationId, event: StreamEvent) -> Result<()> {
        let binding = self.binding(id)?;
        let cancelled = {
            let mut state = binding.state.lock();
            if state.phase == Phase::Closed {
                return Err(ProtocolViolation::UnknownSubscription(id).into());
            }
            state.phase = Phase::Closed;
            state.cancelled
        };
        self.unbind(id);

        if cancelled {
            tracing::trace!(peer = %self.session.peer(), id, "subscriber has cancelled; terminal event dropped");
            return Ok(());
        }
        if let Err(e) = binding.deliver(event) {
            tracing::warn!(peer = %self.session.peer(), id, error = %e, "subscriber failed on a terminal event");
        }
        Ok(())
    }

    pub fn on_error(&self, id: CorrelationId, error: Error) -> Result<()> {
        tracing::trace!(peer = %self.session.peer(), id, error = %error, "stream failed");
        self.on_terminal(id, StreamEvent::Error(error))
    }

    pub fn on_completed(&self, id: CorrelationId) -> Result<()> {
        tracing::trace!(peer = %self.session.peer(), id, "stream completed");
        self.on_terminal(id, StreamEvent::Completed)
    }
}

/// A lazily issued streaming call.
///
/// Cloning is cheap; every clone shares the same bindings.
#[derive(Clone)]
pub struct CallStream {
    call: Arc<StreamCall>,
}

impl CallStream {
    pub(crate) fn new(call: Arc<StreamCall>) -> Self {
        Self { call }
    }

    /// Issues one call and routes its events to `subscriber`.
    pub fn subscribe(&self, subscriber: impl Subscriber) -> Result<Subscription> {
        let id = self.call.subscribe(Box::new(subscriber))?;
        Ok(Subscription { call: self.call.clone(), id })
    }

    /// Issues one call and exposes its items as a `futures::Stream`.
    ///
    /// Dropping the returned stream cancels the call.
    pub fn into_items(&self) -> Result<ItemStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event: StreamEvent| {
            tx.send(event).map_err(|_| anyhow::anyhow!("item stream dropped"))
        })?;
        Ok(ItemStream { rx, subscription, done: false })
    }

    /// Live subscriptions of this stream.
    pub fn subscriber_count(&self) -> usize {
        self.call.subscriber_count()
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

/// One act of consuming a [`CallStream`].
pub struct Subscription {
    call: Arc<StreamCall>,
    id: CorrelationId,
}

impl Subscription {
    pub fn id(&self) -> CorrelationId {
        self.id
    }

    /// Stops delivery and asks the server to stop. Idempotent, and safe to call
    /// from inside the subscriber.
    pub fn cancel(&self) {
        self.call.cancel(self.id)
    }

    /// True once cancelled, or once the subscription has closed for any reason.
    pub fn is_cancelled(&self) -> bool {
        self.call.is_cancelled(self.id)
    }
}

/// Items of one subscription as a `futures::Stream`.
///
/// Ends after `Completed`, or after yielding the error of an `Error` event.
pub struct ItemStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    subscription: Subscription,
    done: bool,
}

impl ItemStream {
    pub fn id(&self) -> CorrelationId {
        self.subscription.id()
    }
}

impl futures::Stream for ItemStream {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Item(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(StreamEvent::Error(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(Some(StreamEvent::Completed)) | Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ItemStream {
    fn drop(&mut self) {
        if !self.done {
            self.subscription.cancel();
        }
    }
}
