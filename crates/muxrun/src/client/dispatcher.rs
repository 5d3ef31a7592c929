use std::sync::Arc;

use muxrpc::Response;

use super::session::Session;
use crate::error::Error;
use crate::error::Result;

/// Routes inbound response frames to the call bound to their id.
#[derive(Clone)]
pub struct ClientDispatcher {
    session: Arc<Session>,
}

impl ClientDispatcher {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// Handles one inbound frame.
    ///
    /// Malformed frames and frames for ids with no bound call are logged and
    /// discarded; neither affects any other call. A frame that drives its call
    /// illegally returns the violation.
    pub fn receive(&self, payload: &[u8]) -> Result<()> {
        let peer = self.session.peer();
        let response = match Response::decode(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(peer = %peer, id = ?muxrpc::peek_id(payload), error = %e, "discarding malformed frame");
                return Err(e.into());
            }
        };

        let Some(id) = response.id() else {
            if let Response::Error { error, .. } = &response {
                tracing::error!(peer = %peer, code = error.code, message = %error.message, "peer reported an error for no request");
            }
            return Ok(());
        };

        let Some(invocation) = self.session.registry.get(id) else {
            tracing::error!(peer = %peer, id, "no call bound to id; frame discarded");
            return Ok(());
        };

        let outcome = match response {
            Response::Result { result, .. } => invocation.on_item(id, result),
            Response::Error { error, .. } => invocation.on_error(id, Error::Remote(error)),
            Response::Completed { .. } => invocation.on_completed(id),
        };

        if let Err(e) = &outcome {
            tracing::error!(peer = %peer, id, kind = invocation.kind(), error = %e, "protocol violation");
        }
        outcome
    }

    /// Fails every call still in flight with `error`. The registry is empty afterwards.
    pub fn fail_all(&self, error: Error) {
        for id in self.session.registry.ids() {
            let Some(invocation) = self.session.registry.get(id) else { continue };
            tracing::debug!(peer = %self.session.peer(), id, kind = invocation.kind(), error = %error, "failing in-flight call");
            if let Err(e) = invocation.on_error(id, error.clone()) {
                tracing::warn!(peer = %self.session.peer(), id, error = %e, "call refused the failure; dropping it");
                self.session.deregister(id);
            }
        }
    }

    /// Calls currently awaiting a response.
    pub fn active_requests(&self) -> usize {
        self.session.registry.count()
    }
}
