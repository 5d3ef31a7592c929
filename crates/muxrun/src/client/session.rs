use std::sync::Arc;

use muxrpc::CorrelationId;
use muxrpc::Request;

use super::ids::CorrelationIdAllocator;
use super::invocation::Invocation;
use super::registry::PendingInvocations;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::transport::Transport;

/// State shared by a client, its dispatcher and every strategy it creates.
pub(crate) struct Session {
    pub config: ClientConfig,
    pub transport: Arc<dyn Transport>,
    pub registry: PendingInvocations,
    ids: CorrelationIdAllocator,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> Self {
        Self {
            registry: PendingInvocations::new(config.peer_name.clone()),
            ids: CorrelationIdAllocator::with_max(config.max_correlation_id),
            transport,
            config,
        }
    }

    pub fn peer(&self) -> &str {
        &self.config.peer_name
    }

    pub fn next_id(&self) -> Result<CorrelationId> {
        self.ids.next(|id| self.registry.contains(id))
    }

    pub fn register(&self, id: CorrelationId, invocation: Invocation) -> Result<()> {
        self.registry.register(id, invocation)
    }

    pub fn deregister(&self, id: CorrelationId) {
        self.registry.deregister(id)
    }

    pub fn send_request(&self, request: Request) -> Result<()> {
        let request = request.with_version(self.config.version.clone());
        let payload = request.encode()?;
        tracing::trace!(peer = %self.peer(), id = request.id, method = %request.method, streamed = request.streamed, "sending request");
        self.transport.send(payload)?;
        Ok(())
    }

    /// Fire-and-forget: a failed cancel is logged and otherwise ignored.
    pub fn send_cancel(&self, id: CorrelationId) {
        if let Err(e) = self.send_request(Request::cancel(id)) {
            tracing::error!(peer = %self.peer(), id, error = %e, "failed to send cancellation");
        }
    }
}
