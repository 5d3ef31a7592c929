use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use futures::StreamExt;
use futures::future::AbortHandle;
use futures::future::Abortable;
use muxrpc::CorrelationId;
use muxrpc::Request;
use muxrpc::Response;
use muxrpc::RpcError;
use tracing::Instrument;

use super::executor::Execution;
use super::executor::ExecutionError;
use super::executor::Executor;
use super::registry::ExecutionRegistry;
use crate::config::ServerConfig;
use crate::transport::Transport;

/// Turns inbound requests into executions and their results into response frames.
///
/// One dispatcher serves one connection: its registry holds that connection's
/// executions, keyed by the client's request ids.
#[derive(Clone)]
pub struct ServerDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    config: ServerConfig,
    executor: Arc<dyn Executor>,
    executions: ExecutionRegistry,
    generations: AtomicU64,
}

impl ServerDispatcher {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self::with_config(executor, ServerConfig::default())
    }

    pub fn with_config(executor: Arc<dyn Executor>, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                executor,
                executions: ExecutionRegistry::new(),
                generations: AtomicU64::new(1),
            }),
        }
    }

    pub fn peer_name(&self) -> &str {
        &self.inner.config.peer_name
    }

    /// Executions currently running.
    pub fn active_executions(&self) -> usize {
        self.inner.executions.count()
    }

    /// Aborts every running execution. Returns how many were stopped.
    pub fn cancel_all(&self) -> usize {
        self.inner.executions.cancel_all()
    }

    /// Reads requests off `transport` until the peer closes it, then cancels
    /// whatever is still running.
    pub async fn serve(&self, transport: Arc<dyn Transport>) {
        let peer = self.peer_name().to_string();
        loop {
            match transport.recv().await {
                Ok(Some(frame)) => self.handle(&frame, &transport),
                Ok(None) => {
                    tracing::debug!(peer = %peer, "channel closed by peer");
                    break;
                }
                Err(e) => {
                    tracing::error!(peer = %peer, error = %e, "transport error while serving");
                    break;
                }
            }
        }
        let cancelled = self.cancel_all();
        if cancelled > 0 {
            tracing::debug!(peer = %peer, cancelled, "cancelled executions of a closed connection");
        }
    }

    /// Handles one inbound frame. Spawns onto the current tokio runtime.
    pub fn handle(&self, payload: &[u8], transport: &Arc<dyn Transport>) {
        let inner = &self.inner;
        let request = match Request::decode(payload) {
            Ok(request) => request,
            Err(e) => {
                let id = muxrpc::peek_id(payload);
                tracing::warn!(peer = %inner.config.peer_name, id = ?id, error = %e, "malformed request");
                let error = match id {
                    Some(_) => RpcError::invalid_request(e.to_string()),
                    None => RpcError::parse_error(e.to_string()),
                };
                inner.respond(transport.as_ref(), Response::error(id, error));
                return;
            }
        };

        let span = tracing::debug_span!("request", peer = %inner.config.peer_name, id = request.id, method = %request.method);
        let entered = span.enter();
        tracing::trace!(streamed = request.streamed, "handling request");

        if !inner.version_supported(&request) {
            tracing::error!(version = %request.version, min = inner.config.min_version, "request version too old");
            let message = format!("version must be at least {:.1}", inner.config.min_version);
            inner.respond(transport.as_ref(), Response::error(Some(request.id), RpcError::invalid_request(message)));
            return;
        }

        if request.is_cancel() {
            match inner.executions.cancel(request.id) {
                Some(method) => tracing::debug!(cancelled = %method, "execution cancelled"),
                None => tracing::debug!("no active execution to cancel"),
            }
            return;
        }

        let id = request.id;
        let generation = inner.generations.fetch_add(1, Ordering::Relaxed);
        let (abort, registration) = AbortHandle::new_pair();
        if !inner.executions.register(id, generation, &request.method, abort) {
            tracing::warn!("a request with this id is already in progress");
            let error = RpcError::invalid_request("a request with a duplicate id is in progress on this connection");
            inner.respond(transport.as_ref(), Response::error(Some(id), error));
            return;
        }

        let execution = inner.executor.execute(&request.method, request.params);
        let drive = inner.clone().drive(id, generation, request.method, request.streamed, execution, transport.clone());
        drop(entered);
        tokio::spawn(Abortable::new(drive, registration).instrument(span));
    }
}

impl Inner {
    fn version_supported(&self, request: &Request) -> bool {
        request.version_number().is_some_and(|version| version >= self.config.min_version)
    }

    /// Sends one frame. Failures are logged and never reach the caller.
    fn respond(&self, transport: &dyn Transport, response: Response) {
        let id = response.id();
        let payload = match response.encode_with_version(&self.config.version) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(peer = %self.config.peer_name, id = ?id, error = %e, "failed to encode response");
                return;
            }
        };
        if let Err(e) = transport.send(payload) {
            tracing::error!(peer = %self.config.peer_name, id = ?id, error = %e, "failed to send response");
        }
    }

    fn to_rpc_error(&self, method: &str, error: ExecutionError) -> RpcError {
        match error {
            ExecutionError::MethodNotFound(_) => RpcError::method_not_found(format!("method {} not implemented", method)),
            ExecutionError::Rpc(e) => e,
            ExecutionError::Failed(_) if !self.executor.method_exists(method) => {
                RpcError::method_not_found(format!("method {} not implemented", method))
            }
            ExecutionError::Failed(e) => RpcError::server_error(e.to_string(), 0),
        }
    }

    /// Pumps one execution into response frames.
    ///
    /// Terminal frames go out after the registry entry is gone, so a client that
    /// reuses the id as soon as it sees the frame is never refused as a duplicate.
    async fn drive(
        self: Arc<Self>,
        id: CorrelationId,
        generation: u64,
        method: String,
        streamed: bool,
        mut execution: Execution,
        transport: Arc<dyn Transport>,
    ) {
        loop {
            match execution.next().await {
                Some(Ok(item)) => {
                    if streamed {
                        tracing::trace!("sending item");
                        self.respond(transport.as_ref(), Response::result(id, item));
                        continue;
                    }
                    // At most one result for a non-streamed call; the rest is dropped with `execution`.
                    tracing::trace!("sending result; closing execution");
                    self.executions.finish(id, generation);
                    self.respond(transport.as_ref(), Response::result(id, item));
                    return;
                }
                Some(Err(e)) => {
                    let error = self.to_rpc_error(&method, e);
                    tracing::debug!(code = error.code, message = %error.message, "execution failed");
                    self.executions.finish(id, generation);
                    self.respond(transport.as_ref(), Response::error(Some(id), error));
                    return;
                }
                None => {
                    self.executions.finish(id, generation);
                    if streamed {
                        tracing::trace!("sending completion");
                        self.respond(transport.as_ref(), Response::completed(id));
                    } else {
                        tracing::trace!("execution finished without a result; nothing to send");
                    }
                    return;
                }
            }
        }
    }
}
