use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use muxrpc::CorrelationId;

use super::invocation::Invocation;
use crate::error::Error;
use crate::error::Result;

/// Which call is waiting on which id.
///
/// An id is present exactly while its call is in flight and unresolved.
pub(crate) struct PendingInvocations {
    peer: String,
    entries: DashMap<CorrelationId, Invocation>,
}

impl PendingInvocations {
    pub fn new(peer: impl Into<String>) -> Self {
        Self { peer: peer.into(), entries: DashMap::new() }
    }

    /// Binds `id` to `invocation`. Binding an id twice is a defect in the caller.
    pub fn register(&self, id: CorrelationId, invocation: Invocation) -> Result<()> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => {
                tracing::error!(peer = %self.peer, id, "correlation id registered twice");
                Err(Error::DuplicateCorrelationId(id))
            }
            Entry::Vacant(slot) => {
                tracing::trace!(peer = %self.peer, id, kind = invocation.kind(), "registered");
                slot.insert(invocation);
                Ok(())
            }
        }
    }

    /// Unbinds `id`. Absent ids are tolerated; double cancel races land here.
    pub fn deregister(&self, id: CorrelationId) {
        if self.entries.remove(&id).is_none() {
            tracing::warn!(peer = %self.peer, id, "deregistering an id that is not registered");
        } else {
            tracing::trace!(peer = %self.peer, id, "deregistered");
        }
    }

    /// The invocation bound to `id`, cloned out so no map lock is held while it runs.
    pub fn get(&self, id: CorrelationId) -> Option<Invocation> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn ids(&self) -> Vec<CorrelationId> {
        self.entries.iter().map(|entry| *entry.key()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::Value;
    use serde_json::json;

    use super::*;
    use crate::client::future::FutureCall;
    use crate::client::session::Session;
    use crate::config::ClientConfig;
    use crate::mock_transport::RecordingTransport;

    #[tokio::test]
    async fn test_duplicate_registration_is_refused_and_original_survives() {
        let session = Arc::new(Session::new(Arc::new(RecordingTransport::new()), ClientConfig::default()));
        let original = FutureCall::new(session.clone(), "first".into(), Value::Null);
        let pending = original.start();
        let id = original.id().unwrap();

        let intruder = FutureCall::new(session.clone(), "second".into(), Value::Null);
        let err = session.registry.register(id, Invocation::Future(intruder)).unwrap_err();

        assert_eq!(err, Error::DuplicateCorrelationId(id));
        assert_eq!(session.registry.count(), 1);

        let bound = session.registry.get(id).unwrap();
        assert_eq!(bound.kind(), "future");
        bound.on_item(id, json!("kept")).unwrap();
        assert_eq!(pending.await.unwrap(), json!("kept"));
        assert_eq!(session.registry.count(), 0);
    }
}
