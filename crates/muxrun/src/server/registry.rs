use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::AbortHandle;
use muxrpc::CorrelationId;

/// One running execution.
///
/// `generation` tells apart two executions that used the same id one after the
/// other, so a finishing task only ever removes its own entry.
struct ActiveExecution {
    generation: u64,
    method: String,
    abort: AbortHandle,
}

/// Executions in flight on one connection, keyed by request id.
pub(crate) struct ExecutionRegistry {
    entries: DashMap<CorrelationId, ActiveExecution>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Inserts if `id` is free. Returns `false` when it is already taken.
    pub fn register(&self, id: CorrelationId, generation: u64, method: &str, abort: AbortHandle) -> bool {
        match self.entries.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ActiveExecution { generation, method: method.to_string(), abort });
                true
            }
        }
    }

    /// Removes the entry for `id` if it still belongs to `generation`.
    pub fn finish(&self, id: CorrelationId, generation: u64) -> bool {
        self.entries.remove_if(&id, |_, entry| entry.generation == generation).is_some()
    }

    /// Aborts and removes the execution bound to `id`. Returns the method it was running.
    pub fn cancel(&self, id: CorrelationId) -> Option<String> {
        let (_, entry) = self.entries.remove(&id)?;
        if entry.abort.is_aborted() {
            return None;
        }
        entry.abort.abort();
        Some(entry.method)
    }

    /// Aborts every execution. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.entries.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter(|id| self.cancel(*id).is_some()).count()
    }

    #[cfg(test)]
    pub fn contains(&self, id: CorrelationId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}
