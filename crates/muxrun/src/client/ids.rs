use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use muxrpc::CorrelationId;

use crate::error::Error;
use crate::error::Result;

/// Hands out correlation ids for one session.
///
/// Ids count up from 1 and wrap back to 1 past `max`. An id that is still in
/// flight is skipped, so a slow call is never shadowed after wraparound.
#[derive(Debug)]
pub struct CorrelationIdAllocator {
    last: AtomicI64,
    max: CorrelationId,
}

impl Default for CorrelationIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationIdAllocator {
    pub fn new() -> Self {
        Self::with_max(CorrelationId::MAX)
    }

    pub fn with_max(max: CorrelationId) -> Self {
        Self { last: AtomicI64::new(0), max: max.max(1) }
    }

    fn successor(&self, id: CorrelationId) -> CorrelationId {
        if id >= self.max || id < 1 { 1 } else { id + 1 }
    }

    /// Returns the next id for which `is_active` is false.
    ///
    /// Fails with `CorrelationIdsExhausted` when a full scan finds no free id.
    pub fn next(&self, is_active: impl Fn(CorrelationId) -> bool) -> Result<CorrelationId> {
        loop {
            let last = self.last.load(Ordering::SeqCst);
            let start = self.successor(last);

            let mut candidate = start;
            while is_active(candidate) {
                candidate = self.successor(candidate);
                if candidate == start {
                    tracing::error!(max = self.max, "correlation id space exhausted");
                    return Err(Error::CorrelationIdsExhausted);
                }
            }

            // Lost the race: someone else advanced the counter, rescan from there.
            if self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(candidate);
            }
        }
    }
}
