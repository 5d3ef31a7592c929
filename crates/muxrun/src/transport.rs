//! # Transport Abstraction
//!
//! A minimal interface for moving frames across one duplex channel.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Transport knows nothing about Requests or Responses.
//!   It moves opaque buffers.
//! - **Fire-and-Forget Send**: `send` enqueues a frame and returns. Replies are
//!   not paired with sends here; correlation is the dispatchers' job.

use std::fmt;

/// Errors that occur at the network/transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer is unreachable or the connection was dropped.
    ConnectionLost(String),
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "Connection lost: {}", msg),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One end of a duplex channel.
///
/// This trait is designed to be object-safe (`Arc<dyn Transport>`).
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Enqueues one frame for the peer.
    ///
    /// # invariants
    /// - Safe to call concurrently from many threads and tasks.
    /// - Must not wait on the peer; frames from one caller keep their order.
    /// - Should not interpret the payload content.
    fn send(&self, payload: Vec<u8>) -> Result<()>;

    /// Waits for the next inbound frame. `None` means the peer closed the channel.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}
