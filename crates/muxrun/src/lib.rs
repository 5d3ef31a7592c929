//! # MuxRun
//!
//! Client and server runtime for `muxrpc`: many calls multiplexed over one
//! duplex channel.
//!
//! ## Architecture
//!
//! - **Client**: allocates correlation ids, keeps the pending-call registry, and
//!   offers three calling conventions (blocking, future, stream).
//! - **Server**: runs requests through an `Executor` and turns each execution
//!   into `Result` / `Error` / `Completed` frames, honouring cancellation.
//! - **Transport**: the only thing either side needs from the outside world.

pub mod client;
pub mod config;
pub mod error;
pub mod mock_transport;
pub mod server;
pub mod transport;


pub use client::Client;
pub use config::ClientConfig;
pub use config::ServerConfig;
pub use error::Error;
pub use error::ProtocolViolation;
pub use error::Result;
pub use server::ServerDispatcher;
pub use transport::Transport;
