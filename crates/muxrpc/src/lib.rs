//! # MuxRPC
//!
//! Wire frames for a request/response protocol multiplexed over a single
//! duplex channel.
//!
//! ## Architecture
//!
//! Every frame carries a `CorrelationId`. A caller sends one `Request` and gets
//! back zero or more `Response` frames tagged with the same id:
//!
//! - `streamed = false`: at most one `Result` (or one `Error`), then implicit completion.
//! - `streamed = true`: any number of `Result` frames, then `Completed` or `Error`.
//!
//! A `Request` whose method is `CANCEL_STREAM_METHOD` asks the server to stop the
//! execution bound to that id.
//!
//! This crate is pure data. Correlation, dispatch and cancellation live in `muxrun`.

mod error;
mod frame;

#[cfg(test)]
mod tests;

pub use error::Error;
pub use error::Result;
pub use error::RpcError;
pub use frame::CANCEL_STREAM_METHOD;
pub use frame::CorrelationId;
pub use frame::MIN_VERSION;
pub use frame::PROTOCOL_VERSION;
pub use frame::Request;
pub use frame::Response;
pub use frame::peek_id;
