//! # Server Dispatch
//!
//! Executes inbound requests and streams their results back over the same channel.
//!
//! ## Per-request flow
//!
//! 1. Reject versions older than `ServerConfig::min_version` (invalid request).
//! 2. A cancel request stops the execution bound to its id, if any. An unknown id
//!    is normal: the execution may have just finished.
//! 3. An id that is already running is refused (invalid request); the running
//!    execution is untouched.
//! 4. Otherwise the execution is registered, then spawned. Items become `Result`
//!    frames; a non-streamed call stops after its first item. Exhaustion sends
//!    `Completed` for streamed calls only. Failures become `Error` frames.
//!
//! A response that cannot be encoded or sent is logged; it never disturbs the
//! other executions of the connection.

mod dispatcher;
mod executor;
mod registry;

pub use dispatcher::ServerDispatcher;
pub use executor::Execution;
pub use executor::ExecutionError;
pub use executor::Executor;
pub use executor::FnExecutor;
