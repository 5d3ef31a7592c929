use muxrpc::CorrelationId;
use muxrpc::RpcError;

use crate::transport;

/// Ways a call's state machine can be driven illegally.
///
/// Each one is a defect on one side of the channel, never a condition to retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// A reaction arrived for an id other than the one the call is bound to.
    IdMismatch { expected: CorrelationId, received: CorrelationId },
    /// A reaction arrived before the call was sent.
    NotStarted,
    /// `start` was called on a single-use strategy that already ran.
    AlreadyStarted,
    /// A second item or error arrived after the call resolved.
    AlreadyResolved,
    /// Completion arrived before any item or error.
    CompletedWithoutResult,
    /// Completion arrived twice.
    DuplicateCompletion,
    /// A frame arrived for a stream subscription that is no longer bound.
    UnknownSubscription(CorrelationId),
}

impl std::fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdMismatch { expected, received } => {
                write!(f, "id mismatch: bound to {}, received {}", expected, received)
            }
            Self::NotStarted => write!(f, "call has not been started"),
            Self::AlreadyStarted => write!(f, "call was already started"),
            Self::AlreadyResolved => write!(f, "call was already resolved"),
            Self::CompletedWithoutResult => write!(f, "completed before any result was produced"),
            Self::DuplicateCompletion => write!(f, "completed twice"),
            Self::UnknownSubscription(id) => write!(f, "no subscription bound to id {}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Transport(transport::Error),
    Wire(muxrpc::Error),
    /// The server answered with an Error frame.
    Remote(RpcError),
    Protocol(ProtocolViolation),
    DuplicateCorrelationId(CorrelationId),
    CorrelationIdsExhausted,
    ChannelClosed,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "Transport error: {}", e),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
            Self::Remote(e) => write!(f, "Remote failure: {}", e),
            Self::Protocol(e) => write!(f, "Protocol violation: {}", e),
            Self::DuplicateCorrelationId(id) => write!(f, "Correlation id {} is already registered", id),
            Self::CorrelationIdsExhausted => write!(f, "No free correlation id after a full wraparound"),
            Self::ChannelClosed => write!(f, "Channel closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<muxrpc::Error> for Error {
    fn from(e: muxrpc::Error) -> Self {
        Self::Wire(e)
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Remote(e)
    }
}

impl From<ProtocolViolation> for Error {
    fn from(e: ProtocolViolation) -> Self {
        Self::Protocol(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
