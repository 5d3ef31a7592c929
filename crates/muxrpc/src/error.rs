//! # Error Definitions
//!
//! Frame encoding failures, and the error payload carried by `Error` frames.

use serde::Deserialize;
use serde::Serialize;

/// Failures while encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The payload was not valid JSON, or did not match the frame shape.
    Json(String),
    /// The payload was JSON but not an object.
    NotAnObject,
    /// A required field was absent.
    MissingField(&'static str),
    /// A field was present but held the wrong kind of value.
    InvalidField { field: &'static str, reason: &'static str },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(msg) => write!(f, "malformed frame: {}", msg),
            Self::NotAnObject => write!(f, "malformed frame: expected a JSON object"),
            Self::MissingField(field) => write!(f, "malformed frame: missing '{}'", field),
            Self::InvalidField { field, reason } => {
                write!(f, "malformed frame: invalid '{}': {}", field, reason)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

/// A specialized Result type for frame operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The `{code, message}` body of an `Error` frame.
///
/// Codes follow the JSON-RPC 2.0 numbering. Server-defined failures use
/// `SERVER_ERROR_BASE - offset` with an offset in `0..=99`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const SERVER_ERROR_BASE: i32 = -32000;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(message: impl Into<String>) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, message)
    }

    /// A server-defined failure. `offset` is clamped to the reserved `0..=99` range.
    pub fn server_error(message: impl Into<String>, offset: i32) -> Self {
        Self::new(Self::SERVER_ERROR_BASE - offset.clamp(0, 99), message)
    }

    pub fn is_method_not_found(&self) -> bool {
        self.code == Self::METHOD_NOT_FOUND
    }

    pub fn is_server_error(&self) -> bool {
        (Self::SERVER_ERROR_BASE - 99..=Self::SERVER_ERROR_BASE).contains(&self.code)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}
