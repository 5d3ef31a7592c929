//! # Protocol Frames
//!
//! Defines the structure of the RPC envelope (Request vs Response).
//!
//! ## Invariants
//! - **Panic Safety**: All decoding paths return `Result`, never panicking on unknown data.
//! - **Forward Compatibility**: Unknown fields are ignored on decode.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;
use crate::error::RpcError;

/// Tags a `Request` and every `Response` frame that answers it.
///
/// Unique among the calls in flight on one channel; ids may be reused once a
/// call has finished.
pub type CorrelationId = i64;

/// Version string written into every outbound frame.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Oldest request version a server accepts.
pub const MIN_VERSION: f64 = 2.0;

/// Reserved method name of a cancellation request.
pub const CANCEL_STREAM_METHOD: &str = "_cancelStream";

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

/// A call from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "jsonrpc", default = "default_version")]
    pub version: String,
    pub id: CorrelationId,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub streamed: bool,
}

impl Request {
    pub fn new(id: CorrelationId, method: impl Into<String>, params: Value, streamed: bool) -> Self {
        Self {
            version: default_version(),
            id,
            method: method.into(),
            params,
            streamed,
        }
    }

    /// A request asking the server to stop the execution bound to `id`.
    pub fn cancel(id: CorrelationId) -> Self {
        Self::new(id, CANCEL_STREAM_METHOD, Value::Null, false)
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn is_cancel(&self) -> bool {
        self.method == CANCEL_STREAM_METHOD
    }

    /// The version field read as a number, if it parses as one.
    pub fn version_number(&self) -> Option<f64> {
        self.version.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// A frame from server to client.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// One result item.
    Result { id: CorrelationId, result: Value },
    /// Terminal failure. `id` is `None` only when the failing frame's id could not be read.
    Error { id: Option<CorrelationId>, error: RpcError },
    /// Terminal success of a streamed call.
    Completed { id: CorrelationId },
}

#[derive(Serialize)]
struct ResultFrame<'a> {
    id: CorrelationId,
    result: &'a Value,
    jsonrpc: &'a str,
}

#[derive(Serialize)]
struct ErrorFrame<'a> {
    id: Option<CorrelationId>,
    error: &'a RpcError,
    jsonrpc: &'a str,
}

#[derive(Serialize)]
struct CompletedFrame<'a> {
    id: CorrelationId,
    jsonrpc: &'a str,
}

impl Response {
    pub fn result(id: CorrelationId, result: Value) -> Self {
        Self::Result { id, result }
    }

    pub fn error(id: Option<CorrelationId>, error: RpcError) -> Self {
        Self::Error { id, error }
    }

    pub fn completed(id: CorrelationId) -> Self {
        Self::Completed { id }
    }

    pub fn id(&self) -> Option<CorrelationId> {
        match self {
            Self::Result { id, .. } | Self::Completed { id } => Some(*id),
            Self::Error { id, .. } => *id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.encode_with_version(PROTOCOL_VERSION)
    }

    pub fn encode_with_version(&self, version: &str) -> Result<Vec<u8>> {
        let bytes = match self {
            Self::Result { id, result } => serde_json::to_vec(&ResultFrame { id: *id, result, jsonrpc: version }),
            Self::Error { id, error } => serde_json::to_vec(&ErrorFrame { id: *id, error, jsonrpc: version }),
            Self::Completed { id } => serde_json::to_vec(&CompletedFrame { id: *id, jsonrpc: version }),
        };
        Ok(bytes?)
    }

    /// Decodes a response frame.
    ///
    /// An `error` key makes an Error frame; otherwise a `result` key makes a
    /// Result frame; otherwise the frame is a completion.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)?;
        let Value::Object(mut object) = value else {
            return Err(Error::NotAnObject);
        };

        let id = read_id(&object)?;

        if let Some(error) = object.remove("error") {
            let error: RpcError = serde_json::from_value(error)?;
            return Ok(Self::Error { id, error });
        }

        let id = id.ok_or(Error::InvalidField { field: "id", reason: "null id is only valid on an error frame" })?;

        match object.remove("result") {
            Some(result) => Ok(Self::Result { id, result }),
            None => Ok(Self::Completed { id }),
        }
    }
}

fn read_id(object: &Map<String, Value>) -> Result<Option<CorrelationId>> {
    match object.get("id") {
        None => Err(Error::MissingField("id")),
        Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or(Error::InvalidField { field: "id", reason: "expected a 64-bit integer" }),
    }
}

/// Best-effort read of the `id` of a frame that failed to decode fully.
pub fn peek_id(payload: &[u8]) -> Option<CorrelationId> {
    let value: Value = serde_json::from_slice(payload).ok()?;
    value.get("id")?.as_i64()
}
