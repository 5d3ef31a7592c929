use std::sync::Arc;

use muxrpc::CorrelationId;
use serde_json::Value;

use super::blocking::BlockingCall;
use super::future::FutureCall;
use super::stream::StreamCall;
use crate::error::Error;
use crate::error::Result;

/// A registered call, tagged by calling convention.
///
/// Each variant owns its own transition table; this type only routes.
#[derive(Clone)]
pub(crate) enum Invocation {
    Blocking(Arc<BlockingCall>),
    Future(Arc<FutureCall>),
    Stream(Arc<StreamCall>),
}

impl Invocation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Blocking(_) => "blocking",
            Self::Future(_) => "future",
            Self::Stream(_) => "stream",
        }
    }

    pub fn on_item(&self, id: CorrelationId, value: Value) -> Result<()> {
        match self {
            Self::Blocking(call) => call.on_item(id, value),
            Self::Future(call) => call.on_item(id, value),
            Self::Stream(call) => call.on_item(id, value),
        }
    }

    pub fn on_error(&self, id: CorrelationId, error: Error) -> Result<()> {
        match self {
            Self::Blocking(call) => call.on_error(id, error),
            Self::Future(call) => call.on_error(id, error),
            Self::Stream(call) => call.on_error(id, error),
        }
    }

    pub fn on_completed(&self, id: CorrelationId) -> Result<()> {
        match self {
            Self::Blocking(call) => call.on_completed(id),
            Self::Future(call) => call.on_completed(id),
            Self::Stream(call) => call.on_completed(id),
        }
    }
}
