use bytes::Bytes;
use serde_derive::{Deserialize, Serialize};

use crate::errors::{CodecError, HandlerError};

/// Outcome carried by every response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ok,
    MalformedMessage,
    MethodNotFound,
    SchemaMismatch,
    HandlerError,
}

/// Why the server could not produce a result for a decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub status: Status,
    pub detail: String,
}

impl DispatchError {
    pub fn new(status: Status, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<CodecError> for DispatchError {
    fn from(err: CodecError) -> Self {
        let status = match err {
            CodecError::SchemaMismatch(_) => Status::SchemaMismatch,
            CodecError::Malformed(_) | CodecError::Encode(_) => Status::MalformedMessage,
        };
        Self::new(status, err.to_string())
    }
}

impl From<HandlerError> for DispatchError {
    fn from(err: HandlerError) -> Self {
        Self::new(Status::HandlerError, err.reason)
    }
}

/// Exactly one of these answers every request frame the server reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    id: u64,
    status: Status,
    payload: Bytes,
    error: Option<String>,
}

impl ResponseFrame {
    pub fn success(id: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            id,
            status: Status::Ok,
            payload: payload.into(),
            error: None,
        }
    }

    pub fn failure(id: u64, status: Status, error: impl Into<String>) -> Self {
        Self {
            id,
            status,
            payload: Bytes::new(),
            error: Some(error.into()),
        }
    }

    pub fn from_result(id: u64, result: Result<Vec<u8>, DispatchError>) -> Self {
        match result {
            Ok(data) => Self::success(id, data),
            Err(e) => Self::failure(id, e.status, e.detail),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Splits the frame into the payload or the failure it reports.
    pub fn into_result(self) -> Result<Bytes, DispatchError> {
        match self.status {
            Status::Ok => Ok(self.payload),
            status => Err(DispatchError::new(status, self.error.unwrap_or_default())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        rmp_serde::to_vec_named(self).map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        rmp_serde::from_slice(data).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}
