//! Request/reply payloads carried over the message bus.
//!
//! # Purpose
//! One definition of every subject, request, success response, and the uniform
//! error shape, shared by the service and by clients.
//!
//! # Key invariants
//! - Every reply is either the operation's success payload or
//!   `{"error": {"code": ..., "message": ...}}`.
//! - In Rust a reply is a [`Reply<T>`] (`Result<T, ErrorBody>`); the
//!   `error`-field shape is only inspected inside [`decode_reply`].
//! - Payloads are JSON.
use crate::Permission;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SUBJECT_GRANT: &str = "permissions.grant";
pub const SUBJECT_REVOKE: &str = "permissions.revoke";
pub const SUBJECT_LIST: &str = "permissions.list";
pub const SUBJECT_CHECK: &str = "permissions.check";

pub const SUBJECTS: [&str; 4] = [SUBJECT_GRANT, SUBJECT_REVOKE, SUBJECT_LIST, SUBJECT_CHECK];

/// Request body for grant, revoke, and check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub api_key: String,
    pub module: String,
    pub action: String,
}

impl PermissionRequest {
    pub fn new(
        api_key: impl Into<String>,
        module: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            module: module.into(),
            action: action.into(),
        }
    }
}

pub type GrantRequest = PermissionRequest;
pub type RevokeRequest = PermissionRequest;
pub type CheckRequest = PermissionRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListRequest {
    pub api_key: String,
}

impl ListRequest {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
}

/// Success body for grant and revoke: `{"status": "ok"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: Status,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: Status::Ok }
    }
}

pub type GrantResponse = StatusResponse;
pub type RevokeResponse = StatusResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponse {
    pub permissions: Vec<Permission>,
}

/// Error taxonomy shared by server and client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "invalid_payload")]
    InvalidPayload,
    #[serde(rename = "invalid_permission")]
    InvalidPermission,
    #[serde(rename = "db_error")]
    DatabaseError,
    #[serde(rename = "unknown_error")]
    UnknownError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidPayload => "invalid_payload",
            ErrorCode::InvalidPermission => "invalid_permission",
            ErrorCode::DatabaseError => "db_error",
            ErrorCode::UnknownError => "unknown_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Wire envelope for a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Outcome of one request: the success payload or a structured error.
pub type Reply<T> = Result<T, ErrorBody>;

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplyRepr<T> {
    Err(ErrorResponse),
    Ok(T),
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("payload is empty")]
    Empty,
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Bytes, WireError> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

/// Decode a request or response body.
///
/// # Errors
/// - [`WireError::Empty`] for a zero-length or whitespace-only payload.
/// - [`WireError::Json`] when the payload does not match `T` (including `null`).
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, WireError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(WireError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

pub fn encode_reply<T: Serialize>(reply: &Reply<T>) -> Result<Bytes, WireError> {
    match reply {
        Ok(value) => encode(value),
        Err(body) => encode(&ErrorResponse {
            error: body.clone(),
        }),
    }
}

pub fn decode_reply<T: DeserializeOwned>(payload: &[u8]) -> Result<Reply<T>, WireError> {
    Ok(match decode::<ReplyRepr<T>>(payload)? {
        ReplyRepr::Ok(value) => Ok(value),
        ReplyRepr::Err(response) => Err(response.error),
    })
}
