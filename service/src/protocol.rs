//! IPC protocol types for the roster service.
//!
//! Newline-delimited JSON-RPC-lite: one `{id, method, params}` object per
//! line in, one `{id, result}` or `{id, error}` object per line out.

use roster_core::{
    ErrorCategory, MemberPatch, NewMember, PagePatch, ReorderEntry, ReorderFailure, RosterError,
};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Error codes (error.code)
// ─────────────────────────────────────────────────────────────────────────────

/// Standard JSON-RPC errors.
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;

/// Roster errors, HTTP-flavoured.
pub const ERR_PARTIAL_FAILURE: i64 = 207;
pub const ERR_VALIDATION: i64 = 400;
pub const ERR_UNAUTHORIZED: i64 = 403;
pub const ERR_NOT_FOUND: i64 = 404;
pub const ERR_CONFLICT: i64 = 409;
pub const ERR_INTERNAL: i64 = 500;

pub fn error_code(category: ErrorCategory) -> i64 {
    match category {
        ErrorCategory::Validation => ERR_VALIDATION,
        ErrorCategory::NotFound => ERR_NOT_FOUND,
        ErrorCategory::Conflict => ERR_CONFLICT,
        ErrorCategory::Unauthorized => ERR_UNAUTHORIZED,
        ErrorCategory::PartialFailure => ERR_PARTIAL_FAILURE,
        ErrorCategory::UnmappableRole
        | ErrorCategory::Integrity
        | ErrorCategory::Storage
        | ErrorCategory::Transport => ERR_INTERNAL,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelopes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: RequestId,
    pub result: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorResponse {
    pub id: RequestId,
    pub error: RpcErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ErrorData>,
}

/// Either half of a reply, as read by a client.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RpcReply {
    Error(RpcErrorResponse),
    Result(RpcResponse),
}

// ─────────────────────────────────────────────────────────────────────────────
// Error payload
// ─────────────────────────────────────────────────────────────────────────────

/// `error.data`: enough for the client to rebuild the same `RosterError`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorData {
    pub category: ErrorCategory,
    pub detail: ErrorDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorDetail {
    Validation { message: String },
    InvalidRole { value: String },
    NotFound { entity: String, id: String },
    Conflict { message: String },
    UnmappableRole { stored: i64 },
    PartialFailure { failures: Vec<ReorderFailure> },
    Integrity { message: String },
    Unauthorized { actor: String },
    Storage { message: String },
    Transport { message: String },
}

impl From<&RosterError> for ErrorDetail {
    fn from(err: &RosterError) -> Self {
        match err {
            RosterError::Validation { message } => Self::Validation {
                message: message.clone(),
            },
            RosterError::InvalidRole { value } => Self::InvalidRole {
                value: value.clone(),
            },
            RosterError::NotFound { entity, id } => Self::NotFound {
                entity: entity.clone(),
                id: id.clone(),
            },
            RosterError::Conflict { message } => Self::Conflict {
                message: message.clone(),
            },
            RosterError::UnmappableRole { stored } => Self::UnmappableRole { stored: *stored },
            RosterError::PartialFailure { failures } => Self::PartialFailure {
                failures: failures.clone(),
            },
            RosterError::Integrity { message } => Self::Integrity {
                message: message.clone(),
            },
            RosterError::Unauthorized { actor } => Self::Unauthorized {
                actor: actor.clone(),
            },
            RosterError::Storage { message, source } => Self::Storage {
                message: match source {
                    Some(source) => format!("{message}: {source}"),
                    None => message.clone(),
                },
            },
            RosterError::Transport { message } => Self::Transport {
                message: message.clone(),
            },
        }
    }
}

impl From<ErrorDetail> for RosterError {
    fn from(detail: ErrorDetail) -> Self {
        match detail {
            ErrorDetail::Validation { message } => RosterError::Validation { message },
            ErrorDetail::InvalidRole { value } => RosterError::InvalidRole { value },
            ErrorDetail::NotFound { entity, id } => RosterError::NotFound { entity, id },
            ErrorDetail::Conflict { message } => RosterError::Conflict { message },
            ErrorDetail::UnmappableRole { stored } => RosterError::UnmappableRole { stored },
            ErrorDetail::PartialFailure { failures } => RosterError::PartialFailure { failures },
            ErrorDetail::Integrity { message } => RosterError::Integrity { message },
            ErrorDetail::Unauthorized { actor } => RosterError::Unauthorized { actor },
            ErrorDetail::Storage { message } => RosterError::storage(message),
            ErrorDetail::Transport { message } => RosterError::Transport { message },
        }
    }
}

impl From<&RosterError> for RpcErrorBody {
    fn from(err: &RosterError) -> Self {
        let category = err.category();
        Self {
            code: error_code(category),
            message: err.to_string(),
            data: Some(ErrorData {
                category,
                detail: ErrorDetail::from(err),
            }),
        }
    }
}

impl RpcErrorBody {
    /// Rebuild the service-side error. Protocol-level failures (bad
    /// request, unknown method) come back as `Transport`.
    pub fn into_roster_error(self) -> RosterError {
        match self.data {
            Some(data) => data.detail.into(),
            None => RosterError::transport(format!("rpc error {}: {}", self.code, self.message)),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handshake
// ─────────────────────────────────────────────────────────────────────────────

/// Binds the connection to an actor for every later mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloParams {
    pub protocol_version: String,
    pub client_version: String,
    pub actor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloResult {
    pub protocol_version: String,
    pub service_version: String,
    pub actor: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Method params
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageIdParams {
    pub page_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberIdParams {
    pub member_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasonIdParams {
    pub reason_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaCodeParams {
    pub area_code: String,
}

/// `member.add`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberParams {
    pub page_id: String,
    #[serde(flatten)]
    pub member: NewMember,
}

/// `member.update`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMemberParams {
    pub member_id: String,
    #[serde(flatten)]
    pub patch: MemberPatch,
}

/// `roster.reorder`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReorderParams {
    pub page_id: String,
    pub entries: Vec<ReorderEntry>,
}

/// `reason.create`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReasonParams {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// `member.reasons.replace`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceReasonsParams {
    pub member_id: String,
    pub reason_ids: Vec<String>,
}

/// `page.update`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePageParams {
    pub page_id: String,
    #[serde(flatten)]
    pub patch: PagePatch,
}
