//! Handler error type and its mapping onto the wire taxonomy.
use crate::store::StoreError;
use keyward_authz::{ErrorBody, ErrorCode};
use thiserror::Error;

pub const DATABASE_ERROR_MESSAGE: &str = "A database error occurred.";
pub const INVALID_PAYLOAD_MESSAGE: &str = "Failed to parse JSON payload.";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("action '{action}' is not allowed for module '{module}'")]
    InvalidPermission { module: String, action: String },
    #[error("database error: {0}")]
    Database(#[from] StoreError),
    #[error("{0}")]
    Unknown(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::InvalidPayload(_) => ErrorCode::InvalidPayload,
            ServiceError::InvalidPermission { .. } => ErrorCode::InvalidPermission,
            ServiceError::Database(_) => ErrorCode::DatabaseError,
            ServiceError::Unknown(_) => ErrorCode::UnknownError,
        }
    }

    /// Client-facing body. Database details stay in the server log.
    pub fn to_body(&self) -> ErrorBody {
        let message = match self {
            ServiceError::InvalidPayload(_) => INVALID_PAYLOAD_MESSAGE.to_string(),
            ServiceError::Database(_) => DATABASE_ERROR_MESSAGE.to_string(),
            ServiceError::InvalidPermission { .. } => self.to_string(),
            ServiceError::Unknown(message) => message.clone(),
        };
        ErrorBody::new(self.code(), message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_onto_wire_taxonomy() {
        assert_eq!(
            ServiceError::InvalidPayload("eof".into()).code().as_str(),
            "invalid_payload"
        );
        assert_eq!(
            ServiceError::InvalidPermission {
                module: "TRADES".into(),
                action: "delete".into()
            }
            .code()
            .as_str(),
            "invalid_permission"
        );
        assert_eq!(
            ServiceError::Database(StoreError::Unexpected(anyhow::anyhow!("down")))
                .code()
                .as_str(),
            "db_error"
        );
        assert_eq!(
            ServiceError::Unknown("boom".into()).code().as_str(),
            "unknown_error"
        );
    }

    #[test]
    fn database_details_are_not_exposed() {
        let err = ServiceError::Database(StoreError::Unexpected(anyhow::anyhow!(
            "password authentication failed for user admin"
        )));
        let body = err.to_body();
        assert_eq!(body.code, ErrorCode::DatabaseError);
        assert_eq!(body.message, DATABASE_ERROR_MESSAGE);
    }

    #[test]
    fn unknown_keeps_original_message() {
        let body = ServiceError::Unknown("handler panicked: boom".into()).to_body();
        assert_eq!(body.message, "handler panicked: boom");
    }

    #[test]
    fn invalid_permission_names_the_pair() {
        let body = ServiceError::InvalidPermission {
            module: "TRADES".into(),
            action: "delete".into(),
        }
        .to_body();
        assert_eq!(body.code, ErrorCode::InvalidPermission);
        assert_eq!(
            body.message,
            "action 'delete' is not allowed for module 'TRADES'"
        );
    }
}
