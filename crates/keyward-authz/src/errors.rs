use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unknown module: {0}")]
    UnknownModule(String),
    #[error("action {action} is not allowed for module {module}")]
    ActionNotAllowed { module: String, action: String },
}

pub type AuthzResult<T> = Result<T, AuthzError>;
