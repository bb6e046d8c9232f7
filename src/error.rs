use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The transport failed before the request body stream ended.
    #[error("Request body aborted: {0}")]
    BodyAborted(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found")]
    NotFound,

    #[error("Invalid route pattern: {0}")]
    InvalidRoute(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::BadRequest(_) | ServerError::BodyAborted(_) => 400,
            ServerError::Unauthorized(_) => 401,
            ServerError::Forbidden(_) => 403,
            ServerError::NotFound => 404,
            ServerError::Io(_) | ServerError::InvalidRoute(_) | ServerError::Internal(_) => 500,
        }
    }
}

pub type ServerResult<T> = Result<T, ServerError>;
