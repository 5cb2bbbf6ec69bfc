use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Sled(#[from] sled::Error),

    #[error("Malformed record: {0}")]
    Codec(#[from] bincode::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid {key} value: {message}")]
    Invalid { key: &'static str, message: String },
}

/// Everything a request handler can fail with. Validation problems are not
/// errors; they are reported inline on the screen that caused them.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error")]
    Store(#[from] StoreError),

    #[error("Password hashing error")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("Template error")]
    Template(#[from] tera::Error),

    #[error("Export error")]
    Csv(#[from] csv::Error),

    #[error("Session error")]
    SessionGet(#[from] actix_session::SessionGetError),

    #[error("Session error")]
    SessionInsert(#[from] actix_session::SessionInsertError),

    #[error("Authentication error")]
    Login(#[from] actix_identity::error::LoginError),

    #[error("Worker error")]
    Blocking(#[from] actix_web::error::BlockingError),

    #[error("Forbidden")]
    Forbidden,

    #[error("Refusing to restore into non-empty tree {0}")]
    NotEmpty(String),
}

impl From<sled::Error> for AppError {
    fn from(err: sled::Error) -> Self {
        AppError::Store(err.into())
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Forbidden => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AppError::Forbidden => log::debug!("{}", self),
            _ => log::error!("{}: {:?}", self, self),
        }
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}
