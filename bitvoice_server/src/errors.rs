use actix_web::{
    error::ResponseError,
    http::{header::ContentType, StatusCode},
    HttpResponse,
};
use bitvoice_engine::{db_types::ValidationError, ApiError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Could not initialize server. {0}")]
    InitializeError(String),
    #[error("An error occurred on the backend of the server. {0}")]
    BackendError(String),
    #[error("Invalid invoice creation request. {0}")]
    ValidationError(#[from] ValidationError),
    #[error("The data was not found. {0}")]
    NoRecordFound(String),
    #[error("Access denied. {0}")]
    Unauthorized(String),
    #[error("The record already exists. {0}")]
    DuplicateRecord(String),
    #[error("The payment feed is not accepting events. {0}")]
    FeedUnavailable(String),
    #[error("Invalid server configuration. {0}")]
    ConfigurationError(String),
    #[error("An I/O error happened in the server. {0}")]
    IOError(#[from] std::io::Error),
}

impl ResponseError for ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::NoRecordFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::DuplicateRecord(_) => StatusCode::CONFLICT,
            Self::FeedUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InitializeError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ConfigurationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::IOError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .insert_header(ContentType::json())
            .body(serde_json::json!({ "error": self.to_string() }).to_string())
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::NoRecordFound(format!("Invoice {id}")),
            StoreError::Unauthorized(id) => Self::Unauthorized(format!("Invoice {id}")),
            StoreError::DuplicateId(id) => Self::DuplicateRecord(format!("Invoice {id}")),
            e => Self::BackendError(e.to_string()),
        }
    }
}

impl From<ApiError> for ServerError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Store(e) => e.into(),
            ApiError::Wallet(e) => Self::BackendError(e.to_string()),
        }
    }
}
