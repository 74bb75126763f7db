use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

/// User-facing message for any failed crop analysis. Causes are logged, never shown.
pub const ANALYSIS_FAILED_MESSAGE: &str = "Failed to perform crop analysis. Please try again.";

/// Application-wide error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("AI analysis failed to provide a diagnosis")]
    DiagnosisEmpty,

    #[error("AI capability unavailable: {0}")]
    CapabilityUnavailable(String),

    #[error("Persisted snapshot is corrupt: {0}")]
    PersistenceCorrupt(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict error: {0}")]
    Conflict(String),

    #[error("Farmer registration required")]
    RegistrationRequired,

    #[error("A crop analysis is already in progress")]
    AnalysisInProgress,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Prompt template error: {0}")]
    Template(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    /// Message safe to hand to the presentation layer.
    pub fn user_message(&self) -> String {
        match self {
            AppError::DiagnosisEmpty | AppError::CapabilityUnavailable(_) => {
                ANALYSIS_FAILED_MESSAGE.to_string()
            }
            AppError::PersistenceCorrupt(_)
            | AppError::Storage(_)
            | AppError::Template(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::DiagnosisEmpty => "DIAGNOSIS_EMPTY",
            AppError::CapabilityUnavailable(_) => "CAPABILITY_UNAVAILABLE",
            AppError::PersistenceCorrupt(_) => "PERSISTENCE_CORRUPT",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Conflict(_) => "CONFLICT",
            AppError::RegistrationRequired => "REGISTRATION_REQUIRED",
            AppError::AnalysisInProgress => "ANALYSIS_IN_PROGRESS",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Template(_) => "TEMPLATE_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub message: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::DiagnosisEmpty => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::CapabilityUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) | AppError::AnalysisInProgress => StatusCode::CONFLICT,
            AppError::RegistrationRequired => StatusCode::FORBIDDEN,
            AppError::PersistenceCorrupt(_)
            | AppError::Storage(_)
            | AppError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let response = ErrorResponse {
            success: false,
            error: self.code().to_string(),
            message: self.user_message(),
        };

        HttpResponse::build(self.status_code()).json(response)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        let mut errors: Vec<String> = err
            .field_errors()
            .into_iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |e| {
                    format!(
                        "{}: {}",
                        field,
                        e.message.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "Invalid value".to_string())
                    )
                })
            })
            .collect();
        errors.sort();
        AppError::Validation(errors.join(", "))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<async_openai::error::OpenAIError> for AppError {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        AppError::CapabilityUnavailable(err.to_string())
    }
}
