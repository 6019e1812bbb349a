use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use civic_agents::{StaffError, TurnError};
use civic_core::ValidationError;
use tracing::error;

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    /// Body or query string that could not be decoded.
    Malformed { status: StatusCode, message: String },
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<TurnError> for ApiError {
    fn from(value: TurnError) -> Self {
        match value {
            TurnError::Invalid(error) => Self::Validation(error),
            TurnError::Dependency(error) => Self::Internal(error),
        }
    }
}

impl From<StaffError> for ApiError {
    fn from(value: StaffError) -> Self {
        match value {
            StaffError::Invalid(error) => Self::Validation(error),
            StaffError::NotFound(public_id) => {
                Self::NotFound(format!("incident {} not found", public_id))
            }
            StaffError::Dependency(error) => Self::Internal(error),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Malformed {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Malformed {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::Validation(error) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_failed",
                error.to_string(),
            ),
            Self::Malformed { status, message } => {
                let code = if status == StatusCode::UNPROCESSABLE_ENTITY {
                    "validation_failed"
                } else {
                    "bad_request"
                };
                (status, code, message)
            }
            Self::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            Self::Internal(error) => {
                error!(error = %format!("{:#}", error), "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "the request could not be completed, please retry".to_string(),
                )
            }
        };

        (
            status,
            Json(serde_json::json!({
                "error": code,
                "message": message,
            })),
        )
            .into_response()
    }
}
