use axum::{
  Json,
  http::StatusCode,
  response::{IntoResponse, Response},
};
use serde::Serialize;

/// API error response structure
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub details: Option<String>,
}

impl ErrorResponse {
  pub fn new(error: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: None,
    }
  }

  pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
    Self {
      error: error.into(),
      details: Some(details.into()),
    }
  }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
  DatabaseError(tracker_db::DbError),
  ValidationError(String),
  Unauthorized,
  AdminDisabled,
  NotFound(&'static str),
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    match self {
      AppError::DatabaseError(db_err) => {
        let (status, response) = match &db_err {
          tracker_db::DbError::InvalidInput(msg) => {
            tracing::warn!(validation_error = %msg, "Storage rejected input");
            (
              StatusCode::BAD_REQUEST,
              ErrorResponse::with_details("Invalid input", msg.clone()),
            )
          }
          tracker_db::DbError::NoKeeperCandidate
          | tracker_db::DbError::Sqlite(_)
          | tracker_db::DbError::Connection(_) => {
            // Don't expose internal database errors
            tracing::error!(?db_err, "Internal database error");
            (
              StatusCode::INTERNAL_SERVER_ERROR,
              ErrorResponse::new("An internal error occurred. Please try again later."),
            )
          }
        };

        (status, Json(response)).into_response()
      }
      AppError::ValidationError(msg) => {
        tracing::warn!(validation_error = %msg, "Validation failed");
        let error_response = ErrorResponse::new(msg);
        (StatusCode::BAD_REQUEST, Json(error_response)).into_response()
      }
      AppError::Unauthorized => {
        tracing::warn!("Rejected request with missing or invalid API key");
        let error_response = ErrorResponse::new("Invalid or missing API key");
        (StatusCode::UNAUTHORIZED, Json(error_response)).into_response()
      }
      AppError::AdminDisabled => {
        tracing::warn!("Rejected admin request, no API key configured");
        let error_response = ErrorResponse::new("Admin routes are disabled until an API key is configured");
        (StatusCode::FORBIDDEN, Json(error_response)).into_response()
      }
      AppError::NotFound(what) => {
        let error_response = ErrorResponse::new(format!("{what} not found"));
        (StatusCode::NOT_FOUND, Json(error_response)).into_response()
      }
    }
  }
}

impl From<tracker_db::DbError> for AppError {
  fn from(err: tracker_db::DbError) -> Self {
    AppError::DatabaseError(err)
  }
}

impl From<crate::validation::ValidationError> for AppError {
  fn from(err: crate::validation::ValidationError) -> Self {
    AppError::ValidationError(err.to_string())
  }
}
