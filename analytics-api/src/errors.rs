use axum::{
    Json,
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

use crate::warehouse::WarehouseError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Credential header missing or not the configured value
    #[error("Invalid API Key")]
    Unauthenticated,

    /// Invalid query parameters
    #[error("{message}")]
    BadRequest { message: String },

    /// Warehouse could not be reached, rejected a statement, or returned undecodable rows
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Warehouse(_) | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable classification included in 500 bodies
    pub fn kind(&self) -> Option<&'static str> {
        match self {
            Error::Warehouse(e) => Some(e.kind()),
            Error::Internal { .. } => Some("internal"),
            Error::Unauthenticated | Error::BadRequest { .. } => None,
        }
    }

    /// SQLSTATE of a statement the warehouse rejected
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Warehouse(WarehouseError::QueryMalformed { code, .. }) => code.as_deref(),
            _ => None,
        }
    }
}

impl From<QueryRejection> for Error {
    fn from(rejection: QueryRejection) -> Self {
        Error::BadRequest {
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Warehouse(_) | Error::Internal { .. } => {
                tracing::error!(sqlstate = self.sqlstate(), "Internal service error: {}", self);
            }
            Error::Unauthenticated => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let status = self.status_code();
        // Failure text is passed through unsanitised; callers rely on it for diagnosis
        let mut body = json!({ "detail": self.to_string() });
        if let Some(kind) = self.kind() {
            body["kind"] = json!(kind);
        }
        if let Some(code) = self.sqlstate() {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
