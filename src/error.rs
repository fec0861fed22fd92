use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::gateway::GatewayError;
use crate::{NegotiationId, ParticipantId};

pub type Result<T> = std::result::Result<T, ExchangeError>;

/// Domain error taxonomy. Every variant maps to an HTTP status and a
/// machine-readable `errorMsg` tag; clients branch on those, not on the
/// human-readable message.
#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("an exchange configuration for this pairing already exists with id: {existing}")]
    DuplicateNegotiation { existing: NegotiationId },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0}")]
    Ownership(String),

    #[error("participant {0} is already a participant in this ecosystem")]
    ExistingParticipant(ParticipantId),

    #[error("the participant does not have an authorized join request or invitation")]
    UnauthorizedParticipant,

    #[error("the ecosystem contract was not properly generated")]
    MissingContract,

    #[error("contract service failure: {0}")]
    Gateway(#[from] GatewayError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::Serialization(err.to_string())
    }
}

impl ExchangeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ExchangeError::NotFound(_) => StatusCode::NOT_FOUND,
            ExchangeError::DuplicateNegotiation { .. } | ExchangeError::Conflict(_) => {
                StatusCode::CONFLICT
            }
            ExchangeError::InvalidOperation(_)
            | ExchangeError::Ownership(_)
            | ExchangeError::ExistingParticipant(_)
            | ExchangeError::UnauthorizedParticipant
            | ExchangeError::MissingContract => StatusCode::BAD_REQUEST,
            ExchangeError::Gateway(GatewayError::NotFound(_)) => StatusCode::NOT_FOUND,
            ExchangeError::Gateway(_) => StatusCode::FAILED_DEPENDENCY,
            ExchangeError::Database(_)
            | ExchangeError::Serialization(_)
            | ExchangeError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine tag carried in the response envelope.
    pub fn error_msg(&self) -> &'static str {
        match self {
            ExchangeError::NotFound(_) => "resource not found",
            ExchangeError::DuplicateNegotiation { .. } | ExchangeError::Conflict(_) => {
                "conflicting resource"
            }
            ExchangeError::InvalidOperation(_) => "invalid operation",
            ExchangeError::Ownership(_) => "resource ownership error",
            ExchangeError::ExistingParticipant(_) => "existing participant",
            ExchangeError::UnauthorizedParticipant => "unauthorized participant in ecosystem",
            ExchangeError::MissingContract => "contract does not exist",
            ExchangeError::Gateway(GatewayError::NotFound(_)) => "resource not found",
            ExchangeError::Gateway(_) => "third party api failure",
            ExchangeError::Database(_)
            | ExchangeError::Serialization(_)
            | ExchangeError::Config(_) => "internal server error",
        }
    }

    /// Extra diagnostics attached under `data` in the envelope.
    fn data(&self) -> Option<serde_json::Value> {
        match self {
            ExchangeError::DuplicateNegotiation { existing } => {
                Some(json!({ "existingId": existing }))
            }
            ExchangeError::Gateway(GatewayError::Unavailable { status, message }) => {
                Some(json!({ "status": status, "message": message }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ExchangeError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Internals never leak past the 5xx boundary.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "unexpected internal error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({
            "code": status.as_u16(),
            "errorMsg": self.error_msg(),
            "message": message,
        });
        if let Some(data) = self.data() {
            body["data"] = data;
        }

        (status, Json(body)).into_response()
    }
}
