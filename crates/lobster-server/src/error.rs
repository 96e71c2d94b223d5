use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use lobster_types::{ErrorKind, LobsterError};

pub type ApiResult<T> = Result<T, ApiError>;

/// Engine error carried to the HTTP boundary.
#[derive(Debug)]
pub struct ApiError(pub LobsterError);

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<LobsterError> for ApiError {
    fn from(err: LobsterError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self.0.kind() {
            ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidTransition | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::DeliveryFailed => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match &self.0 {
            LobsterError::InsufficientFunds { .. } => "insufficient_funds",
            LobsterError::InvalidTransition { .. } | LobsterError::QuoteTransition { .. } => {
                "invalid_transition"
            }
            LobsterError::TaskNotFound(_)
            | LobsterError::QuoteNotFound(_)
            | LobsterError::ListingNotFound(_)
            | LobsterError::WalletNotFound(_) => "not_found",
            LobsterError::DeliveryFailed { .. } => "delivery_failed",
            LobsterError::Conflict(_) => "conflict",
            LobsterError::SelfDealing => "self_dealing",
            LobsterError::InvalidAmount(_) => "invalid_amount",
            LobsterError::InvalidRequest(_) => "invalid_request",
            LobsterError::Unauthenticated => "unauthenticated",
            LobsterError::Forbidden(_) => "forbidden",
            LobsterError::RateLimited { .. } => "rate_limited",
            LobsterError::Storage(_) | LobsterError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        let body = ErrorBody {
            error: self.code().to_string(),
            message: self.0.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if let LobsterError::RateLimited { retry_after_secs } = self.0 {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}
