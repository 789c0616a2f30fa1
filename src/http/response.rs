//! Error responses.
//!
//! Every [`GatewayError`] has a status code; none escape as a 500.

use axum::http::header::WWW_AUTHENTICATE;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::{GatewayError, RejectionKind};

pub const AUTH_CHALLENGE: &str = "Basic realm=\"pubsub-gateway\"";

/// JSON body of an error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Authentication(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Protocol(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Rejected { kind, .. } => match kind {
                RejectionKind::NotFound => StatusCode::NOT_FOUND,
                RejectionKind::Forbidden => StatusCode::FORBIDDEN,
                RejectionKind::Conflict => StatusCode::CONFLICT,
                RejectionKind::Other => StatusCode::BAD_GATEWAY,
            },
            GatewayError::ConnectionLost => StatusCode::BAD_GATEWAY,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request refused");
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        let mut response = (status, Json(body)).into_response();
        if matches!(self, GatewayError::Authentication(_)) {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static(AUTH_CHALLENGE));
        }
        response
    }
}
