use arbord::{ErrorClass, ServiceError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("{message}")]
    BadRequest { message: String },
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("background task failed: {message}")]
    Join { message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl WebError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        WebError::BadRequest {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorClass {
        match self {
            WebError::BadRequest { .. } => ErrorClass::Validation,
            WebError::Service(err) => err.kind(),
            WebError::Join { .. } | WebError::Io(_) => ErrorClass::Internal,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorClass::Validation => StatusCode::BAD_REQUEST,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Conflict => StatusCode::CONFLICT,
            ErrorClass::ExternalTool => StatusCode::BAD_GATEWAY,
            ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.kind().as_str().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use arbord::ServiceError;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    use super::WebError;

    #[test]
    fn taxonomy_maps_to_http_status() {
        let cases = [
            (WebError::bad_request("pin id must be an integer"), StatusCode::BAD_REQUEST),
            (
                WebError::from(ServiceError::NotFound {
                    message: "repository pin 4 not found".to_string(),
                }),
                StatusCode::NOT_FOUND,
            ),
            (
                WebError::from(ServiceError::ScanInProgress {
                    pin_id: arbor_core::types::PinId(4),
                }),
                StatusCode::CONFLICT,
            ),
            (
                WebError::Join {
                    message: "panicked".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status(), status, "{err}");
            assert_eq!(err.into_response().status(), status);
        }
    }
}
