use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::json;

use super::handlers::DiscoveryResponse;
use crate::services::discovery::DiscoveryError;

// 定义路由错误类型
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request parameter")]
    BadRequest,
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        tracing::warn!(error = %message, "Request failed");
        match self {
            ApiError::BadRequest => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Discovery(DiscoveryError::ServiceNotFound(_)) => (
                StatusCode::NOT_FOUND,
                Json(DiscoveryResponse {
                    instances: Vec::new(),
                    error: message,
                }),
            )
                .into_response(),
        }
    }
}
