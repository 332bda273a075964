use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::error::ApiError;
use crate::services::registry::InstanceRecord;

// 打招呼响应结构体
#[derive(Debug, Serialize, Deserialize)]
pub struct SayHelloResponse {
    pub message: String,
}

// 健康检查响应结构体
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: bool,
}

// 服务发现请求参数
#[derive(Debug, Deserialize)]
pub struct DiscoveryQuery {
    pub service_name: Option<String>,
}

// 服务发现响应结构体
#[derive(Debug, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub instances: Vec<InstanceRecord>,
    pub error: String,
}

pub async fn say_hello() -> Json<SayHelloResponse> {
    Json(SayHelloResponse {
        message: "hello".to_string(),
    })
}

pub async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse { status: true })
}

pub async fn discovery(
    State(state): State<AppState>,
    Query(query): Query<DiscoveryQuery>,
) -> Result<Json<DiscoveryResponse>, ApiError> {
    let service_name = query
        .service_name
        .filter(|name| !name.trim().is_empty())
        .ok_or(ApiError::BadRequest)?;

    tracing::debug!(service_name = %service_name, "Handling discovery request");
    let instances = state.discovery.discover_services(&service_name).await?;

    Ok(Json(DiscoveryResponse {
        instances,
        error: String::new(),
    }))
}
