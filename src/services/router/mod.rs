pub mod error;
pub mod handlers;

pub use error::ApiError;

use axum::Router;
use axum::routing::get;

use crate::services::discovery::DiscoveryService;

#[derive(Debug, Clone)]
pub struct AppState {
    pub discovery: DiscoveryService,
}

// 创建 HTTP 路由
pub fn create_router(discovery: DiscoveryService) -> Router {
    Router::new()
        .route("/say-hello", get(handlers::say_hello))
        .route("/discovery", get(handlers::discovery))
        .route("/health", get(handlers::health_check))
        .with_state(AppState { discovery })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::services::cache::InstanceCache;
    use crate::services::registry::{InMemoryRegistry, Registration, RegistryGateway};
    use crate::services::watch::PendingLookupPolicy;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn router_with(registry: &InMemoryRegistry) -> (Router, DiscoveryService) {
        let discovery = DiscoveryService::new(
            Arc::new(registry.clone()),
            InstanceCache::new(),
            PendingLookupPolicy::default(),
        );
        (create_router(discovery.clone()), discovery)
    }

    #[tokio::test]
    async fn say_hello_and_health() {
        let (router, _) = router_with(&InMemoryRegistry::new());

        let (status, body) = get_json(router.clone(), "/say-hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "hello");

        let (status, body) = get_json(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], true);
    }

    #[tokio::test]
    async fn discovery_requires_service_name() {
        let (router, _) = router_with(&InMemoryRegistry::new());

        let (status, body) = get_json(router.clone(), "/discovery").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid request parameter");

        let (status, _) = get_json(router, "/discovery?service_name=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn discovery_returns_instances_or_not_found() {
        let registry = InMemoryRegistry::new();
        registry
            .register_instance(&Registration::new("orders", "orders-1", "10.0.0.1", 8080))
            .await
            .unwrap();
        let (router, discovery) = router_with(&registry);

        let (status, body) = get_json(router.clone(), "/discovery?service_name=orders").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"], "");
        assert_eq!(body["instances"][0]["id"], "orders-1");
        assert_eq!(body["instances"][0]["port"], 8080);

        let (status, body) = get_json(router, "/discovery?service_name=payments").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["instances"], Value::Array(Vec::new()));
        assert_eq!(body["error"], "Service not found: payments");

        discovery.shutdown().await;
    }
}
