use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use uuid::Uuid;

use crate::config::{Config, RegistryKind};
use crate::services::cache::InstanceCache;
use crate::services::discovery::DiscoveryService;
use crate::services::registry::{ConsulGateway, InMemoryRegistry, Registration, RegistryGateway};
use crate::services::router::create_router;

pub async fn start(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let gateway: Arc<dyn RegistryGateway> = match config.registry.kind {
        RegistryKind::Consul => Arc::new(ConsulGateway::new(config.consul_gateway_config())?),
        RegistryKind::Memory => {
            tracing::warn!("Using in-memory registry, discovery is limited to this process");
            Arc::new(InMemoryRegistry::new())
        }
    };

    // 初始化服务发现缓存
    let discovery = DiscoveryService::new(
        gateway,
        InstanceCache::new(),
        config.pending_lookup_policy(),
    );
    let router = create_router(discovery.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.service.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Http server listening");

    let instance_id = format!("{}-{}", config.service.name, Uuid::new_v4());
    let registration = Registration::new(
        config.service.name.clone(),
        instance_id.clone(),
        config.service.host.clone(),
        config.service.port,
    )
    .with_health_check_path(config.service.health_check_path.clone())
    .with_meta(config.service.metadata.clone());

    let registered = discovery.register(&registration).await;
    let result: Result<(), Box<dyn std::error::Error>> = if registered {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(Into::into)
    } else {
        Err(format!("register service {} failed", config.service.name).into())
    };

    // 无论注册是否成功都注销一次
    discovery.deregister(&instance_id).await;
    discovery.shutdown().await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "Discovery service exited with error");
    }
    result
}

// 监听关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
