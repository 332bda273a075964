use std::sync::Arc;

use super::cache::InstanceCache;
use super::registry::{InstanceRecord, Registration, RegistryGateway};
use super::watch::{PendingLookupPolicy, WatchCoordinator};

/// 服务发现错误类型
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Service not found: {0}")]
    ServiceNotFound(String),
}

/// 服务发现门面
///
/// 路由层和业务逻辑只通过它访问注册中心与缓存。
#[derive(Debug, Clone)]
pub struct DiscoveryService {
    gateway: Arc<dyn RegistryGateway>,
    coordinator: Arc<WatchCoordinator>,
}

impl DiscoveryService {
    pub fn new(
        gateway: Arc<dyn RegistryGateway>,
        cache: InstanceCache,
        policy: PendingLookupPolicy,
    ) -> Self {
        let coordinator = Arc::new(WatchCoordinator::new(gateway.clone(), cache, policy));
        Self {
            gateway,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &WatchCoordinator {
        &self.coordinator
    }

    pub fn cache(&self) -> &InstanceCache {
        self.coordinator.cache()
    }

    /// 注册服务实例，失败只记录日志，不重试
    pub async fn register(&self, registration: &Registration) -> bool {
        match self.gateway.register_instance(registration).await {
            Ok(()) => {
                tracing::info!(
                    service_name = %registration.service_name,
                    instance_id = %registration.instance_id,
                    address = %registration.address,
                    port = registration.port,
                    "Register service success"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    service_name = %registration.service_name,
                    instance_id = %registration.instance_id,
                    error = %e,
                    "Register service failed"
                );
                false
            }
        }
    }

    /// 注销服务实例，失败只记录日志，不重试
    pub async fn deregister(&self, instance_id: &str) -> bool {
        match self.gateway.deregister_instance(instance_id).await {
            Ok(()) => {
                tracing::info!(instance_id = %instance_id, "Deregister service success");
                true
            }
            Err(e) => {
                tracing::error!(
                    instance_id = %instance_id,
                    error = %e,
                    "Deregister service failed"
                );
                false
            }
        }
    }

    /// 按服务名发现健康实例
    ///
    /// 列表为空和从未查询到都返回 `ServiceNotFound`。
    pub async fn discover_services(
        &self,
        service_name: &str,
    ) -> Result<Vec<InstanceRecord>, DiscoveryError> {
        let resolved = match self.coordinator.resolve(service_name).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(
                    service_name = %service_name,
                    error = %e,
                    "Discover service failed"
                );
                None
            }
        };

        match resolved {
            Some(instances) if !instances.is_empty() => Ok(instances.to_vec()),
            _ => Err(DiscoveryError::ServiceNotFound(service_name.to_string())),
        }
    }

    /// 停止所有后台订阅
    pub async fn shutdown(&self) {
        self.coordinator.shutdown().await;
    }
}
