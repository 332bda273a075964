//! Registry gateway module
//!
//! A narrow client abstraction over the external service registry:
//! - `types`: instance, health check and snapshot types shared by all gateways
//! - `error`: gateway error type
//! - `consul`: Consul HTTP API implementation
//! - `memory`: in-process registry used for local runs and tests

pub mod consul;
pub mod error;
pub mod memory;
pub mod types;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use consul::{ConsulGateway, ConsulGatewayConfig};
pub use error::GatewayError;
pub use memory::{InMemoryRegistry, RegistryStats};
pub use types::{
    HealthCheck, HealthStatus, InstanceRecord, InstanceSnapshot, Registration, ServiceEntry,
    ServiceSnapshot,
};

/// 注册中心推送的变更流，每一项都是服务的完整状态
pub type WatchStream = BoxStream<'static, Result<ServiceSnapshot, GatewayError>>;

/// 注册中心网关
///
/// 只负责协议适配，不做缓存也不做重试；所有调用都是单次尝试。
#[async_trait]
pub trait RegistryGateway: Send + Sync + std::fmt::Debug + 'static {
    /// 注册一个服务实例
    async fn register_instance(&self, registration: &Registration) -> Result<(), GatewayError>;

    /// 按实例 ID 注销
    async fn deregister_instance(&self, instance_id: &str) -> Result<(), GatewayError>;

    /// 同步读取服务当前的健康实例
    async fn list_instances(&self, service_name: &str) -> Result<InstanceSnapshot, GatewayError>;

    /// 订阅服务变更
    ///
    /// `from_index` 是调用方已经处理过的版本号，流只会推送比它更新的状态。
    /// 流被丢弃即停止订阅。
    fn watch_service(&self, service_name: &str, from_index: u64) -> WatchStream;
}
