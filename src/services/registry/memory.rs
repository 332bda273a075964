use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream as SnapshotStream;

use super::types::{
    HealthCheck, HealthStatus, InstanceSnapshot, Registration, ServiceEntry, ServiceSnapshot,
};
use super::{GatewayError, RegistryGateway, WatchStream};

/// 注册中心调用统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub register_calls: u64,
    pub deregister_calls: u64,
    pub list_calls: u64,
    pub watch_opens: u64,
}

/// 进程内注册中心
///
/// 每个实例 ID 只对应一个逻辑实例，服务的每次变更都会推送给所有订阅者。
#[derive(Debug, Clone)]
pub struct InMemoryRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// 服务名 -> 当前完整状态
    services: DashMap<String, Arc<watch::Sender<ServiceSnapshot>>>,
    /// 实例ID -> 服务名
    instance_services: DashMap<String, String>,
    index: AtomicU64,
    reachable: AtomicBool,
    stats: Mutex<RegistryStats>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                services: DashMap::new(),
                instance_services: DashMap::new(),
                index: AtomicU64::new(0),
                reachable: AtomicBool::new(true),
                stats: Mutex::new(RegistryStats::default()),
            }),
        }
    }

    /// 模拟注册中心网络不可达
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// 修改实例的健康状态，实例不存在时返回 false
    pub fn set_health(&self, instance_id: &str, status: HealthStatus) -> bool {
        let Some(service_name) = self
            .inner
            .instance_services
            .get(instance_id)
            .map(|entry| entry.value().clone())
        else {
            return false;
        };

        self.update(&service_name, |entries| {
            match entries.iter_mut().find(|e| e.instance.id == instance_id) {
                Some(entry) => {
                    entry.checks = vec![HealthCheck::new(format!("service:{instance_id}"), status)];
                    true
                }
                None => false,
            }
        })
    }

    /// 服务下的原始条目数量（包含不健康实例）
    pub fn entry_count(&self, service_name: &str) -> usize {
        self.inner
            .services
            .get(service_name)
            .map(|sender| sender.borrow().entries.len())
            .unwrap_or(0)
    }

    /// 获取调用统计
    pub fn stats(&self) -> RegistryStats {
        self.inner
            .stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    fn record(&self, f: impl FnOnce(&mut RegistryStats)) {
        if let Ok(mut stats) = self.inner.stats.lock() {
            f(&mut stats);
        }
    }

    fn ensure_reachable(&self) -> Result<(), GatewayError> {
        if self.inner.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(GatewayError::Unreachable(
                "in-memory registry is marked unreachable".to_string(),
            ))
        }
    }

    // 获取或创建服务的状态通道
    fn channel(&self, service_name: &str) -> Arc<watch::Sender<ServiceSnapshot>> {
        self.inner
            .services
            .entry(service_name.to_string())
            .or_insert_with(|| Arc::new(watch::channel(ServiceSnapshot::default()).0))
            .clone()
    }

    // 修改服务条目，有变化时分配新版本号并推送
    fn update(&self, service_name: &str, f: impl FnOnce(&mut Vec<ServiceEntry>) -> bool) -> bool {
        let sender = self.channel(service_name);
        let index = &self.inner.index;
        sender.send_if_modified(|snapshot| {
            if !f(&mut snapshot.entries) {
                return false;
            }
            // 在通道写锁内分配版本号，保证同一服务的版本号单调递增
            snapshot.index = index.fetch_add(1, Ordering::SeqCst) + 1;
            true
        })
    }
}

#[async_trait]
impl RegistryGateway for InMemoryRegistry {
    async fn register_instance(&self, registration: &Registration) -> Result<(), GatewayError> {
        self.record(|stats| stats.register_calls += 1);
        self.ensure_reachable()?;

        let instance_id = registration.instance_id.clone();
        let previous = self
            .inner
            .instance_services
            .insert(instance_id.clone(), registration.service_name.clone());

        // 同一实例ID改注册到另一个服务时，先从旧服务移除
        if let Some(previous) = previous.filter(|name| *name != registration.service_name) {
            self.update(&previous, |entries| {
                let before = entries.len();
                entries.retain(|e| e.instance.id != instance_id);
                entries.len() != before
            });
        }

        let entry = ServiceEntry {
            instance: registration.to_instance(),
            checks: vec![HealthCheck::new(
                format!("service:{instance_id}"),
                HealthStatus::Passing,
            )],
        };
        self.update(&registration.service_name, |entries| {
            match entries.iter_mut().find(|e| e.instance.id == instance_id) {
                Some(existing) if *existing == entry => false,
                Some(existing) => {
                    *existing = entry;
                    true
                }
                None => {
                    entries.push(entry);
                    true
                }
            }
        });

        tracing::info!(
            service_name = %registration.service_name,
            instance_id = %instance_id,
            "Registered instance in memory registry"
        );
        Ok(())
    }

    async fn deregister_instance(&self, instance_id: &str) -> Result<(), GatewayError> {
        self.record(|stats| stats.deregister_calls += 1);
        self.ensure_reachable()?;

        if let Some((_, service_name)) = self.inner.instance_services.remove(instance_id) {
            self.update(&service_name, |entries| {
                let before = entries.len();
                entries.retain(|e| e.instance.id != instance_id);
                entries.len() != before
            });
            tracing::info!(
                service_name = %service_name,
                instance_id = %instance_id,
                "Deregistered instance from memory registry"
            );
        }
        Ok(())
    }

    async fn list_instances(&self, service_name: &str) -> Result<InstanceSnapshot, GatewayError> {
        self.record(|stats| stats.list_calls += 1);
        self.ensure_reachable()?;

        let snapshot = self.channel(service_name).borrow().clone();
        Ok(snapshot.into_passing())
    }

    fn watch_service(&self, service_name: &str, from_index: u64) -> WatchStream {
        self.record(|stats| stats.watch_opens += 1);

        let receiver = self.channel(service_name).subscribe();
        let registry = self.clone();
        SnapshotStream::new(receiver)
            .filter(move |snapshot| futures::future::ready(snapshot.index > from_index))
            .map(move |snapshot| registry.ensure_reachable().map(|_| snapshot))
            .boxed()
    }
}
