use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::subscription::{Initializer, WatchSubscription};
use crate::services::cache::InstanceCache;
use crate::services::registry::{GatewayError, InstanceRecord, RegistryGateway};

/// 首次拉取进行中时，其他调用方的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingLookupPolicy {
    /// 最多等待指定时间，再读取缓存
    Wait(Duration),
    /// 立即返回当前缓存（可能不存在）
    FailFast,
}

impl Default for PendingLookupPolicy {
    fn default() -> Self {
        Self::Wait(Duration::from_secs(3))
    }
}

/// 一次缓存查询的结果
#[derive(Debug)]
pub enum Acquired {
    /// 缓存命中
    Cached(Arc<[InstanceRecord]>),
    /// 当前调用方被选中，负责首次同步拉取
    Elected(Initializer),
    /// 其他调用方正在拉取
    Pending(watch::Receiver<bool>),
}

/// 订阅协调器
///
/// 每个服务名最多一个后台订阅，在第一次查询时惰性启动。
/// 协调锁只保护“是否已有订阅”的判断，从不跨越网络调用。
#[derive(Debug)]
pub struct WatchCoordinator {
    gateway: Arc<dyn RegistryGateway>,
    cache: InstanceCache,
    policy: PendingLookupPolicy,
    subscriptions: Mutex<HashMap<String, WatchSubscription>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    watch_starts: AtomicU64,
}

impl WatchCoordinator {
    pub fn new(
        gateway: Arc<dyn RegistryGateway>,
        cache: InstanceCache,
        policy: PendingLookupPolicy,
    ) -> Self {
        Self {
            gateway,
            cache,
            policy,
            subscriptions: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            watch_starts: AtomicU64::new(0),
        }
    }

    pub fn cache(&self) -> &InstanceCache {
        &self.cache
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, HashMap<String, WatchSubscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 查询缓存，未命中时决定由谁负责初始化
    pub fn acquire(&self, service_name: &str) -> Acquired {
        // 快路径：不加协调锁
        if let Some(instances) = self.cache.get(service_name) {
            tracing::debug!(service_name = %service_name, "Instance cache hit");
            return Acquired::Cached(instances);
        }

        let mut subscriptions = self.lock_subscriptions();

        // 加锁后再检查一次，并发调用方可能刚刚写入
        if let Some(instances) = self.cache.get(service_name) {
            return Acquired::Cached(instances);
        }
        if let Some(subscription) = subscriptions.get(service_name) {
            return Acquired::Pending(subscription.ready());
        }

        let (ready_tx, ready_rx) = watch::channel(false);
        let last_index = Arc::new(AtomicU64::new(0));
        let cancel = self.shutdown.child_token();

        self.spawn_watch(
            service_name.to_string(),
            ready_rx.clone(),
            last_index.clone(),
            cancel.clone(),
        );
        subscriptions.insert(
            service_name.to_string(),
            WatchSubscription::new(
                service_name.to_string(),
                cancel.clone(),
                last_index.clone(),
                ready_rx,
            ),
        );
        drop(subscriptions);

        Acquired::Elected(Initializer::new(
            service_name.to_string(),
            self.cache.clone(),
            last_index,
            ready_tx,
            cancel,
        ))
    }

    /// 解析服务的健康实例
    ///
    /// 返回 `Ok(None)` 表示等待超时或策略要求立即返回时缓存中仍没有条目；
    /// 只有被选中的调用方会产生注册中心错误，此时缓存已被标记为空。
    pub async fn resolve(
        &self,
        service_name: &str,
    ) -> Result<Option<Arc<[InstanceRecord]>>, GatewayError> {
        match self.acquire(service_name) {
            Acquired::Cached(instances) => Ok(Some(instances)),
            Acquired::Elected(initializer) => {
                match self.gateway.list_instances(service_name).await {
                    Ok(snapshot) => {
                        tracing::info!(
                            service_name = %service_name,
                            index = snapshot.index,
                            instance_count = snapshot.instances.len(),
                            "Initial service discovery succeeded"
                        );
                        Ok(Some(initializer.complete(snapshot)))
                    }
                    Err(e) => {
                        tracing::error!(
                            service_name = %service_name,
                            error = %e,
                            "Initial service discovery failed"
                        );
                        initializer.fail();
                        Err(e)
                    }
                }
            }
            Acquired::Pending(mut ready) => match self.policy {
                PendingLookupPolicy::FailFast => Ok(self.cache.get(service_name)),
                PendingLookupPolicy::Wait(limit) => {
                    let initialized = tokio::time::timeout(limit, ready.wait_for(|done| *done))
                        .await
                        .is_ok_and(|result| result.is_ok());
                    if !initialized {
                        tracing::warn!(
                            service_name = %service_name,
                            wait_ms = limit.as_millis() as u64,
                            "Timed out waiting for initial service discovery"
                        );
                    }
                    Ok(self.cache.get(service_name))
                }
            },
        }
    }

    fn spawn_watch(
        &self,
        service_name: String,
        ready: watch::Receiver<bool>,
        last_index: Arc<AtomicU64>,
        cancel: CancellationToken,
    ) {
        let gateway = self.gateway.clone();
        let cache = self.cache.clone();
        self.watch_starts.fetch_add(1, Ordering::SeqCst);

        tracing::info!(service_name = %service_name, "Starting registry watch");
        self.tracker.spawn(async move {
            run_watch(gateway, cache, &service_name, ready, last_index, cancel).await;
            tracing::info!(service_name = %service_name, "Registry watch stopped");
        });
    }

    /// 已启动的后台订阅总数
    pub fn watch_starts(&self) -> u64 {
        self.watch_starts.load(Ordering::SeqCst)
    }

    pub fn active_watches(&self) -> usize {
        self.lock_subscriptions().len()
    }

    pub fn is_watching(&self, service_name: &str) -> bool {
        self.lock_subscriptions().contains_key(service_name)
    }

    /// 订阅最近处理过的版本号
    pub fn last_index(&self, service_name: &str) -> Option<u64> {
        self.lock_subscriptions()
            .get(service_name)
            .filter(|subscription| subscription.is_initialized())
            .map(WatchSubscription::last_index)
    }

    /// 停止所有后台订阅并等待它们退出
    pub async fn shutdown(&self) {
        {
            let subscriptions = self.lock_subscriptions();
            for subscription in subscriptions.values() {
                tracing::debug!(
                    service_name = %subscription.service_name,
                    uptime_secs = subscription.started_at.elapsed().as_secs(),
                    "Cancelling registry watch"
                );
                subscription.cancel();
            }
        }
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("All registry watches stopped");
    }
}

// 后台订阅：等待首次拉取结束后再开始推送；无论从哪条路径退出，都清除缓存上的订阅标记
async fn run_watch(
    gateway: Arc<dyn RegistryGateway>,
    cache: InstanceCache,
    service_name: &str,
    mut ready: watch::Receiver<bool>,
    last_index: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = cancel.cancelled() => false,
        _ = async { ready.wait_for(|done| *done).await.is_ok() } => true,
    };
    if opened {
        apply_updates(gateway, &cache, service_name, &last_index, &cancel).await;
    }

    cache.set_watch_active(service_name, false);
}

// 按顺序把每次推送写入缓存
async fn apply_updates(
    gateway: Arc<dyn RegistryGateway>,
    cache: &InstanceCache,
    service_name: &str,
    last_index: &AtomicU64,
    cancel: &CancellationToken,
) {
    let mut stream = gateway.watch_service(service_name, last_index.load(Ordering::Acquire));
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };

        match item {
            Some(Ok(snapshot)) => {
                let previous = last_index.load(Ordering::Acquire);
                if snapshot.index != 0 && snapshot.index == previous {
                    tracing::debug!(
                        service_name = %service_name,
                        index = snapshot.index,
                        "Skipping already applied notification"
                    );
                    continue;
                }
                if snapshot.index < previous {
                    tracing::warn!(
                        service_name = %service_name,
                        previous_index = previous,
                        index = snapshot.index,
                        "Registry index went backwards, treating snapshot as authoritative"
                    );
                }

                last_index.store(snapshot.index, Ordering::Release);
                let passing = snapshot.into_passing();
                tracing::info!(
                    service_name = %service_name,
                    index = passing.index,
                    instance_count = passing.instances.len(),
                    "Registry pushed service update"
                );
                cache.store(service_name, passing);
            }
            Some(Err(e)) => {
                tracing::warn!(
                    service_name = %service_name,
                    error = %e,
                    "Registry watch poll failed"
                );
            }
            None => {
                tracing::warn!(service_name = %service_name, "Registry watch stream ended");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::registry::{InMemoryRegistry, Registration};

    fn coordinator(registry: &InMemoryRegistry, policy: PendingLookupPolicy) -> WatchCoordinator {
        WatchCoordinator::new(Arc::new(registry.clone()), InstanceCache::new(), policy)
    }

    #[tokio::test]
    async fn second_acquire_is_pending_until_initializer_finishes() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(&registry, PendingLookupPolicy::FailFast);

        let Acquired::Elected(initializer) = coordinator.acquire("orders") else {
            panic!("first caller should be elected");
        };
        let Acquired::Pending(ready) = coordinator.acquire("orders") else {
            panic!("second caller should be pending");
        };
        assert!(!*ready.borrow());

        initializer.complete(Default::default());
        assert!(*ready.borrow());
        assert!(matches!(coordinator.acquire("orders"), Acquired::Cached(_)));
        assert_eq!(coordinator.watch_starts(), 1);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_initializer_still_releases_waiters() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(&registry, PendingLookupPolicy::FailFast);

        let Acquired::Elected(initializer) = coordinator.acquire("orders") else {
            panic!("first caller should be elected");
        };
        let Acquired::Pending(ready) = coordinator.acquire("orders") else {
            panic!("second caller should be pending");
        };
        drop(initializer);

        assert!(*ready.borrow());
        // 初始化被放弃时按失败处理，记为已查询、无实例
        let entry = coordinator.cache().entry("orders").expect("entry should exist");
        assert!(entry.instances.is_empty());
        assert!(coordinator.is_watching("orders"));
        assert!(matches!(coordinator.acquire("orders"), Acquired::Cached(_)));

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn fail_fast_pending_lookup_returns_absent() {
        let registry = InMemoryRegistry::new();
        registry
            .register_instance(&Registration::new("orders", "orders-1", "10.0.0.1", 8080))
            .await
            .unwrap();
        let coordinator = coordinator(&registry, PendingLookupPolicy::FailFast);

        let _initializer = coordinator.acquire("orders");
        let resolved = coordinator.resolve("orders").await.unwrap();
        assert!(resolved.is_none());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn waiting_pending_lookup_times_out_with_absent_result() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(
            &registry,
            PendingLookupPolicy::Wait(Duration::from_millis(20)),
        );

        let _initializer = coordinator.acquire("orders");
        let resolved = coordinator.resolve("orders").await.unwrap();
        assert!(resolved.is_none());

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_watch_tasks() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(&registry, PendingLookupPolicy::default());

        coordinator.resolve("orders").await.unwrap();
        assert_eq!(coordinator.active_watches(), 1);

        tokio::time::timeout(Duration::from_secs(1), coordinator.shutdown())
            .await
            .expect("Shutdown should not hang");
        assert_eq!(
            coordinator.cache().entry("orders").map(|entry| entry.watch_active),
            Some(false)
        );
    }

    #[tokio::test]
    async fn watch_flag_is_cleared_when_shutdown_races_startup() {
        // 订阅可能在放行之前或之后被取消，两种情况都要清除标记
        for _ in 0..50 {
            let registry = InMemoryRegistry::new();
            let coordinator = coordinator(&registry, PendingLookupPolicy::default());

            coordinator.resolve("orders").await.unwrap();
            coordinator.shutdown().await;

            let entry = coordinator.cache().entry("orders").expect("entry should exist");
            assert!(!entry.watch_active);
        }
    }

    #[tokio::test]
    async fn initializer_finishing_after_shutdown_leaves_flag_cleared() {
        let registry = InMemoryRegistry::new();
        let coordinator = coordinator(&registry, PendingLookupPolicy::FailFast);

        let Acquired::Elected(initializer) = coordinator.acquire("orders") else {
            panic!("first caller should be elected");
        };
        coordinator.shutdown().await;
        initializer.complete(Default::default());

        let entry = coordinator.cache().entry("orders").expect("entry should exist");
        assert!(!entry.watch_active);
    }
}
