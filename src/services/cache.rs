use std::sync::Arc;

use dashmap::DashMap;

use super::registry::{InstanceRecord, InstanceSnapshot};

/// 单个服务的缓存条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// 最近一次成功读取到的健康实例
    pub instances: Arc<[InstanceRecord]>,
    /// 实例列表对应的注册中心版本号，0 表示没有可用版本
    pub index: u64,
    /// 是否有后台订阅在维护这个条目
    pub watch_active: bool,
}

/// 服务发现结果缓存（服务名 -> 健康实例列表）
///
/// 没有条目表示从未查询过；条目存在但列表为空表示查询过、当前没有健康实例。
/// 每次写入都只锁住单个分片，读写互不阻塞整个缓存。
#[derive(Debug, Clone, Default)]
pub struct InstanceCache {
    entries: Arc<DashMap<String, CacheEntry>>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取服务的健康实例
    pub fn get(&self, service_name: &str) -> Option<Arc<[InstanceRecord]>> {
        self.entries
            .get(service_name)
            .map(|entry| entry.value().instances.clone())
    }

    /// 读取完整的缓存条目
    pub fn entry(&self, service_name: &str) -> Option<CacheEntry> {
        self.entries
            .get(service_name)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, service_name: &str) -> bool {
        self.entries.contains_key(service_name)
    }

    /// 用完整快照覆盖服务的实例列表，返回写入的实例
    pub fn store(&self, service_name: &str, snapshot: InstanceSnapshot) -> Arc<[InstanceRecord]> {
        let instances: Arc<[InstanceRecord]> = snapshot.instances.into();
        tracing::debug!(
            service_name = %service_name,
            index = snapshot.index,
            instance_count = instances.len(),
            "Storing instance snapshot"
        );

        self.entries
            .entry(service_name.to_string())
            .and_modify(|entry| {
                entry.instances = instances.clone();
                entry.index = snapshot.index;
                entry.watch_active = true;
            })
            .or_insert_with(|| CacheEntry {
                instances: instances.clone(),
                index: snapshot.index,
                watch_active: true,
            });
        instances
    }

    /// 标记服务为“已查询、无实例”
    ///
    /// 只在条目不存在时生效，避免覆盖已经由订阅写入的更新结果。
    pub fn mark_empty(&self, service_name: &str) {
        self.entries
            .entry(service_name.to_string())
            .or_insert_with(|| CacheEntry {
                instances: Arc::from(Vec::new()),
                index: 0,
                watch_active: true,
            });
    }

    /// 更新订阅标记，条目不存在时不做任何事
    pub fn set_watch_active(&self, service_name: &str, active: bool) {
        if let Some(mut entry) = self.entries.get_mut(service_name) {
            entry.watch_active = active;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
