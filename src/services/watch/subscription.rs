use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::services::cache::InstanceCache;
use crate::services::registry::{InstanceRecord, InstanceSnapshot};

/// 一个服务名对应的后台订阅
#[derive(Debug)]
pub struct WatchSubscription {
    pub service_name: String,
    pub started_at: Instant,
    cancel: CancellationToken,
    last_index: Arc<AtomicU64>,
    ready: watch::Receiver<bool>,
}

impl WatchSubscription {
    pub(super) fn new(
        service_name: String,
        cancel: CancellationToken,
        last_index: Arc<AtomicU64>,
        ready: watch::Receiver<bool>,
    ) -> Self {
        Self {
            service_name,
            started_at: Instant::now(),
            cancel,
            last_index,
            ready,
        }
    }

    /// 最近一次处理过的注册中心版本号
    pub fn last_index(&self) -> u64 {
        self.last_index.load(Ordering::Acquire)
    }

    /// 首次同步拉取是否已经结束
    pub fn is_initialized(&self) -> bool {
        *self.ready.borrow()
    }

    pub(super) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(super) fn ready(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }
}

/// 被选中负责首次拉取的调用方持有的句柄
///
/// 无论以何种方式结束（成功、失败、调用方被取消），丢弃时都会放行后台订阅，
/// 并唤醒等待中的调用方。没有写入结果就被丢弃时按失败处理。
#[derive(Debug)]
pub struct Initializer {
    service_name: String,
    cache: InstanceCache,
    last_index: Arc<AtomicU64>,
    ready: watch::Sender<bool>,
    cancel: CancellationToken,
    finished: bool,
}

impl Initializer {
    pub(super) fn new(
        service_name: String,
        cache: InstanceCache,
        last_index: Arc<AtomicU64>,
        ready: watch::Sender<bool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service_name,
            cache,
            last_index,
            ready,
            cancel,
            finished: false,
        }
    }

    /// 写入首次拉取的结果
    pub fn complete(mut self, snapshot: InstanceSnapshot) -> Arc<[InstanceRecord]> {
        self.last_index.store(snapshot.index, Ordering::Release);
        let instances = self.cache.store(&self.service_name, snapshot);
        self.finish();
        instances
    }

    /// 首次拉取失败，记为“已查询、无实例”
    pub fn fail(mut self) {
        self.cache.mark_empty(&self.service_name);
        self.finish();
    }

    fn finish(&mut self) {
        self.finished = true;
        // 订阅已经退出时，写入不能再把条目标记为有订阅维护
        if self.cancel.is_cancelled() {
            self.cache.set_watch_active(&self.service_name, false);
        }
    }
}

impl Drop for Initializer {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(
                service_name = %self.service_name,
                "Initial service discovery abandoned, caching empty result"
            );
            self.cache.mark_empty(&self.service_name);
            self.finish();
        }
        self.ready.send_replace(true);
    }
}
