use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// 维护模式下节点检查的固定 ID
pub const NODE_MAINTENANCE_CHECK: &str = "_node_maintenance";
/// 维护模式下服务检查的 ID 前缀
pub const SERVICE_MAINTENANCE_PREFIX: &str = "_service_maintenance:";

/// 服务实例，只有健康状态为 passing 的实例会被缓存
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub service: String,
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    Maintenance,
}

impl HealthStatus {
    /// 解析注册中心返回的检查状态，未知状态返回 None
    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "passing" => Some(Self::Passing),
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            "maintenance" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

/// 单个健康检查的原始结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub check_id: String,
    pub status: String,
}

impl HealthCheck {
    pub fn new(check_id: impl Into<String>, status: HealthStatus) -> Self {
        let status = match status {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Maintenance => "maintenance",
        };
        Self {
            check_id: check_id.into(),
            status: status.to_string(),
        }
    }

    fn is_maintenance(&self) -> bool {
        self.check_id == NODE_MAINTENANCE_CHECK
            || self.check_id.starts_with(SERVICE_MAINTENANCE_PREFIX)
    }
}

/// 注册中心返回的原始条目（实例 + 其全部检查）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEntry {
    pub instance: InstanceRecord,
    pub checks: Vec<HealthCheck>,
}

impl ServiceEntry {
    /// 聚合所有检查的状态
    ///
    /// 维护优先于 critical，critical 优先于 warning；没有任何检查时视为 passing。
    /// 出现无法识别的状态时返回 None，调用方应当把它当作不健康处理。
    pub fn aggregated_status(&self) -> Option<HealthStatus> {
        let (mut warning, mut critical, mut maintenance) = (false, false, false);

        for check in &self.checks {
            if check.is_maintenance() {
                maintenance = true;
                continue;
            }
            match HealthStatus::parse(&check.status)? {
                HealthStatus::Passing => {}
                HealthStatus::Warning => warning = true,
                HealthStatus::Critical => critical = true,
                HealthStatus::Maintenance => maintenance = true,
            }
        }

        let status = if maintenance {
            HealthStatus::Maintenance
        } else if critical {
            HealthStatus::Critical
        } else if warning {
            HealthStatus::Warning
        } else {
            HealthStatus::Passing
        };
        Some(status)
    }

    pub fn is_passing(&self) -> bool {
        self.aggregated_status() == Some(HealthStatus::Passing)
    }
}

/// 某一时刻注册中心中一个服务的完整状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceSnapshot {
    /// 注册中心的版本号（Consul 的 X-Consul-Index）
    pub index: u64,
    pub entries: Vec<ServiceEntry>,
}

impl ServiceSnapshot {
    /// 过滤出健康实例，保持注册中心返回的顺序
    pub fn into_passing(self) -> InstanceSnapshot {
        let instances = self
            .entries
            .into_iter()
            .filter(ServiceEntry::is_passing)
            .map(|entry| entry.instance)
            .collect();
        InstanceSnapshot {
            index: self.index,
            instances,
        }
    }
}

/// 已过滤的健康实例列表
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceSnapshot {
    pub index: u64,
    pub instances: Vec<InstanceRecord>,
}

/// 服务注册请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub service_name: String,
    pub instance_id: String,
    pub address: String,
    pub port: u16,
    pub meta: HashMap<String, String>,
    /// 健康检查路径，例如 "/health"
    pub health_check_path: String,
}

impl Registration {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            address: address.into(),
            port,
            meta: HashMap::new(),
            health_check_path: "/health".to_string(),
        }
    }

    pub fn with_health_check_path(mut self, path: impl Into<String>) -> Self {
        self.health_check_path = path.into();
        self
    }

    pub fn with_meta(mut self, meta: HashMap<String, String>) -> Self {
        self.meta = meta;
        self
    }

    /// 注册中心用来探活的完整 URL
    pub fn health_check_url(&self) -> String {
        let path = self.health_check_path.trim_start_matches('/');
        format!("http://{}:{}/{}", self.address, self.port, path)
    }

    /// 注册后的实例视图
    pub fn to_instance(&self) -> InstanceRecord {
        InstanceRecord {
            id: self.instance_id.clone(),
            service: self.service_name.clone(),
            address: self.address.clone(),
            port: self.port,
            tags: Vec::new(),
            meta: self.meta.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, checks: Vec<HealthCheck>) -> ServiceEntry {
        ServiceEntry {
            instance: Registration::new("orders", id, "10.0.0.1", 8080).to_instance(),
            checks,
        }
    }

    #[test]
    fn aggregated_status_prefers_worst_check() {
        let e = entry(
            "a",
            vec![
                HealthCheck::new("serfHealth", HealthStatus::Passing),
                HealthCheck::new("service:a", HealthStatus::Warning),
            ],
        );
        assert_eq!(e.aggregated_status(), Some(HealthStatus::Warning));

        let e = entry(
            "b",
            vec![
                HealthCheck::new("serfHealth", HealthStatus::Critical),
                HealthCheck::new("service:b", HealthStatus::Warning),
            ],
        );
        assert_eq!(e.aggregated_status(), Some(HealthStatus::Critical));
    }

    #[test]
    fn maintenance_check_wins_over_everything() {
        let e = entry(
            "a",
            vec![
                HealthCheck::new("_service_maintenance:a", HealthStatus::Critical),
                HealthCheck::new("service:a", HealthStatus::Passing),
            ],
        );
        assert_eq!(e.aggregated_status(), Some(HealthStatus::Maintenance));
        assert!(!e.is_passing());
    }

    #[test]
    fn no_checks_counts_as_passing() {
        assert!(entry("a", Vec::new()).is_passing());
    }

    #[test]
    fn unknown_status_is_not_passing() {
        let e = entry(
            "a",
            vec![HealthCheck {
                check_id: "service:a".to_string(),
                status: "bogus".to_string(),
            }],
        );
        assert_eq!(e.aggregated_status(), None);
        assert!(!e.is_passing());
    }

    #[test]
    fn into_passing_keeps_order_and_index() {
        let snapshot = ServiceSnapshot {
            index: 42,
            entries: vec![
                entry("a", vec![HealthCheck::new("c", HealthStatus::Passing)]),
                entry("b", vec![HealthCheck::new("c", HealthStatus::Critical)]),
                entry("c", vec![HealthCheck::new("c", HealthStatus::Passing)]),
            ],
        };
        let passing = snapshot.into_passing();
        assert_eq!(passing.index, 42);
        let ids: Vec<_> = passing.instances.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn health_check_url_normalizes_leading_slash() {
        let reg = Registration::new("svc", "svc-1", "127.0.0.1", 10086);
        assert_eq!(reg.health_check_url(), "http://127.0.0.1:10086/health");
        let reg = reg.with_health_check_path("status");
        assert_eq!(reg.health_check_url(), "http://127.0.0.1:10086/status");
    }
}
