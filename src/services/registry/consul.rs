use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::types::{
    HealthCheck, InstanceRecord, InstanceSnapshot, Registration, ServiceEntry, ServiceSnapshot,
};
use super::{GatewayError, RegistryGateway, WatchStream};

const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";
// 阻塞查询的额外等待时间，Consul 会在 wait 基础上随机增加最多 wait/16
const BLOCKING_QUERY_SLACK: Duration = Duration::from_secs(5);

/// Consul 网关配置
#[derive(Debug, Clone)]
pub struct ConsulGatewayConfig {
    /// Consul 地址，例如 http://127.0.0.1:8500
    pub address: String,
    /// 普通请求超时时间
    pub request_timeout: Duration,
    /// 阻塞查询的最长等待时间
    pub watch_wait: Duration,
    /// 阻塞查询失败后的重试间隔
    pub watch_retry: Duration,
}

impl Default for ConsulGatewayConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            request_timeout: Duration::from_secs(10),
            watch_wait: Duration::from_secs(300),
            watch_retry: Duration::from_secs(5),
        }
    }
}

/// 基于 Consul HTTP API 的注册中心网关
#[derive(Debug, Clone)]
pub struct ConsulGateway {
    client: reqwest::Client,
    base_url: Url,
    config: ConsulGatewayConfig,
}

impl ConsulGateway {
    pub fn new(config: ConsulGatewayConfig) -> Result<Self, GatewayError> {
        let base_url = Url::parse(&config.address).map_err(|e| {
            GatewayError::Unreachable(format!("invalid registry address {}: {e}", config.address))
        })?;
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    /// 便捷的创建方法，使用默认超时
    pub fn connect(host: &str, port: u16) -> Result<Self, GatewayError> {
        Self::new(ConsulGatewayConfig {
            address: format!("http://{host}:{port}"),
            ..Default::default()
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                GatewayError::Unreachable(format!("invalid registry address {}", self.base_url))
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    // 读取服务的健康条目；blocking_index 不为空时发起阻塞查询
    async fn fetch_health(
        &self,
        service_name: &str,
        blocking_index: Option<u64>,
    ) -> Result<ServiceSnapshot, GatewayError> {
        let url = self.endpoint(&["v1", "health", "service", service_name])?;
        let mut request = self.client.get(url);
        if let Some(index) = blocking_index {
            let wait = self.config.watch_wait;
            request = request
                .query(&[
                    ("index", index.to_string()),
                    ("wait", format!("{}s", wait.as_secs())),
                ])
                .timeout(wait + wait / 16 + BLOCKING_QUERY_SLACK);
        }

        let response = request.send().await?;
        let status = response.status();
        let index = response
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(0);
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(ServiceSnapshot {
            index,
            entries: decode_health_entries(&body)?,
        })
    }

    async fn put(&self, url: Url, body: Option<&RegistrationBody<'_>>) -> Result<(), GatewayError> {
        let mut request = self.client.put(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl RegistryGateway for ConsulGateway {
    async fn register_instance(&self, registration: &Registration) -> Result<(), GatewayError> {
        let url = self.endpoint(&["v1", "agent", "service", "register"])?;
        let body = RegistrationBody::from_registration(registration);
        self.put(url, Some(&body)).await
    }

    async fn deregister_instance(&self, instance_id: &str) -> Result<(), GatewayError> {
        let url = self.endpoint(&["v1", "agent", "service", "deregister", instance_id])?;
        self.put(url, None).await
    }

    async fn list_instances(&self, service_name: &str) -> Result<InstanceSnapshot, GatewayError> {
        let snapshot = self.fetch_health(service_name, None).await?;
        Ok(snapshot.into_passing())
    }

    fn watch_service(&self, service_name: &str, from_index: u64) -> WatchStream {
        let state = WatchState {
            gateway: self.clone(),
            service_name: service_name.to_string(),
            index: from_index,
            backoff: false,
        };

        stream::unfold(state, |mut state| async move {
            if state.backoff {
                tokio::time::sleep(state.gateway.config.watch_retry).await;
            }
            loop {
                match state
                    .gateway
                    .fetch_health(&state.service_name, Some(state.index))
                    .await
                {
                    Ok(snapshot) => {
                        // wait 超时但没有变化
                        if snapshot.index != 0 && snapshot.index == state.index {
                            continue;
                        }
                        // 版本号为 0 说明注册中心没有给出索引，降速避免空转
                        state.backoff = snapshot.index == 0;
                        // 版本号回退（例如 Consul 重启）时从头开始
                        state.index = if snapshot.index < state.index {
                            0
                        } else {
                            snapshot.index
                        };
                        return Some((Ok(snapshot), state));
                    }
                    Err(e) => {
                        state.backoff = true;
                        return Some((Err(e), state));
                    }
                }
            }
        })
        .boxed()
    }
}

struct WatchState {
    gateway: ConsulGateway,
    service_name: String,
    index: u64,
    backoff: bool,
}

// Consul 注册请求体
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RegistrationBody<'a> {
    #[serde(rename = "ID")]
    id: &'a str,
    name: &'a str,
    address: &'a str,
    port: u16,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    meta: &'a HashMap<String, String>,
    enable_tag_override: bool,
    check: CheckBody,
    weights: WeightsBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CheckBody {
    #[serde(rename = "HTTP")]
    http: String,
    interval: &'static str,
    deregister_critical_service_after: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WeightsBody {
    passing: u32,
    warning: u32,
}

impl<'a> RegistrationBody<'a> {
    fn from_registration(registration: &'a Registration) -> Self {
        Self {
            id: &registration.instance_id,
            name: &registration.service_name,
            address: &registration.address,
            port: registration.port,
            meta: &registration.meta,
            enable_tag_override: false,
            check: CheckBody {
                http: registration.health_check_url(),
                interval: "15s",
                deregister_critical_service_after: "30s",
            },
            weights: WeightsBody {
                passing: 10,
                warning: 1,
            },
        }
    }
}

// /v1/health/service 的响应条目
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntryWire {
    #[serde(default)]
    node: Option<NodeWire>,
    service: AgentServiceWire,
    #[serde(default)]
    checks: Option<Vec<CheckWire>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeWire {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AgentServiceWire {
    #[serde(rename = "ID")]
    id: String,
    service: String,
    #[serde(default)]
    address: String,
    port: u16,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    meta: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct CheckWire {
    #[serde(rename = "CheckID")]
    check_id: String,
    #[serde(rename = "Status")]
    status: String,
}

fn decode_health_entries(body: &[u8]) -> Result<Vec<ServiceEntry>, GatewayError> {
    let wire: Vec<HealthEntryWire> = serde_json::from_slice(body)?;
    let entries = wire
        .into_iter()
        .map(|entry| {
            let service = entry.service;
            // 服务未单独设置地址时使用节点地址
            let address = if service.address.is_empty() {
                entry.node.map(|node| node.address).unwrap_or_default()
            } else {
                service.address
            };
            ServiceEntry {
                instance: InstanceRecord {
                    id: service.id,
                    service: service.service,
                    address,
                    port: service.port,
                    tags: service.tags.unwrap_or_default(),
                    meta: service.meta.unwrap_or_default(),
                },
                checks: entry
                    .checks
                    .unwrap_or_default()
                    .into_iter()
                    .map(|check| HealthCheck {
                        check_id: check.check_id,
                        status: check.status,
                    })
                    .collect(),
            }
        })
        .collect();
    Ok(entries)
}
