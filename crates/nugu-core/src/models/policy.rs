//! 레지스트리 정책 모델.
//!
//! 레지스트리(`GET /v1/policies`) 응답과 동일한 JSON 필드명을 사용한다.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// 기본 프로토콜 식별자
pub const DEFAULT_PROTOCOL: &str = "H2_GRPC";

/// 단일 DeviceGateway 서버 정책
///
/// 레지스트리가 반환한 순서대로 소비되며, 소진되거나 핸드오프로 교체되면 폐기된다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerPolicy {
    /// 프로토콜 (예: "H2_GRPC", "H2")
    pub protocol: String,
    /// 서버 호스트 이름
    pub hostname: String,
    /// 서버 주소 (핸드오프 시에만 채워짐)
    #[serde(default)]
    pub address: String,
    /// 서버 포트
    pub port: u16,
    /// 이 서버에 대한 재시도 한도 (BackOff 최대 시도 횟수)
    #[serde(default)]
    pub retry_count_limit: u32,
    /// 연결 타임아웃 (초)
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
    /// 과금 정보
    #[serde(default)]
    pub charge: String,
}

impl ServerPolicy {
    /// 연결 타임아웃
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout.max(1))
    }

    /// `host:port` 형태의 주소
    pub fn authority(&self) -> String {
        let host = if self.address.is_empty() {
            &self.hostname
        } else {
            &self.address
        };
        format!("{host}:{}", self.port)
    }
}

/// 헬스 체크(Ping) 정책
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckPolicy {
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub ttl_max: u64,
    #[serde(default)]
    pub beta: f32,
    #[serde(default)]
    pub retry_count_limit: u32,
    /// Ping 주기 (밀리초)
    #[serde(default = "default_retry_delay")]
    pub retry_delay: u64,
    /// Ping 1회 타임아웃 (밀리초)
    #[serde(default = "default_health_check_timeout")]
    pub health_check_timeout: u64,
    #[serde(default)]
    pub accumulation_time: u64,
}

impl HealthCheckPolicy {
    /// Ping 주기
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.retry_delay.max(1))
    }

    /// Ping 1회 타임아웃
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout.max(1))
    }
}

impl Default for HealthCheckPolicy {
    fn default() -> Self {
        Self {
            ttl: 0,
            ttl_max: 0,
            beta: 0.0,
            retry_count_limit: 0,
            retry_delay: default_retry_delay(),
            health_check_timeout: default_health_check_timeout(),
            accumulation_time: 0,
        }
    }
}

/// 한 번의 연결 사이클을 지배하는 정책 (서버 후보 목록 + 헬스 체크)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub health_check_policy: HealthCheckPolicy,
    pub server_policies: Vec<ServerPolicy>,
}

impl Policy {
    /// 레지스트리를 거치지 않고 게이트웨이에 직접 연결하기 위한 기본 정책
    ///
    /// `endpoint`는 `host:port` 또는 `host` 형식. 포트가 없으면 443.
    pub fn default_for_gateway(endpoint: &str) -> Self {
        let endpoint = endpoint
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');

        let (hostname, port) = match endpoint.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(443)),
            None => (endpoint.to_string(), 443),
        };

        Self {
            health_check_policy: HealthCheckPolicy::default(),
            server_policies: vec![ServerPolicy {
                protocol: DEFAULT_PROTOCOL.to_string(),
                hostname,
                address: String::new(),
                port,
                retry_count_limit: default_retry_count_limit(),
                connection_timeout: default_connection_timeout(),
                charge: String::new(),
            }],
        }
    }

    /// 단일 서버 정책으로 구성된 정책 (핸드오프용)
    pub fn single(server: ServerPolicy, health_check_policy: HealthCheckPolicy) -> Self {
        Self {
            health_check_policy,
            server_policies: vec![server],
        }
    }
}

/// 마지막으로 성공한 레지스트리 정책 캐시
///
/// 레지스트리 장애 시 fallback, 핸드오프 시 헬스 체크 정책 재사용에 쓰인다.
/// 읽기 위주 캐시이므로 마지막 쓰기가 이긴다.
#[derive(Debug, Clone, Default)]
pub struct PolicyCache {
    inner: Arc<RwLock<Option<Policy>>>,
}

impl PolicyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Policy> {
        self.inner.read().clone()
    }

    pub fn set(&self, policy: Policy) {
        *self.inner.write() = Some(policy);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// 캐시된 헬스 체크 정책
    pub fn health_check_policy(&self) -> Option<HealthCheckPolicy> {
        self.inner
            .read()
            .as_ref()
            .map(|policy| policy.health_check_policy.clone())
    }
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_retry_count_limit() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    30_000
}

fn default_health_check_timeout() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_check_defaults_apply_to_missing_fields() {
        let policy: HealthCheckPolicy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy.interval(), Duration::from_secs(30));
        assert_eq!(policy.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn server_policy_requires_hostname_and_port() {
        let result = serde_json::from_str::<ServerPolicy>(r#"{"protocol":"H2_GRPC"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn default_for_gateway_parses_port() {
        let policy = Policy::default_for_gateway("https://dggrpc.example.com:8443/");
        let server = &policy.server_policies[0];
        assert_eq!(server.hostname, "dggrpc.example.com");
        assert_eq!(server.port, 8443);
        assert_eq!(server.protocol, DEFAULT_PROTOCOL);
    }

    #[test]
    fn default_for_gateway_without_port_uses_443() {
        let policy = Policy::default_for_gateway("dggrpc.example.com");
        assert_eq!(policy.server_policies[0].port, 443);
    }

    #[test]
    fn authority_prefers_address() {
        let mut server = Policy::default_for_gateway("gw.example.com:443").server_policies[0].clone();
        assert_eq!(server.authority(), "gw.example.com:443");
        server.address = "10.0.0.1".to_string();
        assert_eq!(server.authority(), "10.0.0.1:443");
    }

    #[test]
    fn cache_is_shared_between_clones() {
        let cache = PolicyCache::new();
        let other = cache.clone();
        assert!(other.health_check_policy().is_none());

        cache.set(Policy::default_for_gateway("gw.example.com"));
        assert!(other.get().is_some());

        other.clear();
        assert!(cache.get().is_none());
    }
}
