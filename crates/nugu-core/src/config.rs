//! 전송 계층 설정 구조체.
//!
//! 레지스트리/게이트웨이 주소, 연결 유지 여부, 타임아웃, 재시도 정책 등
//! 런타임 설정을 정의한다. JSON 파일 또는 환경변수(`config` crate)에서 로드.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::CoreError;

/// 스트리밍 방식
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamMode {
    /// 하나의 양방향 스트림으로 이벤트 송신 + 디렉티브 수신
    #[default]
    Bidirectional,
    /// 서버 스트리밍으로 디렉티브 수신, 이벤트는 단건 RPC
    DirectivesOnly,
}

/// 재연결 BackOff 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// 첫 재시도 지연 (밀리초)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// 최대 재시도 지연 (밀리초)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// 지수 배수
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

/// DeviceGateway 전송 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// 레지스트리 HTTP 엔드포인트
    #[serde(default = "default_registry_endpoint")]
    pub registry_endpoint: String,

    /// 레지스트리를 거치지 않을 때 사용할 게이트웨이 주소 (`host:port`)
    #[serde(default = "default_gateway_endpoint")]
    pub gateway_endpoint: String,

    /// 연결 유지 여부 (false면 레지스트리 생략, 기본 정책으로 직접 연결)
    #[serde(default = "default_true")]
    pub keep_connection: bool,

    /// 레지스트리에 요청할 프로토콜
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// User-Agent 헤더
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// 스트리밍 방식
    #[serde(default)]
    pub stream_mode: StreamMode,

    /// 이벤트 Call 타임아웃 (밀리초)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,

    /// 디렉티브 스트림 무수신 감시 시간 (밀리초)
    #[serde(default = "default_directives_watchdog")]
    pub directives_watchdog_ms: u64,

    /// 크래시 리포트 데드라인 (밀리초)
    #[serde(default = "default_crash_report_deadline")]
    pub crash_report_deadline_ms: u64,

    /// 레지스트리 요청 타임아웃 (밀리초)
    #[serde(default = "default_registry_timeout")]
    pub registry_timeout_ms: u64,

    /// 재연결 BackOff
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// TLS 사용 여부
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// TLS 서버 이름 (없으면 서버 정책의 hostname)
    #[serde(default)]
    pub tls_domain_name: Option<String>,

    /// 추가 CA 인증서 경로 (PEM)
    #[serde(default)]
    pub tls_ca_cert_path: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            registry_endpoint: default_registry_endpoint(),
            gateway_endpoint: default_gateway_endpoint(),
            keep_connection: true,
            protocol: default_protocol(),
            user_agent: default_user_agent(),
            stream_mode: StreamMode::default(),
            call_timeout_ms: default_call_timeout(),
            directives_watchdog_ms: default_directives_watchdog(),
            crash_report_deadline_ms: default_crash_report_deadline(),
            registry_timeout_ms: default_registry_timeout(),
            backoff: BackoffConfig::default(),
            use_tls: true,
            tls_domain_name: None,
            tls_ca_cert_path: None,
        }
    }
}

impl TransportConfig {
    /// 설정값 검증
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.registry_endpoint.trim().is_empty() {
            return Err(CoreError::Config(
                "registry_endpoint must not be empty".to_string(),
            ));
        }
        if self.gateway_endpoint.trim().is_empty() {
            return Err(CoreError::Config(
                "gateway_endpoint must not be empty".to_string(),
            ));
        }

        for (field, value) in [
            ("call_timeout_ms", self.call_timeout_ms),
            ("directives_watchdog_ms", self.directives_watchdog_ms),
            ("crash_report_deadline_ms", self.crash_report_deadline_ms),
            ("registry_timeout_ms", self.registry_timeout_ms),
            ("backoff.base_delay_ms", self.backoff.base_delay_ms),
        ] {
            if value == 0 {
                return Err(CoreError::Validation {
                    field: field.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(CoreError::Validation {
                field: "backoff.max_delay_ms".to_string(),
                message: "must not be smaller than base_delay_ms".to_string(),
            });
        }

        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return Err(CoreError::Validation {
                field: "backoff.multiplier".to_string(),
                message: "must be at least 1.0".to_string(),
            });
        }

        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn directives_watchdog(&self) -> Duration {
        Duration::from_millis(self.directives_watchdog_ms)
    }

    pub fn crash_report_deadline(&self) -> Duration {
        Duration::from_millis(self.crash_report_deadline_ms)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }
}

fn default_true() -> bool {
    true
}

fn default_registry_endpoint() -> String {
    "https://reg-http.sktnugu.com".to_string()
}

fn default_gateway_endpoint() -> String {
    "dggrpc.sktnugu.com:443".to_string()
}

fn default_protocol() -> String {
    crate::models::policy::DEFAULT_PROTOCOL.to_string()
}

fn default_user_agent() -> String {
    format!("NuguRustSdk/{}", env!("CARGO_PKG_VERSION"))
}

fn default_call_timeout() -> u64 {
    10_000
}

fn default_directives_watchdog() -> u64 {
    10_000
}

fn default_crash_report_deadline() -> u64 {
    10_000
}

fn default_registry_timeout() -> u64 {
    10_000
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let config: TransportConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.stream_mode, StreamMode::Bidirectional);
        assert_eq!(config.backoff.base_delay_ms, 1_000);
    }

    #[test]
    fn stream_mode_parses_snake_case() {
        let config: TransportConfig =
            serde_json::from_str(r#"{"stream_mode":"directives_only"}"#).unwrap();
        assert_eq!(config.stream_mode, StreamMode::DirectivesOnly);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = TransportConfig {
            call_timeout_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(CoreError::Validation { field, .. }) if field == "call_timeout_ms"
        ));
    }

    #[test]
    fn multiplier_below_one_is_rejected() {
        let config = TransportConfig {
            backoff: BackoffConfig {
                multiplier: 0.5,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_registry_endpoint_is_rejected() {
        let config = TransportConfig {
            registry_endpoint: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }
}
