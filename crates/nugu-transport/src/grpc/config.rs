//! gRPC 채널 설정
//!
//! `TransportConfig`의 TLS 항목과 서버 정책으로 tonic `Endpoint`를 만든다.

use std::fs;
use std::time::Duration;

use nugu_core::config::TransportConfig;
use nugu_core::error::CoreError;
use nugu_core::models::policy::ServerPolicy;
use tonic::transport::{Certificate, ClientTlsConfig, Endpoint};

/// HTTP/2 keepalive 간격
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// gRPC 채널 설정
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcConfig {
    pub use_tls: bool,
    /// 비어 있으면 서버 정책의 hostname 사용
    pub tls_domain_name: Option<String>,
    pub tls_ca_cert_path: Option<String>,
}

impl From<&TransportConfig> for GrpcConfig {
    fn from(config: &TransportConfig) -> Self {
        Self {
            use_tls: config.use_tls,
            tls_domain_name: config.tls_domain_name.clone(),
            tls_ca_cert_path: config.tls_ca_cert_path.clone(),
        }
    }
}

impl GrpcConfig {
    pub fn endpoint_url(&self, policy: &ServerPolicy) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}", policy.authority())
    }

    /// TLS 검증에 쓸 서버 이름
    pub fn domain_name<'a>(&'a self, policy: &'a ServerPolicy) -> Result<&'a str, CoreError> {
        let domain = self
            .tls_domain_name
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(policy.hostname.as_str());

        if domain.is_empty() {
            return Err(CoreError::Config(
                "tls_domain_name or server hostname is required when use_tls=true".to_string(),
            ));
        }
        if domain.contains('/') {
            return Err(CoreError::Config(
                "tls_domain_name must be a hostname without path".to_string(),
            ));
        }
        Ok(domain)
    }

    pub fn build_endpoint(&self, policy: &ServerPolicy) -> Result<Endpoint, CoreError> {
        let url = self.endpoint_url(policy);
        let mut endpoint = Endpoint::from_shared(url)
            .map_err(|e| CoreError::Config(format!("invalid gRPC endpoint: {e}")))?
            .connect_timeout(policy.connection_timeout())
            .http2_keep_alive_interval(KEEP_ALIVE_INTERVAL)
            .keep_alive_while_idle(true);

        if self.use_tls {
            let mut tls = ClientTlsConfig::new()
                .domain_name(self.domain_name(policy)?.to_string())
                .with_native_roots();

            if let Some(path) = self.tls_ca_cert_path.as_deref().map(str::trim) {
                if !path.is_empty() {
                    let pem = fs::read(path).map_err(|e| {
                        CoreError::Config(format!("failed to read tls_ca_cert_path: {e}"))
                    })?;
                    tls = tls.ca_certificate(Certificate::from_pem(pem));
                }
            }

            endpoint = endpoint
                .tls_config(tls)
                .map_err(|e| CoreError::Config(format!("invalid tls configuration: {e}")))?;
        }

        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(hostname: &str, address: &str) -> ServerPolicy {
        ServerPolicy {
            protocol: "H2_GRPC".to_string(),
            hostname: hostname.to_string(),
            address: address.to_string(),
            port: 443,
            retry_count_limit: 2,
            connection_timeout: 10,
            charge: String::new(),
        }
    }

    #[test]
    fn url_prefers_handoff_address() {
        let config = GrpcConfig::from(&TransportConfig::default());

        assert_eq!(
            config.endpoint_url(&policy("gw.example.com", "")),
            "https://gw.example.com:443"
        );
        assert_eq!(
            config.endpoint_url(&policy("gw.example.com", "10.0.0.7")),
            "https://10.0.0.7:443"
        );
    }

    #[test]
    fn plaintext_uses_http_scheme() {
        let config = GrpcConfig {
            use_tls: false,
            tls_domain_name: None,
            tls_ca_cert_path: None,
        };
        assert_eq!(
            config.endpoint_url(&policy("localhost", "")),
            "http://localhost:443"
        );
        assert!(config.build_endpoint(&policy("localhost", "")).is_ok());
    }

    #[test]
    fn domain_name_falls_back_to_hostname() {
        let config = GrpcConfig::from(&TransportConfig::default());
        let server = policy("gw.example.com", "10.0.0.7");
        assert_eq!(config.domain_name(&server).unwrap(), "gw.example.com");

        let custom = GrpcConfig {
            tls_domain_name: Some("dg.example.com".to_string()),
            ..config
        };
        assert_eq!(custom.domain_name(&server).unwrap(), "dg.example.com");
    }

    #[test]
    fn domain_name_rejects_paths() {
        let config = GrpcConfig {
            use_tls: true,
            tls_domain_name: Some("gw.example.com/v1".to_string()),
            tls_ca_cert_path: None,
        };
        assert!(config.domain_name(&policy("gw.example.com", "")).is_err());
    }

    #[test]
    fn missing_ca_file_is_config_error() {
        let config = GrpcConfig {
            use_tls: true,
            tls_domain_name: None,
            tls_ca_cert_path: Some("/nonexistent/ca.pem".to_string()),
        };
        let result = config.build_endpoint(&policy("gw.example.com", ""));
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
