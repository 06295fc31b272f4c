//! 정책 레지스트리 HTTP 클라이언트.
//!
//! `PolicySource` 포트 구현. `GET {registry}/v1/policies?protocol=<proto>`로
//! 서버/헬스 체크 정책을 받아 캐시하고, 레지스트리 장애 시 캐시를 대신 돌려준다.

use std::error::Error as StdError;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use nugu_core::config::TransportConfig;
use nugu_core::error::CoreError;
use nugu_core::models::policy::{Policy, PolicyCache};
use nugu_core::models::state::ChangedReason;
use nugu_core::ports::registry::{PolicySource, RegistryError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use url::Url;

/// 정책 조회 경로
const POLICIES_PATH: &str = "/v1/policies";

/// 레지스트리 클라이언트: `PolicySource` 포트 구현
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    protocol: String,
    user_agent: String,
    cache: PolicyCache,
    cancel: Notify,
    shutdown: AtomicBool,
}

impl RegistryClient {
    /// 새 레지스트리 클라이언트 생성
    ///
    /// 요청은 일회성이므로 호스트당 유휴 연결을 1개로 제한한다.
    pub fn new(config: &TransportConfig, cache: PolicyCache) -> Result<Self, CoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.registry_timeout())
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| CoreError::Network(format!("HTTP 클라이언트 빌드 실패: {e}")))?;

        Ok(Self {
            client,
            base_url: config.registry_endpoint.trim_end_matches('/').to_string(),
            protocol: config.protocol.clone(),
            user_agent: config.user_agent.clone(),
            cache,
            cancel: Notify::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    /// 공유 정책 캐시
    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn policies_url(&self) -> Result<Url, RegistryError> {
        Url::parse_with_params(
            &format!("{}{POLICIES_PATH}", self.base_url),
            &[("protocol", self.protocol.as_str())],
        )
        .map_err(|e| {
            RegistryError::failed(
                ChangedReason::UnrecoverableError,
                format!("레지스트리 URL 오류: {e}"),
            )
        })
    }

    /// 캐시가 있으면 캐시로, 없으면 `reason`으로 실패
    fn cached_or_fail(&self, reason: ChangedReason, message: String) -> Result<Policy, RegistryError> {
        match self.cache.get() {
            Some(policy) => {
                warn!("레지스트리 실패, 캐시된 정책 사용: {message}");
                Ok(policy)
            }
            None => Err(RegistryError::failed(reason, message)),
        }
    }

    async fn fetch(&self, authorization: &str) -> Result<Policy, RegistryError> {
        let url = self.policies_url()?;
        debug!("정책 요청: {url}");

        let sent = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, authorization)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                let reason = classify_network_error(&e);
                warn!("정책 요청 실패 ({reason}): {e}");
                return self.cached_or_fail(reason, format!("정책 요청 실패: {e}"));
            }
        };

        let status = resp.status();

        if status.is_success() {
            let body = resp.text().await.unwrap_or_else(|e| {
                warn!("응답 본문 읽기 실패: {e}");
                String::new()
            });
            return match parse_policy(&body) {
                Ok(policy) => {
                    info!(
                        servers = policy.server_policies.len(),
                        "정책 획득 성공"
                    );
                    self.cache.set(policy.clone());
                    Ok(policy)
                }
                Err(message) => self.cached_or_fail(ChangedReason::FailureProtocolError, message),
            };
        }

        let status_code = status.as_u16();
        let text = resp.text().await.unwrap_or_else(|e| {
            warn!("응답 본문 읽기 실패: {e}");
            String::new()
        });

        match status_code {
            401 | 403 => Err(RegistryError::failed(
                ChangedReason::InvalidAuth,
                format!("인증 실패 ({status}): {text}"),
            )),
            400..=499 => self.cached_or_fail(
                ChangedReason::InternalError,
                format!("레지스트리 요청 오류 ({status}): {text}"),
            ),
            500..=599 => self.cached_or_fail(
                ChangedReason::ServerInternalError,
                format!("레지스트리 서버 오류 ({status}): {text}"),
            ),
            _ => self.cached_or_fail(
                ChangedReason::UnrecoverableError,
                format!("예상치 못한 응답 ({status}): {text}"),
            ),
        }
    }
}

#[async_trait]
impl PolicySource for RegistryClient {
    async fn get_policy(&self, authorization: &str) -> Result<Policy, RegistryError> {
        if self.is_shutdown() {
            debug!("레지스트리 클라이언트 종료됨, 요청 무시");
            return Err(RegistryError::Shutdown);
        }

        tokio::select! {
            result = self.fetch(authorization) => result,
            _ = self.cancel.notified() => {
                debug!("정책 요청 취소됨");
                Err(RegistryError::Cancelled)
            }
        }
    }

    fn disconnect(&self) {
        self.cancel.notify_waiters();
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            warn!("레지스트리 클라이언트 이미 종료됨");
            return;
        }
        self.cancel.notify_waiters();
        debug!("레지스트리 클라이언트 종료");
    }
}

/// 응답 본문 → 정책 (서버 정책이 하나 이상 있어야 유효)
fn parse_policy(body: &str) -> Result<Policy, String> {
    let policy: Policy =
        serde_json::from_str(body).map_err(|e| format!("정책 응답 파싱 실패: {e}"))?;
    if policy.server_policies.is_empty() {
        return Err("serverPolicies가 비어 있음".to_string());
    }
    Ok(policy)
}

/// 네트워크 에러 분류: cause chain에서 DNS 실패를 찾는다
fn classify_network_error(error: &reqwest::Error) -> ChangedReason {
    let mut source: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(cause) = source {
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return ChangedReason::DnsTimedout;
        }
        source = cause.source();
    }

    if error.is_timeout() {
        ChangedReason::ConnectionTimedout
    } else {
        ChangedReason::UnrecoverableError
    }
}
