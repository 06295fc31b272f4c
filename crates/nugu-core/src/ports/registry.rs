//! 정책 레지스트리 포트.
//!
//! 구현: `nugu-transport::registry_client::RegistryClient` (reqwest)

use async_trait::async_trait;
use thiserror::Error;

use crate::models::policy::Policy;
use crate::models::state::ChangedReason;

/// 정책 획득 실패
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// 실패: `reason`으로 분류됨
    #[error("정책 획득 실패 ({reason}): {message}")]
    Failed {
        reason: ChangedReason,
        message: String,
    },

    /// 진행 중 요청이 disconnect로 취소됨
    #[error("정책 요청 취소됨")]
    Cancelled,

    /// shutdown 이후 호출 (무시)
    #[error("레지스트리 클라이언트 종료됨")]
    Shutdown,
}

impl RegistryError {
    pub fn failed(reason: ChangedReason, message: impl Into<String>) -> Self {
        RegistryError::Failed {
            reason,
            message: message.into(),
        }
    }

    /// 상태 머신에 반영할 사유 (취소/종료는 `None`)
    pub fn reason(&self) -> Option<ChangedReason> {
        match self {
            RegistryError::Failed { reason, .. } => Some(*reason),
            RegistryError::Cancelled | RegistryError::Shutdown => None,
        }
    }
}

/// 라우팅/헬스 체크 정책 공급자
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// 디바이스 정책 조회
    ///
    /// `authorization`은 Authorization 헤더 값 그대로.
    async fn get_policy(&self, authorization: &str) -> Result<Policy, RegistryError>;

    /// 진행 중 요청 취소
    fn disconnect(&self);

    /// 이후 호출을 모두 무시하도록 종료 (멱등)
    fn shutdown(&self);
}
