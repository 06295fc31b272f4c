//! 인증 제공자 포트.
//!
//! OAuth 흐름과 토큰 저장은 이 SDK 범위 밖이다.
//! 전송 계층은 "토큰을 달라", "토큰이 거부되었다" 두 가지만 요구한다.

/// 인증 제공자
pub trait AuthDelegate: Send + Sync {
    /// 현재 Authorization 헤더 값 (예: `"Bearer <token>"`)
    ///
    /// 비어 있거나 `None`이면 INVALID_AUTH로 처리된다 (예외가 아님).
    fn authorization(&self) -> Option<String>;

    /// 서버가 토큰을 거부했음을 알림
    fn on_authorization_invalid(&self) {}
}

/// 인증 값이 실제로 사용할 수 있는 값인지
pub fn usable_authorization(delegate: &dyn AuthDelegate) -> Option<String> {
    delegate
        .authorization()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty() && value != "Bearer")
}

/// 고정 토큰 제공자 (CLI, 테스트용)
#[derive(Debug, Clone)]
pub struct StaticAuthDelegate {
    authorization: Option<String>,
}

impl StaticAuthDelegate {
    /// 토큰으로 생성 (`Bearer ` 접두사가 없으면 붙인다)
    pub fn new(token: &str) -> Self {
        let token = token.trim();
        let authorization = if token.is_empty() {
            None
        } else if token.starts_with("Bearer ") {
            Some(token.to_string())
        } else {
            Some(format!("Bearer {token}"))
        };
        Self { authorization }
    }
}

impl AuthDelegate for StaticAuthDelegate {
    fn authorization(&self) -> Option<String> {
        self.authorization.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_delegate_adds_bearer_prefix() {
        let auth = StaticAuthDelegate::new("abc");
        assert_eq!(auth.authorization().as_deref(), Some("Bearer abc"));

        let auth = StaticAuthDelegate::new("Bearer xyz");
        assert_eq!(auth.authorization().as_deref(), Some("Bearer xyz"));
    }

    #[test]
    fn blank_token_is_not_usable() {
        assert!(usable_authorization(&StaticAuthDelegate::new("   ")).is_none());
        assert!(usable_authorization(&StaticAuthDelegate::new("tok")).is_some());
    }
}
