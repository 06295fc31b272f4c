//! 다운스트림(서버 → 디바이스) 메시지 모델.

use serde::{Deserialize, Serialize};

use super::message::Header;

/// 인증되지 않은 요청을 알리는 디렉티브 페이로드 표식
pub const UNAUTHORIZED_REQUEST_MARKER: &str = "Unauthorized request";

/// 서버가 내려보낸 명령
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Directive {
    pub header: Header,
    /// 디렉티브 페이로드 (JSON 문자열)
    pub payload: String,
}

impl Directive {
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// 페이로드에 인증 실패 표식이 있는지
    pub fn is_unauthorized(&self) -> bool {
        self.payload
            .to_ascii_lowercase()
            .contains(&UNAUTHORIZED_REQUEST_MARKER.to_ascii_lowercase())
    }
}

/// 서버가 내려보낸 첨부 청크
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMessage {
    pub header: Header,
    pub parent_message_id: String,
    pub seq: i32,
    pub is_end: bool,
    pub media_type: String,
    pub content: Vec<u8>,
}

/// 스트림에서 수신한 다운스트림 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Downstream {
    /// 디렉티브 묶음 (원자적으로 한 번에 전달)
    Directives(Vec<Directive>),
    /// 첨부 청크
    Attachment(AttachmentMessage),
}

impl Downstream {
    /// 묶음 안에 인증 실패 표식이 있는지
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Downstream::Directives(directives) => directives.iter().any(Directive::is_unauthorized),
            Downstream::Attachment(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(payload: &str) -> Directive {
        Directive {
            header: Header {
                namespace: "System".to_string(),
                name: "Exception".to_string(),
                ..Default::default()
            },
            payload: payload.to_string(),
        }
    }

    #[test]
    fn detects_unauthorized_marker_case_insensitively() {
        let frame = Downstream::Directives(vec![
            directive(r#"{"code":"OK"}"#),
            directive(r#"{"code":"UNAUTHORIZED_REQUEST_EXCEPTION","description":"unauthorized request"}"#),
        ]);
        assert!(frame.is_unauthorized());
    }

    #[test]
    fn plain_directives_are_not_unauthorized() {
        let frame = Downstream::Directives(vec![directive(r#"{"text":"hello"}"#)]);
        assert!(!frame.is_unauthorized());
    }
}
