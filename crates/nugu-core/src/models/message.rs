//! 업스트림 메시지 요청 모델.
//!
//! 애플리케이션/에이전트가 만들고, 전송이 끝날 때까지 `Call`이 소유한다.
//! `message_id`/`dialog_request_id`는 타임아웃 관리와 응답 매칭의 키가 된다.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 메시지 헤더
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub dialog_request_id: String,
    pub message_id: String,
    pub name: String,
    pub namespace: String,
    pub version: String,
    #[serde(default)]
    pub referrer_dialog_request_id: String,
}

/// 새 메시지/대화 ID
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 이벤트 메시지 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMessageRequest {
    pub header: Header,
    /// 클라이언트 컨텍스트 (JSON 문자열)
    pub context: String,
    /// 이벤트 페이로드 (JSON 문자열)
    pub payload: String,
    /// 같은 `dialog_request_id`의 디렉티브 응답을 기다릴지 여부
    pub await_response: bool,
}

impl EventMessageRequest {
    pub fn builder(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> EventMessageRequestBuilder {
        EventMessageRequestBuilder {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            dialog_request_id: None,
            referrer_dialog_request_id: String::new(),
            context: "{}".to_string(),
            payload: "{}".to_string(),
            await_response: false,
        }
    }
}

/// [`EventMessageRequest`] 빌더
#[derive(Debug, Clone)]
pub struct EventMessageRequestBuilder {
    namespace: String,
    name: String,
    version: String,
    dialog_request_id: Option<String>,
    referrer_dialog_request_id: String,
    context: String,
    payload: String,
    await_response: bool,
}

impl EventMessageRequestBuilder {
    pub fn dialog_request_id(mut self, id: impl Into<String>) -> Self {
        self.dialog_request_id = Some(id.into());
        self
    }

    pub fn referrer_dialog_request_id(mut self, id: impl Into<String>) -> Self {
        self.referrer_dialog_request_id = id.into();
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn await_response(mut self, await_response: bool) -> Self {
        self.await_response = await_response;
        self
    }

    pub fn build(self) -> EventMessageRequest {
        EventMessageRequest {
            header: Header {
                dialog_request_id: self.dialog_request_id.unwrap_or_else(generate_id),
                message_id: generate_id(),
                name: self.name,
                namespace: self.namespace,
                version: self.version,
                referrer_dialog_request_id: self.referrer_dialog_request_id,
            },
            context: self.context,
            payload: self.payload,
            await_response: self.await_response,
        }
    }
}

/// 첨부(바이너리 청크) 메시지 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentMessageRequest {
    pub header: Header,
    /// 부모 이벤트의 message_id
    pub parent_message_id: String,
    pub seq: i32,
    pub is_end: bool,
    pub media_type: String,
    pub content: Vec<u8>,
}

impl AttachmentMessageRequest {
    /// 부모 이벤트 헤더를 이어받는 첨부 청크 생성
    pub fn new(
        parent: &Header,
        seq: i32,
        is_end: bool,
        media_type: impl Into<String>,
        content: Vec<u8>,
    ) -> Self {
        Self {
            header: Header {
                dialog_request_id: parent.dialog_request_id.clone(),
                message_id: generate_id(),
                name: parent.name.clone(),
                namespace: parent.namespace.clone(),
                version: parent.version.clone(),
                referrer_dialog_request_id: parent.referrer_dialog_request_id.clone(),
            },
            parent_message_id: parent.message_id.clone(),
            seq,
            is_end,
            media_type: media_type.into(),
            content,
        }
    }
}

/// 크래시 리포트 레벨
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrashLevel {
    Warn,
    Error,
}

/// 크래시 리포트 상세 항목
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReportDetail {
    pub level: CrashLevel,
    pub message: String,
}

/// 크래시 리포트 요청
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CrashReportMessageRequest {
    pub details: Vec<CrashReportDetail>,
}

/// 전송 가능한 메시지 요청
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRequest {
    Event(EventMessageRequest),
    Attachment(AttachmentMessageRequest),
    CrashReport(CrashReportMessageRequest),
}

impl MessageRequest {
    /// 헤더 (크래시 리포트에는 없음)
    pub fn header(&self) -> Option<&Header> {
        match self {
            MessageRequest::Event(event) => Some(&event.header),
            MessageRequest::Attachment(attachment) => Some(&attachment.header),
            MessageRequest::CrashReport(_) => None,
        }
    }

    /// 응답 디렉티브를 기다려야 하는 요청인지
    pub fn awaits_response(&self) -> bool {
        matches!(self, MessageRequest::Event(event) if event.await_response)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MessageRequest::Event(_) => "event",
            MessageRequest::Attachment(_) => "attachment",
            MessageRequest::CrashReport(_) => "crash_report",
        }
    }
}

impl From<EventMessageRequest> for MessageRequest {
    fn from(value: EventMessageRequest) -> Self {
        MessageRequest::Event(value)
    }
}

impl From<AttachmentMessageRequest> for MessageRequest {
    fn from(value: AttachmentMessageRequest) -> Self {
        MessageRequest::Attachment(value)
    }
}

impl From<CrashReportMessageRequest> for MessageRequest {
    fn from(value: CrashReportMessageRequest) -> Self {
        MessageRequest::CrashReport(value)
    }
}

/// 스트림에 실리는 업스트림 프레임
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upstream {
    Event(EventMessageRequest),
    Attachment(AttachmentMessageRequest),
}
