//! `devicegateway.VoiceService` Protobuf 메시지
//!
//! 빌드 시 protoc 의존성을 두지 않도록 prost derive로 직접 정의한다.
//! 필드 번호는 서버 .proto 정의와 일치해야 한다.

use nugu_core::models::directive::{
    AttachmentMessage as DomainAttachment, Directive as DomainDirective, Downstream as DomainDownstream,
};
use nugu_core::models::message::{
    AttachmentMessageRequest, CrashLevel, CrashReportMessageRequest, EventMessageRequest,
    Header as DomainHeader, Upstream as DomainUpstream,
};

pub const SERVICE: &str = "devicegateway.VoiceService";
pub const EVENTS_PATH: &str = "/devicegateway.VoiceService/Events";
pub const PING_PATH: &str = "/devicegateway.VoiceService/Ping";
pub const DIRECTIVES_PATH: &str = "/devicegateway.VoiceService/Directives";
pub const CRASH_REPORT_PATH: &str = "/devicegateway.VoiceService/CrashReport";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    #[prost(string, tag = "1")]
    pub namespace: String,
    #[prost(string, tag = "2")]
    pub name: String,
    #[prost(string, tag = "3")]
    pub message_id: String,
    #[prost(string, tag = "4")]
    pub dialog_request_id: String,
    #[prost(string, tag = "5")]
    pub version: String,
    #[prost(string, tag = "6")]
    pub referrer_dialog_request_id: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Event {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(string, tag = "2")]
    pub payload: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct EventMessage {
    #[prost(string, tag = "1")]
    pub context: String,
    #[prost(message, optional, tag = "2")]
    pub event: Option<Event>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Attachment {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(string, tag = "2")]
    pub parent_message_id: String,
    #[prost(int32, tag = "3")]
    pub seq: i32,
    #[prost(bool, tag = "4")]
    pub is_end: bool,
    #[prost(string, tag = "5")]
    pub media_type: String,
    #[prost(bytes = "vec", tag = "6")]
    pub content: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AttachmentMessage {
    #[prost(message, optional, tag = "1")]
    pub attachment: Option<Attachment>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Directive {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(string, tag = "2")]
    pub payload: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DirectiveMessage {
    #[prost(message, repeated, tag = "1")]
    pub directives: Vec<Directive>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Upstream {
    #[prost(oneof = "upstream::Message", tags = "1, 2")]
    pub message: Option<upstream::Message>,
}

pub mod upstream {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        EventMessage(super::EventMessage),
        #[prost(message, tag = "2")]
        AttachmentMessage(super::AttachmentMessage),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Downstream {
    #[prost(oneof = "downstream::Message", tags = "1, 2")]
    pub message: Option<downstream::Message>,
}

pub mod downstream {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Message {
        #[prost(message, tag = "1")]
        DirectiveMessage(super::DirectiveMessage),
        #[prost(message, tag = "2")]
        AttachmentMessage(super::AttachmentMessage),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PingResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DirectivesRequest {}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Level {
    Warn = 0,
    Error = 1,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CrashDetail {
    #[prost(enumeration = "Level", tag = "1")]
    pub level: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CrashReportRequest {
    #[prost(message, repeated, tag = "1")]
    pub detail: Vec<CrashDetail>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CrashReportResponse {}

impl From<&DomainHeader> for Header {
    fn from(header: &DomainHeader) -> Self {
        Self {
            namespace: header.namespace.clone(),
            name: header.name.clone(),
            message_id: header.message_id.clone(),
            dialog_request_id: header.dialog_request_id.clone(),
            version: header.version.clone(),
            referrer_dialog_request_id: header.referrer_dialog_request_id.clone(),
        }
    }
}

impl From<Header> for DomainHeader {
    fn from(header: Header) -> Self {
        Self {
            dialog_request_id: header.dialog_request_id,
            message_id: header.message_id,
            name: header.name,
            namespace: header.namespace,
            version: header.version,
            referrer_dialog_request_id: header.referrer_dialog_request_id,
        }
    }
}

impl From<&EventMessageRequest> for EventMessage {
    fn from(event: &EventMessageRequest) -> Self {
        Self {
            context: event.context.clone(),
            event: Some(Event {
                header: Some(Header::from(&event.header)),
                payload: event.payload.clone(),
            }),
        }
    }
}

impl From<&AttachmentMessageRequest> for AttachmentMessage {
    fn from(attachment: &AttachmentMessageRequest) -> Self {
        Self {
            attachment: Some(Attachment {
                header: Some(Header::from(&attachment.header)),
                parent_message_id: attachment.parent_message_id.clone(),
                seq: attachment.seq,
                is_end: attachment.is_end,
                media_type: attachment.media_type.clone(),
                content: attachment.content.clone(),
            }),
        }
    }
}

impl From<DomainUpstream> for Upstream {
    fn from(frame: DomainUpstream) -> Self {
        let message = match &frame {
            DomainUpstream::Event(event) => upstream::Message::EventMessage(event.into()),
            DomainUpstream::Attachment(attachment) => {
                upstream::Message::AttachmentMessage(attachment.into())
            }
        };
        Self {
            message: Some(message),
        }
    }
}

impl From<&CrashReportMessageRequest> for CrashReportRequest {
    fn from(request: &CrashReportMessageRequest) -> Self {
        Self {
            detail: request
                .details
                .iter()
                .map(|detail| CrashDetail {
                    level: match detail.level {
                        CrashLevel::Warn => Level::Warn as i32,
                        CrashLevel::Error => Level::Error as i32,
                    },
                    message: detail.message.clone(),
                })
                .collect(),
        }
    }
}

impl From<Attachment> for DomainAttachment {
    fn from(attachment: Attachment) -> Self {
        Self {
            header: attachment.header.map(Into::into).unwrap_or_default(),
            parent_message_id: attachment.parent_message_id,
            seq: attachment.seq,
            is_end: attachment.is_end,
            media_type: attachment.media_type,
            content: attachment.content,
        }
    }
}

impl Downstream {
    /// 도메인 프레임으로 변환. 내용 없는 프레임은 `None`.
    pub fn into_domain(self) -> Option<DomainDownstream> {
        match self.message? {
            downstream::Message::DirectiveMessage(message) => {
                let directives = message
                    .directives
                    .into_iter()
                    .map(|directive| DomainDirective {
                        header: directive.header.map(Into::into).unwrap_or_default(),
                        payload: directive.payload,
                    })
                    .collect();
                Some(DomainDownstream::Directives(directives))
            }
            downstream::Message::AttachmentMessage(message) => message
                .attachment
                .map(|attachment| DomainDownstream::Attachment(attachment.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nugu_core::models::message::CrashReportDetail;
    use prost::Message;

    #[test]
    fn event_frame_carries_context_and_header() {
        let event = EventMessageRequest::builder("Text", "TextInput", "1.0")
            .dialog_request_id("dialog-1")
            .build();

        let frame = Upstream::from(DomainUpstream::Event(event.clone()));
        let decoded = Upstream::decode(frame.encode_to_vec().as_slice()).unwrap();

        let Some(upstream::Message::EventMessage(message)) = decoded.message else {
            panic!("expected event message");
        };
        assert_eq!(message.context, event.context);
        let header = message.event.unwrap().header.unwrap();
        assert_eq!(header.dialog_request_id, "dialog-1");
        assert_eq!(header.namespace, "Text");
    }

    #[test]
    fn directive_batch_converts_to_domain() {
        let frame = Downstream {
            message: Some(downstream::Message::DirectiveMessage(DirectiveMessage {
                directives: vec![Directive {
                    header: Some(Header {
                        namespace: "TTS".to_string(),
                        name: "Speak".to_string(),
                        dialog_request_id: "dialog-1".to_string(),
                        ..Default::default()
                    }),
                    payload: "{}".to_string(),
                }],
            })),
        };

        let Some(DomainDownstream::Directives(directives)) = frame.into_domain() else {
            panic!("expected directives");
        };
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].header.dialog_request_id, "dialog-1");
    }

    #[test]
    fn empty_downstream_is_skipped() {
        assert!(Downstream::default().into_domain().is_none());
        let empty_attachment = Downstream {
            message: Some(downstream::Message::AttachmentMessage(AttachmentMessage {
                attachment: None,
            })),
        };
        assert!(empty_attachment.into_domain().is_none());
    }

    #[test]
    fn crash_levels_use_wire_values() {
        let request = CrashReportMessageRequest {
            details: vec![
                CrashReportDetail {
                    level: CrashLevel::Warn,
                    message: "low memory".to_string(),
                },
                CrashReportDetail {
                    level: CrashLevel::Error,
                    message: "panic".to_string(),
                },
            ],
        };

        let wire = CrashReportRequest::from(&request);
        assert_eq!(wire.detail[0].level, 0);
        assert_eq!(wire.detail[1].level, 1);
    }
}
