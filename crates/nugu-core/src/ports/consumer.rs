//! 다운스트림 메시지 소비자 포트.

use crate::models::directive::{AttachmentMessage, Directive};

/// 애플리케이션 측 메시지 소비자
///
/// 스트림 콜백 태스크에서 호출되므로 오래 블로킹하면 안 된다.
pub trait MessageConsumer: Send + Sync {
    /// 디렉티브 묶음 (한 프레임의 디렉티브를 한 번에 전달)
    fn consume_directives(&self, directives: Vec<Directive>);

    /// 비어 있지 않은 첨부 청크
    fn consume_attachment(&self, attachment: AttachmentMessage);
}
