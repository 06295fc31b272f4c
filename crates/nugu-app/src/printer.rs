//! 연결 상태와 수신 메시지를 콘솔에 출력

use nugu_core::models::directive::{AttachmentMessage, Directive};
use nugu_core::models::state::{ChangedReason, ConnectionStatus};
use nugu_core::ports::consumer::MessageConsumer;
use nugu_core::ports::status_listener::ConnectionStatusListener;
use tracing::info;

pub struct ConsolePrinter;

impl ConsolePrinter {
    fn describe(directive: &Directive) -> String {
        let header = directive.header();
        format!(
            "{}.{} (dialog={}) {}",
            header.namespace, header.name, header.dialog_request_id, directive.payload
        )
    }
}

impl ConnectionStatusListener for ConsolePrinter {
    fn on_connection_status_changed(&self, status: ConnectionStatus, reason: ChangedReason) {
        println!("[status] {status} ({reason})");
    }
}

impl MessageConsumer for ConsolePrinter {
    fn consume_directives(&self, directives: Vec<Directive>) {
        info!(count = directives.len(), "디렉티브 수신");
        for directive in &directives {
            println!("[directive] {}", Self::describe(directive));
        }
    }

    fn consume_attachment(&self, attachment: AttachmentMessage) {
        println!(
            "[attachment] parent={} seq={} end={} {} bytes",
            attachment.parent_message_id,
            attachment.seq,
            attachment.is_end,
            attachment.content.len()
        );
    }
}
