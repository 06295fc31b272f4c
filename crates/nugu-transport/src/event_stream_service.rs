//! 양방향 이벤트 스트림.
//!
//! 업스트림(이벤트/첨부)을 스트림에 싣고, 다운스트림 프레임을 분류해
//! `MessageConsumer`로 넘긴다. 스트림 종료/에러는 정확히 한 번 보고한다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use nugu_core::models::directive::{Downstream, UNAUTHORIZED_REQUEST_MARKER};
use nugu_core::models::message::Upstream;
use nugu_core::models::status::GatewayStatus;
use nugu_core::ports::consumer::MessageConsumer;
use nugu_core::ports::gateway::{DownstreamStream, GatewayChannel};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::service_event::{ServiceEventSender, ServiceSource};

/// 업스트림 버퍼 크기
const UPSTREAM_BUFFER: usize = 64;

/// 다운스트림 프레임 하나를 소비자에게 전달
///
/// 인증 실패 표식이 있는 디렉티브 묶음은 전달하지 않고 `UNAUTHENTICATED`로 돌려준다.
pub(crate) fn deliver(
    frame: Downstream,
    consumer: &dyn MessageConsumer,
) -> Result<(), GatewayStatus> {
    if frame.is_unauthorized() {
        return Err(GatewayStatus::unauthenticated(UNAUTHORIZED_REQUEST_MARKER));
    }

    match frame {
        Downstream::Directives(directives) => {
            if directives.is_empty() {
                trace!("빈 디렉티브 묶음");
            } else {
                debug!(count = directives.len(), "디렉티브 수신");
                consumer.consume_directives(directives);
            }
        }
        Downstream::Attachment(attachment) => {
            if attachment.content.is_empty() {
                trace!(seq = attachment.seq, "빈 첨부 무시");
            } else {
                consumer.consume_attachment(attachment);
            }
        }
    }
    Ok(())
}

/// 스트림이 끝날 때까지 읽고 종료 사유를 돌려준다
async fn read_until_closed(
    mut stream: DownstreamStream,
    consumer: &dyn MessageConsumer,
) -> GatewayStatus {
    loop {
        match stream.next().await {
            Some(Ok(frame)) => {
                if let Err(status) = deliver(frame, consumer) {
                    return status;
                }
            }
            Some(Err(status)) => return status,
            None => return GatewayStatus::unavailable("server closed event stream"),
        }
    }
}

/// 이벤트 스트림 서비스
pub struct EventStreamService {
    sender: Mutex<Option<mpsc::Sender<Upstream>>>,
    completed: Arc<AtomicBool>,
    shutdown: AtomicBool,
    task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl EventStreamService {
    /// 스트림 열기 + 수신 루프 시작
    pub fn start(
        channel: Arc<dyn GatewayChannel>,
        consumer: Arc<dyn MessageConsumer>,
        events: ServiceEventSender,
    ) -> Self {
        let (tx, rx) = mpsc::channel(UPSTREAM_BUFFER);
        let completed = Arc::new(AtomicBool::new(false));

        let task = {
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                let status = match channel.open_event_stream(rx).await {
                    Ok(stream) => {
                        debug!("이벤트 스트림 열림");
                        read_until_closed(stream, consumer.as_ref()).await
                    }
                    Err(status) => status,
                };

                if !completed.swap(true, Ordering::SeqCst) {
                    warn!("이벤트 스트림 종료: {status}");
                    events.error(ServiceSource::EventStream, status);
                }
            })
        };

        Self {
            sender: Mutex::new(Some(tx)),
            completed,
            shutdown: AtomicBool::new(false),
            task: parking_lot::Mutex::new(Some(task)),
        }
    }

    /// 업스트림 전송
    ///
    /// 스트림이 이미 끝났으면 `FAILED_PRECONDITION`.
    pub async fn send(&self, message: Upstream) -> Result<(), GatewayStatus> {
        if self.is_completed() {
            return Err(GatewayStatus::failed_precondition("stream already completed"));
        }

        // 한 스트림에 대한 쓰기는 직렬화
        let sender = self.sender.lock().await;
        let Some(tx) = sender.as_ref() else {
            return Err(GatewayStatus::failed_precondition("stream already completed"));
        };
        tx.send(message)
            .await
            .map_err(|_| GatewayStatus::failed_precondition("stream already completed"))
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// 종료 (멱등). 이후 에러 보고는 없다.
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("이벤트 스트림 서비스 이미 종료됨");
            return;
        }
        self.completed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if let Ok(mut sender) = self.sender.try_lock() {
            sender.take();
        }
        debug!("이벤트 스트림 서비스 종료");
    }
}

impl Drop for EventStreamService {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_event::ServiceEventKind;
    use crate::testing::{attachment, directive, next_event, FakeChannel, RecordingConsumer};
    use nugu_core::models::message::EventMessageRequest;
    use nugu_core::models::status::StatusCode;
    use std::time::Duration;

    fn start(
        channel: &Arc<FakeChannel>,
        consumer: &Arc<RecordingConsumer>,
    ) -> (EventStreamService, mpsc::UnboundedReceiver<crate::service_event::ServiceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = EventStreamService::start(
            channel.clone(),
            consumer.clone(),
            ServiceEventSender::new(7, tx),
        );
        (service, rx)
    }

    #[tokio::test]
    async fn directives_are_delivered_as_one_batch() {
        let channel = FakeChannel::new();
        let consumer = Arc::new(RecordingConsumer::default());
        let (service, _rx) = start(&channel, &consumer);
        channel.wait_stream_open().await;

        channel.push(Ok(Downstream::Directives(vec![
            directive("d1", "{}"),
            directive("d1", r#"{"token":"a"}"#),
        ])));
        channel.push(Ok(Downstream::Directives(vec![])));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let batches = consumer.directives.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        drop(batches);
        service.shutdown();
    }

    #[tokio::test]
    async fn empty_attachments_are_dropped() {
        let channel = FakeChannel::new();
        let consumer = Arc::new(RecordingConsumer::default());
        let (service, _rx) = start(&channel, &consumer);
        channel.wait_stream_open().await;

        channel.push(Ok(Downstream::Attachment(attachment(b""))));
        channel.push(Ok(Downstream::Attachment(attachment(b"audio"))));
        tokio::time::sleep(Duration::from_millis(30)).await;

        let attachments = consumer.attachments.lock();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].content, b"audio".to_vec());
        drop(attachments);
        service.shutdown();
    }

    #[tokio::test]
    async fn unauthorized_marker_surfaces_as_auth_error() {
        let channel = FakeChannel::new();
        let consumer = Arc::new(RecordingConsumer::default());
        let (_service, mut rx) = start(&channel, &consumer);
        channel.wait_stream_open().await;

        channel.push(Ok(Downstream::Directives(vec![directive(
            "d1",
            r#"{"description":"Unauthorized request"}"#,
        )])));

        let event = next_event(&mut rx).await;
        assert_eq!(event.generation, 7);
        match event.kind {
            ServiceEventKind::Error { source, status } => {
                assert_eq!(source, ServiceSource::EventStream);
                assert_eq!(status.code, StatusCode::Unauthenticated);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(consumer.directives.lock().is_empty());
    }

    #[tokio::test]
    async fn completion_is_reported_once_and_blocks_sends() {
        let channel = FakeChannel::new();
        let consumer = Arc::new(RecordingConsumer::default());
        let (service, mut rx) = start(&channel, &consumer);
        channel.wait_stream_open().await;

        channel.close_downstream();
        match next_event(&mut rx).await.kind {
            ServiceEventKind::Error { status, .. } => {
                assert_eq!(status.code, StatusCode::Unavailable)
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event = EventMessageRequest::builder("Text", "TextInput", "1.0").build();
        let result = service.send(Upstream::Event(event)).await;
        assert_eq!(result.unwrap_err().code, StatusCode::FailedPrecondition);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sends_reach_the_stream_in_order() {
        let channel = FakeChannel::new();
        let consumer = Arc::new(RecordingConsumer::default());
        let (service, _rx) = start(&channel, &consumer);
        channel.wait_stream_open().await;

        let first = EventMessageRequest::builder("Text", "TextInput", "1.0").build();
        let second = EventMessageRequest::builder("System", "SynchronizeState", "1.0").build();
        service.send(Upstream::Event(first.clone())).await.unwrap();
        service.send(Upstream::Event(second.clone())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(
            *channel.upstream.lock(),
            vec![Upstream::Event(first), Upstream::Event(second)]
        );
        service.shutdown();
    }

    #[tokio::test]
    async fn shutdown_twice_is_a_no_op() {
        let channel = FakeChannel::new();
        let consumer = Arc::new(RecordingConsumer::default());
        let (service, mut rx) = start(&channel, &consumer);
        channel.wait_stream_open().await;

        service.shutdown();
        service.shutdown();
        channel.close_downstream();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(service.is_completed());
    }
}
