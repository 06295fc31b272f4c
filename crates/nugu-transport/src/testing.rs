//! 테스트용 가짜 커넥터/채널/정책 공급자/협력자.
//!
//! 크레이트 단위 테스트와 `test-util` feature를 켠 통합 테스트가 함께 쓴다.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use nugu_core::models::directive::{AttachmentMessage, Directive, Downstream};
use nugu_core::models::message::{CrashReportMessageRequest, Header, Upstream};
use nugu_core::models::policy::{Policy, ServerPolicy};
use nugu_core::models::state::{ChangedReason, ConnectionStatus};
use nugu_core::models::status::GatewayStatus;
use nugu_core::ports::auth::AuthDelegate;
use nugu_core::ports::consumer::MessageConsumer;
use nugu_core::ports::gateway::{DownstreamStream, GatewayChannel, GatewayConnector};
use nugu_core::ports::registry::{PolicySource, RegistryError};
use nugu_core::ports::status_listener::ConnectionStatusListener;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::service_event::ServiceEvent;

type DownstreamSender = mpsc::UnboundedSender<Result<Downstream, GatewayStatus>>;

#[derive(Default)]
pub struct FakeChannel {
    ping_results: Mutex<VecDeque<Result<(), GatewayStatus>>>,
    pub pings: AtomicUsize,
    downstream: Mutex<Option<DownstreamSender>>,
    pub upstream: Arc<Mutex<Vec<Upstream>>>,
    pub unary: Mutex<Vec<Upstream>>,
    crash_result: Mutex<Option<GatewayStatus>>,
    crash_delay: Mutex<Duration>,
    pub shutdowns: AtomicUsize,
}

impl FakeChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 다음 Ping 결과들 (소진되면 성공)
    pub fn script_pings(&self, results: impl IntoIterator<Item = Result<(), GatewayStatus>>) {
        self.ping_results.lock().extend(results);
    }

    pub fn fail_crash_reports(&self, status: GatewayStatus) {
        *self.crash_result.lock() = Some(status);
    }

    pub fn delay_crash_reports(&self, delay: Duration) {
        *self.crash_delay.lock() = delay;
    }

    /// 열린 다운스트림에 프레임 전달
    pub fn push(&self, frame: Result<Downstream, GatewayStatus>) -> bool {
        match self.downstream.lock().as_ref() {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// 서버 측 정상 종료
    pub fn close_downstream(&self) {
        self.downstream.lock().take();
    }

    pub async fn wait_stream_open(&self) {
        for _ in 0..200 {
            if self.downstream.lock().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("downstream was never opened");
    }

    fn open_downstream(&self) -> DownstreamStream {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.downstream.lock() = Some(tx);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

#[async_trait]
impl GatewayChannel for FakeChannel {
    async fn ping(&self, _timeout: Duration) -> Result<(), GatewayStatus> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let next = self.ping_results.lock().pop_front();
        next.unwrap_or(Ok(()))
    }

    async fn open_event_stream(
        &self,
        mut upstream: mpsc::Receiver<Upstream>,
    ) -> Result<DownstreamStream, GatewayStatus> {
        let recorded = Arc::clone(&self.upstream);
        tokio::spawn(async move {
            while let Some(message) = upstream.recv().await {
                recorded.lock().push(message);
            }
        });
        Ok(self.open_downstream())
    }

    async fn open_directive_stream(&self) -> Result<DownstreamStream, GatewayStatus> {
        Ok(self.open_downstream())
    }

    async fn send_unary(&self, message: Upstream) -> Result<(), GatewayStatus> {
        self.unary.lock().push(message);
        Ok(())
    }

    async fn send_crash_report(
        &self,
        _request: &CrashReportMessageRequest,
        _deadline: Duration,
    ) -> Result<(), GatewayStatus> {
        let delay = *self.crash_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self.crash_result.lock().clone();
        match failure {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.close_downstream();
    }
}

/// 채널을 차례로 만들어 주는 가짜 커넥터
#[derive(Default)]
pub struct FakeConnector {
    failures: Mutex<VecDeque<Option<GatewayStatus>>>,
    ping_scripts: Mutex<VecDeque<Vec<Result<(), GatewayStatus>>>>,
    always_fail: Mutex<Option<GatewayStatus>>,
    pub opened: Mutex<Vec<ServerPolicy>>,
    pub channels: Mutex<Vec<Arc<FakeChannel>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 다음 open 결과 (`None`이면 성공)
    pub fn script_open(&self, results: impl IntoIterator<Item = Option<GatewayStatus>>) {
        self.failures.lock().extend(results);
    }

    pub fn fail_always(&self, status: GatewayStatus) {
        *self.always_fail.lock() = Some(status);
    }

    /// 다음에 열리는 채널의 Ping 결과
    pub fn script_channel_pings(&self, results: Vec<Result<(), GatewayStatus>>) {
        self.ping_scripts.lock().push_back(results);
    }

    pub fn open_count(&self) -> usize {
        self.opened.lock().len()
    }

    pub fn last_channel(&self) -> Option<Arc<FakeChannel>> {
        self.channels.lock().last().cloned()
    }
}

#[async_trait]
impl GatewayConnector for FakeConnector {
    async fn open(
        &self,
        policy: &ServerPolicy,
        _authorization: &str,
    ) -> Result<Arc<dyn GatewayChannel>, GatewayStatus> {
        self.opened.lock().push(policy.clone());

        if let Some(status) = self.always_fail.lock().clone() {
            return Err(status);
        }
        if let Some(Some(status)) = self.failures.lock().pop_front() {
            return Err(status);
        }

        let channel = FakeChannel::new();
        if let Some(script) = self.ping_scripts.lock().pop_front() {
            channel.script_pings(script);
        }
        self.channels.lock().push(Arc::clone(&channel));
        Ok(channel as Arc<dyn GatewayChannel>)
    }
}

/// 정해진 결과를 돌려주는 정책 공급자. 결과가 없으면 응답하지 않는다.
#[derive(Default)]
pub struct FakePolicySource {
    result: Mutex<Option<Result<Policy, RegistryError>>>,
    calls: AtomicUsize,
    disconnects: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl FakePolicySource {
    pub fn pending() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn returning(result: Result<Policy, RegistryError>) -> Arc<Self> {
        let source = Self::default();
        *source.result.lock() = Some(result);
        Arc::new(source)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PolicySource for FakePolicySource {
    async fn get_policy(&self, _authorization: &str) -> Result<Policy, RegistryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.result.lock().clone();
        match result {
            Some(result) => result,
            None => futures::future::pending().await,
        }
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// 고정 토큰을 돌려주고 무효 통지 횟수를 센다
pub struct FakeAuth {
    token: Option<String>,
    invalidated: AtomicUsize,
}

impl FakeAuth {
    pub fn new(token: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            token: token.map(str::to_string),
            invalidated: AtomicUsize::new(0),
        })
    }

    pub fn invalidated(&self) -> usize {
        self.invalidated.load(Ordering::SeqCst)
    }
}

impl AuthDelegate for FakeAuth {
    fn authorization(&self) -> Option<String> {
        self.token.clone()
    }

    fn on_authorization_invalid(&self) {
        self.invalidated.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingConsumer {
    pub directives: Mutex<Vec<Vec<Directive>>>,
    pub attachments: Mutex<Vec<AttachmentMessage>>,
}

impl MessageConsumer for RecordingConsumer {
    fn consume_directives(&self, directives: Vec<Directive>) {
        self.directives.lock().push(directives);
    }

    fn consume_attachment(&self, attachment: AttachmentMessage) {
        self.attachments.lock().push(attachment);
    }
}

#[derive(Default)]
pub struct StatusRecorder {
    pub seen: Mutex<Vec<(ConnectionStatus, ChangedReason)>>,
}

impl ConnectionStatusListener for StatusRecorder {
    fn on_connection_status_changed(&self, status: ConnectionStatus, reason: ChangedReason) {
        self.seen.lock().push((status, reason));
    }
}

pub fn directive(dialog_request_id: &str, payload: &str) -> Directive {
    Directive {
        header: Header {
            dialog_request_id: dialog_request_id.to_string(),
            message_id: format!("msg-{dialog_request_id}"),
            name: "Speak".to_string(),
            namespace: "TTS".to_string(),
            version: "1.0".to_string(),
            referrer_dialog_request_id: String::new(),
        },
        payload: payload.to_string(),
    }
}

pub fn attachment(content: &[u8]) -> AttachmentMessage {
    AttachmentMessage {
        header: directive("dialog-1", "{}").header,
        parent_message_id: "msg-dialog-1".to_string(),
        seq: 0,
        is_end: true,
        media_type: "audio/mpeg".to_string(),
        content: content.to_vec(),
    }
}

/// 다음 서비스 이벤트 (1초 안에 없으면 실패)
pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<ServiceEvent>) -> ServiceEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for service event")
        .expect("service event channel closed")
}
