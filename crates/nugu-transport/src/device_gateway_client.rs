//! 연결 단위 DeviceGateway 클라이언트.
//!
//! 채널 하나와 그 위의 Ping/스트림/크래시 리포트 서비스를 묶고,
//! 서버 정책 후보를 앞에서부터 소비한다. 하위 서비스의 에러는 모두
//! 이벤트 루프 하나로 모여 사유 분류 → 관찰자 통지 → BackOff 재연결로 처리된다.
//!
//! 채널을 새로 열거나 내릴 때마다 세대(generation)가 바뀌며,
//! 이전 세대 서비스가 늦게 보낸 이벤트는 버린다.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use nugu_core::config::{BackoffConfig, StreamMode, TransportConfig};
use nugu_core::models::message::{MessageRequest, Upstream};
use nugu_core::models::policy::{HealthCheckPolicy, Policy, ServerPolicy};
use nugu_core::models::state::ChangedReason;
use nugu_core::models::status::{GatewayStatus, StatusCode};
use nugu_core::ports::auth::{usable_authorization, AuthDelegate};
use nugu_core::ports::consumer::MessageConsumer;
use nugu_core::ports::gateway::{GatewayChannel, GatewayConnector};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::backoff::{BackOff, BackOffObserver, BackoffError};
use crate::crash_report_service::CrashReportService;
use crate::directives_service::DirectivesService;
use crate::event_stream_service::EventStreamService;
use crate::ping_service::PingService;
use crate::reason::classify;
use crate::service_event::{ServiceEvent, ServiceEventKind, ServiceEventSender, ServiceSource};

/// 상위(Transport)로 보내는 연결 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    /// 첫 Ping 응답: 연결 확립
    Connected,
    /// BackOff 지연 후 `attempt`번째 재연결 시작
    Retrying(u32),
    /// 재시도 가능한 실패, 내부적으로 재연결 중
    Reconnecting(ChangedReason),
    /// 더 이상 스스로 복구하지 않는 실패
    Error(ChangedReason),
}

/// 연결 이벤트 수신자
pub type GatewayObserver = Arc<dyn Fn(GatewayEvent) + Send + Sync>;

/// 외부 협력자 묶음
#[derive(Clone)]
pub struct GatewayDeps {
    pub connector: Arc<dyn GatewayConnector>,
    pub auth: Arc<dyn AuthDelegate>,
    pub consumer: Arc<dyn MessageConsumer>,
}

/// 연결 단위 설정
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayClientConfig {
    pub stream_mode: StreamMode,
    pub directives_watchdog: Duration,
    pub crash_report_deadline: Duration,
    pub backoff: BackoffConfig,
}

impl From<&TransportConfig> for GatewayClientConfig {
    fn from(config: &TransportConfig) -> Self {
        Self {
            stream_mode: config.stream_mode,
            directives_watchdog: config.directives_watchdog(),
            crash_report_deadline: config.crash_report_deadline(),
            backoff: config.backoff.clone(),
        }
    }
}

enum StreamService {
    Events(EventStreamService),
    Directives(DirectivesService),
}

impl StreamService {
    async fn send(&self, message: Upstream) -> Result<(), GatewayStatus> {
        match self {
            StreamService::Events(service) => service.send(message).await,
            StreamService::Directives(service) => service.send(message).await,
        }
    }

    fn shutdown(&self) {
        match self {
            StreamService::Events(service) => service.shutdown(),
            StreamService::Directives(service) => service.shutdown(),
        }
    }
}

struct Services {
    channel: Arc<dyn GatewayChannel>,
    ping: PingService,
    stream: Arc<StreamService>,
    crash: Arc<CrashReportService>,
}

impl Services {
    /// ping → stream → crash → channel 순서로 종료
    fn shutdown(self) {
        self.ping.shutdown();
        self.stream.shutdown();
        self.crash.shutdown();
        self.channel.shutdown();
    }
}

/// BackOff 결과를 이벤트 루프로 넘긴다
struct RetryObserver(ServiceEventSender);

impl BackOffObserver for RetryObserver {
    fn on_retry(&self, attempt: u32) {
        self.0.retry_tick(attempt);
    }

    fn on_error(&self, error: BackoffError) {
        match error {
            BackoffError::MaxAttemptExceed => self.0.backoff_exhausted(),
            BackoffError::Shutdown => {}
        }
    }
}

struct Inner {
    deps: GatewayDeps,
    config: GatewayClientConfig,
    observer: GatewayObserver,
    health_check: HealthCheckPolicy,
    policies: Mutex<VecDeque<ServerPolicy>>,
    current_policy: Mutex<Option<ServerPolicy>>,
    backoff: Arc<BackOff>,
    connected: AtomicBool,
    shutdown: AtomicBool,
    generation: AtomicU64,
    services: Mutex<Option<Services>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
    events_tx: mpsc::UnboundedSender<ServiceEvent>,
}

impl Inner {
    fn emit(&self, event: GatewayEvent) {
        (self.observer)(event);
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn next_policy(&self) -> Option<ServerPolicy> {
        self.policies.lock().pop_front()
    }

    fn connect(self: &Arc<Self>) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            warn!("종료된 DeviceGateway 클라이언트에 connect 요청");
            return false;
        }
        if self.connected.load(Ordering::SeqCst) {
            debug!("DeviceGateway 이미 연결됨");
            return false;
        }

        self.cancel_retry();
        let Some(policy) = self.next_policy() else {
            warn!("남은 서버 정책 없음");
            self.emit(GatewayEvent::Error(ChangedReason::UnrecoverableError));
            return false;
        };

        self.backoff.reset_with_limit(policy.retry_count_limit);
        self.begin_connect(policy);
        true
    }

    /// 기존 서비스를 내리고 새 세대로 채널 열기 시작
    fn begin_connect(self: &Arc<Self>, policy: ServerPolicy) {
        let generation = self.teardown();
        info!(
            server = %policy.authority(),
            protocol = %policy.protocol,
            generation,
            "DeviceGateway 연결 시도"
        );
        *self.current_policy.lock() = Some(policy.clone());

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.open(policy, generation).await;
        });
    }

    async fn open(self: Arc<Self>, policy: ServerPolicy, generation: u64) {
        let events = ServiceEventSender::new(generation, self.events_tx.clone());

        let Some(authorization) = usable_authorization(self.deps.auth.as_ref()) else {
            events.error(
                ServiceSource::Channel,
                GatewayStatus::unauthenticated("authorization is blank"),
            );
            return;
        };

        let timeout = policy.connection_timeout();
        let channel = match tokio::time::timeout(
            timeout,
            self.deps.connector.open(&policy, &authorization),
        )
        .await
        {
            Ok(Ok(channel)) => channel,
            Ok(Err(status)) => {
                events.error(ServiceSource::Channel, status);
                return;
            }
            Err(_) => {
                events.error(
                    ServiceSource::Channel,
                    GatewayStatus::deadline_exceeded(format!(
                        "connection timed out after {}s",
                        timeout.as_secs()
                    )),
                );
                return;
            }
        };

        let mut services = self.services.lock();
        if self.current_generation() != generation || self.shutdown.load(Ordering::SeqCst) {
            debug!(generation, "오래된 채널 폐기");
            channel.shutdown();
            return;
        }

        let ping = PingService::start(Arc::clone(&channel), &self.health_check, events.clone());
        let stream = match self.config.stream_mode {
            StreamMode::Bidirectional => StreamService::Events(EventStreamService::start(
                Arc::clone(&channel),
                Arc::clone(&self.deps.consumer),
                events.clone(),
            )),
            StreamMode::DirectivesOnly => StreamService::Directives(DirectivesService::start(
                Arc::clone(&channel),
                Arc::clone(&self.deps.consumer),
                events.clone(),
                self.config.directives_watchdog,
            )),
        };
        let crash = CrashReportService::new(Arc::clone(&channel), self.config.crash_report_deadline);

        *services = Some(Services {
            channel,
            ping,
            stream: Arc::new(stream),
            crash: Arc::new(crash),
        });
        debug!(generation, "채널 열림, Ping 응답 대기");
    }

    /// 현재 서비스 종료 + 세대 증가. 새 세대 번호를 돌려준다.
    fn teardown(&self) -> u64 {
        let (services, generation) = {
            let mut guard = self.services.lock();
            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            (guard.take(), generation)
        };
        if let Some(services) = services {
            services.shutdown();
        }
        generation
    }

    fn cancel_retry(&self) {
        if let Some(task) = self.retry_task.lock().take() {
            task.abort();
        }
    }

    fn handle_event(self: &Arc<Self>, event: ServiceEvent) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if event.generation != self.current_generation() {
            trace!(
                generation = event.generation,
                current = self.current_generation(),
                "이전 세대 이벤트 무시"
            );
            return;
        }

        match event.kind {
            ServiceEventKind::PingAcknowledged => self.on_ping_acknowledged(),
            ServiceEventKind::Error { source, status } => self.on_error(source, status),
            ServiceEventKind::RetryTick { attempt } => self.on_retry(attempt),
            ServiceEventKind::BackoffExhausted => self.on_backoff_exhausted(),
        }
    }

    fn on_ping_acknowledged(&self) {
        if self.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.backoff.reset();
        if let Some(policy) = self.current_policy.lock().as_ref() {
            info!(server = %policy.authority(), "DeviceGateway 연결됨");
        }
        self.emit(GatewayEvent::Connected);
    }

    fn on_error(self: &Arc<Self>, source: ServiceSource, status: GatewayStatus) {
        // 서비스가 OK로 끝났어도 해당 스트림은 이미 닫혔다
        let status = if status.is_ok() {
            GatewayStatus::unavailable(format!("{source} 종료: {}", status.message))
        } else {
            status
        };
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        let reason = classify(&status, was_connected);
        warn!(%source, %reason, was_connected, "DeviceGateway 에러: {status}");

        let generation = self.teardown();

        if !reason.is_retryable() {
            self.emit(GatewayEvent::Error(reason));
            return;
        }

        self.emit(GatewayEvent::Reconnecting(reason));
        self.schedule_retry(status.code, generation);
    }

    fn schedule_retry(&self, code: StatusCode, generation: u64) {
        let backoff = Arc::clone(&self.backoff);
        let observer = RetryObserver(ServiceEventSender::new(generation, self.events_tx.clone()));
        let task = tokio::spawn(async move {
            backoff.await_retry(code, &observer).await;
        });

        if let Some(previous) = self.retry_task.lock().replace(task) {
            previous.abort();
        }
    }

    fn on_retry(self: &Arc<Self>, attempt: u32) {
        if self.connected.load(Ordering::SeqCst) {
            debug!(attempt, "이미 연결됨, 재시도 생략");
            return;
        }
        let Some(policy) = self.current_policy.lock().clone() else {
            return;
        };

        self.emit(GatewayEvent::Retrying(attempt));
        self.begin_connect(policy);
    }

    fn on_backoff_exhausted(self: &Arc<Self>) {
        match self.next_policy() {
            Some(policy) => {
                info!(server = %policy.authority(), "재시도 소진, 다음 서버 정책으로 전환");
                self.backoff.reset_with_limit(policy.retry_count_limit);
                self.begin_connect(policy);
            }
            None => {
                warn!("모든 서버 정책 소진");
                *self.current_policy.lock() = None;
                self.emit(GatewayEvent::Error(ChangedReason::UnrecoverableError));
            }
        }
    }

    fn disconnect(&self) {
        self.cancel_retry();
        self.connected.store(false, Ordering::SeqCst);
        self.teardown();
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("DeviceGateway 클라이언트 이미 종료됨");
            return;
        }
        self.backoff.shutdown();
        self.disconnect();
        debug!("DeviceGateway 클라이언트 종료");
    }
}

/// 연결 단위 클라이언트
///
/// 생성 시 이벤트 루프 태스크를 띄우므로 tokio 런타임 안에서 만들어야 한다.
pub struct DeviceGatewayClient {
    inner: Arc<Inner>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceGatewayClient {
    pub fn new(
        policy: Policy,
        deps: GatewayDeps,
        config: GatewayClientConfig,
        observer: GatewayObserver,
    ) -> Self {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(Inner {
            backoff: Arc::new(BackOff::new(&config.backoff, 0)),
            deps,
            config,
            observer,
            health_check: policy.health_check_policy,
            policies: Mutex::new(policy.server_policies.into()),
            current_policy: Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            services: Mutex::new(None),
            retry_task: Mutex::new(None),
            events_tx,
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        let event_loop = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.handle_event(event);
            }
        });

        Self {
            inner,
            event_loop: Mutex::new(Some(event_loop)),
        }
    }

    /// 다음 서버 정책으로 연결 시작
    ///
    /// 이미 연결되어 있거나 종료됐으면 `false`. 남은 정책이 없으면
    /// `Error(UNRECOVERABLE_ERROR)`를 알리고 `false`.
    pub fn connect(&self) -> bool {
        self.inner.connect()
    }

    /// 모든 하위 서비스와 채널 종료 (이미 끊겨 있어도 안전)
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// 영구 종료 (멱등)
    pub fn shutdown(&self) {
        self.inner.shutdown();
        if let Some(task) = self.event_loop.lock().take() {
            task.abort();
        }
    }

    /// 요청 종류에 맞는 하위 서비스로 전송
    pub async fn send(&self, request: &MessageRequest) -> Result<(), GatewayStatus> {
        let (stream, crash) = {
            let services = self.inner.services.lock();
            match services.as_ref() {
                Some(services) => (Arc::clone(&services.stream), Arc::clone(&services.crash)),
                None => return Err(GatewayStatus::unavailable("device gateway is not connected")),
            }
        };

        match request {
            MessageRequest::Event(event) => stream.send(Upstream::Event(event.clone())).await,
            MessageRequest::Attachment(attachment) => {
                stream.send(Upstream::Attachment(attachment.clone())).await
            }
            MessageRequest::CrashReport(report) => {
                if crash.send_crash_report(report).await {
                    Ok(())
                } else {
                    Err(GatewayStatus::unavailable("crash report was not delivered"))
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// 현재 사용 중인 서버 정책
    pub fn current_policy(&self) -> Option<ServerPolicy> {
        self.inner.current_policy.lock().clone()
    }

    /// 아직 시도하지 않은 서버 정책 수
    pub fn remaining_policies(&self) -> usize {
        self.inner.policies.lock().len()
    }

    /// 현재 정책에서 소비한 재시도 횟수
    pub fn retry_attempts(&self) -> u32 {
        self.inner.backoff.attempts()
    }
}

impl Drop for DeviceGatewayClient {
    fn drop(&mut self) {
        self.inner.shutdown();
        if let Some(task) = self.event_loop.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAuth, FakeConnector, RecordingConsumer};
    use nugu_core::models::message::{CrashReportMessageRequest, EventMessageRequest};
    use nugu_core::models::status::TransportCause;

    fn server(hostname: &str, retry_count_limit: u32) -> ServerPolicy {
        ServerPolicy {
            protocol: "H2_GRPC".to_string(),
            hostname: hostname.to_string(),
            address: String::new(),
            port: 443,
            retry_count_limit,
            connection_timeout: 1,
            charge: String::new(),
        }
    }

    fn policy(servers: Vec<ServerPolicy>) -> Policy {
        Policy {
            health_check_policy: HealthCheckPolicy {
                retry_delay: 30,
                health_check_timeout: 100,
                ..HealthCheckPolicy::default()
            },
            server_policies: servers,
        }
    }

    fn config() -> GatewayClientConfig {
        GatewayClientConfig {
            stream_mode: StreamMode::Bidirectional,
            directives_watchdog: Duration::from_secs(10),
            crash_report_deadline: Duration::from_secs(1),
            backoff: BackoffConfig {
                base_delay_ms: 10,
                max_delay_ms: 40,
                multiplier: 2.0,
            },
        }
    }

    struct Harness {
        client: DeviceGatewayClient,
        connector: Arc<FakeConnector>,
        events: mpsc::UnboundedReceiver<GatewayEvent>,
    }

    impl Harness {
        fn new(policy: Policy, token: Option<&str>) -> Self {
            let connector = FakeConnector::new();
            let (tx, events) = mpsc::unbounded_channel();
            let observer: GatewayObserver = Arc::new(move |event: GatewayEvent| {
                let _ = tx.send(event);
            });
            let deps = GatewayDeps {
                connector: connector.clone(),
                auth: FakeAuth::new(token),
                consumer: Arc::new(RecordingConsumer::default()),
            };
            let client = DeviceGatewayClient::new(policy, deps, config(), observer);
            Self {
                client,
                connector,
                events,
            }
        }

        async fn next(&mut self) -> GatewayEvent {
            tokio::time::timeout(Duration::from_secs(2), self.events.recv())
                .await
                .expect("timed out waiting for gateway event")
                .expect("observer dropped")
        }
    }

    #[tokio::test]
    async fn first_ping_ack_connects() {
        let mut h = Harness::new(policy(vec![server("gw.example.com", 2)]), Some("Bearer t"));

        assert!(h.client.connect());
        assert_eq!(h.next().await, GatewayEvent::Connected);
        assert!(h.client.is_connected());
        assert_eq!(h.connector.open_count(), 1);

        // 연결 중 재호출은 무시
        assert!(!h.client.connect());
        h.client.shutdown();
    }

    #[tokio::test]
    async fn ping_failure_after_connect_is_server_side_disconnect() {
        let mut h = Harness::new(policy(vec![server("gw.example.com", 3)]), Some("Bearer t"));
        h.connector
            .script_channel_pings(vec![Ok(()), Err(GatewayStatus::unavailable("reset"))]);

        h.client.connect();
        assert_eq!(h.next().await, GatewayEvent::Connected);
        assert_eq!(
            h.next().await,
            GatewayEvent::Reconnecting(ChangedReason::ServerSideDisconnect)
        );
        assert_eq!(h.next().await, GatewayEvent::Retrying(1));
        assert_eq!(h.next().await, GatewayEvent::Connected);
        assert_eq!(h.connector.open_count(), 2);
        h.client.shutdown();
    }

    #[tokio::test]
    async fn ok_status_from_service_reconnects() {
        let mut h = Harness::new(policy(vec![server("gw.example.com", 3)]), Some("Bearer t"));
        h.connector.script_channel_pings(vec![
            Ok(()),
            Err(GatewayStatus::new(StatusCode::Ok, "stream completed")),
        ]);

        h.client.connect();
        assert_eq!(h.next().await, GatewayEvent::Connected);
        assert_eq!(
            h.next().await,
            GatewayEvent::Reconnecting(ChangedReason::ServerSideDisconnect)
        );
        assert_eq!(h.next().await, GatewayEvent::Retrying(1));
        assert_eq!(h.next().await, GatewayEvent::Connected);
        assert_eq!(h.connector.open_count(), 2);
        h.client.shutdown();
    }

    #[tokio::test]
    async fn attempt_numbering_restarts_after_reconnect() {
        let mut h = Harness::new(policy(vec![server("gw.example.com", 3)]), Some("Bearer t"));
        h.connector
            .script_channel_pings(vec![Ok(()), Err(GatewayStatus::unavailable("reset"))]);
        h.connector
            .script_channel_pings(vec![Ok(()), Err(GatewayStatus::unavailable("reset"))]);

        h.client.connect();
        let mut retries = Vec::new();
        let mut connects = 0;
        while connects < 3 {
            match h.next().await {
                GatewayEvent::Connected => connects += 1,
                GatewayEvent::Retrying(attempt) => retries.push(attempt),
                GatewayEvent::Reconnecting(_) => {}
                GatewayEvent::Error(reason) => panic!("unexpected error: {reason}"),
            }
        }

        assert_eq!(retries, vec![1, 1]);
        assert_eq!(h.client.retry_attempts(), 0);
        h.client.shutdown();
    }

    #[tokio::test]
    async fn exhausting_every_policy_is_unrecoverable() {
        let servers = vec![server("a", 0), server("b", 1), server("c", 0)];
        let mut h = Harness::new(policy(servers), Some("Bearer t"));
        h.connector.fail_always(
            GatewayStatus::unavailable("connection refused")
                .with_cause(TransportCause::ConnectionRefused),
        );

        h.client.connect();
        let mut reconnecting = 0;
        let final_reason = loop {
            match h.next().await {
                GatewayEvent::Reconnecting(reason) => {
                    assert_eq!(reason, ChangedReason::ConnectionTimedout);
                    reconnecting += 1;
                }
                GatewayEvent::Retrying(_) => {}
                GatewayEvent::Error(reason) => break reason,
                GatewayEvent::Connected => panic!("should never connect"),
            }
        };

        assert_eq!(final_reason, ChangedReason::UnrecoverableError);
        // a: 1회, b: 1 + 재시도 1회, c: 1회
        assert_eq!(reconnecting, 4);
        let hosts: Vec<String> = h
            .connector
            .opened
            .lock()
            .iter()
            .map(|p| p.hostname.clone())
            .collect();
        assert_eq!(hosts, vec!["a", "b", "b", "c"]);

        // 새 connect 없이는 더 시도하지 않는다
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.connector.open_count(), 4);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn dns_failure_before_connect() {
        let mut h = Harness::new(policy(vec![server("a", 0)]), Some("Bearer t"));
        h.connector.script_open([Some(
            GatewayStatus::unavailable("dns error").with_cause(TransportCause::Dns),
        )]);

        h.client.connect();
        assert_eq!(
            h.next().await,
            GatewayEvent::Reconnecting(ChangedReason::DnsTimedout)
        );
        assert_eq!(
            h.next().await,
            GatewayEvent::Error(ChangedReason::UnrecoverableError)
        );
    }

    #[tokio::test]
    async fn auth_rejection_is_not_retried() {
        let mut h = Harness::new(policy(vec![server("a", 5)]), Some("Bearer t"));
        h.connector
            .script_channel_pings(vec![Err(GatewayStatus::unauthenticated("bad token"))]);

        h.client.connect();
        assert_eq!(h.next().await, GatewayEvent::Error(ChangedReason::InvalidAuth));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.connector.open_count(), 1);
    }

    #[tokio::test]
    async fn blank_authorization_never_opens_a_channel() {
        let mut h = Harness::new(policy(vec![server("a", 5)]), Some("  "));

        h.client.connect();
        assert_eq!(h.next().await, GatewayEvent::Error(ChangedReason::InvalidAuth));
        assert_eq!(h.connector.open_count(), 0);
    }

    #[tokio::test]
    async fn empty_policy_list_fails_immediately() {
        let mut h = Harness::new(policy(vec![]), Some("Bearer t"));

        assert!(!h.client.connect());
        assert_eq!(
            h.next().await,
            GatewayEvent::Error(ChangedReason::UnrecoverableError)
        );
    }

    #[tokio::test]
    async fn send_dispatches_by_request_kind() {
        let mut h = Harness::new(policy(vec![server("a", 0)]), Some("Bearer t"));

        let event = EventMessageRequest::builder("Text", "TextInput", "1.0").build();
        let not_connected = h.client.send(&MessageRequest::Event(event.clone())).await;
        assert_eq!(not_connected.unwrap_err().code, StatusCode::Unavailable);

        h.client.connect();
        assert_eq!(h.next().await, GatewayEvent::Connected);

        h.client
            .send(&MessageRequest::Event(event.clone()))
            .await
            .unwrap();
        h.client
            .send(&MessageRequest::CrashReport(CrashReportMessageRequest::default()))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let channel = h.connector.last_channel().unwrap();
        assert_eq!(*channel.upstream.lock(), vec![Upstream::Event(event)]);
        h.client.shutdown();
    }

    #[tokio::test]
    async fn disconnect_is_safe_when_already_disconnected() {
        let mut h = Harness::new(policy(vec![server("a", 0)]), Some("Bearer t"));
        h.client.disconnect();

        h.client.connect();
        assert_eq!(h.next().await, GatewayEvent::Connected);
        let channel = h.connector.last_channel().unwrap();

        h.client.disconnect();
        h.client.disconnect();
        assert!(!h.client.is_connected());
        assert_eq!(channel.shutdowns.load(Ordering::SeqCst), 1);

        // 이전 세대 서비스는 더 이상 이벤트를 만들지 않는다
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.events.try_recv().is_err());
    }
}
