//! 최상위 전송 상태 머신.
//!
//! 레지스트리 → DeviceGatewayClient 순서로 연결을 구동하고, 핸드오프와
//! 애플리케이션 노출 상태를 관리한다. connect/disconnect/handoff/shutdown과
//! 하위 클라이언트 이벤트는 모두 단일 액터 태스크에서 순서대로 처리된다.
//!
//! 상태 전이는 [`DetailedState::can_transition_to`] 표를 따르며,
//! 허용되지 않은 전이는 무시된다(에러가 아님).

use std::sync::Arc;

use async_trait::async_trait;
use nugu_core::config::TransportConfig;
use nugu_core::error::CoreError;
use nugu_core::models::message::MessageRequest;
use nugu_core::models::policy::{Policy, PolicyCache, ServerPolicy};
use nugu_core::models::state::{ChangedReason, ConnectionStatus, DetailedState, StateChange};
use nugu_core::ports::auth::{usable_authorization, AuthDelegate};
use nugu_core::ports::consumer::MessageConsumer;
use nugu_core::ports::gateway::GatewayConnector;
use nugu_core::ports::registry::{PolicySource, RegistryError};
use nugu_core::ports::status_listener::ConnectionStatusListener;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::call::{Call, CallError, CallResult, CorrelatingConsumer, MessageSender, PendingCalls};
use crate::device_gateway_client::{
    DeviceGatewayClient, GatewayClientConfig, GatewayDeps, GatewayEvent, GatewayObserver,
};
use crate::registry_client::RegistryClient;

/// 상태 변경 브로드캐스트 버퍼
const STATE_CHANNEL_CAPACITY: usize = 64;

struct StateCell {
    state: DetailedState,
    reason: ChangedReason,
    /// 마지막으로 리스너에 알린 (status, reason)
    reported: (ConnectionStatus, ChangedReason),
}

struct Shared {
    config: TransportConfig,
    auth: Arc<dyn AuthDelegate>,
    consumer: Arc<dyn MessageConsumer>,
    connector: Arc<dyn GatewayConnector>,
    registry: Arc<dyn PolicySource>,
    cache: PolicyCache,
    pending: PendingCalls,
    state: Mutex<StateCell>,
    states_tx: broadcast::Sender<StateChange>,
    listeners: Mutex<Vec<Arc<dyn ConnectionStatusListener>>>,
    gateway: Mutex<Option<Arc<DeviceGatewayClient>>>,
}

impl Shared {
    fn state(&self) -> DetailedState {
        self.state.lock().state
    }

    fn reason(&self) -> ChangedReason {
        self.state.lock().reason
    }

    /// 허용된 전이만 적용하고 알린다
    fn set_state(&self, target: DetailedState, reason: ChangedReason) -> bool {
        let (change, notify) = {
            let mut cell = self.state.lock();
            if !cell.state.can_transition_to(target) {
                debug!(from = %cell.state, to = %target, "허용되지 않은 상태 전이 무시");
                return false;
            }

            let change = StateChange {
                from: cell.state,
                to: target,
                reason,
            };
            cell.state = target;
            cell.reason = reason;

            let status = target.status();
            let notify = if cell.reported != (status, reason) {
                cell.reported = (status, reason);
                Some((status, reason))
            } else {
                None
            };
            (change, notify)
        };

        info!(from = %change.from, to = %change.to, reason = %reason, "연결 상태 변경");
        let _ = self.states_tx.send(change);

        if let Some((status, reason)) = notify {
            let listeners = self.listeners.lock().clone();
            for listener in listeners {
                listener.on_connection_status_changed(status, reason);
            }
        }
        true
    }

    /// 전이 표를 거치지 않는 내부 상태 변경 (알림 없음)
    fn force(&self, target: DetailedState, reason: ChangedReason) {
        let mut cell = self.state.lock();
        trace!(from = %cell.state, to = %target, "내부 상태 변경");
        cell.state = target;
        cell.reason = reason;
    }

    fn take_gateway(&self) -> Option<Arc<DeviceGatewayClient>> {
        self.gateway.lock().take()
    }
}

#[async_trait]
impl MessageSender for Shared {
    async fn send_message(&self, request: &MessageRequest) -> CallResult {
        if !self.state().is_connected() {
            return Err(CallError::NotConnected);
        }
        let gateway = self.gateway.lock().clone();
        let Some(gateway) = gateway else {
            return Err(CallError::NotConnected);
        };
        gateway.send(request).await.map_err(CallError::Status)
    }
}

enum Command {
    Connect(oneshot::Sender<bool>),
    Disconnect(oneshot::Sender<()>),
    Handoff(ServerPolicy, oneshot::Sender<bool>),
    Shutdown(Option<oneshot::Sender<()>>),
    Registry {
        generation: u64,
        result: Result<Policy, RegistryError>,
    },
    Gateway {
        generation: u64,
        event: GatewayEvent,
    },
}

/// 상태 변경을 직렬화하는 액터
struct Actor {
    shared: Arc<Shared>,
    commands: mpsc::WeakUnboundedSender<Command>,
    /// 레지스트리 요청/게이트웨이 클라이언트 세대
    generation: u64,
    handoff_in_progress: bool,
    registry_task: Option<JoinHandle<()>>,
}

impl Actor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Connect(reply) => {
                    let started = self.connect();
                    let _ = reply.send(started);
                }
                Command::Disconnect(reply) => {
                    self.disconnect();
                    let _ = reply.send(());
                }
                Command::Handoff(server, reply) => {
                    let started = self.handoff(server);
                    let _ = reply.send(started);
                }
                Command::Registry { generation, result } => {
                    self.on_registry_result(generation, result);
                }
                Command::Gateway { generation, event } => {
                    self.on_gateway_event(generation, event);
                }
                Command::Shutdown(reply) => {
                    self.shutdown();
                    if let Some(reply) = reply {
                        let _ = reply.send(());
                    }
                    break;
                }
            }
        }
        debug!("Transport 액터 종료");
    }

    fn connect(&mut self) -> bool {
        let state = self.shared.state();
        if state.is_connected_or_connecting() {
            debug!(%state, "이미 연결됐거나 연결 중");
            return false;
        }
        if state != DetailedState::Idle {
            self.shared.force(DetailedState::Idle, ChangedReason::None);
        }
        self.handoff_in_progress = false;

        let Some(authorization) = usable_authorization(self.shared.auth.as_ref()) else {
            warn!("인증 토큰이 비어 있음");
            self.fail(ChangedReason::InvalidAuth);
            return false;
        };

        self.shutdown_gateway();
        self.shared
            .set_state(DetailedState::Connecting, ChangedReason::None);
        self.acquire_policy(authorization);
        true
    }

    fn acquire_policy(&mut self, authorization: String) {
        if !self
            .shared
            .set_state(DetailedState::ConnectingRegistry, ChangedReason::None)
        {
            return;
        }
        self.cancel_registry();
        self.generation += 1;

        if !self.shared.config.keep_connection {
            debug!("keep_connection 비활성, 레지스트리 생략");
            let policy = Policy::default_for_gateway(&self.shared.config.gateway_endpoint);
            self.start_gateway(policy);
            return;
        }

        let generation = self.generation;
        let registry = Arc::clone(&self.shared.registry);
        let commands = self.commands.clone();
        self.registry_task = Some(tokio::spawn(async move {
            let result = registry.get_policy(&authorization).await;
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Registry { generation, result });
            }
        }));
    }

    fn on_registry_result(&mut self, generation: u64, result: Result<Policy, RegistryError>) {
        if generation != self.generation {
            trace!(generation, "이전 레지스트리 결과 무시");
            return;
        }
        self.registry_task = None;

        match result {
            Ok(policy) => {
                debug!(servers = policy.server_policies.len(), "정책 수신");
                self.start_gateway(policy);
            }
            Err(error) => match error.reason() {
                Some(reason) => {
                    warn!("정책 획득 실패: {error}");
                    self.fail(reason);
                }
                None => debug!("정책 요청 종료: {error}"),
            },
        }
    }

    fn start_gateway(&mut self, policy: Policy) {
        if !self
            .shared
            .set_state(DetailedState::ConnectingDeviceGateway, ChangedReason::None)
        {
            warn!(state = %self.shared.state(), "게이트웨이 연결을 시작할 수 없는 상태");
            return;
        }
        self.shutdown_gateway();
        self.generation += 1;

        let generation = self.generation;
        let commands = self.commands.clone();
        let observer: GatewayObserver = Arc::new(move |event: GatewayEvent| {
            if let Some(tx) = commands.upgrade() {
                let _ = tx.send(Command::Gateway { generation, event });
            }
        });

        let deps = GatewayDeps {
            connector: Arc::clone(&self.shared.connector),
            auth: Arc::clone(&self.shared.auth),
            consumer: Arc::clone(&self.shared.consumer),
        };
        let gateway = Arc::new(DeviceGatewayClient::new(
            policy,
            deps,
            GatewayClientConfig::from(&self.shared.config),
            observer,
        ));
        *self.shared.gateway.lock() = Some(Arc::clone(&gateway));
        gateway.connect();
    }

    fn on_gateway_event(&mut self, generation: u64, event: GatewayEvent) {
        if generation != self.generation {
            trace!(generation, ?event, "이전 게이트웨이 이벤트 무시");
            return;
        }

        match event {
            GatewayEvent::Connected => {
                self.handoff_in_progress = false;
                self.shared
                    .set_state(DetailedState::Connected, ChangedReason::Success);
            }
            GatewayEvent::Retrying(attempt) => debug!(attempt, "DeviceGateway 재연결 시도"),
            GatewayEvent::Reconnecting(reason) => {
                self.shared.set_state(DetailedState::Reconnecting, reason);
            }
            GatewayEvent::Error(reason) => self.on_gateway_error(reason),
        }
    }

    fn on_gateway_error(&mut self, reason: ChangedReason) {
        match reason {
            ChangedReason::Success => {}
            ChangedReason::InvalidAuth => self.fail(reason),
            _ if self.handoff_in_progress => {
                warn!(%reason, "핸드오프 실패, 레지스트리부터 다시 연결");
                self.handoff_in_progress = false;
                self.generation += 1;
                self.shutdown_gateway();
                self.shared.set_state(DetailedState::Reconnecting, reason);
                match usable_authorization(self.shared.auth.as_ref()) {
                    Some(authorization) => self.acquire_policy(authorization),
                    None => self.fail(ChangedReason::InvalidAuth),
                }
            }
            _ => self.fail(reason),
        }
    }

    fn fail(&mut self, reason: ChangedReason) {
        self.cancel_registry();
        self.generation += 1;
        self.shutdown_gateway();
        self.shared.set_state(DetailedState::Failed, reason);
        if reason == ChangedReason::InvalidAuth {
            self.shared.auth.on_authorization_invalid();
        }
    }

    fn disconnect(&mut self) {
        let state = self.shared.state();
        if !state.is_connected_or_connecting() {
            debug!(%state, "연결되어 있지 않음, disconnect 무시");
            return;
        }

        self.handoff_in_progress = false;
        self.cancel_registry();
        self.shared.registry.disconnect();
        self.generation += 1;
        self.shutdown_gateway();
        self.shared
            .set_state(DetailedState::Disconnecting, ChangedReason::ClientRequest);
        self.shared
            .set_state(DetailedState::Disconnected, ChangedReason::ClientRequest);
        self.shared.pending.cancel_all();
    }

    fn handoff(&mut self, server: ServerPolicy) -> bool {
        let Some(health_check) = self.shared.cache.health_check_policy() else {
            warn!("캐시된 헬스 체크 정책 없음, 핸드오프 불가");
            self.fail(ChangedReason::UnrecoverableError);
            return false;
        };

        info!(server = %server.authority(), "핸드오프 시작");
        self.handoff_in_progress = true;
        self.cancel_registry();
        self.generation += 1;
        self.shutdown_gateway();

        self.shared.force(DetailedState::Idle, ChangedReason::None);
        self.shared
            .set_state(DetailedState::Handoff, ChangedReason::ServerEndpointChanged);
        self.start_gateway(Policy::single(server, health_check));
        true
    }

    fn shutdown(&mut self) {
        self.handoff_in_progress = false;
        self.cancel_registry();
        self.shared.registry.shutdown();
        self.generation += 1;
        self.shutdown_gateway();

        if self
            .shared
            .state()
            .can_transition_to(DetailedState::Disconnecting)
        {
            self.shared
                .set_state(DetailedState::Disconnecting, ChangedReason::ClientRequest);
        }
        self.shared
            .force(DetailedState::Disconnected, ChangedReason::ClientRequest);

        self.shared.listeners.lock().clear();
        self.shared.pending.cancel_all();
        info!("Transport 종료");
    }

    fn shutdown_gateway(&self) {
        if let Some(gateway) = self.shared.take_gateway() {
            gateway.shutdown();
        }
    }

    fn cancel_registry(&mut self) {
        if let Some(task) = self.registry_task.take() {
            task.abort();
        }
    }
}

/// DeviceGateway 전송 계층 진입점
///
/// 생성 시 액터 태스크를 띄우므로 tokio 런타임 안에서 만들어야 한다.
pub struct Transport {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Transport {
    pub fn builder(config: TransportConfig) -> TransportBuilder {
        TransportBuilder::new(config)
    }

    /// 연결 시작. 이미 연결됐거나 연결 중이면 `false`.
    ///
    /// 연결 완료를 기다리지 않는다. 진행 상황은 상태 리스너나
    /// [`subscribe_states`](Self::subscribe_states)로 관찰한다.
    pub async fn connect(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Connect(tx)).is_err() {
            warn!("종료된 Transport에 connect 요청");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// 연결 해제 (연결돼 있거나 연결 중일 때만)
    pub async fn disconnect(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// 게이트웨이가 지시한 서버로 이전
    ///
    /// 캐시된 헬스 체크 정책이 없으면 FAILED(UNRECOVERABLE_ERROR)가 되고 `false`.
    pub async fn handoff_connection(&self, server: ServerPolicy) -> bool {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Handoff(server, tx)).is_err() {
            warn!("종료된 Transport에 핸드오프 요청");
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// 영구 종료 (멱등)
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(Some(tx))).is_err() {
            debug!("Transport 이미 종료됨");
            return;
        }
        let _ = rx.await;
    }

    pub fn state(&self) -> DetailedState {
        self.shared.state()
    }

    /// 마지막 상태 변경 사유
    pub fn reason(&self) -> ChangedReason {
        self.shared.reason()
    }

    /// 애플리케이션 노출 상태
    pub fn status(&self) -> ConnectionStatus {
        self.shared.state().status()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state().is_connected()
    }

    pub fn add_status_listener(&self, listener: Arc<dyn ConnectionStatusListener>) {
        self.shared.listeners.lock().push(listener);
    }

    /// 수락된 모든 상세 상태 전이 구독
    pub fn subscribe_states(&self) -> broadcast::Receiver<StateChange> {
        self.shared.states_tx.subscribe()
    }

    pub fn policy_cache(&self) -> &PolicyCache {
        &self.shared.cache
    }

    /// 요청 하나에 대한 Call 생성 (아직 전송하지 않음)
    pub fn new_call(&self, request: impl Into<MessageRequest>) -> Call {
        let sender: Arc<dyn MessageSender> = Arc::clone(&self.shared) as Arc<dyn MessageSender>;
        Call::new(
            request.into(),
            sender,
            self.shared.pending.clone(),
            self.shared.config.call_timeout(),
        )
    }

    /// 전송 후 결과까지 대기
    pub async fn send(&self, request: impl Into<MessageRequest>) -> CallResult {
        self.new_call(request).execute().await
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown(None));
    }
}

/// [`Transport`] 빌더
pub struct TransportBuilder {
    config: TransportConfig,
    auth: Option<Arc<dyn AuthDelegate>>,
    consumer: Option<Arc<dyn MessageConsumer>>,
    connector: Option<Arc<dyn GatewayConnector>>,
    registry: Option<Arc<dyn PolicySource>>,
    cache: Option<PolicyCache>,
}

impl TransportBuilder {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            auth: None,
            consumer: None,
            connector: None,
            registry: None,
            cache: None,
        }
    }

    pub fn auth(mut self, auth: Arc<dyn AuthDelegate>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn consumer(mut self, consumer: Arc<dyn MessageConsumer>) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn GatewayConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// 정책 공급자 교체 (기본: [`RegistryClient`])
    pub fn policy_source(mut self, registry: Arc<dyn PolicySource>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 여러 Transport가 공유할 정책 캐시
    pub fn policy_cache(mut self, cache: PolicyCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<Transport, CoreError> {
        self.config.validate()?;

        let auth = self
            .auth
            .ok_or_else(|| CoreError::Config("auth delegate is required".to_string()))?;
        let consumer = self
            .consumer
            .ok_or_else(|| CoreError::Config("message consumer is required".to_string()))?;
        let connector = self
            .connector
            .ok_or_else(|| CoreError::Config("gateway connector is required".to_string()))?;

        let cache = self.cache.unwrap_or_default();
        let registry: Arc<dyn PolicySource> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(RegistryClient::new(&self.config, cache.clone())?),
        };

        let pending = PendingCalls::new();
        let consumer: Arc<dyn MessageConsumer> =
            Arc::new(CorrelatingConsumer::new(pending.clone(), consumer));
        let (states_tx, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);

        let shared = Arc::new(Shared {
            config: self.config,
            auth,
            consumer,
            connector,
            registry,
            cache,
            pending,
            state: Mutex::new(StateCell {
                state: DetailedState::Idle,
                reason: ChangedReason::None,
                reported: (ConnectionStatus::Disconnected, ChangedReason::None),
            }),
            states_tx,
            listeners: Mutex::new(Vec::new()),
            gateway: Mutex::new(None),
        });

        let (commands, rx) = mpsc::unbounded_channel();
        let actor = Actor {
            shared: Arc::clone(&shared),
            commands: commands.downgrade(),
            generation: 0,
            handoff_in_progress: false,
            registry_task: None,
        };
        tokio::spawn(actor.run(rx));

        Ok(Transport { shared, commands })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeAuth, FakeConnector, FakePolicySource, RecordingConsumer};
    use nugu_core::models::message::EventMessageRequest;
    use std::time::Duration;

    #[derive(Default)]
    struct StatusRecorder {
        seen: Mutex<Vec<(ConnectionStatus, ChangedReason)>>,
    }

    impl ConnectionStatusListener for StatusRecorder {
        fn on_connection_status_changed(&self, status: ConnectionStatus, reason: ChangedReason) {
            self.seen.lock().push((status, reason));
        }
    }

    fn transport(registry: Arc<FakePolicySource>) -> Transport {
        Transport::builder(TransportConfig::default())
            .auth(FakeAuth::new(Some("Bearer t")))
            .consumer(Arc::new(RecordingConsumer::default()))
            .connector(FakeConnector::new())
            .policy_source(registry)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn rejected_transition_leaves_state_unchanged() {
        let t = transport(FakePolicySource::pending());
        let shared = &t.shared;

        shared.force(DetailedState::ConnectingDeviceGateway, ChangedReason::None);
        assert!(!shared.set_state(DetailedState::Idle, ChangedReason::None));
        assert!(!shared.set_state(DetailedState::Handoff, ChangedReason::None));
        assert_eq!(t.state(), DetailedState::ConnectingDeviceGateway);

        assert!(shared.set_state(DetailedState::Failed, ChangedReason::InternalError));
        assert_eq!(t.state(), DetailedState::Failed);
        assert_eq!(t.reason(), ChangedReason::InternalError);
    }

    #[tokio::test]
    async fn listeners_hear_only_status_or_reason_changes() {
        let t = transport(FakePolicySource::pending());
        let recorder = Arc::new(StatusRecorder::default());
        t.add_status_listener(recorder.clone());

        let shared = &t.shared;
        shared.set_state(DetailedState::Connecting, ChangedReason::None);
        shared.set_state(DetailedState::ConnectingRegistry, ChangedReason::None);
        shared.set_state(DetailedState::ConnectingDeviceGateway, ChangedReason::None);
        shared.set_state(DetailedState::Connected, ChangedReason::Success);
        shared.set_state(DetailedState::Disconnecting, ChangedReason::ClientRequest);
        shared.set_state(DetailedState::Disconnected, ChangedReason::ClientRequest);

        assert_eq!(
            *recorder.seen.lock(),
            vec![
                (ConnectionStatus::Connecting, ChangedReason::None),
                (ConnectionStatus::Connected, ChangedReason::Success),
                (ConnectionStatus::Disconnected, ChangedReason::ClientRequest),
            ]
        );
    }

    #[tokio::test]
    async fn connect_while_connecting_is_rejected() {
        let registry = FakePolicySource::pending();
        let t = transport(registry.clone());

        assert!(t.connect().await);
        assert!(!t.connect().await);
        assert_eq!(t.state(), DetailedState::ConnectingRegistry);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.calls(), 1);
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_a_no_op() {
        let t = transport(FakePolicySource::pending());
        let mut states = t.subscribe_states();

        t.disconnect().await;

        assert_eq!(t.state(), DetailedState::Idle);
        assert!(states.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_requires_connected_state() {
        let t = transport(FakePolicySource::pending());
        let event = EventMessageRequest::builder("Text", "TextInput", "1.0").build();

        assert_eq!(t.send(event).await, Err(CallError::NotConnected));
    }

    #[tokio::test]
    async fn shutdown_twice_is_safe() {
        let registry = FakePolicySource::pending();
        let t = transport(registry.clone());

        t.shutdown().await;
        t.shutdown().await;

        assert_eq!(t.state(), DetailedState::Disconnected);
        assert_eq!(registry.shutdowns(), 1);
        assert!(!t.connect().await);
    }

    #[test]
    fn build_requires_collaborators() {
        let result = Transport::builder(TransportConfig::default()).build();
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
