//! 연결 상태 모델.
//!
//! 내부 상세 상태([`DetailedState`])와 애플리케이션에 노출되는
//! 거친 상태([`ConnectionStatus`]) + 변경 사유([`ChangedReason`]).

use serde::{Deserialize, Serialize};

/// 애플리케이션에 노출되는 연결 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// 연결 시도 중
    Connecting,
    /// 연결됨
    Connected,
    /// 연결 끊김
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Connecting => write!(f, "CONNECTING"),
            ConnectionStatus::Connected => write!(f, "CONNECTED"),
            ConnectionStatus::Disconnected => write!(f, "DISCONNECTED"),
        }
    }
}

/// 상태 변경 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangedReason {
    None,
    Success,
    ClientRequest,
    ServerSideDisconnect,
    ConnectionTimedout,
    DnsTimedout,
    PingTimedout,
    ReadTimedout,
    FailureProtocolError,
    ServerInternalError,
    InternalError,
    InvalidAuth,
    UnrecoverableError,
    ServerEndpointChanged,
}

impl ChangedReason {
    /// BackOff로 재시도할 수 있는 사유인지
    ///
    /// 인증 실패와 복구 불가 에러는 재시도하지 않고 즉시 상위로 올린다.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ChangedReason::None
                | ChangedReason::Success
                | ChangedReason::ClientRequest
                | ChangedReason::InvalidAuth
                | ChangedReason::UnrecoverableError
        )
    }
}

impl std::fmt::Display for ChangedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChangedReason::None => "NONE",
            ChangedReason::Success => "SUCCESS",
            ChangedReason::ClientRequest => "CLIENT_REQUEST",
            ChangedReason::ServerSideDisconnect => "SERVER_SIDE_DISCONNECT",
            ChangedReason::ConnectionTimedout => "CONNECTION_TIMEDOUT",
            ChangedReason::DnsTimedout => "DNS_TIMEDOUT",
            ChangedReason::PingTimedout => "PING_TIMEDOUT",
            ChangedReason::ReadTimedout => "READ_TIMEDOUT",
            ChangedReason::FailureProtocolError => "FAILURE_PROTOCOL_ERROR",
            ChangedReason::ServerInternalError => "SERVER_INTERNAL_ERROR",
            ChangedReason::InternalError => "INTERNAL_ERROR",
            ChangedReason::InvalidAuth => "INVALID_AUTH",
            ChangedReason::UnrecoverableError => "UNRECOVERABLE_ERROR",
            ChangedReason::ServerEndpointChanged => "SERVER_ENDPOINT_CHANGED",
        };
        f.write_str(name)
    }
}

/// 전송 계층 상세 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetailedState {
    Idle,
    Connecting,
    ConnectingRegistry,
    ConnectingDeviceGateway,
    Reconnecting,
    Handoff,
    Connected,
    Disconnecting,
    Disconnected,
    Failed,
}

impl DetailedState {
    /// 상세 상태 → 애플리케이션 노출 상태 (다대일)
    pub fn status(&self) -> ConnectionStatus {
        match self {
            DetailedState::Connecting
            | DetailedState::ConnectingRegistry
            | DetailedState::ConnectingDeviceGateway
            | DetailedState::Reconnecting
            | DetailedState::Handoff => ConnectionStatus::Connecting,
            DetailedState::Connected => ConnectionStatus::Connected,
            DetailedState::Idle
            | DetailedState::Disconnecting
            | DetailedState::Disconnected
            | DetailedState::Failed => ConnectionStatus::Disconnected,
        }
    }

    pub fn is_connected(&self) -> bool {
        *self == DetailedState::Connected
    }

    pub fn is_connected_or_connecting(&self) -> bool {
        self.status() != ConnectionStatus::Disconnected
    }

    /// 더 이상 자동으로 진행하지 않는 종료 상태
    pub fn is_terminal(&self) -> bool {
        matches!(self, DetailedState::Disconnected | DetailedState::Failed)
    }

    /// 허용된 상태 전이인지 확인
    ///
    /// ```text
    /// IDLE -> CONNECTING
    /// CONNECTING -> CONNECTING_REGISTRY
    /// CONNECTING_REGISTRY|HANDOFF -> CONNECTING_DEVICEGATEWAY
    /// RECONNECTING -> CONNECTING_REGISTRY
    /// CONNECTING_DEVICEGATEWAY|RECONNECTING -> CONNECTED
    /// CONNECTING_DEVICEGATEWAY|CONNECTED -> RECONNECTING
    /// (not DISCONNECTED|FAILED|IDLE) -> DISCONNECTING
    /// CONNECTED|DISCONNECTING -> DISCONNECTED
    /// IDLE -> HANDOFF
    /// * -> FAILED
    /// ```
    pub fn can_transition_to(&self, target: DetailedState) -> bool {
        use DetailedState::*;

        match target {
            Idle => false,
            Connecting => *self == Idle,
            ConnectingRegistry => matches!(self, Connecting | Reconnecting),
            ConnectingDeviceGateway => matches!(self, ConnectingRegistry | Handoff),
            Connected => matches!(self, ConnectingDeviceGateway | Reconnecting),
            Reconnecting => matches!(self, ConnectingDeviceGateway | Connected),
            Disconnecting => !matches!(self, Disconnected | Failed | Idle),
            Disconnected => matches!(self, Connected | Disconnecting),
            Handoff => *self == Idle,
            Failed => true,
        }
    }

    /// 모든 상태 (테스트/진단용)
    pub const ALL: [DetailedState; 10] = [
        DetailedState::Idle,
        DetailedState::Connecting,
        DetailedState::ConnectingRegistry,
        DetailedState::ConnectingDeviceGateway,
        DetailedState::Reconnecting,
        DetailedState::Handoff,
        DetailedState::Connected,
        DetailedState::Disconnecting,
        DetailedState::Disconnected,
        DetailedState::Failed,
    ];
}

impl std::fmt::Display for DetailedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DetailedState::Idle => "IDLE",
            DetailedState::Connecting => "CONNECTING",
            DetailedState::ConnectingRegistry => "CONNECTING_REGISTRY",
            DetailedState::ConnectingDeviceGateway => "CONNECTING_DEVICEGATEWAY",
            DetailedState::Reconnecting => "RECONNECTING",
            DetailedState::Handoff => "HANDOFF",
            DetailedState::Connected => "CONNECTED",
            DetailedState::Disconnecting => "DISCONNECTING",
            DetailedState::Disconnected => "DISCONNECTED",
            DetailedState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 수락된 상태 전이 기록
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: DetailedState,
    pub to: DetailedState,
    pub reason: ChangedReason,
}
