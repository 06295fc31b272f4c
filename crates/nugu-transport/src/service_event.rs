//! 하위 서비스(및 BackOff) → DeviceGatewayClient 이벤트.
//!
//! Ping/스트림/크래시 서비스는 클라이언트를 직접 참조하지 않고
//! 이 채널로 결과를 보낸다. `generation`으로 오래된 서비스의 이벤트를 걸러낸다.

use nugu_core::models::status::GatewayStatus;
use tokio::sync::mpsc;

/// 이벤트를 보낸 서비스
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceSource {
    Channel,
    Ping,
    EventStream,
    Directives,
    CrashReport,
}

impl std::fmt::Display for ServiceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceSource::Channel => "channel",
            ServiceSource::Ping => "ping",
            ServiceSource::EventStream => "event-stream",
            ServiceSource::Directives => "directives",
            ServiceSource::CrashReport => "crash-report",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub enum ServiceEventKind {
    /// Ping 응답 수신 (첫 응답이 연결 확립)
    PingAcknowledged,
    /// 서비스 실패
    Error {
        source: ServiceSource,
        status: GatewayStatus,
    },
    /// BackOff 지연 종료, `attempt`번째 재연결 차례
    RetryTick { attempt: u32 },
    /// 현재 서버 정책의 재시도 예산 소진
    BackoffExhausted,
}

#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub generation: u64,
    pub kind: ServiceEventKind,
}

/// 서비스가 쥐는 이벤트 송신 핸들
#[derive(Debug, Clone)]
pub struct ServiceEventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<ServiceEvent>,
}

impl ServiceEventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<ServiceEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ping_acknowledged(&self) {
        self.post(ServiceEventKind::PingAcknowledged);
    }

    pub fn error(&self, source: ServiceSource, status: GatewayStatus) {
        self.post(ServiceEventKind::Error { source, status });
    }

    pub fn retry_tick(&self, attempt: u32) {
        self.post(ServiceEventKind::RetryTick { attempt });
    }

    pub fn backoff_exhausted(&self) {
        self.post(ServiceEventKind::BackoffExhausted);
    }

    fn post(&self, kind: ServiceEventKind) {
        // 수신 측이 이미 종료됐으면 버린다
        let _ = self.tx.send(ServiceEvent {
            generation: self.generation,
            kind,
        });
    }
}
