//! DeviceGateway 채널 포트.
//!
//! 하나의 하위 채널(gRPC/HTTP2 연결)을 추상화한다. Ping, 이벤트 스트림,
//! 디렉티브 스트림, 크래시 리포트가 모두 같은 채널을 공유한다.
//!
//! 구현: `nugu-transport::grpc::GrpcConnector` (`grpc` feature, tonic)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::models::directive::Downstream;
use crate::models::message::{CrashReportMessageRequest, Upstream};
use crate::models::policy::ServerPolicy;
use crate::models::status::GatewayStatus;

/// 다운스트림 프레임 스트림
///
/// `None`은 서버 측 정상 종료, `Some(Err(_))`는 스트림 에러.
pub type DownstreamStream = BoxStream<'static, Result<Downstream, GatewayStatus>>;

/// 열린 DeviceGateway 채널
#[async_trait]
pub trait GatewayChannel: Send + Sync {
    /// 가벼운 생존 확인 RPC
    async fn ping(&self, timeout: Duration) -> Result<(), GatewayStatus>;

    /// 양방향 이벤트 스트림 시작
    ///
    /// `upstream`으로 들어오는 프레임을 스트림에 싣고, 서버 프레임을 반환한다.
    async fn open_event_stream(
        &self,
        upstream: mpsc::Receiver<Upstream>,
    ) -> Result<DownstreamStream, GatewayStatus>;

    /// 서버 스트리밍 디렉티브 구독
    async fn open_directive_stream(&self) -> Result<DownstreamStream, GatewayStatus>;

    /// 단건 업스트림 전송 (디렉티브 전용 모드)
    async fn send_unary(&self, message: Upstream) -> Result<(), GatewayStatus>;

    /// 크래시 리포트 단건 전송
    async fn send_crash_report(
        &self,
        request: &CrashReportMessageRequest,
        deadline: Duration,
    ) -> Result<(), GatewayStatus>;

    /// 채널 종료 (멱등)
    fn shutdown(&self);
}

/// 서버 정책으로 채널을 여는 팩토리
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    async fn open(
        &self,
        policy: &ServerPolicy,
        authorization: &str,
    ) -> Result<Arc<dyn GatewayChannel>, GatewayStatus>;
}
