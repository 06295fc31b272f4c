//! tonic 기반 DeviceGateway 채널

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use nugu_core::config::TransportConfig;
use nugu_core::models::message::{CrashReportMessageRequest, Upstream};
use nugu_core::models::policy::ServerPolicy;
use nugu_core::models::status::GatewayStatus;
use nugu_core::ports::gateway::{DownstreamStream, GatewayChannel, GatewayConnector};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tonic::client::Grpc;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::{Ascii, MetadataValue};
use tonic::transport::Channel;
use tonic::Request;
use tracing::{debug, info};

use super::config::GrpcConfig;
use super::error_mapping::{map_grpc_status, map_transport_error};
use super::proto;

/// 서버 정책으로 gRPC 채널을 연다
pub struct GrpcConnector {
    config: GrpcConfig,
}

impl GrpcConnector {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            config: GrpcConfig::from(config),
        }
    }
}

#[async_trait]
impl GatewayConnector for GrpcConnector {
    async fn open(
        &self,
        policy: &ServerPolicy,
        authorization: &str,
    ) -> Result<Arc<dyn GatewayChannel>, GatewayStatus> {
        let endpoint = self
            .config
            .build_endpoint(policy)
            .map_err(|e| GatewayStatus::internal(e.to_string()))?;
        let authorization = MetadataValue::try_from(authorization)
            .map_err(|_| GatewayStatus::unauthenticated("authorization is not valid ASCII"))?;

        info!(server = %policy.authority(), "gRPC 채널 연결 시도");
        let channel = endpoint.connect().await.map_err(|e| {
            debug!(error = %e, "gRPC 채널 연결 실패");
            map_transport_error(&e)
        })?;

        Ok(Arc::new(GrpcChannel::new(channel, authorization)))
    }
}

/// 열린 gRPC 채널
///
/// 스트림들은 `shutdown()` 시점에 종료된다.
pub struct GrpcChannel {
    grpc: Grpc<Channel>,
    authorization: MetadataValue<Ascii>,
    closed: watch::Sender<bool>,
    shut_down: AtomicBool,
}

impl GrpcChannel {
    pub fn new(channel: Channel, authorization: MetadataValue<Ascii>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            grpc: Grpc::new(channel),
            authorization,
            closed,
            shut_down: AtomicBool::new(false),
        }
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert("authorization", self.authorization.clone());
        request
    }

    /// 준비된 클라이언트 복사본
    async fn ready(&self) -> Result<Grpc<Channel>, GatewayStatus> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(GatewayStatus::cancelled("channel is shut down"));
        }
        let mut grpc = self.grpc.clone();
        grpc.ready()
            .await
            .map_err(|e| GatewayStatus::unavailable(format!("service not ready: {e}")))?;
        Ok(grpc)
    }

    /// 서버 스트림을 도메인 스트림으로 변환 (채널 종료 시 끝남)
    fn downstream(&self, stream: tonic::Streaming<proto::Downstream>) -> DownstreamStream {
        let mut closed = self.closed.subscribe();
        stream
            .filter_map(|item| {
                futures::future::ready(match item {
                    Ok(frame) => frame.into_domain().map(Ok),
                    Err(status) => Some(Err(map_grpc_status(&status))),
                })
            })
            .take_until(async move {
                let _ = closed.wait_for(|closed| *closed).await;
            })
            .boxed()
    }
}

#[async_trait]
impl GatewayChannel for GrpcChannel {
    async fn ping(&self, timeout: Duration) -> Result<(), GatewayStatus> {
        let mut grpc = self.ready().await?;
        let mut request = self.request(proto::PingRequest {});
        request.set_timeout(timeout);

        let call = grpc.unary::<_, proto::PingResponse, _>(
            request,
            PathAndQuery::from_static(proto::PING_PATH),
            tonic_prost::ProstCodec::default(),
        );
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(status)) => Err(map_grpc_status(&status)),
            Err(_) => Err(GatewayStatus::deadline_exceeded("ping timed out")),
        }
    }

    async fn open_event_stream(
        &self,
        upstream: mpsc::Receiver<Upstream>,
    ) -> Result<DownstreamStream, GatewayStatus> {
        let mut grpc = self.ready().await?;
        let outbound = ReceiverStream::new(upstream).map(proto::Upstream::from);

        let response = grpc
            .streaming::<_, _, proto::Downstream, _>(
                self.request(outbound),
                PathAndQuery::from_static(proto::EVENTS_PATH),
                tonic_prost::ProstCodec::default(),
            )
            .await
            .map_err(|status| map_grpc_status(&status))?;

        Ok(self.downstream(response.into_inner()))
    }

    async fn open_directive_stream(&self) -> Result<DownstreamStream, GatewayStatus> {
        let mut grpc = self.ready().await?;

        let response = grpc
            .server_streaming::<_, proto::Downstream, _>(
                self.request(proto::DirectivesRequest {}),
                PathAndQuery::from_static(proto::DIRECTIVES_PATH),
                tonic_prost::ProstCodec::default(),
            )
            .await
            .map_err(|status| map_grpc_status(&status))?;

        Ok(self.downstream(response.into_inner()))
    }

    async fn send_unary(&self, message: Upstream) -> Result<(), GatewayStatus> {
        let mut grpc = self.ready().await?;
        let outbound = futures::stream::iter([proto::Upstream::from(message)]);

        let response = grpc
            .streaming::<_, _, proto::Downstream, _>(
                self.request(outbound),
                PathAndQuery::from_static(proto::EVENTS_PATH),
                tonic_prost::ProstCodec::default(),
            )
            .await
            .map_err(|status| map_grpc_status(&status))?;

        // 응답 디렉티브는 디렉티브 스트림으로 도착한다
        drop(response);
        Ok(())
    }

    async fn send_crash_report(
        &self,
        request: &CrashReportMessageRequest,
        deadline: Duration,
    ) -> Result<(), GatewayStatus> {
        let mut grpc = self.ready().await?;
        let mut request = self.request(proto::CrashReportRequest::from(request));
        request.set_timeout(deadline);

        grpc.unary::<_, proto::CrashReportResponse, _>(
            request,
            PathAndQuery::from_static(proto::CRASH_REPORT_PATH),
            tonic_prost::ProstCodec::default(),
        )
        .await
        .map(|_| ())
        .map_err(|status| map_grpc_status(&status))
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed.send_replace(true);
        info!("gRPC 채널 종료");
    }
}
