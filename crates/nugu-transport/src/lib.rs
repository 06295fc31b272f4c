//! # nugu-transport
//!
//! DeviceGateway 전송 계층.
//! 레지스트리에서 라우팅 정책을 받아 게이트웨이와 장기 양방향 스트림을 유지하며,
//! 주기적 Ping, 실패 사유 분류, 지수 BackOff 재연결을 담당한다.
//!
//! ## 구성
//!
//! - [`registry_client`]: 정책 조회 (reqwest)
//! - [`backoff`]: 재시도 지연/시도 횟수 계산
//! - [`ping_service`], [`event_stream_service`], [`directives_service`],
//!   [`crash_report_service`]: 채널 하나를 공유하는 하위 서비스
//! - [`device_gateway_client`]: 연결 단위 조합 + 정책 순환
//! - [`transport`]: 최상위 상태 머신
//! - [`call`]: 요청 단위 타임아웃/취소/단일 콜백
//!
//! ## Feature Flags
//!
//! - `grpc`: tonic 기반 [`GatewayConnector`](nugu_core::ports::gateway::GatewayConnector) 구현
//! - `test-util`: `testing` 모듈의 가짜 커넥터/채널/정책 공급자 공개 (통합 테스트용)
//!
//! ## 사용 예시
//!
//! ```rust,ignore
//! use nugu_transport::transport::Transport;
//!
//! let transport = Transport::builder(config)
//!     .auth(auth)
//!     .consumer(consumer)
//!     .connector(connector)
//!     .build()?;
//! transport.connect().await;
//! ```

pub mod backoff;
pub mod call;
pub mod crash_report_service;
pub mod device_gateway_client;
pub mod directives_service;
pub mod event_stream_service;
pub mod ping_service;
pub mod reason;
pub mod registry_client;
pub mod service_event;
pub mod transport;

// gRPC 채널 구현 (grpc feature 활성화 시)
#[cfg(feature = "grpc")]
pub mod grpc;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;
