//! # nugu-core
//!
//! NUGU DeviceGateway SDK의 도메인 모델, 포트(trait) 정의, 에러 타입.
//! 모든 크레이트가 공유하는 핵심 타입과 인터페이스를 제공한다.
//!
//! ## 구조
//!
//! - [`models`]: 정책, 메시지 요청, 디렉티브, 연결 상태 (serde Serialize/Deserialize)
//! - [`ports`]: 전송 계층이 의존하는 외부 협력자 인터페이스 (async_trait)
//! - [`error`]: 핵심 에러 타입 (thiserror)
//! - [`config`]: 전송 계층 설정 구조체
//! - [`config_manager`]: 설정 파일 관리 (로드/저장)

pub mod config;
pub mod config_manager;
pub mod error;
pub mod models;
pub mod ports;
