//! 도메인 모델.
//!
//! 레지스트리 정책, 업/다운스트림 메시지, 연결 상태와 상태 코드.

pub mod directive;
pub mod message;
pub mod policy;
pub mod state;
pub mod status;
