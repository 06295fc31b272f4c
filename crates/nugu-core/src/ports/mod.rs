//! 포트 인터페이스 (trait).
//!
//! 전송 계층이 의존하는 외부 협력자와 교체 가능한 하위 계층.
//! `nugu-transport`가 이 trait들을 사용하며, 애플리케이션이 구현체를
//! `Arc<dyn T>`로 주입한다.
//!
//! 모든 async trait은 `async_trait` 매크로를 사용하여
//! object safety를 보장한다.

pub mod auth;
pub mod consumer;
pub mod gateway;
pub mod registry;
pub mod status_listener;
