//! gRPC DeviceGateway 채널
//!
//! `grpc` feature가 활성화되어 있어야 합니다.
//!
//! ```rust,ignore
//! let connector = Arc::new(GrpcConnector::new(&config));
//! let transport = Transport::builder(config)
//!     .connector(connector)
//!     .auth(auth)
//!     .consumer(consumer)
//!     .build()?;
//! ```

mod channel;
mod config;
mod error_mapping;
pub mod proto;

pub use channel::{GrpcChannel, GrpcConnector};
pub use config::GrpcConfig;
pub use error_mapping::{map_grpc_status, map_transport_error};
