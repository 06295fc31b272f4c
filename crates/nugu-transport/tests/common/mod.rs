//! 통합 테스트 공용 픽스처. 가짜 협력자는 `nugu_transport::testing`에 있다.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use nugu_core::config::{BackoffConfig, TransportConfig};
use nugu_core::models::policy::{HealthCheckPolicy, Policy, ServerPolicy};
use nugu_core::models::state::{DetailedState, StateChange};
use nugu_transport::testing::{FakeAuth, FakeConnector, FakePolicySource, RecordingConsumer};
use nugu_transport::transport::Transport;
use tokio::sync::broadcast;

pub fn server(hostname: &str, retry_count_limit: u32) -> ServerPolicy {
    ServerPolicy {
        protocol: "H2_GRPC".to_string(),
        hostname: hostname.to_string(),
        address: String::new(),
        port: 443,
        retry_count_limit,
        connection_timeout: 1,
        charge: String::new(),
    }
}

pub fn policy(servers: Vec<ServerPolicy>) -> Policy {
    Policy {
        health_check_policy: HealthCheckPolicy {
            retry_delay: 30,
            health_check_timeout: 100,
            ..HealthCheckPolicy::default()
        },
        server_policies: servers,
    }
}

pub fn config() -> TransportConfig {
    TransportConfig {
        backoff: BackoffConfig {
            base_delay_ms: 10,
            max_delay_ms: 40,
            multiplier: 2.0,
        },
        call_timeout_ms: 500,
        ..TransportConfig::default()
    }
}

/// `RUST_LOG`로 테스트 로그 확인
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Fixture {
    pub transport: Transport,
    pub connector: Arc<FakeConnector>,
    pub registry: Arc<FakePolicySource>,
    pub auth: Arc<FakeAuth>,
    pub consumer: Arc<RecordingConsumer>,
    pub states: broadcast::Receiver<StateChange>,
}

impl Fixture {
    pub fn new(registry: Arc<FakePolicySource>, token: Option<&str>) -> Self {
        Self::with_config(config(), registry, token)
    }

    pub fn with_config(
        config: TransportConfig,
        registry: Arc<FakePolicySource>,
        token: Option<&str>,
    ) -> Self {
        init_tracing();
        let connector = FakeConnector::new();
        let auth = FakeAuth::new(token);
        let consumer = Arc::new(RecordingConsumer::default());

        let transport = Transport::builder(config)
            .auth(auth.clone())
            .consumer(consumer.clone())
            .connector(connector.clone())
            .policy_source(registry.clone())
            .build()
            .unwrap();
        let states = transport.subscribe_states();

        Self {
            transport,
            connector,
            registry,
            auth,
            consumer,
            states,
        }
    }

    /// `target`에 도달할 때까지의 상태 전이
    pub async fn wait_for(&mut self, target: DetailedState) -> Vec<StateChange> {
        let mut seen = Vec::new();
        loop {
            let change = tokio::time::timeout(Duration::from_secs(3), self.states.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for {target}, saw {seen:?}"))
                .expect("state channel closed");
            seen.push(change);
            if change.to == target {
                return seen;
            }
        }
    }
}

pub fn states(changes: &[StateChange]) -> Vec<DetailedState> {
    changes.iter().map(|change| change.to).collect()
}
