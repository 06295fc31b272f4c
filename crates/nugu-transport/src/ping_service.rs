//! 주기적 생존 확인(Ping).
//!
//! 생성 즉시 첫 Ping을 보내고 `retry_delay` 주기로 반복한다.
//! 실패하면 스스로 종료한 뒤 에러를 한 번만 보고한다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nugu_core::models::policy::HealthCheckPolicy;
use nugu_core::models::status::GatewayStatus;
use nugu_core::ports::gateway::GatewayChannel;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::service_event::{ServiceEventSender, ServiceSource};

/// Ping 서비스
pub struct PingService {
    shutdown: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PingService {
    /// Ping 루프 시작
    pub fn start(
        channel: Arc<dyn GatewayChannel>,
        health_check: &HealthCheckPolicy,
        events: ServiceEventSender,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let interval = health_check.interval();
        let timeout = health_check.timeout();

        let task = {
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    ticker.tick().await;
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }

                    let result = match tokio::time::timeout(timeout, channel.ping(timeout)).await {
                        Ok(result) => result,
                        Err(_) => Err(GatewayStatus::deadline_exceeded(format!(
                            "ping timed out after {}ms",
                            timeout.as_millis()
                        ))),
                    };

                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }

                    match result {
                        Ok(()) => {
                            debug!("Ping 응답 수신");
                            events.ping_acknowledged();
                        }
                        Err(status) => {
                            warn!("Ping 실패: {status}");
                            shutdown.store(true, Ordering::SeqCst);
                            events.error(ServiceSource::Ping, status);
                            break;
                        }
                    }
                }
            })
        };

        debug!(
            interval_ms = interval.as_millis() as u64,
            timeout_ms = timeout.as_millis() as u64,
            "Ping 서비스 시작"
        );

        Self {
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    /// 종료 (멱등)
    pub fn shutdown(&self) {
        let already = self.shutdown.swap(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if already {
            debug!("Ping 서비스 이미 종료됨");
        } else {
            debug!("Ping 서비스 종료");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl Drop for PingService {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
