//! 서버 스트리밍 디렉티브 구독 (디렉티브 전용 모드).
//!
//! gRPC 레벨에서 종료를 알리지 않고 멈춘 스트림을 잡기 위해
//! 프레임마다 갱신되는 감시 타이머를 둔다. 이 모드에서 이벤트는 단건 RPC로 보낸다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use nugu_core::models::message::Upstream;
use nugu_core::models::status::GatewayStatus;
use nugu_core::ports::consumer::MessageConsumer;
use nugu_core::ports::gateway::{DownstreamStream, GatewayChannel};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event_stream_service::deliver;
use crate::service_event::{ServiceEventSender, ServiceSource};

async fn read_with_watchdog(
    mut stream: DownstreamStream,
    consumer: &dyn MessageConsumer,
    watchdog: Duration,
) -> GatewayStatus {
    loop {
        match tokio::time::timeout(watchdog, stream.next()).await {
            Err(_) => {
                return GatewayStatus::deadline_exceeded(format!(
                    "no directives received within {}ms",
                    watchdog.as_millis()
                ))
            }
            Ok(Some(Ok(frame))) => {
                if let Err(status) = deliver(frame, consumer) {
                    return status;
                }
            }
            Ok(Some(Err(status))) => return status,
            Ok(None) => return GatewayStatus::unavailable("server closed directive stream"),
        }
    }
}

/// 디렉티브 서비스
pub struct DirectivesService {
    channel: Arc<dyn GatewayChannel>,
    completed: Arc<AtomicBool>,
    shutdown: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DirectivesService {
    pub fn start(
        channel: Arc<dyn GatewayChannel>,
        consumer: Arc<dyn MessageConsumer>,
        events: ServiceEventSender,
        watchdog: Duration,
    ) -> Self {
        let completed = Arc::new(AtomicBool::new(false));

        let task = {
            let channel = Arc::clone(&channel);
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                let status = match channel.open_directive_stream().await {
                    Ok(stream) => {
                        debug!(watchdog_ms = watchdog.as_millis() as u64, "디렉티브 스트림 열림");
                        read_with_watchdog(stream, consumer.as_ref(), watchdog).await
                    }
                    Err(status) => status,
                };

                if !completed.swap(true, Ordering::SeqCst) {
                    warn!("디렉티브 스트림 종료: {status}");
                    events.error(ServiceSource::Directives, status);
                }
            })
        };

        Self {
            channel,
            completed,
            shutdown: AtomicBool::new(false),
            task: Mutex::new(Some(task)),
        }
    }

    /// 업스트림 단건 전송
    pub async fn send(&self, message: Upstream) -> Result<(), GatewayStatus> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(GatewayStatus::failed_precondition("directives service shut down"));
        }
        self.channel.send_unary(message).await
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// 종료 (멱등)
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("디렉티브 서비스 이미 종료됨");
            return;
        }
        self.completed.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        debug!("디렉티브 서비스 종료");
    }
}

impl Drop for DirectivesService {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
