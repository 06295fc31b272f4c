//! 크래시 리포트 전송.
//!
//! 고정 데드라인 안에서 한 번 보내고 결과를 bool로만 돌려준다.
//! 재시도도, 상태 머신으로의 에러 보고도 하지 않는다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nugu_core::models::message::CrashReportMessageRequest;
use nugu_core::ports::gateway::GatewayChannel;
use tracing::{debug, warn};

/// 크래시 리포트 서비스
pub struct CrashReportService {
    channel: Arc<dyn GatewayChannel>,
    deadline: Duration,
    shutdown: AtomicBool,
}

impl CrashReportService {
    pub fn new(channel: Arc<dyn GatewayChannel>, deadline: Duration) -> Self {
        Self {
            channel,
            deadline,
            shutdown: AtomicBool::new(false),
        }
    }

    /// 전송 성공 여부
    pub async fn send_crash_report(&self, request: &CrashReportMessageRequest) -> bool {
        if self.shutdown.load(Ordering::SeqCst) {
            debug!("크래시 리포트 서비스 종료됨, 전송 생략");
            return false;
        }

        match tokio::time::timeout(
            self.deadline,
            self.channel.send_crash_report(request, self.deadline),
        )
        .await
        {
            Ok(Ok(())) => {
                debug!(details = request.details.len(), "크래시 리포트 전송 완료");
                true
            }
            Ok(Err(status)) => {
                warn!("크래시 리포트 전송 실패: {status}");
                false
            }
            Err(_) => {
                warn!(
                    "크래시 리포트 전송 시간 초과 ({}ms)",
                    self.deadline.as_millis()
                );
                false
            }
        }
    }

    /// 종료 (멱등)
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("크래시 리포트 서비스 이미 종료됨");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChannel;
    use nugu_core::models::message::{CrashLevel, CrashReportDetail};
    use nugu_core::models::status::GatewayStatus;

    fn report() -> CrashReportMessageRequest {
        CrashReportMessageRequest {
            details: vec![CrashReportDetail {
                level: CrashLevel::Error,
                message: "panic in audio thread".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn success_returns_true() {
        let service = CrashReportService::new(FakeChannel::new(), Duration::from_secs(1));
        assert!(service.send_crash_report(&report()).await);
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let channel = FakeChannel::new();
        channel.fail_crash_reports(GatewayStatus::internal("boom"));
        let service = CrashReportService::new(channel, Duration::from_secs(1));
        assert!(!service.send_crash_report(&report()).await);
    }

    #[tokio::test]
    async fn deadline_is_enforced() {
        let channel = FakeChannel::new();
        channel.delay_crash_reports(Duration::from_millis(500));
        let service = CrashReportService::new(channel, Duration::from_millis(20));
        assert!(!service.send_crash_report(&report()).await);
    }

    #[tokio::test]
    async fn shutdown_twice_is_a_no_op() {
        let service = CrashReportService::new(FakeChannel::new(), Duration::from_secs(1));
        service.shutdown();
        service.shutdown();
        assert!(!service.send_crash_report(&report()).await);
    }
}
