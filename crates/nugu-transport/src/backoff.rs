//! 재연결 BackOff 정책.
//!
//! 시도 횟수 예산과 지수 지연(상한 있음)을 계산한다. I/O는 하지 않으며,
//! `await_retry`는 지연 후 관찰자에게 결과를 알린다.
//! 인스턴스당 진행 중인 재시도 시퀀스는 하나라고 가정한다.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use nugu_core::config::BackoffConfig;
use nugu_core::models::status::StatusCode;
use thiserror::Error;
use tracing::{debug, warn};

/// BackOff 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BackoffError {
    /// 시도 예산 소진: 호출자는 다음 서버 정책으로 넘어가야 한다
    #[error("최대 재시도 횟수 초과")]
    MaxAttemptExceed,
    /// BackOff가 종료됨
    #[error("BackOff 종료됨")]
    Shutdown,
}

/// 재시도 결과 수신자
pub trait BackOffObserver: Send + Sync {
    /// 지연이 끝남: 아직 끊겨 있으면 재연결
    fn on_retry(&self, attempt: u32);
    /// 재시도 불가
    fn on_error(&self, error: BackoffError);
}

/// 지수 BackOff
#[derive(Debug)]
pub struct BackOff {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    max_attempts: AtomicU32,
    attempts: AtomicU32,
    shutdown: AtomicBool,
}

impl BackOff {
    pub fn new(config: &BackoffConfig, max_attempts: u32) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            max_attempts: AtomicU32::new(max_attempts),
            attempts: AtomicU32::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// 시도 횟수 초기화 (연결 성공, 새 정책 획득 시)
    pub fn reset(&self) {
        self.attempts.store(0, Ordering::SeqCst);
    }

    /// 새 서버 정책의 재시도 한도로 초기화
    pub fn reset_with_limit(&self, max_attempts: u32) {
        self.max_attempts.store(max_attempts, Ordering::SeqCst);
        self.reset();
    }

    /// 지금까지 소비한 시도 횟수
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.load(Ordering::SeqCst)
    }

    pub fn has_attempt_remaining(&self) -> bool {
        self.attempts() < self.max_attempts()
    }

    /// `attempt`번째(1부터) 재시도 전 지연
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !millis.is_finite() || millis >= self.max_delay.as_millis() as f64 {
            self.max_delay
        } else {
            Duration::from_millis(millis as u64)
        }
    }

    /// 시도 예산을 확인하고, 남아 있으면 지연 후 `on_retry`, 없으면 `on_error`
    pub async fn await_retry(&self, code: StatusCode, observer: &dyn BackOffObserver) {
        if self.is_shutdown() {
            debug!("BackOff 종료됨, 재시도 생략 (code={code})");
            return;
        }

        let max_attempts = self.max_attempts();
        let attempt = match self
            .attempts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < max_attempts).then_some(n + 1)
            }) {
            Ok(previous) => previous + 1,
            Err(_) => {
                warn!(max_attempts, "재시도 횟수 초과 (code={code})");
                observer.on_error(BackoffError::MaxAttemptExceed);
                return;
            }
        };

        let delay = self.delay_for(attempt);
        debug!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            "재시도 대기 (code={code})"
        );
        tokio::time::sleep(delay).await;

        if self.is_shutdown() {
            debug!("대기 중 BackOff 종료됨");
            return;
        }
        observer.on_retry(attempt);
    }

    /// 종료 (멱등)
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            debug!("BackOff 이미 종료됨");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        retries: Mutex<Vec<u32>>,
        errors: Mutex<Vec<BackoffError>>,
    }

    impl BackOffObserver for Recorder {
        fn on_retry(&self, attempt: u32) {
            self.retries.lock().push(attempt);
        }

        fn on_error(&self, error: BackoffError) {
            self.errors.lock().push(error);
        }
    }

    fn config() -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
        }
    }

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let backoff = BackOff::new(&config(), 10);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(backoff.delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_budget_is_exhausted() {
        let backoff = BackOff::new(&config(), 2);
        let recorder = Recorder::default();

        backoff.await_retry(StatusCode::Unavailable, &recorder).await;
        backoff.await_retry(StatusCode::Unavailable, &recorder).await;
        backoff.await_retry(StatusCode::Unavailable, &recorder).await;

        assert_eq!(*recorder.retries.lock(), vec![1, 2]);
        assert_eq!(*recorder.errors.lock(), vec![BackoffError::MaxAttemptExceed]);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_attempt_numbering() {
        let backoff = BackOff::new(&config(), 3);
        let recorder = Recorder::default();

        backoff.await_retry(StatusCode::Unavailable, &recorder).await;
        backoff.await_retry(StatusCode::Unavailable, &recorder).await;
        backoff.reset();
        backoff.await_retry(StatusCode::Unavailable, &recorder).await;

        assert_eq!(*recorder.retries.lock(), vec![1, 2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_limit_exhausts_immediately() {
        let backoff = BackOff::new(&config(), 0);
        let recorder = Recorder::default();

        backoff.await_retry(StatusCode::Unavailable, &recorder).await;

        assert!(recorder.retries.lock().is_empty());
        assert_eq!(recorder.errors.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_suppresses_callbacks() {
        let backoff = BackOff::new(&config(), 3);
        let recorder = Recorder::default();

        backoff.shutdown();
        backoff.shutdown();
        backoff.await_retry(StatusCode::Unavailable, &recorder).await;

        assert!(recorder.retries.lock().is_empty());
        assert!(recorder.errors.lock().is_empty());
    }

    #[test]
    fn reset_with_limit_replaces_budget() {
        let backoff = BackOff::new(&config(), 1);
        backoff.reset_with_limit(5);
        assert_eq!(backoff.max_attempts(), 5);
        assert_eq!(backoff.attempts(), 0);
        assert!(backoff.has_attempt_remaining());
    }
}
