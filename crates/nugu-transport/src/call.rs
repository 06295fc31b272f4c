//! 요청 단위 전송 핸들.
//!
//! `Call` 하나는 메시지 요청 하나를 감싸고, 성공/실패/취소 중 정확히 하나의
//! 결과만 전달한다. 이미 실행했거나 취소한 Call을 다시 쓰면 명시적 에러를 돌려준다.
//!
//! 응답 디렉티브를 기다리는 이벤트(`await_response`)는 같은 `dialogRequestId`를 가진
//! 디렉티브가 도착해야 성공한다. [`CorrelatingConsumer`]가 이를 이어 준다.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nugu_core::models::directive::{AttachmentMessage, Directive};
use nugu_core::models::message::{generate_id, MessageRequest};
use nugu_core::models::status::GatewayStatus;
use nugu_core::ports::consumer::MessageConsumer;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Call 실패 사유
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("이미 실행된 Call")]
    AlreadyExecuted,

    #[error("이미 취소된 Call")]
    AlreadyCanceled,

    #[error("Call 취소됨")]
    Canceled,

    #[error("응답 대기 시간 초과")]
    DeadlineExceeded,

    #[error("DeviceGateway에 연결되어 있지 않음")]
    NotConnected,

    #[error("전송 실패: {0}")]
    Status(GatewayStatus),
}

pub type CallResult = Result<(), CallError>;

/// 비동기 전송 결과 수신자
pub trait OnSendMessageListener: Send + Sync {
    fn on_success(&self, request: &MessageRequest);
    fn on_failure(&self, request: &MessageRequest, error: &CallError);
}

/// Call이 실제 전송에 쓰는 경로 (Transport가 구현)
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(&self, request: &MessageRequest) -> CallResult;
}

/// 진행 중인 Call 목록 (요청 message_id 기준)
#[derive(Clone, Default)]
pub struct PendingCalls {
    calls: Arc<Mutex<HashMap<String, Call>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    fn insert(&self, key: &str, call: Call) {
        self.calls.lock().insert(key.to_string(), call);
    }

    fn remove(&self, key: &str) {
        self.calls.lock().remove(key);
    }

    /// `dialog_request_id` 응답을 기다리던 Call을 성공 처리. 처리한 개수 반환.
    pub fn resolve_dialog(&self, dialog_request_id: &str) -> usize {
        if dialog_request_id.is_empty() {
            return 0;
        }

        let matched: Vec<Call> = self
            .calls
            .lock()
            .values()
            .filter(|call| call.awaits_dialog(dialog_request_id))
            .cloned()
            .collect();

        for call in &matched {
            call.complete(Ok(()));
        }
        matched.len()
    }

    /// 모든 진행 중 Call 취소
    pub fn cancel_all(&self) {
        let calls: Vec<Call> = self.calls.lock().drain().map(|(_, call)| call).collect();
        if !calls.is_empty() {
            debug!(count = calls.len(), "진행 중 Call 일괄 취소");
        }
        for call in calls {
            call.cancel();
        }
    }
}

/// 응답 디렉티브를 대기 중 Call과 맞춰 본 뒤 실제 소비자에게 넘긴다
pub struct CorrelatingConsumer {
    pending: PendingCalls,
    inner: Arc<dyn MessageConsumer>,
}

impl CorrelatingConsumer {
    pub fn new(pending: PendingCalls, inner: Arc<dyn MessageConsumer>) -> Self {
        Self { pending, inner }
    }
}

impl MessageConsumer for CorrelatingConsumer {
    fn consume_directives(&self, directives: Vec<Directive>) {
        let dialogs: HashSet<&str> = directives
            .iter()
            .map(|directive| directive.header.dialog_request_id.as_str())
            .collect();
        for dialog_request_id in dialogs {
            self.pending.resolve_dialog(dialog_request_id);
        }
        self.inner.consume_directives(directives);
    }

    fn consume_attachment(&self, attachment: AttachmentMessage) {
        self.inner.consume_attachment(attachment);
    }
}

#[derive(Default)]
struct CallState {
    result: Option<CallResult>,
    listener: Option<Arc<dyn OnSendMessageListener>>,
    outcome_tx: Option<oneshot::Sender<CallResult>>,
}

struct CallInner {
    key: String,
    request: MessageRequest,
    sender: Arc<dyn MessageSender>,
    pending: PendingCalls,
    timeout: Duration,
    executed: AtomicBool,
    canceled: AtomicBool,
    state: Mutex<CallState>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// 메시지 요청 하나에 대한 전송 핸들 (복제하면 같은 Call을 가리킨다)
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

impl Call {
    pub fn new(
        request: MessageRequest,
        sender: Arc<dyn MessageSender>,
        pending: PendingCalls,
        timeout: Duration,
    ) -> Self {
        let key = request
            .header()
            .map(|header| header.message_id.clone())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(generate_id);

        Self {
            inner: Arc::new(CallInner {
                key,
                request,
                sender,
                pending,
                timeout,
                executed: AtomicBool::new(false),
                canceled: AtomicBool::new(false),
                state: Mutex::new(CallState::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn request(&self) -> &MessageRequest {
        &self.inner.request
    }

    pub fn is_executed(&self) -> bool {
        self.inner.executed.load(Ordering::SeqCst)
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    pub fn is_completed(&self) -> bool {
        self.inner.state.lock().result.is_some()
    }

    /// 비동기 전송. 결과는 `listener`로 한 번만 전달된다.
    pub fn enqueue(&self, listener: Arc<dyn OnSendMessageListener>) -> CallResult {
        self.start(Some(listener)).map(|_| ())
    }

    /// 전송 후 결과까지 대기
    pub async fn execute(&self) -> CallResult {
        let outcome = self.start(None)?;
        outcome.await.unwrap_or(Err(CallError::Canceled))
    }

    /// 취소 (멱등). 이미 끝난 Call에는 영향이 없다.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::SeqCst) {
            debug!(key = %self.inner.key, "이미 취소된 Call");
            return;
        }
        if self.complete(Err(CallError::Canceled)) {
            debug!(key = %self.inner.key, "Call 취소");
        }
    }

    fn awaits_dialog(&self, dialog_request_id: &str) -> bool {
        self.inner.request.awaits_response()
            && self
                .inner
                .request
                .header()
                .is_some_and(|header| header.dialog_request_id == dialog_request_id)
    }

    fn start(
        &self,
        listener: Option<Arc<dyn OnSendMessageListener>>,
    ) -> Result<oneshot::Receiver<CallResult>, CallError> {
        if self.is_canceled() {
            return Err(CallError::AlreadyCanceled);
        }
        if self.inner.executed.swap(true, Ordering::SeqCst) {
            return Err(CallError::AlreadyExecuted);
        }

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.state.lock();
            if let Some(result) = state.result.clone() {
                // 확인 직후 취소가 끼어든 경우
                drop(state);
                self.notify(listener.as_deref(), &result);
                let _ = tx.send(result);
                return Ok(rx);
            }
            state.listener = listener;
            state.outcome_tx = Some(tx);
        }

        self.inner.pending.insert(&self.inner.key, self.clone());
        self.arm_timer();

        let call = self.clone();
        tokio::spawn(async move {
            let result = call.inner.sender.send_message(&call.inner.request).await;
            match result {
                Ok(()) if call.inner.request.awaits_response() => {
                    debug!(key = %call.inner.key, "전송 완료, 응답 디렉티브 대기");
                }
                other => {
                    call.complete(other);
                }
            }
        });

        Ok(rx)
    }

    fn arm_timer(&self) {
        let call = self.clone();
        let timeout = self.inner.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if call.complete(Err(CallError::DeadlineExceeded)) {
                warn!(
                    key = %call.inner.key,
                    kind = call.inner.request.kind(),
                    "Call 시간 초과 ({}ms)",
                    timeout.as_millis()
                );
            }
        });

        *self.inner.timer.lock() = Some(timer);
        if self.is_completed() {
            if let Some(timer) = self.inner.timer.lock().take() {
                timer.abort();
            }
        }
    }

    /// 결과 확정. 처음 한 번만 `true`.
    fn complete(&self, result: CallResult) -> bool {
        let (listener, tx) = {
            let mut state = self.inner.state.lock();
            if state.result.is_some() {
                return false;
            }
            state.result = Some(result.clone());
            (state.listener.take(), state.outcome_tx.take())
        };

        self.inner.pending.remove(&self.inner.key);
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }

        self.notify(listener.as_deref(), &result);
        if let Some(tx) = tx {
            let _ = tx.send(result);
        }
        true
    }

    fn notify(&self, listener: Option<&dyn OnSendMessageListener>, result: &CallResult) {
        let Some(listener) = listener else {
            return;
        };
        match result {
            Ok(()) => listener.on_success(&self.inner.request),
            Err(error) => listener.on_failure(&self.inner.request, error),
        }
    }
}
