//! 전송 상태 → 연결 변경 사유 분류.

use nugu_core::models::state::ChangedReason;
use nugu_core::models::status::{GatewayStatus, StatusCode, TransportCause};

/// 실패 상태를 상태 머신에 보고할 사유로 변환
///
/// `was_connected`는 에러 직전에 연결이 확립되어 있었는지 여부.
/// 같은 코드라도 연결 전/후에 따라 사유가 달라진다.
pub fn classify(status: &GatewayStatus, was_connected: bool) -> ChangedReason {
    match status.code {
        StatusCode::Ok => ChangedReason::Success,
        StatusCode::Unavailable => {
            if was_connected {
                ChangedReason::ServerSideDisconnect
            } else if status.cause == Some(TransportCause::Dns) {
                ChangedReason::DnsTimedout
            } else {
                ChangedReason::ConnectionTimedout
            }
        }
        StatusCode::DeadlineExceeded => {
            if was_connected {
                ChangedReason::PingTimedout
            } else {
                ChangedReason::ConnectionTimedout
            }
        }
        StatusCode::Unauthenticated | StatusCode::PermissionDenied => ChangedReason::InvalidAuth,
        StatusCode::Unknown
        | StatusCode::Internal
        | StatusCode::DataLoss
        | StatusCode::ResourceExhausted => ChangedReason::ServerInternalError,
        StatusCode::Unimplemented
        | StatusCode::InvalidArgument
        | StatusCode::FailedPrecondition
        | StatusCode::OutOfRange
        | StatusCode::NotFound
        | StatusCode::AlreadyExists => ChangedReason::FailureProtocolError,
        StatusCode::Cancelled | StatusCode::Aborted => ChangedReason::InternalError,
    }
}
