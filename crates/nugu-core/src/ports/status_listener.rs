//! 연결 상태 리스너 포트.

use crate::models::state::{ChangedReason, ConnectionStatus};

/// 애플리케이션 측 연결 상태 리스너
///
/// (status, reason) 쌍이 바뀔 때만 호출된다.
pub trait ConnectionStatusListener: Send + Sync {
    fn on_connection_status_changed(&self, status: ConnectionStatus, reason: ChangedReason);
}
