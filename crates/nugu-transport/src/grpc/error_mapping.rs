use std::error::Error as StdError;
use std::io::ErrorKind;

use nugu_core::models::status::{GatewayStatus, StatusCode, TransportCause};
use tonic::Status;

pub fn map_grpc_status(status: &Status) -> GatewayStatus {
    let mut code = StatusCode::from_i32(status.code() as i32);
    let cause = find_cause(status.source());

    // hyper/io 에러가 Unknown으로 감싸져 올라온 경우
    if code == StatusCode::Unknown && cause.is_some() {
        code = StatusCode::Unavailable;
    }

    GatewayStatus {
        code,
        message: status.message().to_string(),
        cause,
    }
}

/// 채널 연결 실패 → UNAVAILABLE
pub fn map_transport_error(error: &tonic::transport::Error) -> GatewayStatus {
    let mut status = GatewayStatus::unavailable(format!("gRPC connection failed: {error}"));
    status.cause = find_cause(Some(error)).or(Some(TransportCause::Io));
    status
}

fn find_cause(mut current: Option<&(dyn StdError + 'static)>) -> Option<TransportCause> {
    let mut found = None;

    while let Some(error) = current {
        if let Some(io) = error.downcast_ref::<std::io::Error>() {
            match io.kind() {
                ErrorKind::ConnectionRefused => return Some(TransportCause::ConnectionRefused),
                ErrorKind::TimedOut => return Some(TransportCause::Timeout),
                _ => found = found.or(Some(TransportCause::Io)),
            }
        }

        let text = error.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return Some(TransportCause::Dns);
        }
        if text.contains("connection refused") {
            return Some(TransportCause::ConnectionRefused);
        }
        if text.contains("timed out") {
            found = Some(TransportCause::Timeout);
        }

        current = error.source();
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_grpc_code_and_message() {
        let status = map_grpc_status(&Status::unauthenticated("bad token"));
        assert_eq!(status.code, StatusCode::Unauthenticated);
        assert_eq!(status.message, "bad token");
        assert_eq!(status.cause, None);
    }

    #[test]
    fn unknown_with_refused_socket_becomes_unavailable() {
        let io = std::io::Error::new(ErrorKind::ConnectionRefused, "refused");
        let status = map_grpc_status(&Status::from_error(Box::new(io)));

        assert_eq!(status.code, StatusCode::Unavailable);
        assert_eq!(status.cause, Some(TransportCause::ConnectionRefused));
    }

    #[test]
    fn dns_failure_found_in_source_chain() {
        let io = std::io::Error::new(
            ErrorKind::Other,
            "dns error: failed to lookup address information",
        );
        let status = map_grpc_status(&Status::from_error(Box::new(io)));

        assert_eq!(status.cause, Some(TransportCause::Dns));
    }

    #[test]
    fn deadline_without_source_has_no_cause() {
        let status = map_grpc_status(&Status::deadline_exceeded("ping"));
        assert_eq!(status.code, StatusCode::DeadlineExceeded);
        assert_eq!(status.cause, None);
    }
}
