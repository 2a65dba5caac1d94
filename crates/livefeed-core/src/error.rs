//! 스트리밍 클라이언트의 에러 타입.
//!
//! 에러는 복구 방식에 따라 분류됩니다:
//! - **Transport**: 소켓 수준 장애, 백오프 재연결로 자동 복구
//! - **Protocol**: 파싱 불가능한 프레임, 해당 프레임만 버림
//! - **Peer**: 서버가 보낸 `type:"error"` 프레임, 비치명적 알림
//! - **Terminal**: 재연결 시도 소진, 수동 재연결 필요

use thiserror::Error;

/// 스트리밍 클라이언트 에러.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// 소켓 연결/송수신 에러
    #[error("전송 에러: {0}")]
    Transport(String),

    /// 잘못된 형식의 프레임
    #[error("프로토콜 에러: {0}")]
    Protocol(String),

    /// 서버가 보낸 애플리케이션 에러
    #[error("서버 에러: {0}")]
    Peer(String),

    /// 최대 재연결 시도 횟수 초과
    #[error("최대 재연결 시도 횟수 초과 ({attempts}회). 수동으로 다시 연결하거나 페이지를 새로고침하세요.")]
    Terminal { attempts: u32 },

    /// 사용자 ID 또는 토큰 누락
    #[error("인증 정보 누락: {0}")]
    MissingCredentials(String),

    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 채널 태스크가 이미 종료됨
    #[error("채널 종료됨: {0}")]
    ChannelClosed(String),
}

/// 에러 복구 방식에 따른 분류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// 자동 재연결 대상
    Transport,
    /// 프레임 단위로 버림
    Protocol,
    /// 서버 알림
    Application,
    /// 수동 개입 필요
    Terminal,
    /// 클라이언트 측 사용 오류
    Local,
}

/// 스트리밍 작업을 위한 Result 타입.
pub type StreamResult<T> = Result<T, StreamError>;

impl StreamError {
    /// 에러 분류를 반환합니다.
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Transport(_) => ErrorCategory::Transport,
            StreamError::Protocol(_) => ErrorCategory::Protocol,
            StreamError::Peer(_) => ErrorCategory::Application,
            StreamError::Terminal { .. } => ErrorCategory::Terminal,
            StreamError::MissingCredentials(_)
            | StreamError::Config(_)
            | StreamError::ChannelClosed(_) => ErrorCategory::Local,
        }
    }

    /// 자동 재연결로 복구 가능한 에러인지 확인합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Transport(_))
    }

    /// 수동 재연결이 필요한 에러인지 확인합니다.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamError::Terminal { .. })
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Protocol(err.to_string())
    }
}

impl From<config::ConfigError> for StreamError {
    fn from(err: config::ConfigError) -> Self {
        StreamError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        let transport = StreamError::Transport("connection reset".to_string());
        assert!(transport.is_retryable());
        assert_eq!(transport.category(), ErrorCategory::Transport);

        let peer = StreamError::Peer("invalid strategy".to_string());
        assert!(!peer.is_retryable());
        assert_eq!(peer.category(), ErrorCategory::Application);
    }

    #[test]
    fn test_terminal_message_is_actionable() {
        let err = StreamError::Terminal { attempts: 5 };
        assert!(err.is_terminal());
        assert!(err.to_string().contains("수동으로 다시 연결"));
    }

    #[test]
    fn test_from_serde_error() {
        let err: StreamError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.category(), ErrorCategory::Protocol);
    }
}
