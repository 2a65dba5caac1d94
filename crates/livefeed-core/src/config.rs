//! 설정 관리.
//!
//! 설정은 다음 순서로 병합됩니다 (뒤가 우선):
//! 1. 내장 기본값
//! 2. TOML 설정 파일 (선택)
//! 3. `LIVEFEED__` 접두사 환경 변수 (예: `LIVEFEED__RECONNECT__MAX_ATTEMPTS=3`)

use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// 스트리밍 클라이언트 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// 백엔드 API 기본 URL (http/https면 ws/wss로 변환)
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// 시세 채널 경로
    #[serde(default = "default_market_data_path")]
    pub market_data_path: String,
    /// 전략 손익 채널 경로
    #[serde(default = "default_strategy_path")]
    pub strategy_path: String,
    /// 재연결 정책
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Keepalive 설정
    #[serde(default)]
    pub keepalive: KeepaliveConfig,
    /// 소비자용 이벤트 버퍼 크기
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_market_data_path() -> String {
    "/api/ws/market-data".to_string()
}
fn default_strategy_path() -> String {
    "/api/strategy-builder/ws/strategy-builder".to_string()
}
fn default_event_buffer() -> usize {
    1024
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            market_data_path: default_market_data_path(),
            strategy_path: default_strategy_path(),
            reconnect: ReconnectConfig::default(),
            keepalive: KeepaliveConfig::default(),
            event_buffer: default_event_buffer(),
            logging: LoggingConfig::default(),
        }
    }
}

/// 재연결 정책 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    /// 기본 지연 (밀리초)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// 최대 지연 (밀리초)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// 최대 재연결 시도 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    5
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// 기본 지연을 Duration으로 반환
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// 최대 지연을 Duration으로 반환
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Keepalive 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeepaliveConfig {
    /// ping 전송 간격 (초, 0이면 비활성화)
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

fn default_ping_interval_secs() -> u64 {
    30
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval_secs(),
        }
    }
}

impl KeepaliveConfig {
    /// ping 간격. 비활성화 상태면 None.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl StreamConfig {
    /// 파일(선택)과 환경 변수에서 설정을 로드합니다.
    pub fn load(path: Option<&Path>) -> StreamResult<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("LIVEFEED")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: StreamConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 설정 값의 유효성을 검사합니다.
    pub fn validate(&self) -> StreamResult<()> {
        const SCHEMES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];
        if !SCHEMES.iter().any(|s| self.api_base_url.starts_with(s)) {
            return Err(StreamError::Config(format!(
                "api_base_url은 http(s) 또는 ws(s) URL이어야 합니다: {}",
                self.api_base_url
            )));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(StreamError::Config(
                "reconnect.max_attempts는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(StreamError::Config(
                "reconnect.base_delay_ms는 0보다 커야 합니다".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(StreamError::Config(
                "reconnect.max_delay_ms는 base_delay_ms 이상이어야 합니다".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(StreamError::Config("event_buffer는 0보다 커야 합니다".to_string()));
        }
        Ok(())
    }

    /// API 기본 URL을 WebSocket 기본 URL로 변환합니다.
    ///
    /// `https://` → `wss://`, `http://` → `ws://`. 이미 ws(s)면 그대로 둡니다.
    pub fn ws_base_url(&self) -> String {
        let base = self.api_base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        }
    }
}

/// 채널 접속에 사용되는 세션 식별자와 토큰.
#[derive(Clone)]
pub struct Credentials {
    /// 세션 식별자 (사용자 ID)
    pub identity: String,
    /// Bearer 토큰
    pub token: SecretString,
}

impl Credentials {
    /// 새 자격증명을 생성합니다.
    pub fn new(identity: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            token: SecretString::from(token.into()),
        }
    }

    /// `LIVEFEED_USER_ID`, `LIVEFEED_TOKEN` 환경 변수에서 로드합니다.
    pub fn from_env() -> StreamResult<Self> {
        dotenvy::dotenv().ok();

        let identity = std::env::var("LIVEFEED_USER_ID").map_err(|_| {
            StreamError::MissingCredentials(
                "LIVEFEED_USER_ID 환경변수가 설정되지 않았습니다".to_string(),
            )
        })?;
        let token = std::env::var("LIVEFEED_TOKEN").map_err(|_| {
            StreamError::MissingCredentials(
                "LIVEFEED_TOKEN 환경변수가 설정되지 않았습니다".to_string(),
            )
        })?;

        Ok(Self::new(identity, token))
    }

    /// 식별자와 토큰이 모두 비어있지 않은지 확인합니다.
    pub fn is_complete(&self) -> bool {
        !self.identity.trim().is_empty() && !self.token.expose_secret().trim().is_empty()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("token", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reconnect_policy() {
        let config = StreamConfig::default();
        assert_eq!(config.reconnect.base_delay(), Duration::from_millis(1000));
        assert_eq!(config.reconnect.max_delay(), Duration::from_millis(30000));
        assert_eq!(config.reconnect.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ws_base_url_scheme_rewrite() {
        let mut config = StreamConfig {
            api_base_url: "https://api.example.com/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.ws_base_url(), "wss://api.example.com");

        config.api_base_url = "http://localhost:8000".to_string();
        assert_eq!(config.ws_base_url(), "ws://localhost:8000");

        config.api_base_url = "wss://stream.example.com".to_string();
        assert_eq!(config.ws_base_url(), "wss://stream.example.com");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = StreamConfig {
            api_base_url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(StreamError::Config(_))));

        let mut config = StreamConfig::default();
        config.reconnect.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = StreamConfig::default();
        config.reconnect.max_delay_ms = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keepalive_disabled_with_zero() {
        let keepalive = KeepaliveConfig {
            ping_interval_secs: 0,
        };
        assert!(keepalive.ping_interval().is_none());
        assert_eq!(
            KeepaliveConfig::default().ping_interval(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_credentials_completeness_and_redaction() {
        let creds = Credentials::new("42", "secret-token");
        assert!(creds.is_complete());
        assert!(!format!("{:?}", creds).contains("secret-token"));

        assert!(!Credentials::new("42", "  ").is_complete());
        assert!(!Credentials::new("", "token").is_complete());
    }

    #[test]
    fn test_deserialize_partial_toml_section() {
        let config: StreamConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "api_base_url = \"https://api.example.com\"\n[reconnect]\nmax_attempts = 3\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.keepalive.ping_interval_secs, 30);
    }

    #[test]
    fn test_partial_logging_section_keeps_default_format() {
        let config: StreamConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[logging]\nlevel = \"debug\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_env_overrides_single_logging_field() {
        let env = std::collections::HashMap::from([(
            "LIVEFEED__LOGGING__LEVEL".to_string(),
            "debug".to_string(),
        )]);
        let config: StreamConfig = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("LIVEFEED")
                    .prefix_separator("__")
                    .separator("__")
                    .source(Some(env)),
            )
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.reconnect.max_attempts, 5);
    }
}
