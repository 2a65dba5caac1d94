//! 백엔드 스트리밍 프로토콜 (JSON 텍스트 프레임).
//!
//! # 송신
//!
//! ```text
//! {"type":"subscribe_stock","stock_name":"RELIANCE"}
//! {"type":"unsubscribe_stock","stock_name":"RELIANCE"}
//! {"type":"subscribe_strategy","strategy_id":"s-1"}
//! {"type":"get_strategy_pnl","strategy_id":"s-1"}
//! {"type":"ping"}
//! ```
//!
//! # 수신
//!
//! `connected`, `pong`, `subscription_result`, `market_data`,
//! `strategy_pnl`, `strategy_data`, `error`. 그 외 타입은 무시합니다.

use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use url::Url;

use livefeed_core::{Credentials, Position, Quote, StreamConfig, StreamError, StreamResult};

/// 정상 종료 close 코드.
pub const CLOSE_NORMAL: u16 = 1000;
/// 상대방 이탈(going away) close 코드.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// 논리 채널 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// 종목 시세 채널
    MarketData,
    /// 전략 손익 채널
    Strategy,
}

impl ChannelKind {
    /// 이 채널의 구독 프레임.
    pub fn subscribe_frame(&self, key: &str) -> OutboundMessage {
        match self {
            ChannelKind::MarketData => OutboundMessage::SubscribeStock {
                stock_name: key.to_string(),
            },
            ChannelKind::Strategy => OutboundMessage::SubscribeStrategy {
                strategy_id: key.to_string(),
            },
        }
    }

    /// 이 채널의 구독 해제 프레임. 전략 채널은 해제 프레임이 없습니다.
    pub fn unsubscribe_frame(&self, key: &str) -> Option<OutboundMessage> {
        match self {
            ChannelKind::MarketData => Some(OutboundMessage::UnsubscribeStock {
                stock_name: key.to_string(),
            }),
            ChannelKind::Strategy => None,
        }
    }

    /// 설정에서 이 채널의 경로를 선택합니다.
    pub fn path<'a>(&self, config: &'a StreamConfig) -> &'a str {
        match self {
            ChannelKind::MarketData => &config.market_data_path,
            ChannelKind::Strategy => &config.strategy_path,
        }
    }

    /// 채널 접속 URL (`{ws_base}{path}/{identity}?token={token}`).
    ///
    /// 식별자는 경로 세그먼트로, 토큰은 쿼리 값으로 퍼센트 인코딩됩니다.
    pub fn endpoint(&self, config: &StreamConfig, credentials: &Credentials) -> StreamResult<Endpoint> {
        let base = format!(
            "{}/{}",
            config.ws_base_url(),
            self.path(config).trim_matches('/')
        );
        let mut url = Url::parse(&base)
            .map_err(|e| StreamError::Config(format!("잘못된 채널 URL {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| StreamError::Config(format!("경로를 붙일 수 없는 URL: {}", base)))?
            .pop_if_empty()
            .push(&credentials.identity);

        let mut redacted = url.clone();
        redacted.query_pairs_mut().append_pair("token", "***");
        url.query_pairs_mut()
            .append_pair("token", credentials.token.expose_secret());

        Ok(Endpoint {
            url: url.into(),
            redacted: redacted.into(),
        })
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::MarketData => write!(f, "market-data"),
            ChannelKind::Strategy => write!(f, "strategy-builder"),
        }
    }
}

/// 채널 접속 주소.
///
/// 토큰은 쿼리 파라미터로만 전달되며 `Display`에서는 가려집니다.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: String,
    redacted: String,
}

impl Endpoint {
    /// 실제 접속에 사용하는 전체 URL.
    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// 로그용 URL (토큰 가림).
    pub fn redacted(&self) -> String {
        self.redacted.clone()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Endpoint").field(&self.redacted()).finish()
    }
}

/// close 코드가 정상 종료인지 확인합니다. 코드가 없으면 비정상입니다.
pub fn is_clean_close(code: Option<u16>) -> bool {
    matches!(code, Some(CLOSE_NORMAL) | Some(CLOSE_GOING_AWAY))
}

// ============================================================================
// 송신 메시지
// ============================================================================

/// 서버로 보내는 프레임.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// 종목 시세 구독
    SubscribeStock { stock_name: String },
    /// 종목 시세 구독 해제
    UnsubscribeStock { stock_name: String },
    /// 전략 손익 구독
    SubscribeStrategy { strategy_id: String },
    /// 전략 손익 1회 요청
    GetStrategyPnl { strategy_id: String },
    /// Keepalive
    Ping,
}

impl OutboundMessage {
    /// JSON 텍스트로 직렬화합니다.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 이 프레임이 구독 대상으로 삼는 키.
    pub fn key(&self) -> Option<&str> {
        match self {
            OutboundMessage::SubscribeStock { stock_name }
            | OutboundMessage::UnsubscribeStock { stock_name } => Some(stock_name.as_str()),
            OutboundMessage::SubscribeStrategy { strategy_id }
            | OutboundMessage::GetStrategyPnl { strategy_id } => Some(strategy_id.as_str()),
            OutboundMessage::Ping => None,
        }
    }
}

// ============================================================================
// 수신 페이로드
// ============================================================================

/// `market_data.data` 페이로드.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataPayload {
    pub stock_name: String,
    #[serde(rename = "LTP", default)]
    pub ltp: Option<Decimal>,
    #[serde(rename = "High", default)]
    pub high: Option<Decimal>,
    #[serde(rename = "Low", default)]
    pub low: Option<Decimal>,
    #[serde(rename = "Bid", default)]
    pub bid: Option<Decimal>,
    #[serde(rename = "Ask", default)]
    pub ask: Option<Decimal>,
    #[serde(rename = "Volume", default)]
    pub volume: Option<Decimal>,
    #[serde(rename = "Change", default)]
    pub change: Option<Decimal>,
    #[serde(rename = "ChangePercent", default)]
    pub change_percent: Option<Decimal>,
}

impl From<MarketDataPayload> for Quote {
    fn from(payload: MarketDataPayload) -> Self {
        Quote {
            symbol: payload.stock_name,
            last_price: payload.ltp,
            bid: payload.bid,
            ask: payload.ask,
            high: payload.high,
            low: payload.low,
            volume: payload.volume,
            change: payload.change,
            change_percent: payload.change_percent,
            received_at: chrono::Utc::now(),
        }
    }
}

/// 전략 스냅샷 본문 (`result.strategy` 또는 `data`).
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyPayload {
    #[serde(default)]
    pub strategy_id: Option<String>,
    #[serde(default)]
    pub positions: Option<Vec<Position>>,
    #[serde(default)]
    pub total_pnl: Option<Decimal>,
}

/// `strategy_pnl.result` 래퍼.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyResult {
    #[serde(default)]
    pub strategy: Option<StrategyPayload>,
}
