//! 수신 프레임 라우팅.
//!
//! 프레임을 봉투(`type` 필드)로 파싱한 뒤 타입별 핸들러로 분배합니다.
//!
//! | type | 처리 |
//! |---|---|
//! | `connected`, `welcome` | 정보 |
//! | `pong`, `keepalive` | 정보 |
//! | `subscription_result` | 정보 (로그) |
//! | `market_data` | `MessageHandler::on_quote` |
//! | `strategy_pnl`, `strategy_data` | `MessageHandler::on_strategy` |
//! | `error` | `MessageHandler::on_peer_error` |
//! | 그 외 | 무시 |
//!
//! 파싱할 수 없는 프레임은 `StreamError::Protocol`로 반환되며, 호출자는
//! 로그만 남기고 버립니다.

use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info, trace};

use livefeed_core::{Quote, Strategy, StreamError, StreamResult};

use crate::protocol::{ChannelKind, MarketDataPayload, StrategyPayload, StrategyResult};

/// 정보성 메시지 종류.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    /// 서버 환영 메시지
    Connected,
    /// Keepalive 응답
    Pong,
    /// 구독 요청 결과
    SubscriptionResult,
}

/// 라우팅된 프레임의 타입별 처리기.
///
/// 기본 구현은 아무것도 하지 않으므로 필요한 메서드만 구현합니다.
pub trait MessageHandler {
    /// 시세 갱신.
    fn on_quote(&mut self, _quote: Quote) {}

    /// 전략 스냅샷 갱신.
    fn on_strategy(&mut self, _strategy: Strategy) {}

    /// 서버가 보낸 에러.
    fn on_peer_error(&mut self, _message: String) {}

    /// 정보성 메시지.
    fn on_info(&mut self, _kind: InfoKind, _detail: Option<String>) {}
}

/// 라우팅 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// 시세 전달됨 (종목명)
    Quote(String),
    /// 전략 스냅샷 전달됨 (전략 ID)
    Strategy(String),
    /// 서버 에러 전달됨
    PeerError(String),
    /// 정보성 메시지
    Info(InfoKind),
    /// 알 수 없거나 본문이 없어 무시됨
    Ignored(String),
}

/// 봉투 타입별 분배기.
#[derive(Debug, Clone, Copy)]
pub struct MessageRouter {
    kind: ChannelKind,
}

impl MessageRouter {
    /// 채널용 라우터를 생성합니다.
    pub fn new(kind: ChannelKind) -> Self {
        Self { kind }
    }

    /// 텍스트 프레임 하나를 파싱하여 핸들러로 분배합니다.
    pub fn route<H: MessageHandler + ?Sized>(&self, text: &str, handler: &mut H) -> StreamResult<Routed> {
        let envelope: Value = serde_json::from_str(text)?;
        let message_type = envelope
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| StreamError::Protocol("type 필드가 없는 프레임".to_string()))?;

        trace!(channel = %self.kind, %message_type, "프레임 수신");

        match message_type {
            "connected" | "welcome" => {
                let detail = text_field(&envelope, "message");
                debug!(channel = %self.kind, message = ?detail, "서버 환영 메시지");
                handler.on_info(InfoKind::Connected, detail);
                Ok(Routed::Info(InfoKind::Connected))
            }
            "pong" | "keepalive" => {
                trace!(channel = %self.kind, "pong 수신");
                handler.on_info(InfoKind::Pong, None);
                Ok(Routed::Info(InfoKind::Pong))
            }
            "subscription_result" => {
                let detail = envelope.get("result").map(Value::to_string);
                info!(channel = %self.kind, result = ?detail, "구독 결과");
                handler.on_info(InfoKind::SubscriptionResult, detail);
                Ok(Routed::Info(InfoKind::SubscriptionResult))
            }
            "market_data" => self.route_market_data(&envelope, handler),
            "strategy_pnl" | "strategy_data" => self.route_strategy(&envelope, handler),
            "error" => {
                let message = text_field(&envelope, "error")
                    .or_else(|| text_field(&envelope, "message"))
                    .unwrap_or_else(|| "Unknown error".to_string());
                handler.on_peer_error(message.clone());
                Ok(Routed::PeerError(message))
            }
            other => {
                debug!(channel = %self.kind, message_type = other, "처리하지 않는 메시지 타입");
                Ok(Routed::Ignored(other.to_string()))
            }
        }
    }

    fn route_market_data<H: MessageHandler + ?Sized>(
        &self,
        envelope: &Value,
        handler: &mut H,
    ) -> StreamResult<Routed> {
        let Some(data) = envelope.get("data").filter(|d| !d.is_null()) else {
            return Ok(Routed::Ignored("market_data".to_string()));
        };

        let payload: MarketDataPayload = serde_json::from_value(data.clone())?;
        let quote = Quote::from(payload);
        let symbol = quote.symbol.clone();
        handler.on_quote(quote);
        Ok(Routed::Quote(symbol))
    }

    fn route_strategy<H: MessageHandler + ?Sized>(
        &self,
        envelope: &Value,
        handler: &mut H,
    ) -> StreamResult<Routed> {
        let nested = match envelope.get("result").filter(|r| !r.is_null()) {
            Some(result) => serde_json::from_value::<StrategyResult>(result.clone())?.strategy,
            None => None,
        };
        let body = match nested {
            Some(body) => Some(body),
            None => match envelope.get("data").filter(|d| !d.is_null()) {
                Some(data) => Some(serde_json::from_value::<StrategyPayload>(data.clone())?),
                None => None,
            },
        };

        let Some(body) = body else {
            debug!(channel = %self.kind, "전략 본문이 없는 프레임");
            return Ok(Routed::Ignored("strategy".to_string()));
        };

        let strategy_id = text_field(envelope, "strategy_id")
            .or(body.strategy_id)
            .ok_or_else(|| StreamError::Protocol("strategy_id가 없는 전략 프레임".to_string()))?;

        let strategy = Strategy::new(
            strategy_id.clone(),
            body.positions.unwrap_or_default(),
            body.total_pnl.unwrap_or(Decimal::ZERO),
        );
        handler.on_strategy(strategy);
        Ok(Routed::Strategy(strategy_id))
    }
}

/// 비어 있지 않은 문자열 필드.
fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[derive(Default)]
    struct Recorder {
        quotes: Vec<Quote>,
        strategies: Vec<Strategy>,
        errors: Vec<String>,
        infos: Vec<InfoKind>,
    }

    impl MessageHandler for Recorder {
        fn on_quote(&mut self, quote: Quote) {
            self.quotes.push(quote);
        }
        fn on_strategy(&mut self, strategy: Strategy) {
            self.strategies.push(strategy);
        }
        fn on_peer_error(&mut self, message: String) {
            self.errors.push(message);
        }
        fn on_info(&mut self, kind: InfoKind, _detail: Option<String>) {
            self.infos.push(kind);
        }
    }

    fn route(text: &str) -> (StreamResult<Routed>, Recorder) {
        let mut recorder = Recorder::default();
        let result = MessageRouter::new(ChannelKind::Strategy).route(text, &mut recorder);
        (result, recorder)
    }

    #[test]
    fn test_market_data_routes_quote() {
        let (result, rec) =
            route(r#"{"type":"market_data","data":{"stock_name":"RELIANCE","LTP":2500}}"#);

        assert_eq!(result.unwrap(), Routed::Quote("RELIANCE".to_string()));
        assert_eq!(rec.quotes[0].last_price, Some(dec!(2500)));
    }

    #[test]
    fn test_strategy_pnl_uses_server_total() {
        let text = r#"{
            "type": "strategy_pnl",
            "strategy_id": "s-1",
            "result": {"type": "success", "strategy": {
                "strategy_id": "s-1",
                "total_pnl": 1250.50,
                "positions": [
                    {"instrument_id": 1, "side": "BUY", "quantity": 50, "avg_price": 100, "unrealized_pnl": 900},
                    {"instrument_id": 2, "side": "SELL", "quantity": 50, "avg_price": 80, "unrealized_pnl": 10}
                ]
            }}
        }"#;
        let (result, rec) = route(text);

        assert_eq!(result.unwrap(), Routed::Strategy("s-1".to_string()));
        assert_eq!(rec.strategies[0].total_pnl, dec!(1250.50));
        assert_eq!(rec.strategies[0].positions.len(), 2);
    }

    #[test]
    fn test_strategy_data_flat_shape_with_defaults() {
        let (result, rec) = route(r#"{"type":"strategy_data","data":{"strategy_id":"s-9"}}"#);

        assert_eq!(result.unwrap(), Routed::Strategy("s-9".to_string()));
        assert!(rec.strategies[0].positions.is_empty());
        assert_eq!(rec.strategies[0].total_pnl, Decimal::ZERO);
    }

    #[test]
    fn test_strategy_id_falls_back_to_nested() {
        let (result, _) =
            route(r#"{"type":"strategy_pnl","result":{"strategy":{"strategy_id":"inner","positions":[]}}}"#);
        assert_eq!(result.unwrap(), Routed::Strategy("inner".to_string()));
    }

    #[test]
    fn test_error_text_fallbacks() {
        let (r1, _) = route(r#"{"type":"error","error":"bad symbol"}"#);
        let (r2, _) = route(r#"{"type":"error","message":"rate limited"}"#);
        let (r3, rec) = route(r#"{"type":"error"}"#);

        assert_eq!(r1.unwrap(), Routed::PeerError("bad symbol".to_string()));
        assert_eq!(r2.unwrap(), Routed::PeerError("rate limited".to_string()));
        assert_eq!(r3.unwrap(), Routed::PeerError("Unknown error".to_string()));
        assert_eq!(rec.errors, vec!["Unknown error".to_string()]);
    }

    #[test]
    fn test_informational_types() {
        for (text, kind) in [
            (r#"{"type":"connected","message":"hi"}"#, InfoKind::Connected),
            (r#"{"type":"welcome"}"#, InfoKind::Connected),
            (r#"{"type":"pong"}"#, InfoKind::Pong),
            (r#"{"type":"keepalive"}"#, InfoKind::Pong),
            (r#"{"type":"subscription_result","result":{"ok":true}}"#, InfoKind::SubscriptionResult),
        ] {
            let (result, rec) = route(text);
            assert_eq!(result.unwrap(), Routed::Info(kind));
            assert_eq!(rec.infos, vec![kind]);
        }
    }

    #[test]
    fn test_unknown_type_is_ignored_even_with_error_field() {
        let (result, rec) = route(r#"{"type":"order_update","error":"nope"}"#);
        assert_eq!(result.unwrap(), Routed::Ignored("order_update".to_string()));
        assert!(rec.errors.is_empty());
    }

    #[test]
    fn test_malformed_frames_return_protocol_error() {
        for text in [
            "not json",
            r#"{"no_type":1}"#,
            r#"{"type":"market_data","data":{"LTP":1}}"#,
            r#"{"type":"strategy_data","data":{"positions":[]}}"#,
        ] {
            let (result, rec) = route(text);
            assert!(matches!(result, Err(StreamError::Protocol(_))), "{text}");
            assert!(rec.quotes.is_empty() && rec.strategies.is_empty());
        }
    }

    #[test]
    fn test_missing_body_is_ignored() {
        let (result, rec) = route(r#"{"type":"market_data"}"#);
        assert!(matches!(result, Ok(Routed::Ignored(_))));
        assert!(rec.quotes.is_empty());
    }
}
