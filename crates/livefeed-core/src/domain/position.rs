//! 전략 포지션.
//!
//! 이 모듈은 서버가 보내는 포지션 스냅샷 타입을 정의합니다:
//! - `Side` - 포지션 방향
//! - `OptionType` - 옵션 유형 (CE/PE)
//! - `Position` - 개별 포지션
//! - `PositionSummary` - 표시용 요약
//!
//! 미실현 손익은 서버 값이 기준입니다. 로컬 계산은 서버 값이 없을 때의
//! 표시용 대체값일 뿐입니다.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 포지션 방향.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// 매수
    Buy,
    /// 매도
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// 옵션 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionType {
    /// 콜 옵션
    #[serde(rename = "CE")]
    Call,
    /// 풋 옵션
    #[serde(rename = "PE")]
    Put,
}

/// 전략에 속한 포지션 스냅샷.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// 포지션 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    /// 거래소 종목 ID
    pub instrument_id: i64,
    /// 종목명
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_name: Option<String>,
    /// 옵션 유형
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_type: Option<OptionType>,
    /// 행사가
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<Decimal>,
    /// 방향
    pub side: Side,
    /// 수량
    pub quantity: Decimal,
    /// 평균 단가
    pub avg_price: Decimal,
    /// 현재가 (시세 미수신 시 없음)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_price: Option<Decimal>,
    /// 서버가 계산한 미실현 손익
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<Decimal>,
    /// 실현 손익
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    /// 최소 필드로 포지션을 생성합니다.
    pub fn new(instrument_id: i64, side: Side, quantity: Decimal, avg_price: Decimal) -> Self {
        Self {
            position_id: None,
            instrument_id,
            instrument_name: None,
            option_type: None,
            strike: None,
            side,
            quantity,
            avg_price,
            current_price: None,
            unrealized_pnl: None,
            realized_pnl: None,
        }
    }

    /// 평가 가격. 현재가가 없으면 평균 단가를 사용합니다.
    pub fn mark_price(&self) -> Decimal {
        self.current_price.unwrap_or(self.avg_price)
    }

    /// 표시용 미실현 손익.
    ///
    /// 서버 값이 있으면 그대로 반환하고, 없으면 평가 가격으로 계산합니다.
    pub fn display_pnl(&self) -> Decimal {
        self.unrealized_pnl.unwrap_or_else(|| self.local_pnl())
    }

    /// 평가 가격 기준 로컬 손익 계산.
    fn local_pnl(&self) -> Decimal {
        let price_diff = match self.side {
            Side::Buy => self.mark_price() - self.avg_price,
            Side::Sell => self.avg_price - self.mark_price(),
        };
        price_diff * self.quantity.abs()
    }

    /// 진입 금액 대비 손익률(%). 평균 단가가 0이면 0.
    pub fn pnl_percent(&self) -> Decimal {
        let cost = self.avg_price * self.quantity.abs();
        if cost.is_zero() {
            return Decimal::ZERO;
        }
        self.display_pnl() / cost * Decimal::ONE_HUNDRED
    }
}

/// 포지션 목록의 표시용 요약.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSummary {
    /// 포지션 개수
    pub total_positions: usize,
    /// 표시용 미실현 손익 합계
    pub total_unrealized_pnl: Decimal,
    /// 실현 손익 합계
    pub total_realized_pnl: Decimal,
    /// 매수 포지션 개수
    pub long_count: usize,
    /// 매도 포지션 개수
    pub short_count: usize,
}

impl PositionSummary {
    /// 포지션 목록으로부터 요약을 생성합니다.
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = &'a Position>) -> Self {
        positions
            .into_iter()
            .fold(Self::default(), |mut summary, position| {
                summary.total_positions += 1;
                summary.total_unrealized_pnl += position.display_pnl();
                summary.total_realized_pnl += position.realized_pnl.unwrap_or_default();
                match position.side {
                    Side::Buy => summary.long_count += 1,
                    Side::Sell => summary.short_count += 1,
                }
                summary
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_mark_price_defaults_to_avg_price() {
        let position = Position::new(35001, Side::Buy, dec!(50), dec!(120));
        assert_eq!(position.mark_price(), dec!(120));
        assert_eq!(position.display_pnl(), Decimal::ZERO);
    }

    #[test]
    fn test_server_pnl_wins_over_local_math() {
        let mut position = Position::new(35001, Side::Buy, dec!(50), dec!(120));
        position.current_price = Some(dec!(130));
        assert_eq!(position.display_pnl(), dec!(500));

        position.unrealized_pnl = Some(dec!(480.25));
        assert_eq!(position.display_pnl(), dec!(480.25));
    }

    #[test]
    fn test_short_position_local_pnl() {
        let mut position = Position::new(35002, Side::Sell, dec!(25), dec!(80));
        position.current_price = Some(dec!(70));
        assert_eq!(position.display_pnl(), dec!(250));
        assert_eq!(position.pnl_percent(), dec!(12.5));
    }

    #[test]
    fn test_deserialize_wire_position() {
        let json = r#"{
            "position_id": "p-1",
            "instrument_id": 43210,
            "instrument_name": "NIFTY 22000 CE",
            "option_type": "CE",
            "strike": 22000,
            "quantity": 75,
            "side": "SELL",
            "avg_price": 110.5,
            "unrealized_pnl": -262.5
        }"#;

        let position: Position = serde_json::from_str(json).unwrap();
        assert_eq!(position.side, Side::Sell);
        assert_eq!(position.option_type, Some(OptionType::Call));
        assert_eq!(position.current_price, None);
        assert_eq!(position.mark_price(), dec!(110.5));
        assert_eq!(position.display_pnl(), dec!(-262.5));
    }

    #[test]
    fn test_summary_counts_sides() {
        let mut long = Position::new(1, Side::Buy, dec!(10), dec!(100));
        long.unrealized_pnl = Some(dec!(40));
        let mut short = Position::new(2, Side::Sell, dec!(10), dec!(50));
        short.unrealized_pnl = Some(dec!(-15));
        short.realized_pnl = Some(dec!(5));

        let summary = PositionSummary::from_positions([&long, &short]);
        assert_eq!(summary.total_positions, 2);
        assert_eq!(summary.long_count, 1);
        assert_eq!(summary.short_count, 1);
        assert_eq!(summary.total_unrealized_pnl, dec!(25));
        assert_eq!(summary.total_realized_pnl, dec!(5));
    }

    proptest! {
        #[test]
        fn prop_long_and_short_local_pnl_are_opposite(
            qty in 1i64..10_000,
            avg in 1i64..100_000,
            mark in 1i64..100_000,
        ) {
            let mut long = Position::new(1, Side::Buy, Decimal::from(qty), Decimal::from(avg));
            long.current_price = Some(Decimal::from(mark));
            let mut short = long.clone();
            short.side = Side::Sell;

            prop_assert_eq!(long.display_pnl(), -short.display_pnl());
            prop_assert_eq!(long.display_pnl(), Decimal::from((mark - avg) * qty));
        }
    }
}
