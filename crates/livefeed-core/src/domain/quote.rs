//! 종목별 실시간 시세.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 종목별 최신 시세 스냅샷.
///
/// 서버가 보낸 필드만 채워지며, 없는 필드는 `None`입니다.
/// 새 시세는 이전 시세를 통째로 대체합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// 종목명
    pub symbol: String,
    /// 최근 체결가 (LTP)
    pub last_price: Option<Decimal>,
    /// 최우선 매수 호가
    pub bid: Option<Decimal>,
    /// 최우선 매도 호가
    pub ask: Option<Decimal>,
    /// 고가
    pub high: Option<Decimal>,
    /// 저가
    pub low: Option<Decimal>,
    /// 거래량
    pub volume: Option<Decimal>,
    /// 전일 대비
    pub change: Option<Decimal>,
    /// 등락률 (%)
    pub change_percent: Option<Decimal>,
    /// 수신 시각
    pub received_at: DateTime<Utc>,
}

impl Quote {
    /// 가격 정보가 없는 빈 시세를 생성합니다.
    pub fn empty(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            last_price: None,
            bid: None,
            ask: None,
            high: None,
            low: None,
            volume: None,
            change: None,
            change_percent: None,
            received_at: Utc::now(),
        }
    }

    /// 최근 체결가를 설정합니다.
    pub fn with_last_price(mut self, price: Decimal) -> Self {
        self.last_price = Some(price);
        self
    }

    /// 매수/매도 호가 스프레드. 둘 중 하나라도 없으면 None.
    pub fn spread(&self) -> Option<Decimal> {
        Some(self.ask? - self.bid?)
    }

    /// 매수/매도 호가 중간값.
    pub fn mid_price(&self) -> Option<Decimal> {
        Some((self.ask? + self.bid?) / Decimal::TWO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_spread_requires_both_sides() {
        let mut quote = Quote::empty("RELIANCE").with_last_price(dec!(2500));
        assert_eq!(quote.spread(), None);

        quote.bid = Some(dec!(2499.5));
        quote.ask = Some(dec!(2500.5));
        assert_eq!(quote.spread(), Some(dec!(1.0)));
        assert_eq!(quote.mid_price(), Some(dec!(2500)));
    }
}
