//! 실시간 집계 계층.
//!
//! 종목별 최신 시세와 전략별 최신 스냅샷을 보관하는 메모리 캐시입니다.
//! 키마다 마지막으로 도착한 값이 이깁니다 (last-write-wins).
//!
//! - 시세: 종목 단위로 통째로 교체 (부분 병합 없음)
//! - 전략: 포지션 목록과 `total_pnl`을 한 번에 교체

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, trace};

use livefeed_core::{PositionSummary, Quote, Strategy};

use crate::listeners::{ListenerId, Listeners};

/// 집계 변경 알림.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateChange {
    /// 종목 시세 교체됨
    Quote(Quote),
    /// 전략 스냅샷 교체됨
    Strategy(Strategy),
}

impl AggregateChange {
    /// 변경된 키 (종목명 또는 전략 ID).
    pub fn key(&self) -> &str {
        match self {
            AggregateChange::Quote(quote) => &quote.symbol,
            AggregateChange::Strategy(strategy) => &strategy.strategy_id,
        }
    }
}

/// 보유 중인 모든 전략의 표시용 요약.
///
/// `total_pnl`은 각 전략의 서버 합계를 더한 값입니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PortfolioSummary {
    /// 전략 수
    pub strategy_count: usize,
    /// 서버 기준 총 손익 합계
    pub total_pnl: Decimal,
    /// 전체 포지션 요약
    pub positions: PositionSummary,
}

/// 시세/전략 집계기.
#[derive(Debug, Default)]
pub struct LiveAggregator {
    quotes: HashMap<String, Quote>,
    strategies: HashMap<String, Strategy>,
    listeners: Listeners<AggregateChange>,
}

impl LiveAggregator {
    /// 빈 집계기를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 종목 시세를 교체합니다.
    pub fn apply_quote(&mut self, quote: Quote) {
        trace!(symbol = %quote.symbol, last_price = ?quote.last_price, "시세 갱신");
        self.quotes.insert(quote.symbol.clone(), quote.clone());
        self.listeners.emit(&AggregateChange::Quote(quote));
    }

    /// 전략 스냅샷을 교체합니다.
    pub fn apply_strategy(&mut self, strategy: Strategy) {
        debug!(
            strategy_id = %strategy.strategy_id,
            positions = strategy.positions.len(),
            total_pnl = %strategy.total_pnl,
            "전략 스냅샷 갱신"
        );
        self.strategies
            .insert(strategy.strategy_id.clone(), strategy.clone());
        self.listeners.emit(&AggregateChange::Strategy(strategy));
    }

    /// 종목의 최신 시세.
    pub fn quote(&self, symbol: &str) -> Option<&Quote> {
        self.quotes.get(symbol)
    }

    /// 전략의 최신 스냅샷.
    pub fn strategy(&self, strategy_id: &str) -> Option<&Strategy> {
        self.strategies.get(strategy_id)
    }

    /// 모든 시세.
    pub fn quotes(&self) -> impl Iterator<Item = &Quote> {
        self.quotes.values()
    }

    /// 모든 전략.
    pub fn strategies(&self) -> impl Iterator<Item = &Strategy> {
        self.strategies.values()
    }

    /// 보유 전략 전체의 요약.
    pub fn portfolio_summary(&self) -> PortfolioSummary {
        PortfolioSummary {
            strategy_count: self.strategies.len(),
            total_pnl: self.strategies.values().map(|s| s.total_pnl).sum(),
            positions: PositionSummary::from_positions(
                self.strategies.values().flat_map(|s| s.positions.iter()),
            ),
        }
    }

    /// 캐시를 비웁니다. 리스너는 유지됩니다.
    pub fn clear(&mut self) {
        self.quotes.clear();
        self.strategies.clear();
    }

    /// 변경 리스너를 등록합니다.
    pub fn subscribe(&mut self, callback: impl FnMut(&AggregateChange) + Send + 'static) -> ListenerId {
        self.listeners.subscribe(callback)
    }

    /// 변경 리스너를 해제합니다.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livefeed_core::{Position, Side};
    use rust_decimal_macros::dec;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_quotes_are_independent_and_replaced_wholesale() {
        let mut agg = LiveAggregator::new();

        let mut x = Quote::empty("X").with_last_price(dec!(10));
        x.bid = Some(dec!(9.9));
        agg.apply_quote(x);
        agg.apply_quote(Quote::empty("Y").with_last_price(dec!(20)));
        agg.apply_quote(Quote::empty("X").with_last_price(dec!(11)));

        let x = agg.quote("X").unwrap();
        assert_eq!(x.last_price, Some(dec!(11)));
        assert_eq!(x.bid, None);
        assert_eq!(agg.quote("Y").unwrap().last_price, Some(dec!(20)));
    }

    #[test]
    fn test_strategy_snapshot_replaces_positions_and_total() {
        let mut agg = LiveAggregator::new();
        let legs = vec![
            Position::new(1, Side::Buy, dec!(50), dec!(100)),
            Position::new(2, Side::Sell, dec!(50), dec!(90)),
        ];
        agg.apply_strategy(Strategy::new("s-1", legs, dec!(1250.50)));
        agg.apply_strategy(Strategy::new("s-1", vec![], dec!(-3)));

        let strategy = agg.strategy("s-1").unwrap();
        assert!(strategy.positions.is_empty());
        assert_eq!(strategy.total_pnl, dec!(-3));
    }

    #[test]
    fn test_listeners_see_complete_snapshots() {
        let mut agg = LiveAggregator::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        agg.subscribe(move |change| {
            if let AggregateChange::Strategy(s) = change {
                sink.lock().unwrap().push((s.positions.len(), s.total_pnl));
            }
        });

        let legs = vec![
            Position::new(1, Side::Buy, dec!(1), dec!(1)),
            Position::new(2, Side::Buy, dec!(1), dec!(1)),
        ];
        agg.apply_strategy(Strategy::new("s-1", legs, dec!(1250.50)));

        assert_eq!(*seen.lock().unwrap(), vec![(2, dec!(1250.50))]);
    }

    #[test]
    fn test_portfolio_summary_sums_server_totals() {
        let mut agg = LiveAggregator::new();
        let mut leg = Position::new(1, Side::Buy, dec!(10), dec!(100));
        leg.unrealized_pnl = Some(dec!(999));

        agg.apply_strategy(Strategy::new("a", vec![leg], dec!(100)));
        agg.apply_strategy(Strategy::new("b", vec![], dec!(-40.5)));

        let summary = agg.portfolio_summary();
        assert_eq!(summary.strategy_count, 2);
        assert_eq!(summary.total_pnl, dec!(59.5));
        assert_eq!(summary.positions.total_unrealized_pnl, dec!(999));
    }
}
