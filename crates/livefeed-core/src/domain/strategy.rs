//! 전략 손익 스냅샷.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::{Position, PositionSummary};

/// 전략과 그 포지션의 최신 상태.
///
/// `total_pnl`은 서버가 계산한 값이며 포지션으로부터 재계산하지 않습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// 전략 ID
    pub strategy_id: String,
    /// 포지션 목록
    pub positions: Vec<Position>,
    /// 서버 기준 총 손익
    pub total_pnl: Decimal,
    /// 스냅샷 수신 시각
    pub updated_at: DateTime<Utc>,
}

impl Strategy {
    /// 새 전략 스냅샷을 생성합니다.
    pub fn new(strategy_id: impl Into<String>, positions: Vec<Position>, total_pnl: Decimal) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            positions,
            total_pnl,
            updated_at: Utc::now(),
        }
    }

    /// 수익 상태인지 확인합니다.
    pub fn is_profit(&self) -> bool {
        self.total_pnl >= Decimal::ZERO
    }

    /// 포지션의 표시용 요약.
    pub fn summary(&self) -> PositionSummary {
        PositionSummary::from_positions(&self.positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use rust_decimal_macros::dec;

    #[test]
    fn test_total_pnl_is_not_recomputed() {
        let mut leg = Position::new(1, Side::Buy, dec!(50), dec!(100));
        leg.unrealized_pnl = Some(dec!(10));

        let strategy = Strategy::new("straddle-1", vec![leg], dec!(1250.50));
        assert_eq!(strategy.total_pnl, dec!(1250.50));
        assert_eq!(strategy.summary().total_unrealized_pnl, dec!(10));
        assert!(strategy.is_profit());
    }
}
