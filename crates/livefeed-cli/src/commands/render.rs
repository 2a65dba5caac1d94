//! 시세/전략 출력 형식.

use clap::ValueEnum;
use rust_decimal::Decimal;

use livefeed_core::{OptionType, Position, Quote, Strategy};
use livefeed_stream::AggregateChange;

/// 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// 사람이 읽기 쉬운 텍스트
    #[default]
    Text,
    /// 한 줄에 하나의 JSON 객체
    Json,
}

/// 집계 변경 하나를 출력 문자열로 변환합니다.
pub fn render_change(change: &AggregateChange, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => match change {
            AggregateChange::Quote(quote) => format_quote(quote),
            AggregateChange::Strategy(strategy) => format_strategy(strategy),
        },
        OutputFormat::Json => {
            let result = match change {
                AggregateChange::Quote(quote) => serde_json::to_string(quote),
                AggregateChange::Strategy(strategy) => serde_json::to_string(strategy),
            };
            result.unwrap_or_else(|e| format!(r#"{{"error":"{}"}}"#, e))
        }
    }
}

fn opt(value: Option<Decimal>) -> String {
    value.map(|v| v.normalize().to_string()).unwrap_or_else(|| "-".to_string())
}

fn signed(value: Decimal) -> String {
    let value = value.round_dp(2);
    if value >= Decimal::ZERO {
        format!("+{:.2}", value)
    } else {
        format!("{:.2}", value)
    }
}

/// 시세 한 줄.
pub fn format_quote(quote: &Quote) -> String {
    let change = match (quote.change, quote.change_percent) {
        (Some(change), Some(pct)) => format!("{} ({}%)", signed(change), signed(pct)),
        (Some(change), None) => signed(change),
        _ => "-".to_string(),
    };

    format!(
        "{} {:<12} LTP {:>10}  bid {:>10}  ask {:>10}  H {}  L {}  vol {}  chg {}",
        quote.received_at.format("%H:%M:%S"),
        quote.symbol,
        opt(quote.last_price),
        opt(quote.bid),
        opt(quote.ask),
        opt(quote.high),
        opt(quote.low),
        opt(quote.volume),
        change
    )
}

fn instrument_label(position: &Position) -> String {
    let name = position
        .instrument_name
        .clone()
        .unwrap_or_else(|| position.instrument_id.to_string());
    match (position.strike, position.option_type) {
        (Some(strike), Some(OptionType::Call)) => format!("{} {} CE", name, strike.normalize()),
        (Some(strike), Some(OptionType::Put)) => format!("{} {} PE", name, strike.normalize()),
        _ => name,
    }
}

/// 전략 요약과 포지션 목록.
pub fn format_strategy(strategy: &Strategy) -> String {
    let mut out = format!(
        "{} [{}] total P&L {} ({} positions)",
        strategy.updated_at.format("%H:%M:%S"),
        strategy.strategy_id,
        signed(strategy.total_pnl),
        strategy.positions.len()
    );

    for position in &strategy.positions {
        out.push_str(&format!(
            "\n    {:<4} {:>6} {:<24} avg {:>10}  mark {:>10}  pnl {:>10} ({}%)",
            position.side.to_string(),
            position.quantity.normalize(),
            instrument_label(position),
            position.avg_price.normalize(),
            position.mark_price().normalize(),
            signed(position.display_pnl()),
            signed(position.pnl_percent())
        ));
    }
    out
}
