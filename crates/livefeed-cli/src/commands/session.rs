//! 채널 출력 루프.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Interval;
use tracing::{info, warn};

use livefeed_stream::{ChannelNotice, StreamHandle};

use super::render::{render_change, OutputFormat};

/// 전략 손익 주기적 요청 계획.
#[derive(Debug, Clone)]
pub struct PollPlan {
    /// 요청 간격
    pub every: Duration,
    /// 요청할 전략 ID
    pub strategy_ids: Vec<String>,
}

/// 채널의 집계 변경을 출력하며 종료 신호나 최종 실패까지 실행합니다.
///
/// 재연결 시도가 소진되면 채널을 정리하고 에러를 반환합니다.
pub async fn drive(
    handle: &StreamHandle,
    format: OutputFormat,
    poll: Option<PollPlan>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let kind = handle.kind();
    let mut changes = handle.changes();
    let mut notices = handle.notices();
    let mut poll_timer = poll.as_ref().map(|plan| tokio::time::interval(plan.every));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(channel = %kind, "종료 신호 수신");
                let _ = handle.shutdown().await;
                return Ok(());
            }
            change = changes.recv() => match change {
                Ok(change) => println!("{}", render_change(&change, format)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %kind, skipped, "출력이 밀려 변경 알림을 건너뜀");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            notice = notices.recv() => match notice {
                Ok(ChannelNotice::Error(err)) if err.is_terminal() => {
                    let _ = handle.shutdown().await;
                    return Err(anyhow::Error::new(err).context(format!("{} 채널 연결 실패", kind)));
                }
                Ok(ChannelNotice::Error(err)) => {
                    warn!(channel = %kind, error = %err, "채널 에러");
                }
                Ok(ChannelNotice::StateChanged { from, to }) => {
                    info!(channel = %kind, %from, %to, "연결 상태 변경");
                }
                Ok(ChannelNotice::ReconnectScheduled { attempt, delay }) => {
                    info!(channel = %kind, attempt, delay_ms = delay.as_millis() as u64, "재연결 대기");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(channel = %kind, skipped, "알림을 건너뜀");
                }
                Err(RecvError::Closed) => return Ok(()),
            },
            _ = next_tick(&mut poll_timer) => {
                if let Some(plan) = &poll {
                    for strategy_id in &plan.strategy_ids {
                        handle.request_strategy_pnl(strategy_id.clone()).await?;
                    }
                }
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
