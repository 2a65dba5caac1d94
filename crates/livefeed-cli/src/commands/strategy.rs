//! 전략 손익 실시간 출력.

use std::future::Future;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use tracing::info;

use livefeed_core::{Credentials, StreamConfig};
use livefeed_stream::{spawn_channel, ChannelKind};

use super::render::OutputFormat;
use super::session::{drive, PollPlan};

/// 전략 출력 설정.
#[derive(Debug, Clone)]
pub struct StrategyWatchConfig {
    /// 구독할 전략 ID
    pub strategy_ids: Vec<String>,
    /// `get_strategy_pnl` 요청 간격 (초). 없으면 푸시만 받습니다.
    pub poll_secs: Option<u64>,
    /// 출력 형식
    pub format: OutputFormat,
}

impl StrategyWatchConfig {
    /// 주기적 요청 계획.
    pub fn poll_plan(&self) -> Option<PollPlan> {
        self.poll_secs.filter(|secs| *secs > 0).map(|secs| PollPlan {
            every: Duration::from_secs(secs),
            strategy_ids: self.strategy_ids.clone(),
        })
    }
}

/// 전략 채널을 열고 종료 신호까지 출력합니다.
pub async fn run_strategy(
    watch: StrategyWatchConfig,
    config: &StreamConfig,
    credentials: Credentials,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    ensure!(!watch.strategy_ids.is_empty(), "전략 ID를 하나 이상 지정하세요");

    let (handle, task) = spawn_channel(ChannelKind::Strategy, config);
    info!(strategies = ?watch.strategy_ids, poll_secs = ?watch.poll_secs, "전략 구독 시작");

    handle.set_interest(watch.strategy_ids.clone()).await?;
    handle
        .connect(credentials)
        .await
        .context("전략 채널 연결 실패")?;

    let result = drive(&handle, watch.format, watch.poll_plan(), shutdown).await;
    let _ = task.await;
    result
}
