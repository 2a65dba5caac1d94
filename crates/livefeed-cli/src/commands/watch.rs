//! 종목 시세 실시간 출력.

use std::future::Future;

use anyhow::{ensure, Context, Result};
use tracing::info;

use livefeed_core::{Credentials, StreamConfig};
use livefeed_stream::{spawn_channel, ChannelKind};

use super::render::OutputFormat;
use super::session::drive;

/// 시세 출력 설정.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// 구독할 종목명
    pub stocks: Vec<String>,
    /// 출력 형식
    pub format: OutputFormat,
}

/// 쉼표로 구분된 목록을 파싱합니다. 빈 항목과 중복은 제거됩니다.
pub fn parse_list(input: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    for key in input.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}

/// 시세 채널을 열고 종료 신호까지 출력합니다.
pub async fn run_watch(
    watch: WatchConfig,
    config: &StreamConfig,
    credentials: Credentials,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    ensure!(!watch.stocks.is_empty(), "구독할 종목을 하나 이상 지정하세요");

    let (handle, task) = spawn_channel(ChannelKind::MarketData, config);
    info!(stocks = ?watch.stocks, "시세 구독 시작");

    handle.set_interest(watch.stocks.clone()).await?;
    handle
        .connect(credentials)
        .await
        .context("시세 채널 연결 실패")?;

    let result = drive(&handle, watch.format, None, shutdown).await;
    let _ = task.await;
    result
}
