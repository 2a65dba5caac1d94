//! 실시간 스트리밍 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 종목 시세 실시간 출력
//! livefeed watch --stocks RELIANCE,TCS
//!
//! # 전략 손익 실시간 출력 (10초마다 스냅샷 요청)
//! livefeed strategy --id iron-condor-1 --poll-secs 10
//!
//! # 두 채널 동시 실행, JSON 출력
//! livefeed --output json both --stocks RELIANCE --id iron-condor-1
//! ```
//!
//! 자격증명은 `LIVEFEED_USER_ID`, `LIVEFEED_TOKEN` 환경변수(또는 `.env`)에서 읽습니다.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use livefeed_cli::commands::watch::parse_list;
use livefeed_cli::{run_strategy, run_watch, OutputFormat, StrategyWatchConfig, WatchConfig};
use livefeed_core::logging::{init_logging, LogConfig, LogFormat};
use livefeed_core::{Credentials, StreamConfig};

#[derive(Parser)]
#[command(name = "livefeed")]
#[command(about = "Live market data and strategy P&L stream client", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일 경로 (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (설정 파일보다 우선)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// 출력 형식
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 종목 시세 실시간 출력
    Watch {
        /// 종목명 (쉼표 구분, 예: RELIANCE,TCS)
        #[arg(short, long)]
        stocks: String,
    },

    /// 전략 손익 실시간 출력
    Strategy {
        /// 전략 ID (쉼표 구분)
        #[arg(short, long)]
        id: String,

        /// get_strategy_pnl 요청 간격 (초, 0이면 비활성화)
        #[arg(long)]
        poll_secs: Option<u64>,
    },

    /// 시세와 전략 손익 채널 동시 실행
    Both {
        /// 종목명 (쉼표 구분)
        #[arg(short, long)]
        stocks: String,

        /// 전략 ID (쉼표 구분)
        #[arg(short, long)]
        id: String,

        /// get_strategy_pnl 요청 간격 (초)
        #[arg(long)]
        poll_secs: Option<u64>,
    },
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing(cli: &Cli, config: &StreamConfig) -> Result<()> {
    let mut log_config = LogConfig::from(&config.logging);
    if let Some(level) = &cli.log_level {
        log_config.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        let format: LogFormat = format
            .parse()
            .map_err(|e| anyhow!("잘못된 로그 형식: {}", e))?;
        log_config = log_config.with_format(format);
    }
    init_logging(log_config).map_err(|e| anyhow!("로깅 초기화 실패: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = StreamConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;
    init_tracing(&cli, &config)?;

    let credentials = Credentials::from_env().context("자격증명 로드 실패")?;
    info!(identity = %credentials.identity, api = %config.api_base_url, "livefeed 시작");

    match cli.command {
        Commands::Watch { stocks } => {
            let watch = WatchConfig {
                stocks: parse_list(&stocks.to_uppercase()),
                format: cli.output,
            };
            run_watch(watch, &config, credentials, shutdown_signal()).await?;
        }

        Commands::Strategy { id, poll_secs } => {
            let watch = StrategyWatchConfig {
                strategy_ids: parse_list(&id),
                poll_secs,
                format: cli.output,
            };
            run_strategy(watch, &config, credentials, shutdown_signal()).await?;
        }

        Commands::Both {
            stocks,
            id,
            poll_secs,
        } => {
            let watch = WatchConfig {
                stocks: parse_list(&stocks.to_uppercase()),
                format: cli.output,
            };
            let strategy = StrategyWatchConfig {
                strategy_ids: parse_list(&id),
                poll_secs,
                format: cli.output,
            };
            tokio::try_join!(
                run_watch(watch, &config, credentials.clone(), shutdown_signal()),
                run_strategy(strategy, &config, credentials, shutdown_signal()),
            )?;
        }
    }

    info!("livefeed 종료");
    Ok(())
}
