//! CLI 명령어 구현 모듈.

pub mod render;
pub mod session;
pub mod strategy;
pub mod watch;

pub use render::OutputFormat;
pub use session::{drive, PollPlan};
pub use strategy::{run_strategy, StrategyWatchConfig};
pub use watch::{run_watch, WatchConfig};
