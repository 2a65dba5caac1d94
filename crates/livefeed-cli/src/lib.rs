//! 스트리밍 CLI 도구 모음.
//!
//! 이 crate는 다음 기능을 제공합니다:
//! - 종목 시세 실시간 출력
//! - 전략 손익 실시간 출력 및 주기적 요청
//! - 두 채널 동시 실행

pub mod commands;

pub use commands::*;
