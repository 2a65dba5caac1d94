//! # Livefeed Core
//!
//! 실시간 스트리밍 클라이언트의 핵심 타입을 제공합니다:
//! - 시세, 포지션, 전략 손익 도메인 모델
//! - 스트리밍 에러 분류
//! - 설정 관리
//! - 로깅 인프라

pub mod config;
pub mod domain;
pub mod error;
pub mod logging;

pub use config::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
