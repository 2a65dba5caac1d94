//! 실시간 스트림이 유지하는 도메인 모델.

mod position;
mod quote;
mod strategy;

pub use position::*;
pub use quote::*;
pub use strategy::*;
