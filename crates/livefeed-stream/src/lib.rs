//! 재연결되는 실시간 스트리밍 채널.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 취소 가능한 재연결 타이머와 지수 백오프 정책
//! - 채널별 구독 레지스트리 (재연결 시 구독 복원, 관심 목록 동기화)
//! - 연결 상태 머신 (정상/비정상 종료 분류, 최대 시도 후 실패)
//! - 메시지 타입별 라우터
//! - 시세/전략 손익 집계기
//! - tokio-tungstenite 트랜스포트와 채널 태스크 실행기

pub mod aggregate;
pub mod channel;
pub mod client;
pub mod lifecycle;
pub mod listeners;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod timer;
pub mod transport;

pub use aggregate::{AggregateChange, LiveAggregator, PortfolioSummary};
pub use channel::StreamChannel;
pub use client::{spawn_channel, spawn_with, ChannelSnapshot, StreamHandle};
pub use lifecycle::{ChannelNotice, ConnectionManager, ConnectionState};
pub use listeners::{ListenerId, Listeners};
pub use protocol::{is_clean_close, ChannelKind, Endpoint, OutboundMessage};
pub use registry::{ReconcileOutcome, SubscriptionRegistry};
pub use router::{InfoKind, MessageHandler, MessageRouter, Routed};
pub use timer::{BackoffPolicy, ManualScheduler, Scheduler, TimerId, TokioScheduler};
pub use transport::{MemoryTransport, SentFrames, SocketEvent, SocketId, Transport, WsTransport};
