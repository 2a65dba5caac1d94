//! 비동기 채널 실행기.
//!
//! 채널마다 하나의 tokio 태스크가 `StreamChannel`을 소유하고 명령, 소켓
//! 이벤트, 타이머 만료, keepalive를 하나의 `select!` 루프에서 순서대로
//! 처리합니다. 상태는 이 태스크 안에서만 변경되므로 잠금이 필요 없습니다.
//!
//! # 사용 예
//!
//! ```no_run
//! use livefeed_core::{Credentials, StreamConfig};
//! use livefeed_stream::{spawn_channel, ChannelKind};
//!
//! # async fn run() -> livefeed_core::StreamResult<()> {
//! let config = StreamConfig::default();
//! let (handle, _task) = spawn_channel(ChannelKind::MarketData, &config);
//! handle.subscribe("RELIANCE").await?;
//! handle.connect(Credentials::from_env()?).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, Instrument};

use livefeed_core::{channel_span, Credentials, Quote, Strategy, StreamConfig, StreamError, StreamResult};

use crate::aggregate::{AggregateChange, PortfolioSummary};
use crate::channel::StreamChannel;
use crate::lifecycle::{ChannelNotice, ConnectionState};
use crate::protocol::ChannelKind;
use crate::timer::{Scheduler, TimerId, TokioScheduler};
use crate::transport::{SocketEvent, Transport, WsTransport};

/// 채널 태스크로 보내는 명령.
#[derive(Debug)]
enum ChannelCommand {
    Connect(Credentials, oneshot::Sender<StreamResult<()>>),
    Disconnect,
    Shutdown,
    Subscribe(String),
    Unsubscribe(String),
    SetInterest(Vec<String>),
    RequestStrategyPnl(String),
    Snapshot(oneshot::Sender<ChannelSnapshot>),
}

/// 채널 상태의 특정 시점 복사본.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    /// 연결 상태
    pub state: ConnectionState,
    /// 마지막 에러
    pub last_error: Option<StreamError>,
    /// 구독 키
    pub subscriptions: Vec<String>,
    /// 종목별 시세
    pub quotes: HashMap<String, Quote>,
    /// 전략별 스냅샷
    pub strategies: HashMap<String, Strategy>,
    /// 전략 전체 요약
    pub portfolio: PortfolioSummary,
}

/// 채널 태스크 제어 핸들.
///
/// 복제하여 여러 소비자가 공유할 수 있습니다.
#[derive(Clone)]
pub struct StreamHandle {
    kind: ChannelKind,
    commands: mpsc::Sender<ChannelCommand>,
    notices: broadcast::Sender<ChannelNotice>,
    changes: broadcast::Sender<AggregateChange>,
    state: watch::Receiver<ConnectionState>,
}

impl StreamHandle {
    /// 채널 종류.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// 현재 연결 상태.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 상태 변경 감시용 수신기.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// 채널 알림 구독.
    pub fn notices(&self) -> broadcast::Receiver<ChannelNotice> {
        self.notices.subscribe()
    }

    /// 집계 변경 구독.
    pub fn changes(&self) -> broadcast::Receiver<AggregateChange> {
        self.changes.subscribe()
    }

    /// 연결을 시작합니다. 자격증명이 비어 있으면 `MissingCredentials`.
    pub async fn connect(&self, credentials: Credentials) -> StreamResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelCommand::Connect(credentials, tx)).await?;
        rx.await.map_err(|_| self.closed())?
    }

    /// 연결을 끊습니다. 구독 키는 유지됩니다.
    pub async fn disconnect(&self) -> StreamResult<()> {
        self.send(ChannelCommand::Disconnect).await
    }

    /// 채널 태스크를 정리하고 종료합니다.
    pub async fn shutdown(&self) -> StreamResult<()> {
        self.send(ChannelCommand::Shutdown).await
    }

    /// 구독 키를 추가합니다.
    pub async fn subscribe(&self, key: impl Into<String>) -> StreamResult<()> {
        self.send(ChannelCommand::Subscribe(key.into())).await
    }

    /// 구독 키를 제거합니다.
    pub async fn unsubscribe(&self, key: impl Into<String>) -> StreamResult<()> {
        self.send(ChannelCommand::Unsubscribe(key.into())).await
    }

    /// 관심 목록 전체를 교체합니다.
    pub async fn set_interest(&self, keys: Vec<String>) -> StreamResult<()> {
        self.send(ChannelCommand::SetInterest(keys)).await
    }

    /// 전략 손익 스냅샷을 1회 요청합니다.
    pub async fn request_strategy_pnl(&self, strategy_id: impl Into<String>) -> StreamResult<()> {
        self.send(ChannelCommand::RequestStrategyPnl(strategy_id.into()))
            .await
    }

    /// 현재 채널 상태 복사본.
    pub async fn snapshot(&self) -> StreamResult<ChannelSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(ChannelCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| self.closed())
    }

    async fn send(&self, command: ChannelCommand) -> StreamResult<()> {
        self.commands.send(command).await.map_err(|_| self.closed())
    }

    fn closed(&self) -> StreamError {
        StreamError::ChannelClosed(self.kind.to_string())
    }
}

/// WebSocket 트랜스포트와 tokio 타이머로 채널 태스크를 시작합니다.
pub fn spawn_channel(kind: ChannelKind, config: &StreamConfig) -> (StreamHandle, JoinHandle<()>) {
    let (transport, socket_events) = WsTransport::new();
    let (scheduler, timers) = TokioScheduler::new();
    let channel = StreamChannel::new(kind, config, transport, scheduler);
    spawn_with(channel, socket_events, timers, config)
}

/// 주어진 채널과 이벤트 수신기로 채널 태스크를 시작합니다.
pub fn spawn_with<T, S>(
    mut channel: StreamChannel<T, S>,
    socket_events: mpsc::UnboundedReceiver<SocketEvent>,
    timers: mpsc::UnboundedReceiver<TimerId>,
    config: &StreamConfig,
) -> (StreamHandle, JoinHandle<()>)
where
    T: Transport + 'static,
    S: Scheduler + 'static,
{
    let kind = channel.kind();
    let buffer = config.event_buffer.max(1);

    let (command_tx, command_rx) = mpsc::channel(buffer);
    let (notice_tx, _) = broadcast::channel(buffer);
    let (change_tx, _) = broadcast::channel(buffer);
    let (state_tx, state_rx) = watch::channel(channel.state());

    {
        let notice_tx = notice_tx.clone();
        channel.manager_mut().subscribe_notices(move |notice| {
            if let ChannelNotice::StateChanged { to, .. } = notice {
                state_tx.send_replace(*to);
            }
            let _ = notice_tx.send(notice.clone());
        });
    }
    {
        let change_tx = change_tx.clone();
        channel.aggregator_mut().subscribe(move |change| {
            let _ = change_tx.send(change.clone());
        });
    }

    let keepalive = config.keepalive.ping_interval();
    let task = tokio::spawn(
        run_channel(channel, command_rx, socket_events, timers, keepalive)
            .instrument(channel_span!(kind)),
    );

    let handle = StreamHandle {
        kind,
        commands: command_tx,
        notices: notice_tx,
        changes: change_tx,
        state: state_rx,
    };
    (handle, task)
}

async fn run_channel<T: Transport, S: Scheduler>(
    mut channel: StreamChannel<T, S>,
    mut commands: mpsc::Receiver<ChannelCommand>,
    mut socket_events: mpsc::UnboundedReceiver<SocketEvent>,
    mut timers: mpsc::UnboundedReceiver<TimerId>,
    keepalive: Option<Duration>,
) {
    let mut keepalive = keepalive.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    info!("채널 태스크 시작");

    loop {
        tokio::select! {
            command = commands.recv() => {
                match command {
                    Some(ChannelCommand::Shutdown) | None => {
                        channel.shutdown();
                        break;
                    }
                    Some(command) => apply_command(&mut channel, command),
                }
            }
            Some(event) = socket_events.recv() => {
                channel.handle_socket_event(event);
            }
            Some(timer) = timers.recv() => {
                channel.handle_timer(timer);
            }
            _ = next_tick(&mut keepalive) => {
                if channel.ping() {
                    debug!("keepalive ping 전송");
                }
            }
        }
    }

    info!("채널 태스크 종료");
}

fn apply_command<T: Transport, S: Scheduler>(channel: &mut StreamChannel<T, S>, command: ChannelCommand) {
    match command {
        ChannelCommand::Connect(credentials, reply) => {
            let _ = reply.send(channel.connect(&credentials));
        }
        ChannelCommand::Disconnect => channel.disconnect(),
        ChannelCommand::Subscribe(key) => {
            channel.subscribe(&key);
        }
        ChannelCommand::Unsubscribe(key) => {
            channel.unsubscribe(&key);
        }
        ChannelCommand::SetInterest(keys) => {
            channel.set_interest(&keys);
        }
        ChannelCommand::RequestStrategyPnl(strategy_id) => {
            channel.request_strategy_pnl(&strategy_id);
        }
        ChannelCommand::Snapshot(reply) => {
            let aggregator = channel.aggregator();
            let snapshot = ChannelSnapshot {
                state: channel.state(),
                last_error: channel.last_error().cloned(),
                subscriptions: channel.manager().registry().keys().to_vec(),
                quotes: aggregator
                    .quotes()
                    .map(|q| (q.symbol.clone(), q.clone()))
                    .collect(),
                strategies: aggregator
                    .strategies()
                    .map(|s| (s.strategy_id.clone(), s.clone()))
                    .collect(),
                portfolio: aggregator.portfolio_summary(),
            };
            let _ = reply.send(snapshot);
        }
        ChannelCommand::Shutdown => channel.shutdown(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, SentFrames, SocketId};
    use livefeed_core::KeepaliveConfig;
    use serde_json::json;

    fn recording_channel(
        config: &StreamConfig,
    ) -> (
        StreamHandle,
        JoinHandle<()>,
        mpsc::UnboundedSender<SocketEvent>,
        SentFrames,
    ) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (scheduler, timers) = TokioScheduler::new();
        let transport = MemoryTransport::new();
        let sent = transport.sent_frames();
        let channel = StreamChannel::new(ChannelKind::MarketData, config, transport, scheduler);
        let (handle, task) = spawn_with(channel, events_rx, timers, config);
        (handle, task, events_tx, sent)
    }

    fn memory_channel(
        config: &StreamConfig,
    ) -> (
        StreamHandle,
        JoinHandle<()>,
        mpsc::UnboundedSender<SocketEvent>,
    ) {
        let (handle, task, events, _) = recording_channel(config);
        (handle, task, events)
    }

    fn keepalive_every_second() -> StreamConfig {
        StreamConfig {
            keepalive: KeepaliveConfig {
                ping_interval_secs: 1,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_connect_with_missing_credentials_is_refused() {
        let (handle, _task, _events) = memory_channel(&StreamConfig::default());

        let err = handle.connect(Credentials::new("", "")).await.unwrap_err();
        assert!(matches!(err, StreamError::MissingCredentials(_)));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_frames_flow_into_snapshot_and_changes() {
        let (handle, _task, events) = memory_channel(&StreamConfig::default());
        let mut changes = handle.changes();

        handle.subscribe("RELIANCE").await.unwrap();
        handle.connect(Credentials::new("7", "tok")).await.unwrap();
        let socket = SocketId::new(1);
        events.send(SocketEvent::Opened(socket)).unwrap();
        events
            .send(SocketEvent::Frame(
                socket,
                r#"{"type":"market_data","data":{"stock_name":"RELIANCE","LTP":2500}}"#.to_string(),
            ))
            .unwrap();

        let change = changes.recv().await.unwrap();
        assert_eq!(change.key(), "RELIANCE");

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, ConnectionState::Connected);
        assert_eq!(snapshot.subscriptions, vec!["RELIANCE".to_string()]);
        assert!(snapshot.quotes.contains_key("RELIANCE"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_reconnects_after_backoff() {
        let (handle, _task, events) = memory_channel(&StreamConfig::default());
        let mut notices = handle.notices();

        handle.connect(Credentials::new("7", "tok")).await.unwrap();
        events.send(SocketEvent::Opened(SocketId::new(1))).unwrap();
        events
            .send(SocketEvent::Closed(SocketId::new(1), Some(1006)))
            .unwrap();

        loop {
            if let ChannelNotice::ReconnectScheduled { attempt, delay } = notices.recv().await.unwrap() {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(2000));
                break;
            }
        }
        assert_eq!(handle.state(), ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_millis(2001)).await;
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_pings_while_connected() {
        let (handle, _task, events, sent) = recording_channel(&keepalive_every_second());

        handle.connect(Credentials::new("7", "tok")).await.unwrap();
        events.send(SocketEvent::Opened(SocketId::new(1))).unwrap();
        handle
            .watch_state()
            .wait_for(|state| *state == ConnectionState::Connected)
            .await
            .unwrap();
        assert!(sent.snapshot().is_empty());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.snapshot().await.unwrap();
        assert_eq!(sent.json(), vec![json!({"type": "ping"})]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.snapshot().await.unwrap();
        assert_eq!(sent.json().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ping_dropped_until_open() {
        let (handle, _task, _events, sent) = recording_channel(&keepalive_every_second());

        handle.connect(Credentials::new("7", "tok")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.state, ConnectionState::Connecting);
        assert!(sent.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_ends_task() {
        let (handle, task, _events) = memory_channel(&StreamConfig::default());
        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            handle.subscribe("X").await,
            Err(StreamError::ChannelClosed(_))
        ));
    }
}
