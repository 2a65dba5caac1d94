//! 채널 연결 수명 관리.
//!
//! `ConnectionManager`는 채널당 하나의 물리 소켓을 소유하는 동기 상태
//! 머신입니다. 소켓 이벤트와 타이머 만료를 메서드 호출로 주입받아 상태를
//! 전이하므로, 실제 네트워크나 시계 없이 전이 순서를 검증할 수 있습니다.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──open──▶ Connected
//!      ▲                        │                   │
//!      │                  close(비정상)        close(비정상)
//!      │                        ▼                   ▼
//!      └──close(정상)──── Reconnecting ◀────────────┘
//!                               │ 시도 소진
//!                               ▼
//!                             Failed
//! ```

use std::time::Duration;

use tracing::{debug, error, info, warn};

use livefeed_core::{Credentials, StreamConfig, StreamError, StreamResult};

use crate::listeners::{ListenerId, Listeners};
use crate::protocol::{is_clean_close, ChannelKind, Endpoint, OutboundMessage, CLOSE_NORMAL};
use crate::registry::{ReconcileOutcome, SubscriptionRegistry};
use crate::timer::{BackoffPolicy, Scheduler, TimerId};
use crate::transport::{SocketId, Transport};

/// 채널 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// 연결 없음
    Disconnected,
    /// 소켓 여는 중
    Connecting,
    /// 연결됨
    Connected,
    /// 백오프 대기 중
    Reconnecting,
    /// 재연결 시도 소진, 수동 재연결 필요
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 채널 관찰자에게 전달되는 알림.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelNotice {
    /// 상태 전이
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// 재연결 예약됨
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// 비치명적 에러 또는 최종 실패
    Error(StreamError),
}

/// 한 채널의 연결 상태 머신.
pub struct ConnectionManager<T, S> {
    kind: ChannelKind,
    config: StreamConfig,
    policy: BackoffPolicy,
    transport: T,
    scheduler: S,
    registry: SubscriptionRegistry,
    endpoint: Option<Endpoint>,
    state: ConnectionState,
    socket: Option<SocketId>,
    last_socket: SocketId,
    attempts: u32,
    reconnect_timer: Option<TimerId>,
    last_error: Option<StreamError>,
    notices: Listeners<ChannelNotice>,
}

impl<T: Transport, S: Scheduler> ConnectionManager<T, S> {
    /// 새 연결 관리자를 생성합니다.
    pub fn new(kind: ChannelKind, config: &StreamConfig, transport: T, scheduler: S) -> Self {
        Self {
            kind,
            config: config.clone(),
            policy: BackoffPolicy::from(&config.reconnect),
            transport,
            scheduler,
            registry: SubscriptionRegistry::new(kind),
            endpoint: None,
            state: ConnectionState::Disconnected,
            socket: None,
            last_socket: SocketId::new(0),
            attempts: 0,
            reconnect_timer: None,
            last_error: None,
            notices: Listeners::new(),
        }
    }

    // ========================================================================
    // 조회
    // ========================================================================

    /// 채널 종류.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// 현재 상태.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 연결되어 있는지 확인.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.socket.is_some()
    }

    /// 마지막 연결 성공 이후 재연결 시도 횟수.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// 마지막 에러. 연결 성공 시 지워집니다.
    pub fn last_error(&self) -> Option<&StreamError> {
        self.last_error.as_ref()
    }

    /// 현재 소켓 ID.
    pub fn socket(&self) -> Option<SocketId> {
        self.socket
    }

    /// 예약된 재연결 타이머.
    pub fn pending_timer(&self) -> Option<TimerId> {
        self.reconnect_timer
    }

    /// 구독 레지스트리.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// 트랜스포트.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 트랜스포트 (가변).
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// 스케줄러.
    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    /// 스케줄러 (가변).
    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    // ========================================================================
    // 관찰자
    // ========================================================================

    /// 알림 리스너를 등록합니다.
    pub fn subscribe_notices(
        &mut self,
        callback: impl FnMut(&ChannelNotice) + Send + 'static,
    ) -> ListenerId {
        self.notices.subscribe(callback)
    }

    /// 알림 리스너를 해제합니다.
    pub fn unsubscribe_notices(&mut self, id: ListenerId) -> bool {
        self.notices.unsubscribe(id)
    }

    // ========================================================================
    // 명령
    // ========================================================================

    /// 채널 연결을 시작합니다.
    ///
    /// 이미 `Connecting`/`Connected`면 아무것도 하지 않습니다. `Reconnecting`
    /// 중이면 예약된 타이머를 취소하고 즉시 연결하며, `Failed`에서는 시도
    /// 횟수를 초기화합니다. 자격증명이 비어 있으면 상태를 바꾸지 않고 거부합니다.
    pub fn connect(&mut self, credentials: &Credentials) -> StreamResult<()> {
        if !credentials.is_complete() {
            warn!(channel = %self.kind, "사용자 ID 또는 토큰이 없어 연결하지 않음");
            return Err(StreamError::MissingCredentials(format!(
                "{} 채널 연결에 사용자 ID와 토큰이 필요합니다",
                self.kind
            )));
        }

        if matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected) {
            debug!(channel = %self.kind, state = %self.state, "이미 연결 중");
            return Ok(());
        }
        let endpoint = self.kind.endpoint(&self.config, credentials)?;

        match self.state {
            ConnectionState::Reconnecting => self.cancel_reconnect(),
            ConnectionState::Failed => self.attempts = 0,
            _ => {}
        }

        self.endpoint = Some(endpoint);
        self.open_socket();
        Ok(())
    }

    /// 연결을 끊습니다.
    ///
    /// 예약된 재연결을 취소하고, 소켓을 닫고, 시도 횟수와 레지스트리의
    /// 구독 표시를 초기화합니다. 원하는 구독 키는 유지됩니다.
    pub fn disconnect(&mut self) {
        self.cancel_reconnect();

        if let Some(id) = self.socket.take() {
            info!(channel = %self.kind, %id, "채널 연결 종료");
            self.transport.close(id, CLOSE_NORMAL);
        }

        self.attempts = 0;
        self.registry.clear_replay_marker();
        self.transition(ConnectionState::Disconnected);
    }

    /// 소비자 해제. 타이머 취소, 소켓 종료, 레지스트리 비우기 순서입니다.
    pub fn shutdown(&mut self) {
        self.disconnect();
        self.registry.clear();
        debug!(channel = %self.kind, "채널 정리 완료");
    }

    /// 단일 송신 진입점. `Connected`가 아니면 조용히 버리고 false를 반환합니다.
    pub fn send(&mut self, frame: &OutboundMessage) -> bool {
        match self.live_socket() {
            Some(id) => send_frame(&mut self.transport, self.kind, id, frame),
            None => {
                debug!(channel = %self.kind, state = %self.state, ?frame, "연결되지 않아 프레임 폐기");
                false
            }
        }
    }

    /// 구독 키를 추가합니다. 연결되어 있으면 즉시 구독 프레임을 보냅니다.
    pub fn subscribe(&mut self, key: &str) -> bool {
        let added = self.registry.add(key);
        if let Some(id) = self.live_socket() {
            let (transport, kind) = (&mut self.transport, self.kind);
            self.registry
                .announce(key, |frame| send_frame(transport, kind, id, frame));
        }
        added
    }

    /// 구독 키를 제거합니다. 연결되어 있고 해제 프레임이 있으면 보냅니다.
    pub fn unsubscribe(&mut self, key: &str) -> bool {
        let was_announced = self.registry.is_announced(key);
        if !self.registry.remove(key) {
            return false;
        }
        if was_announced {
            if let Some(frame) = self.kind.unsubscribe_frame(key) {
                self.send(&frame);
            }
        }
        true
    }

    /// 관심 목록 전체를 동기화합니다.
    pub fn set_interest<K: AsRef<str>>(&mut self, interest: &[K]) -> ReconcileOutcome {
        let socket = self.live_socket();
        let (transport, kind) = (&mut self.transport, self.kind);
        self.registry
            .reconcile(interest, socket.is_some(), |frame| match socket {
                Some(id) => send_frame(transport, kind, id, frame),
                None => false,
            })
    }

    /// 전략 손익 스냅샷을 1회 요청합니다.
    pub fn request_strategy_pnl(&mut self, strategy_id: &str) -> bool {
        self.send(&OutboundMessage::GetStrategyPnl {
            strategy_id: strategy_id.to_string(),
        })
    }

    /// Keepalive ping.
    pub fn ping(&mut self) -> bool {
        self.send(&OutboundMessage::Ping)
    }

    /// 서버가 보낸 에러를 기록하고 알립니다. 연결 상태는 바뀌지 않습니다.
    pub fn report_peer_error(&mut self, message: impl Into<String>) {
        let err = StreamError::Peer(message.into());
        warn!(channel = %self.kind, error = %err, "서버 에러 수신");
        self.last_error = Some(err.clone());
        self.notices.emit(&ChannelNotice::Error(err));
    }

    // ========================================================================
    // 이벤트
    // ========================================================================

    /// 소켓 연결 성립.
    pub fn on_open(&mut self, id: SocketId) {
        if !self.is_current(id) || self.state != ConnectionState::Connecting {
            debug!(channel = %self.kind, %id, "이전 소켓의 open 이벤트 무시");
            return;
        }

        let from = self.state;
        self.state = ConnectionState::Connected;
        self.attempts = 0;
        self.last_error = None;

        let (transport, kind) = (&mut self.transport, self.kind);
        let replayed = self
            .registry
            .replay_all(|frame| send_frame(transport, kind, id, frame));

        info!(channel = %self.kind, %id, replayed, "채널 연결됨");
        self.notices.emit(&ChannelNotice::StateChanged {
            from,
            to: ConnectionState::Connected,
        });
    }

    /// 소켓 에러. 상태는 바뀌지 않으며 뒤따르는 close에서 처리됩니다.
    pub fn on_error(&mut self, id: SocketId, message: impl Into<String>) {
        if !self.is_current(id) {
            return;
        }
        let err = StreamError::Transport(message.into());
        warn!(channel = %self.kind, %id, error = %err, "소켓 에러");
        self.last_error = Some(err.clone());
        self.notices.emit(&ChannelNotice::Error(err));
    }

    /// 소켓 종료. 정상 종료가 아니면 백오프 재연결을 예약합니다.
    pub fn on_close(&mut self, id: SocketId, code: Option<u16>) {
        if !self.is_current(id) {
            debug!(channel = %self.kind, %id, "이전 소켓의 close 이벤트 무시");
            return;
        }

        self.socket = None;
        self.registry.clear_replay_marker();
        self.transition(ConnectionState::Disconnected);

        if is_clean_close(code) {
            info!(channel = %self.kind, ?code, "채널 정상 종료");
            return;
        }

        warn!(channel = %self.kind, ?code, "채널 비정상 종료");
        self.schedule_reconnect();
    }

    /// 타이머 만료. 예약된 재연결 타이머가 아니면 무시합니다.
    pub fn on_timer(&mut self, timer: TimerId) {
        if self.reconnect_timer != Some(timer) {
            debug!(channel = %self.kind, %timer, "취소된 타이머 무시");
            return;
        }
        self.reconnect_timer = None;

        if self.state != ConnectionState::Reconnecting {
            return;
        }

        info!(channel = %self.kind, attempt = self.attempts, "재연결 시도");
        self.open_socket();
    }

    // ========================================================================
    // 내부
    // ========================================================================

    fn is_current(&self, id: SocketId) -> bool {
        self.socket == Some(id)
    }

    fn live_socket(&self) -> Option<SocketId> {
        if self.state == ConnectionState::Connected {
            self.socket
        } else {
            None
        }
    }

    fn open_socket(&mut self) {
        let Some(endpoint) = self.endpoint.clone() else {
            return;
        };

        let id = self.last_socket.next();
        self.last_socket = id;
        self.socket = Some(id);
        self.transition(ConnectionState::Connecting);

        info!(channel = %self.kind, %id, url = %endpoint, "채널 연결 시작");
        self.transport.open(id, &endpoint);
    }

    fn schedule_reconnect(&mut self) {
        if !self.policy.allows(self.attempts) {
            let err = StreamError::Terminal {
                attempts: self.attempts,
            };
            error!(channel = %self.kind, attempts = self.attempts, "최대 재연결 시도 횟수 초과");
            self.last_error = Some(err.clone());
            self.transition(ConnectionState::Failed);
            self.notices.emit(&ChannelNotice::Error(err));
            return;
        }

        self.attempts += 1;
        let delay = self.policy.delay_for(self.attempts);
        self.reconnect_timer = Some(self.scheduler.schedule(delay));
        self.transition(ConnectionState::Reconnecting);

        warn!(
            channel = %self.kind,
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "재연결 예약"
        );
        self.notices.emit(&ChannelNotice::ReconnectScheduled {
            attempt: self.attempts,
            delay,
        });
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            self.scheduler.cancel(timer);
            debug!(channel = %self.kind, %timer, "재연결 취소");
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        debug!(channel = %self.kind, %from, %to, "상태 전이");
        self.notices.emit(&ChannelNotice::StateChanged { from, to });
    }
}

/// 프레임을 직렬화하여 소켓으로 보냅니다.
fn send_frame<T: Transport>(
    transport: &mut T,
    kind: ChannelKind,
    id: SocketId,
    frame: &OutboundMessage,
) -> bool {
    match frame.to_json() {
        Ok(text) => {
            let sent = transport.send(id, text);
            if sent {
                debug!(channel = %kind, %id, ?frame, "프레임 전송");
            }
            sent
        }
        Err(e) => {
            error!(channel = %kind, error = %e, "프레임 직렬화 실패");
            false
        }
    }
}
