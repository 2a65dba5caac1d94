//! 단일 채널: 연결 관리자 + 라우터 + 집계기.

use tracing::warn;

use livefeed_core::{Credentials, Quote, Strategy, StreamConfig, StreamError, StreamResult};

use crate::aggregate::LiveAggregator;
use crate::lifecycle::{ConnectionManager, ConnectionState};
use crate::protocol::ChannelKind;
use crate::registry::ReconcileOutcome;
use crate::router::{MessageHandler, MessageRouter, Routed};
use crate::timer::{Scheduler, TimerId};
use crate::transport::{SocketEvent, Transport};

/// 하나의 논리 채널.
///
/// 소켓 이벤트와 타이머 만료를 받아 연결 관리자, 라우터, 집계기에
/// 순서대로 전달합니다. 모든 처리는 호출 스레드에서 동기적으로 끝납니다.
pub struct StreamChannel<T, S> {
    manager: ConnectionManager<T, S>,
    router: MessageRouter,
    aggregator: LiveAggregator,
}

impl<T: Transport, S: Scheduler> StreamChannel<T, S> {
    /// 새 채널을 생성합니다.
    pub fn new(kind: ChannelKind, config: &StreamConfig, transport: T, scheduler: S) -> Self {
        Self {
            manager: ConnectionManager::new(kind, config, transport, scheduler),
            router: MessageRouter::new(kind),
            aggregator: LiveAggregator::new(),
        }
    }

    /// 채널 종류.
    pub fn kind(&self) -> ChannelKind {
        self.manager.kind()
    }

    /// 연결 상태.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// 마지막 에러.
    pub fn last_error(&self) -> Option<&StreamError> {
        self.manager.last_error()
    }

    /// 연결 관리자.
    pub fn manager(&self) -> &ConnectionManager<T, S> {
        &self.manager
    }

    /// 연결 관리자 (가변).
    pub fn manager_mut(&mut self) -> &mut ConnectionManager<T, S> {
        &mut self.manager
    }

    /// 집계기.
    pub fn aggregator(&self) -> &LiveAggregator {
        &self.aggregator
    }

    /// 집계기 (가변).
    pub fn aggregator_mut(&mut self) -> &mut LiveAggregator {
        &mut self.aggregator
    }

    /// 종목의 최신 시세.
    pub fn quote(&self, symbol: &str) -> Option<&Quote> {
        self.aggregator.quote(symbol)
    }

    /// 전략의 최신 스냅샷.
    pub fn strategy(&self, strategy_id: &str) -> Option<&Strategy> {
        self.aggregator.strategy(strategy_id)
    }

    /// 채널 연결을 시작합니다.
    pub fn connect(&mut self, credentials: &Credentials) -> StreamResult<()> {
        self.manager.connect(credentials)
    }

    /// 연결을 끊습니다. 원하는 구독 키는 유지됩니다.
    pub fn disconnect(&mut self) {
        self.manager.disconnect();
    }

    /// 연결을 끊고 구독 목록까지 비웁니다.
    pub fn shutdown(&mut self) {
        self.manager.shutdown();
    }

    /// 구독 키를 추가합니다.
    pub fn subscribe(&mut self, key: &str) -> bool {
        self.manager.subscribe(key)
    }

    /// 구독 키를 제거합니다.
    pub fn unsubscribe(&mut self, key: &str) -> bool {
        self.manager.unsubscribe(key)
    }

    /// 관심 목록 전체를 교체합니다.
    pub fn set_interest<K: AsRef<str>>(&mut self, interest: &[K]) -> ReconcileOutcome {
        self.manager.set_interest(interest)
    }

    /// 전략 손익 스냅샷을 1회 요청합니다.
    pub fn request_strategy_pnl(&mut self, strategy_id: &str) -> bool {
        self.manager.request_strategy_pnl(strategy_id)
    }

    /// keepalive ping을 보냅니다.
    pub fn ping(&mut self) -> bool {
        self.manager.ping()
    }

    /// 소켓 이벤트 처리. 프레임이 라우팅되면 그 결과를 반환합니다.
    pub fn handle_socket_event(&mut self, event: SocketEvent) -> Option<Routed> {
        match event {
            SocketEvent::Opened(id) => self.manager.on_open(id),
            SocketEvent::Error(id, message) => self.manager.on_error(id, message),
            SocketEvent::Closed(id, code) => self.manager.on_close(id, code),
            SocketEvent::Frame(id, text) => {
                if self.manager.socket() != Some(id) || !self.manager.is_connected() {
                    return None;
                }
                return self.route_frame(&text);
            }
        }
        None
    }

    /// 타이머 만료 처리.
    pub fn handle_timer(&mut self, timer: TimerId) {
        self.manager.on_timer(timer);
    }

    fn route_frame(&mut self, text: &str) -> Option<Routed> {
        let kind = self.manager.kind();
        let mut dispatch = Dispatch {
            manager: &mut self.manager,
            aggregator: &mut self.aggregator,
        };

        match self.router.route(text, &mut dispatch) {
            Ok(routed) => Some(routed),
            Err(e) => {
                warn!(channel = %kind, error = %e, frame_len = text.len(), "잘못된 프레임 폐기");
                None
            }
        }
    }
}

/// 라우터 출력을 집계기와 연결 관리자로 나눠 전달합니다.
struct Dispatch<'a, T, S> {
    manager: &'a mut ConnectionManager<T, S>,
    aggregator: &'a mut LiveAggregator,
}

impl<T: Transport, S: Scheduler> MessageHandler for Dispatch<'_, T, S> {
    fn on_quote(&mut self, quote: Quote) {
        self.aggregator.apply_quote(quote);
    }

    fn on_strategy(&mut self, strategy: Strategy) {
        self.aggregator.apply_strategy(strategy);
    }

    fn on_peer_error(&mut self, message: String) {
        self.manager.report_peer_error(message);
    }
}
