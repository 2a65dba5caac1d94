//! 소켓 추상화.
//!
//! 연결 관리자는 구체적인 WebSocket 라이브러리를 알지 못합니다.
//! `Transport`는 열기/보내기/닫기만 제공하고, 결과는 `SocketEvent`로
//! 이벤트 루프에 돌아옵니다. 모든 이벤트에는 `SocketId`가 붙어 있어
//! 이미 교체된 소켓의 늦은 이벤트를 걸러낼 수 있습니다.
//!
//! - `WsTransport`: tokio-tungstenite 기반 실제 구현
//! - `MemoryTransport`: 송신 프레임을 기록하는 테스트용 구현

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::protocol::Endpoint;

/// 물리 소켓 세대 식별자.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u64);

impl SocketId {
    /// 원시 값에서 생성합니다.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 다음 세대 ID.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// 소켓에서 발생한 이벤트.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    /// 연결 성립
    Opened(SocketId),
    /// 텍스트 프레임 수신
    Frame(SocketId, String),
    /// 소켓 에러 (항상 `Closed`가 뒤따름)
    Error(SocketId, String),
    /// 연결 종료 (close 코드가 없으면 `None`)
    Closed(SocketId, Option<u16>),
}

impl SocketEvent {
    /// 이벤트가 속한 소켓.
    pub fn socket(&self) -> SocketId {
        match self {
            SocketEvent::Opened(id)
            | SocketEvent::Frame(id, _)
            | SocketEvent::Error(id, _)
            | SocketEvent::Closed(id, _) => *id,
        }
    }
}

/// 메시지 지향 양방향 소켓.
pub trait Transport: Send {
    /// 새 소켓을 엽니다. 결과는 `SocketEvent::Opened` 또는 `Error`/`Closed`로 통지됩니다.
    fn open(&mut self, id: SocketId, endpoint: &Endpoint);

    /// 현재 소켓으로 텍스트 프레임을 보냅니다. 열린 소켓이 없으면 false.
    fn send(&mut self, id: SocketId, text: String) -> bool;

    /// 소켓을 닫습니다. 이미 닫혔으면 무시합니다.
    fn close(&mut self, id: SocketId, code: u16);
}

// ============================================================================
// tokio-tungstenite 구현
// ============================================================================

enum WsCommand {
    Text(String),
    Close(u16),
}

struct WsSocket {
    outbound: mpsc::UnboundedSender<WsCommand>,
    task: JoinHandle<()>,
}

/// tokio-tungstenite 기반 트랜스포트.
///
/// 소켓마다 하나의 태스크가 읽기와 쓰기를 모두 담당합니다.
pub struct WsTransport {
    events_tx: mpsc::UnboundedSender<SocketEvent>,
    sockets: HashMap<SocketId, WsSocket>,
}

impl WsTransport {
    /// 새 트랜스포트와 소켓 이벤트 수신 채널을 생성합니다.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SocketEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Self {
            events_tx,
            sockets: HashMap::new(),
        };
        (transport, events_rx)
    }

    fn reap_finished(&mut self) {
        self.sockets.retain(|_, socket| !socket.task.is_finished());
    }
}

impl Transport for WsTransport {
    fn open(&mut self, id: SocketId, endpoint: &Endpoint) {
        self.reap_finished();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let events = self.events_tx.clone();
        let url = endpoint.url();
        let redacted = endpoint.redacted();

        let task = tokio::spawn(async move {
            run_socket(id, url, redacted, outbound_rx, events).await;
        });

        self.sockets.insert(
            id,
            WsSocket {
                outbound: outbound_tx,
                task,
            },
        );
    }

    fn send(&mut self, id: SocketId, text: String) -> bool {
        match self.sockets.get(&id) {
            Some(socket) => socket.outbound.send(WsCommand::Text(text)).is_ok(),
            None => false,
        }
    }

    fn close(&mut self, id: SocketId, code: u16) {
        if let Some(socket) = self.sockets.remove(&id) {
            if socket.outbound.send(WsCommand::Close(code)).is_err() {
                socket.task.abort();
            }
        }
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        for (_, socket) in self.sockets.drain() {
            socket.task.abort();
        }
    }
}

/// 소켓 하나의 수명 동안 실행되는 루프.
async fn run_socket(
    id: SocketId,
    url: String,
    redacted: String,
    mut outbound: mpsc::UnboundedReceiver<WsCommand>,
    events: mpsc::UnboundedSender<SocketEvent>,
) {
    info!(%id, url = %redacted, "WebSocket 연결 중");

    let ws_stream = match connect_async(url).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!(%id, error = %e, "WebSocket 연결 실패");
            let _ = events.send(SocketEvent::Error(id, format!("WebSocket 연결 실패: {}", e)));
            let _ = events.send(SocketEvent::Closed(id, None));
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let _ = events.send(SocketEvent::Opened(id));

    let close_code = loop {
        tokio::select! {
            cmd = outbound.recv() => {
                match cmd {
                    Some(WsCommand::Text(text)) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            error!(%id, error = %e, "WebSocket 송신 에러");
                            let _ = events.send(SocketEvent::Error(id, e.to_string()));
                            break None;
                        }
                    }
                    Some(WsCommand::Close(code)) => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: "".into(),
                        };
                        let _ = write.send(Message::Close(Some(frame))).await;
                        debug!(%id, code, "WebSocket 종료 요청");
                        break Some(code);
                    }
                    None => {
                        let _ = write.close().await;
                        break None;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = events.send(SocketEvent::Frame(id, text));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        debug!(%id, "Ping 수신, Pong 응답");
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code));
                        warn!(%id, ?code, "서버에서 연결 종료");
                        break code;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(%id, error = %e, "WebSocket 수신 에러");
                        let _ = events.send(SocketEvent::Error(id, e.to_string()));
                        break None;
                    }
                    None => {
                        warn!(%id, "WebSocket 스트림 종료");
                        break None;
                    }
                }
            }
        }
    };

    let _ = events.send(SocketEvent::Closed(id, close_code));
}

// ============================================================================
// 기록용 구현
// ============================================================================

/// 트랜스포트를 채널 태스크로 넘긴 뒤에도 읽을 수 있는 송신 기록.
#[derive(Debug, Clone, Default)]
pub struct SentFrames(Arc<Mutex<Vec<String>>>);

impl SentFrames {
    fn push(&self, text: String) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(text);
    }

    /// 지금까지 보낸 프레임 (원문).
    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 지금까지 보낸 프레임을 JSON으로 파싱하여 반환합니다.
    pub fn json(&self) -> Vec<serde_json::Value> {
        self.snapshot()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }
}

/// 네트워크 없이 동작하는 기록용 트랜스포트.
///
/// 열린 소켓과 보낸 프레임을 기록만 하며, 소켓 이벤트는 호출자가
/// 연결 관리자에 직접 주입합니다.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    current: Option<SocketId>,
    opened: Vec<(SocketId, String)>,
    sent: Vec<String>,
    closed: Vec<(SocketId, u16)>,
    log: SentFrames,
}

impl MemoryTransport {
    /// 새 기록용 트랜스포트.
    pub fn new() -> Self {
        Self::default()
    }

    /// 현재 열려 있는(또는 여는 중인) 소켓.
    pub fn current(&self) -> Option<SocketId> {
        self.current
    }

    /// 지금까지 연 소켓과 URL.
    pub fn opened(&self) -> &[(SocketId, String)] {
        &self.opened
    }

    /// 보낸 프레임 (원문).
    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    /// 보낸 프레임을 JSON으로 파싱하여 반환합니다.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// 공유 송신 기록. `take_sent`의 영향을 받지 않습니다.
    pub fn sent_frames(&self) -> SentFrames {
        self.log.clone()
    }

    /// 기록된 프레임을 꺼내고 비웁니다.
    pub fn take_sent(&mut self) -> Vec<String> {
        std::mem::take(&mut self.sent)
    }

    /// 호출자가 닫은 소켓과 close 코드.
    pub fn closed(&self) -> &[(SocketId, u16)] {
        &self.closed
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, id: SocketId, endpoint: &Endpoint) {
        self.current = Some(id);
        self.opened.push((id, endpoint.url()));
    }

    fn send(&mut self, id: SocketId, text: String) -> bool {
        if self.current != Some(id) {
            return false;
        }
        self.log.push(text.clone());
        self.sent.push(text);
        true
    }

    fn close(&mut self, id: SocketId, code: u16) {
        if self.current == Some(id) {
            self.current = None;
        }
        self.closed.push((id, code));
    }
}
