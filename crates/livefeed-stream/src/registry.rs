//! 채널별 구독 레지스트리.
//!
//! 레지스트리는 두 가지 집합을 관리합니다:
//! - **desired**: 소비자가 원하는 구독 키. 연결이 끊겨도 유지됩니다.
//! - **announced**: 현재 연결에서 서버에 실제로 구독 프레임을 보낸 키.
//!   연결이 끊기면 비워지고 다음 연결의 replay에서 다시 채워집니다.

use std::collections::HashSet;

use tracing::debug;

use crate::protocol::{ChannelKind, OutboundMessage};

/// 관심 목록 동기화 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// 새로 추가된 키
    pub added: Vec<String>,
    /// 제거된 키
    pub removed: Vec<String>,
    /// 연결이 없어 다음 replay로 미뤄졌는지 여부
    pub deferred: bool,
}

impl ReconcileOutcome {
    /// 변경 사항이 없는지 확인.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// 하나의 채널에 대한 구독 레지스트리.
#[derive(Debug, Clone)]
pub struct SubscriptionRegistry {
    kind: ChannelKind,
    desired: Vec<String>,
    announced: HashSet<String>,
}

impl SubscriptionRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            desired: Vec::new(),
            announced: HashSet::new(),
        }
    }

    /// 채널 종류.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// 구독 키 추가. 이미 있으면 false (no-op).
    pub fn add(&mut self, key: &str) -> bool {
        if self.contains(key) {
            return false;
        }
        self.desired.push(key.to_string());
        true
    }

    /// 구독 키 제거. 없으면 false (no-op).
    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.desired.len();
        self.desired.retain(|k| k != key);
        self.announced.remove(key);
        self.desired.len() != before
    }

    /// 키가 등록되어 있는지 확인.
    pub fn contains(&self, key: &str) -> bool {
        self.desired.iter().any(|k| k == key)
    }

    /// 현재 연결에서 구독 프레임이 전송된 키인지 확인.
    pub fn is_announced(&self, key: &str) -> bool {
        self.announced.contains(key)
    }

    /// 등록된 키 (등록 순서).
    pub fn keys(&self) -> &[String] {
        &self.desired
    }

    /// 등록된 키 수.
    pub fn len(&self) -> usize {
        self.desired.len()
    }

    /// 비어 있는지 확인.
    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }

    /// 등록된 모든 키에 대해 구독 프레임을 한 번씩 전송합니다.
    ///
    /// 새 연결이 성립될 때마다 정확히 한 번 호출됩니다.
    /// 반환값은 전송된 프레임 수입니다.
    pub fn replay_all(&mut self, mut send: impl FnMut(&OutboundMessage) -> bool) -> usize {
        self.announced.clear();

        let mut sent = 0;
        for key in &self.desired {
            if send(&self.kind.subscribe_frame(key)) {
                self.announced.insert(key.clone());
                sent += 1;
            }
        }

        debug!(channel = %self.kind, sent, total = self.desired.len(), "구독 복원");
        sent
    }

    /// 연결 종료로 서버 측 구독이 사라졌음을 기록합니다. 원하는 키는 유지됩니다.
    pub fn clear_replay_marker(&mut self) {
        self.announced.clear();
    }

    /// 원하는 키와 구독 상태를 모두 비웁니다.
    pub fn clear(&mut self) {
        self.desired.clear();
        self.announced.clear();
    }

    /// 새 관심 목록과 현재 키를 비교하여 동기화합니다.
    ///
    /// `connected`가 true이면 추가된 키에 구독 프레임, 제거된 키에 해제
    /// 프레임을 보냅니다. 연결이 없으면 목록만 갱신하고 전송은 다음
    /// replay로 미룹니다.
    pub fn reconcile<S: AsRef<str>>(
        &mut self,
        interest: &[S],
        connected: bool,
        mut send: impl FnMut(&OutboundMessage) -> bool,
    ) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome {
            deferred: !connected,
            ..Default::default()
        };

        let removed: Vec<String> = self
            .desired
            .iter()
            .filter(|k| !interest.iter().any(|i| i.as_ref() == k.as_str()))
            .cloned()
            .collect();

        for key in removed {
            let was_announced = self.is_announced(&key);
            self.remove(&key);
            if connected && was_announced {
                if let Some(frame) = self.kind.unsubscribe_frame(&key) {
                    send(&frame);
                }
            }
            outcome.removed.push(key);
        }

        for key in interest {
            let key = key.as_ref();
            if !self.add(key) {
                continue;
            }
            if connected && send(&self.kind.subscribe_frame(key)) {
                self.announced.insert(key.to_string());
            }
            outcome.added.push(key.to_string());
        }

        if !outcome.is_empty() {
            debug!(
                channel = %self.kind,
                added = ?outcome.added,
                removed = ?outcome.removed,
                deferred = outcome.deferred,
                "관심 목록 동기화"
            );
        }
        outcome
    }

    /// 연결된 상태에서 단일 키를 구독 처리합니다.
    ///
    /// 키가 새로 추가되었거나 아직 구독 프레임이 나가지 않았다면 전송합니다.
    pub(crate) fn announce(&mut self, key: &str, send: impl FnOnce(&OutboundMessage) -> bool) {
        if self.is_announced(key) {
            return;
        }
        if send(&self.kind.subscribe_frame(key)) {
            self.announced.insert(key.to_string());
        }
    }
}
