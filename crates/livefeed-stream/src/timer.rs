//! 재연결 타이머와 백오프 정책.
//!
//! `Scheduler`는 취소 가능한 지연 콜백입니다. 타이머가 만료되면
//! `TimerId`가 이벤트 루프로 전달되고, 이벤트 루프는 그 ID가 아직
//! 유효한지 확인한 뒤에만 재연결합니다. 따라서 이미 만료되었지만 아직
//! 처리되지 않은 타이머도 취소가 항상 우선합니다.
//!
//! - `TokioScheduler`: tokio 타이머 기반 실제 구현
//! - `ManualScheduler`: 테스트용 가상 시계

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use livefeed_core::ReconnectConfig;

/// 예약된 타이머 식별자.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// 원시 값에서 생성합니다.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// 취소 가능한 지연 콜백 스케줄러.
pub trait Scheduler: Send {
    /// `delay` 후에 만료되는 타이머를 예약합니다.
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// 타이머를 취소합니다. 이미 만료되었거나 없는 ID면 무시합니다.
    fn cancel(&mut self, id: TimerId);
}

// ============================================================================
// 백오프 정책
// ============================================================================

/// 지수 백오프 재연결 정책.
///
/// `delay = min(base * 2^attempt, cap)`, attempt는 1부터 시작합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// 기본 지연
    pub base: Duration,
    /// 최대 지연
    pub cap: Duration,
    /// 최대 재연결 시도 횟수
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1_000),
            cap: Duration::from_millis(30_000),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// n번째 시도의 대기 시간.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // 2^31 이상이면 어차피 cap에 걸림
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// 추가 재연결 시도가 허용되는지 확인.
    pub fn allows(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }
}

impl From<&ReconnectConfig> for BackoffPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base: config.base_delay(),
            cap: config.max_delay(),
            max_attempts: config.max_attempts,
        }
    }
}

// ============================================================================
// tokio 스케줄러
// ============================================================================

/// tokio 타이머 기반 스케줄러.
///
/// 만료된 타이머 ID는 생성 시 받은 채널로 전달됩니다.
pub struct TokioScheduler {
    next_id: u64,
    fired_tx: mpsc::UnboundedSender<TimerId>,
    pending: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    /// 새 스케줄러와 만료 이벤트 수신 채널을 생성합니다.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerId>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_id: 1,
            fired_tx,
            pending: HashMap::new(),
        };
        (scheduler, fired_rx)
    }

    /// 아직 만료되지 않은 타이머 수.
    pub fn pending_count(&self) -> usize {
        self.pending.values().filter(|h| !h.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(id);
        });

        self.pending.retain(|_, h| !h.is_finished());
        self.pending.insert(id, handle);
        debug!(%id, delay_ms = delay.as_millis() as u64, "타이머 예약");
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.pending.remove(&id) {
            handle.abort();
            debug!(%id, "타이머 취소");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.pending.drain() {
            handle.abort();
        }
    }
}

// ============================================================================
// 가상 시계 스케줄러
// ============================================================================

/// 실제 시간 없이 진행하는 테스트용 스케줄러.
///
/// `advance`로 가상 시계를 진행하면 만료된 타이머 ID가 반환되며,
/// 호출자가 이를 이벤트 루프에 직접 전달합니다.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    now: Duration,
    timers: Vec<ManualTimer>,
    history: Vec<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct ManualTimer {
    id: TimerId,
    due: Duration,
}

impl ManualScheduler {
    /// 새 가상 시계를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 가상 시계를 진행하고 만료된 타이머를 만료 순서대로 반환합니다.
    pub fn advance(&mut self, by: Duration) -> Vec<TimerId> {
        self.now += by;
        let now = self.now;

        let mut fired: Vec<ManualTimer> = self.timers.iter().copied().filter(|t| t.due <= now).collect();
        fired.sort_by_key(|t| (t.due, t.id));
        self.timers.retain(|t| t.due > now);

        fired.into_iter().map(|t| t.id).collect()
    }

    /// 현재 가상 시각.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// 대기 중인 타이머 수.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// 가장 먼저 만료될 타이머까지 남은 시간.
    pub fn next_due_in(&self) -> Option<Duration> {
        self.timers.iter().map(|t| t.due - self.now).min()
    }

    /// 지금까지 예약된 모든 지연 (취소된 것 포함).
    pub fn scheduled_delays(&self) -> &[Duration] {
        &self.history
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.timers.push(ManualTimer {
            id,
            due: self.now + delay,
        });
        self.history.push(delay);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        self.timers.retain(|t| t.id != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_backoff_sequence_is_capped() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.delay_for(attempt).as_millis() as u64)
            .collect();

        assert_eq!(delays, vec![2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_allows_up_to_max_attempts() {
        let policy = BackoffPolicy::default();
        assert!(policy.allows(0));
        assert!(policy.allows(4));
        assert!(!policy.allows(5));
    }

    #[test]
    fn test_backoff_from_config() {
        let config = ReconnectConfig {
            base_delay_ms: 250,
            max_delay_ms: 1_000,
            max_attempts: 2,
        };
        let policy = BackoffPolicy::from(&config);
        assert_eq!(policy.delay_for(1), ms(500));
        assert_eq!(policy.delay_for(3), ms(1_000));
        assert_eq!(policy.max_attempts, 2);
    }

    #[test]
    fn test_manual_scheduler_fires_in_due_order() {
        let mut scheduler = ManualScheduler::new();
        let late = scheduler.schedule(ms(300));
        let early = scheduler.schedule(ms(100));

        assert!(scheduler.advance(ms(50)).is_empty());
        assert_eq!(scheduler.next_due_in(), Some(ms(50)));
        assert_eq!(scheduler.advance(ms(300)), vec![early, late]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_manual_scheduler_cancel() {
        let mut scheduler = ManualScheduler::new();
        let id = scheduler.schedule(ms(100));
        scheduler.cancel(id);

        assert!(scheduler.advance(ms(1_000)).is_empty());
        assert_eq!(scheduler.scheduled_delays(), &[ms(100)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_delivers_fired_id() {
        let (mut scheduler, mut fired) = TokioScheduler::new();
        let id = scheduler.schedule(ms(2_000));

        tokio::time::advance(ms(2_001)).await;
        assert_eq!(fired.recv().await, Some(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel_prevents_delivery() {
        let (mut scheduler, mut fired) = TokioScheduler::new();
        let cancelled = scheduler.schedule(ms(1_000));
        let kept = scheduler.schedule(ms(3_000));
        scheduler.cancel(cancelled);

        tokio::time::advance(ms(5_000)).await;
        assert_eq!(fired.recv().await, Some(kept));
        assert!(fired.try_recv().is_err());
    }

    proptest! {
        #[test]
        fn prop_backoff_monotonic_and_bounded(base in 1u64..5_000, cap_factor in 1u64..64, attempt in 1u32..64) {
            let policy = BackoffPolicy {
                base: ms(base),
                cap: ms(base * cap_factor),
                max_attempts: 5,
            };
            let current = policy.delay_for(attempt);
            let next = policy.delay_for(attempt + 1);

            prop_assert!(current <= policy.cap);
            prop_assert!(current >= policy.base.min(policy.cap));
            prop_assert!(next >= current);
        }
    }
}
