//! 동기 옵저버 목록.
//!
//! 등록 순서대로, 이벤트가 도착한 스레드에서 즉시 호출됩니다.

/// 등록된 리스너 식별자.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Box<dyn FnMut(&T) + Send>;

/// 이벤트 타입 `T`에 대한 리스너 목록.
pub struct Listeners<T> {
    next_id: u64,
    entries: Vec<(ListenerId, Callback<T>)>,
}

impl<T> Listeners<T> {
    /// 빈 리스너 목록을 생성합니다.
    pub fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    /// 리스너를 등록하고 해제용 ID를 반환합니다.
    pub fn subscribe(&mut self, callback: impl FnMut(&T) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, Box::new(callback)));
        id
    }

    /// 리스너를 해제합니다. 없는 ID면 false.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// 모든 리스너에 이벤트를 전달합니다.
    pub fn emit(&mut self, event: &T) {
        for (_, callback) in self.entries.iter_mut() {
            callback(event);
        }
    }

    /// 등록된 리스너 수.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 리스너가 없는지 확인.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_emit_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut listeners: Listeners<i32> = Listeners::new();

        let first = seen.clone();
        listeners.subscribe(move |v| first.lock().unwrap().push(("first", *v)));
        let second = seen.clone();
        listeners.subscribe(move |v| second.lock().unwrap().push(("second", *v)));

        listeners.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("first", 7), ("second", 7)]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let count = Arc::new(Mutex::new(0));
        let mut listeners: Listeners<()> = Listeners::new();

        let counter = count.clone();
        let id = listeners.subscribe(move |_| *counter.lock().unwrap() += 1);
        listeners.emit(&());
        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.emit(&());

        assert_eq!(*count.lock().unwrap(), 1);
        assert!(listeners.is_empty());
    }
}
