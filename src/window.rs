use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::types::{DataPoint, Event, TimeRange};

/// Anything that can live in a time-bounded window
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for DataPoint {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl Timestamped for Event {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Thread-safe per-key sliding windows.
///
/// Items are kept in arrival order. Every `add` appends and then prunes the
/// same key while holding that key's entry lock, so concurrent writers to one
/// key cannot lose updates.
pub struct WindowStore<T> {
    windows: DashMap<String, Window<T>>,
    default_retention: Duration,
    capacity: usize,
}

struct Window<T> {
    data: VecDeque<T>,
    retention: Duration,
    capacity: usize,
}

impl<T: Timestamped + Clone> Window<T> {
    fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            data: VecDeque::new(),
            retention,
            capacity,
        }
    }

    fn push(&mut self, item: T) {
        self.data.push_back(item);
        while self.capacity > 0 && self.data.len() > self.capacity {
            self.data.pop_front();
        }
    }

    /// Drop everything older than `now - retention`. Returns the number removed.
    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let before = self.data.len();
        self.data.retain(|item| item.timestamp() >= cutoff);
        before - self.data.len()
    }

    fn latest(&self) -> Option<&T> {
        self.data.back()
    }

    /// The most recent N items in arrival order
    fn recent(&self, n: usize) -> Vec<T> {
        let start = self.data.len().saturating_sub(n);
        self.data.iter().skip(start).cloned().collect()
    }
}

impl<T: Timestamped + Clone> WindowStore<T> {
    /// `capacity == 0` means no per-key item cap.
    pub fn new(default_retention: Duration, capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            default_retention,
            capacity,
        }
    }

    /// Set the retention horizon of one key, creating its window if needed.
    pub fn configure(&self, key: &str, retention: Duration) {
        let capacity = self.capacity;
        self.windows
            .entry(key.to_string())
            .or_insert_with(|| Window::new(retention, capacity))
            .retention = retention;
    }

    pub fn retention(&self, key: &str) -> Duration {
        self.windows
            .get(key)
            .map(|w| w.retention)
            .unwrap_or(self.default_retention)
    }

    /// Append and prune. Returns the window length afterwards.
    pub fn add(&self, key: &str, item: T, now: DateTime<Utc>) -> usize {
        let (retention, capacity) = (self.default_retention, self.capacity);
        let mut window = self.windows
            .entry(key.to_string())
            .or_insert_with(|| Window::new(retention, capacity));
        window.push(item);
        window.prune(now);
        window.data.len()
    }

    pub fn prune(&self, key: &str, now: DateTime<Utc>) -> usize {
        match self.windows.get_mut(key) {
            Some(mut w) => w.prune(now),
            None => 0,
        }
    }

    pub fn prune_all(&self, now: DateTime<Utc>) -> usize {
        self.windows.iter_mut().map(|mut w| w.prune(now)).sum()
    }

    pub fn items(&self, key: &str) -> Vec<T> {
        match self.windows.get(key) {
            Some(w) => w.data.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn items_between(&self, key: &str, range: &TimeRange) -> Vec<T> {
        match self.windows.get(key) {
            Some(w) => w.data.iter().filter(|i| range.contains(i.timestamp())).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn latest(&self, key: &str) -> Option<T> {
        self.windows.get(key)?.latest().cloned()
    }

    pub fn recent(&self, key: &str, n: usize) -> Vec<T> {
        match self.windows.get(key) {
            Some(w) => w.recent(n),
            None => Vec::new(),
        }
    }

    pub fn len(&self, key: &str) -> usize {
        self.windows.get(key).map(|w| w.data.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, key: &str) -> bool {
        self.len(key) == 0
    }

    pub fn remove(&self, key: &str) -> Vec<T> {
        self.windows
            .remove(key)
            .map(|(_, w)| w.data.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.windows.iter().map(|w| w.key().clone()).collect()
    }

    /// First item in any window matching `pred`
    pub fn find<F>(&self, pred: F) -> Option<T>
    where
        F: Fn(&T) -> bool,
    {
        self.windows
            .iter()
            .find_map(|w| w.data.iter().find(|i| pred(i)).cloned())
    }

    /// All items across every window matching `pred`
    pub fn collect_where<F>(&self, pred: F) -> Vec<T>
    where
        F: Fn(&T) -> bool,
    {
        self.windows
            .iter()
            .flat_map(|w| w.data.iter().filter(|i| pred(i)).cloned().collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn missing_key_is_empty_not_error() {
        let store: WindowStore<DataPoint> = WindowStore::new(Duration::minutes(60), 0);
        assert!(store.items("nope").is_empty());
        assert!(store.latest("nope").is_none());
        assert_eq!(store.prune("nope", t0()), 0);
    }

    #[test]
    fn add_prunes_points_outside_retention() {
        let store = WindowStore::new(Duration::minutes(60), 0);
        store.add("a", DataPoint::new(1.0, t0()), t0());
        store.add("a", DataPoint::new(2.0, t0() + Duration::minutes(30)), t0() + Duration::minutes(30));

        let len = store.add("a", DataPoint::new(3.0, t0() + Duration::minutes(90)), t0() + Duration::minutes(90));
        assert_eq!(len, 2);
        let values: Vec<f64> = store.items("a").iter().map(|p| p.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn prune_removes_out_of_order_arrivals() {
        let store = WindowStore::new(Duration::minutes(10), 0);
        let now = t0() + Duration::minutes(20);
        store.add("a", DataPoint::new(1.0, now), now);
        // late arrival, already too old
        store.add("a", DataPoint::new(2.0, t0()), now);
        assert_eq!(store.len("a"), 1);
        assert_eq!(store.latest("a").unwrap().value, 1.0);
    }

    #[test]
    fn per_key_retention_and_capacity() {
        let store = WindowStore::new(Duration::minutes(60), 3);
        store.configure("short", Duration::minutes(5));
        let now = t0() + Duration::minutes(10);

        store.add("short", DataPoint::new(1.0, t0()), now);
        store.add("long", DataPoint::new(1.0, t0()), now);
        assert_eq!(store.len("short"), 0);
        assert_eq!(store.len("long"), 1);

        for v in 2..=5 {
            store.add("long", DataPoint::new(v as f64, now), now);
        }
        let recent: Vec<f64> = store.recent("long", 2).iter().map(|p| p.value).collect();
        assert_eq!(store.len("long"), 3);
        assert_eq!(recent, vec![4.0, 5.0]);
    }

    #[test]
    fn find_and_collect_span_keys() {
        let store = WindowStore::new(Duration::hours(24), 0);
        let a = Event::new("shelter", "intake", t0());
        let b = Event::new("depot", "dispatch", t0());
        let b_id = b.id.clone();
        store.add("shelter", a, t0());
        store.add("depot", b, t0());

        assert_eq!(store.find(|e| e.id == b_id).unwrap().source, "depot");
        assert_eq!(store.collect_where(|e| e.timestamp == t0()).len(), 2);
        assert_eq!(store.remove("depot").len(), 1);
        assert_eq!(store.keys(), vec!["shelter".to_string()]);
    }

    #[test]
    fn concurrent_adds_to_one_key_are_not_lost() {
        let store: WindowStore<DataPoint> = WindowStore::new(Duration::minutes(60), 0);
        let (threads, per_thread) = (8, 250);

        std::thread::scope(|scope| {
            for t in 0..threads {
                let store = &store;
                scope.spawn(move || {
                    for i in 0..per_thread {
                        store.add("shared", DataPoint::new((t * per_thread + i) as f64, t0()), t0());
                    }
                });
            }
        });

        assert_eq!(store.len("shared"), threads * per_thread);
    }
}
