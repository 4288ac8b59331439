use super::{Backend, Placement};
use crate::error::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Inner {
    store_ids: HashSet<String>,
    store_expiry: HashMap<String, i64>,
    queue_ids: VecDeque<String>,
    queue_expiry: HashMap<String, i64>,
    queue_position_cache: HashMap<String, u64>,
    store_capacity: i64,
    queue_enabled: bool,
    queue_sync_timestamp: i64,
    queue_waiting_page: Option<String>,
    // Mirrors Redis EXISTS on :queue_enabled/:store_capacity/:queue_sync_timestamp:
    // each becomes true the first time its value is ever written, by seeding or
    // by an explicit setter, not merely by having a zero-value default in memory.
    queue_enabled_set: bool,
    store_capacity_set: bool,
    queue_sync_timestamp_set: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            store_ids: HashSet::new(),
            store_expiry: HashMap::new(),
            queue_ids: VecDeque::new(),
            queue_expiry: HashMap::new(),
            queue_position_cache: HashMap::new(),
            store_capacity: -1,
            queue_enabled: true,
            queue_sync_timestamp: 0,
            queue_waiting_page: None,
            queue_enabled_set: false,
            store_capacity_set: false,
            queue_sync_timestamp_set: false,
        }
    }

    /// Shared logic for `id_add`/`id_position`. `touch_only` skips
    /// placement when the ID is absent, matching `id_position`'s
    /// short-circuit before it falls through to `id_add` behavior.
    fn add_or_touch(
        &mut self,
        id: &str,
        now: i64,
        validated_expiry: i64,
        quarantine_expiry: i64,
    ) -> Placement {
        if self.store_ids.contains(id) {
            self.store_expiry.insert(id.to_string(), now + validated_expiry);
            return Placement {
                added: false,
                position: 0,
            };
        }

        if let Some(&position) = self.queue_position_cache.get(id) {
            self.queue_expiry.insert(id.to_string(), now + validated_expiry);
            return Placement {
                added: false,
                position,
            };
        }

        let position = self.place(id, now, validated_expiry, quarantine_expiry);
        Placement {
            added: true,
            position,
        }
    }

    /// `id_add`'s placement logic, shared with the miss branch of
    /// `add_or_touch`. Returns 0 for store admission, else queue position.
    fn place(&mut self, id: &str, now: i64, validated_expiry: i64, quarantine_expiry: i64) -> u64 {
        let unbounded = self.store_capacity < 0;

        if unbounded {
            self.store_ids.insert(id.to_string());
            self.store_expiry.insert(id.to_string(), now + validated_expiry);
            return 0;
        }

        if !self.queue_ids.is_empty() {
            return self.append_to_queue(id, now, quarantine_expiry);
        }

        if (self.store_ids.len() as i64) < self.store_capacity {
            self.store_ids.insert(id.to_string());
            self.store_expiry.insert(id.to_string(), now + validated_expiry);
            return 0;
        }

        self.append_to_queue(id, now, quarantine_expiry)
    }

    fn append_to_queue(&mut self, id: &str, now: i64, quarantine_expiry: i64) -> u64 {
        self.queue_ids.push_back(id.to_string());
        self.queue_expiry.insert(id.to_string(), now + quarantine_expiry);
        let position = self.queue_ids.len() as u64;
        self.queue_position_cache.insert(id.to_string(), position);
        position
    }

    fn remove(&mut self, id: &str, now: i64) {
        if self.queue_expiry.contains_key(id) {
            self.queue_expiry.insert(id.to_string(), now - 1);
            return;
        }
        self.store_ids.remove(id);
        self.store_expiry.remove(id);
    }

    fn promote(&mut self, id: &str, now: i64, validated_expiry: i64) {
        self.queue_ids.retain(|existing| existing != id);
        self.queue_position_cache.remove(id);
        self.queue_expiry.remove(id);
        self.store_ids.insert(id.to_string());
        self.store_expiry.insert(id.to_string(), now + validated_expiry);
    }

    fn store_promote(&mut self) -> u64 {
        let transfer = if self.store_capacity < 0 {
            self.queue_ids.len() as i64
        } else {
            (self.store_capacity - self.store_ids.len() as i64).max(0)
        };
        self.drain_queue_into_store(transfer as u64)
    }

    fn store_promote_n(&mut self, n: u64) -> u64 {
        self.drain_queue_into_store(n)
    }

    fn drain_queue_into_store(&mut self, max: u64) -> u64 {
        let mut moved = 0;
        for _ in 0..max {
            let Some(id) = self.queue_ids.pop_front() else {
                break;
            };
            self.queue_position_cache.remove(&id);
            let expiry = self.queue_expiry.remove(&id).unwrap_or(0);
            self.store_ids.insert(id.clone());
            self.store_expiry.insert(id, expiry);
            moved += 1;
        }
        moved
    }

    fn queue_timeout(&mut self, now: i64) -> u64 {
        let mut survivors = VecDeque::with_capacity(self.queue_ids.len());
        let mut removed = 0u64;

        for id in self.queue_ids.drain(..) {
            let expiry = self.queue_expiry.get(&id).copied().unwrap_or(i64::MIN);
            if expiry < now {
                self.queue_expiry.remove(&id);
                self.queue_position_cache.remove(&id);
                removed += 1;
            } else {
                survivors.push_back(id);
            }
        }

        for (index, id) in survivors.iter().enumerate() {
            self.queue_position_cache
                .insert(id.clone(), (index + 1) as u64);
        }

        self.queue_ids = survivors;
        removed
    }

    fn store_timeout(&mut self, now: i64) -> u64 {
        let expired: Vec<String> = self
            .store_expiry
            .iter()
            .filter(|(_, &expiry)| expiry < now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.store_ids.remove(id);
            self.store_expiry.remove(id);
        }

        expired.len() as u64
    }
}

/// In-process, single-node backend. Holds one lock for the duration of
/// every call so the ten operations stay as atomic as their Redis-script
/// counterparts; there is never an await inside the critical section.
pub struct LocalBackend {
    inner: Mutex<Inner>,
    events_tx: broadcast::Sender<String>,
}

impl LocalBackend {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Inner::new()),
            events_tx,
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn id_add(
        &self,
        id: &str,
        now: i64,
        validated_expiry: i64,
        quarantine_expiry: i64,
    ) -> Result<u64> {
        // Shares id_position's existence precheck: without it, repeated
        // id_add calls for an ID already in queue would append it again,
        // violating "id_add; id_add ≡ id_add".
        let mut inner = self.inner.lock();
        Ok(inner
            .add_or_touch(id, now, validated_expiry, quarantine_expiry)
            .position)
    }

    async fn id_position(
        &self,
        id: &str,
        now: i64,
        validated_expiry: i64,
        quarantine_expiry: i64,
    ) -> Result<Placement> {
        let mut inner = self.inner.lock();
        Ok(inner.add_or_touch(id, now, validated_expiry, quarantine_expiry))
    }

    async fn id_remove(&self, id: &str, now: i64) -> Result<()> {
        self.inner.lock().remove(id, now);
        Ok(())
    }

    async fn id_promote(&self, id: &str, now: i64, validated_expiry: i64) -> Result<()> {
        self.inner.lock().promote(id, now, validated_expiry);
        Ok(())
    }

    async fn store_promote(&self, _now: i64) -> Result<u64> {
        Ok(self.inner.lock().store_promote())
    }

    async fn store_promote_n(&self, n: u64, _now: i64) -> Result<u64> {
        Ok(self.inner.lock().store_promote_n(n))
    }

    async fn queue_timeout(&self, now: i64) -> Result<u64> {
        Ok(self.inner.lock().queue_timeout(now))
    }

    async fn store_timeout(&self, now: i64) -> Result<u64> {
        Ok(self.inner.lock().store_timeout(now))
    }

    async fn has_ids(&self) -> Result<bool> {
        let inner = self.inner.lock();
        Ok(!inner.store_ids.is_empty() || !inner.queue_ids.is_empty())
    }

    async fn check_sync_keys(&self) -> Result<bool> {
        let inner = self.inner.lock();
        Ok(inner.queue_enabled_set && inner.store_capacity_set && inner.queue_sync_timestamp_set)
    }

    async fn seed_sync_keys(
        &self,
        now: i64,
        store_capacity: i64,
        queue_enabled: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.store_capacity = store_capacity;
        inner.store_capacity_set = true;
        inner.queue_enabled = queue_enabled;
        inner.queue_enabled_set = true;
        inner.queue_sync_timestamp = now;
        inner.queue_sync_timestamp_set = true;
        Ok(())
    }

    async fn queue_size(&self) -> Result<u64> {
        Ok(self.inner.lock().queue_ids.len() as u64)
    }

    async fn store_size(&self) -> Result<u64> {
        Ok(self.inner.lock().store_ids.len() as u64)
    }

    async fn store_capacity(&self) -> Result<i64> {
        Ok(self.inner.lock().store_capacity)
    }

    async fn set_store_capacity(&self, capacity: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.store_capacity = capacity;
        inner.store_capacity_set = true;
        Ok(())
    }

    async fn queue_enabled(&self) -> Result<bool> {
        Ok(self.inner.lock().queue_enabled)
    }

    async fn set_queue_enabled(&self, enabled: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.queue_enabled = enabled;
        inner.queue_enabled_set = true;
        Ok(())
    }

    async fn queue_waiting_page(&self) -> Result<Option<String>> {
        Ok(self.inner.lock().queue_waiting_page.clone())
    }

    async fn set_queue_waiting_page(&self, page: &str) -> Result<()> {
        self.inner.lock().queue_waiting_page = Some(page.to_string());
        Ok(())
    }

    async fn queue_sync_timestamp(&self) -> Result<i64> {
        Ok(self.inner.lock().queue_sync_timestamp)
    }

    async fn set_queue_sync_timestamp(&self, now: i64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.queue_sync_timestamp = now;
        inner.queue_sync_timestamp_set = true;
        Ok(())
    }

    async fn publish(&self, event: &str) -> Result<()> {
        // No subscribers is not an error; broadcast::Sender::send only
        // fails when the channel has no receivers.
        let _ = self.events_tx.send(event.to_string());
        Ok(())
    }

    async fn subscribe(&self) -> Result<broadcast::Receiver<String>> {
        Ok(self.events_tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn id_add_fills_store_before_queue() {
        let backend = LocalBackend::new();
        backend.set_store_capacity(2).await.unwrap();

        assert_eq!(backend.id_add("a", 1000, 600, 45).await.unwrap(), 0);
        assert_eq!(backend.id_add("b", 1000, 600, 45).await.unwrap(), 0);
        assert_eq!(backend.id_add("c", 1000, 600, 45).await.unwrap(), 1);
        assert_eq!(backend.id_add("d", 1000, 600, 45).await.unwrap(), 2);

        assert_eq!(backend.store_size().await.unwrap(), 2);
        assert_eq!(backend.queue_size().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn id_add_is_idempotent() {
        let backend = LocalBackend::new();
        backend.set_store_capacity(1).await.unwrap();

        backend.id_add("a", 1000, 600, 45).await.unwrap();
        let second = backend.id_add("a", 1000, 600, 45).await.unwrap();
        assert_eq!(second, 0);
        assert_eq!(backend.store_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn id_position_upgrades_quarantine_to_validated() {
        let backend = LocalBackend::new();
        backend.set_store_capacity(0).await.unwrap();

        backend.id_add("c", 1000, 600, 45).await.unwrap();
        let placement = backend.id_position("c", 1040, 600, 45).await.unwrap();
        assert!(!placement.added);
        assert_eq!(placement.position, 1);
    }

    #[tokio::test]
    async fn id_remove_defers_queue_eviction_to_sweep() {
        let backend = LocalBackend::new();
        backend.set_store_capacity(0).await.unwrap();
        backend.id_add("a", 1000, 600, 45).await.unwrap();

        backend.id_remove("a", 1000).await.unwrap();
        assert_eq!(backend.queue_size().await.unwrap(), 1);

        let removed = backend.queue_timeout(1001).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(backend.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_promote_moves_in_fifo_order() {
        let backend = LocalBackend::new();
        backend.set_store_capacity(0).await.unwrap();
        backend.id_add("a", 1000, 600, 45).await.unwrap();
        backend.id_add("b", 1000, 600, 45).await.unwrap();

        backend.set_store_capacity(1).await.unwrap();
        let moved = backend.store_promote(1010).await.unwrap();
        assert_eq!(moved, 1);
        assert_eq!(backend.store_size().await.unwrap(), 1);
        assert_eq!(backend.queue_size().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_promote_drains_fully_when_unbounded() {
        let backend = LocalBackend::new();
        backend.set_store_capacity(0).await.unwrap();
        backend.id_add("a", 1000, 600, 45).await.unwrap();
        backend.id_add("b", 1000, 600, 45).await.unwrap();

        backend.set_store_capacity(-1).await.unwrap();
        let moved = backend.store_promote(1010).await.unwrap();
        assert_eq!(moved, 2);
        assert_eq!(backend.queue_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn queue_timeout_recompacts_position_cache() {
        let backend = LocalBackend::new();
        backend.set_store_capacity(0).await.unwrap();
        backend.id_add("a", 1000, 10, 10).await.unwrap();
        backend.id_add("b", 1000, 2500, 2500).await.unwrap();
        backend.id_add("c", 1000, 500, 500).await.unwrap();

        let removed = backend.queue_timeout(2000).await.unwrap();
        assert_eq!(removed, 2);

        let placement = backend.id_position("b", 2000, 2500, 2500).await.unwrap();
        assert_eq!(placement.position, 1);
    }

    #[tokio::test]
    async fn has_ids_reflects_either_container() {
        let backend = LocalBackend::new();
        assert!(!backend.has_ids().await.unwrap());
        backend.id_add("a", 1000, 600, 45).await.unwrap();
        assert!(backend.has_ids().await.unwrap());
    }

    #[tokio::test]
    async fn events_are_published_best_effort() {
        let backend = LocalBackend::new();
        let mut rx = backend.subscribe().await.unwrap();
        backend.publish("queue:add").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "queue:add");
    }
}
