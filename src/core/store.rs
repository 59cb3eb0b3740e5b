use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Keyed record storage shared by the request handlers. Writes are
/// last-write-wins; callers re-read after a long operation if they care.
#[async_trait]
pub trait RecordStore<T: Clone + Send + Sync + 'static>: Send + Sync {
    /// Reserves a fresh timestamp-derived id and stores the record built for it.
    async fn create(&self, build: Box<dyn FnOnce(String) -> T + Send>) -> T;
    async fn get(&self, id: &str) -> Option<T>;
    /// Replaces an existing record. Returns false when the id is unknown.
    async fn update(&self, id: &str, record: T) -> bool;
    /// Drops a record. Returns false when the id is unknown.
    async fn remove(&self, id: &str) -> bool;
    async fn list(&self) -> Vec<T>;
}

struct Entry<T> {
    record: T,
    touched: Instant,
}

pub struct InMemoryStore<T> {
    entries: RwLock<HashMap<String, Entry<T>>>,
    ttl: Option<Duration>,
}

impl<T> InMemoryStore<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: None,
        }
    }

    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn is_live(&self, entry: &Entry<T>) -> bool {
        match self.ttl {
            Some(ttl) => entry.touched.elapsed() < ttl,
            None => true,
        }
    }
}

impl<T> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Milliseconds since the epoch, bumped until it does not collide with `taken`.
pub fn allocate_id<F>(taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    loop {
        let id = millis.to_string();
        if !taken(&id) {
            return id;
        }
        millis += 1;
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> RecordStore<T> for InMemoryStore<T> {
    async fn create(&self, build: Box<dyn FnOnce(String) -> T + Send>) -> T {
        let mut entries = self.entries.write().await;
        if self.ttl.is_some() {
            entries.retain(|_, e| self.is_live(e));
        }
        let id = allocate_id(|candidate| entries.contains_key(candidate));
        let record = build(id.clone());
        entries.insert(
            id,
            Entry {
                record: record.clone(),
                touched: Instant::now(),
            },
        );
        record
    }

    async fn get(&self, id: &str) -> Option<T> {
        let entries = self.entries.read().await;
        entries
            .get(id)
            .filter(|e| self.is_live(e))
            .map(|e| e.record.clone())
    }

    async fn update(&self, id: &str, record: T) -> bool {
        let mut entries = self.entries.write().await;
        let live = entries.get(id).map(|e| self.is_live(e)).unwrap_or(false);
        if !live {
            entries.remove(id);
            return false;
        }
        entries.insert(
            id.to_string(),
            Entry {
                record,
                touched: Instant::now(),
            },
        );
        true
    }

    async fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.write().await;
        entries.remove(id).map(|e| self.is_live(&e)).unwrap_or(false)
    }

    async fn list(&self) -> Vec<T> {
        let entries = self.entries.read().await;
        let mut live: Vec<(&String, &Entry<T>)> =
            entries.iter().filter(|(_, e)| self.is_live(e)).collect();
        live.sort_by(|a, b| a.0.cmp(b.0));
        live.into_iter().map(|(_, e)| e.record.clone()).collect()
    }
}
