use std::{collections::HashMap, time::Duration};

use parking_lot::Mutex;
use redis::{aio::ConnectionManager, Client};
use tokio::time::Instant;

use super::CacheResult;

const SCAN_BATCH: usize = 500;

/// Shortest lifetime either store grants an entry. Redis `EX` counts whole
/// seconds and rejects 0.
const MIN_TTL: Duration = Duration::from_secs(1);

/// Key/value stores a [`super::ResultCache`] can sit on.
pub enum CacheBackend {
    Redis(RedisStore),
    Memory(MemoryStore),
}

impl CacheBackend {
    pub fn kind(&self) -> &'static str {
        match self {
            CacheBackend::Redis(_) => "redis",
            CacheBackend::Memory(_) => "memory",
        }
    }

    pub async fn ping(&self) -> CacheResult<()> {
        match self {
            CacheBackend::Redis(store) => store.ping().await,
            CacheBackend::Memory(_) => Ok(()),
        }
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        match self {
            CacheBackend::Redis(store) => store.get(key).await,
            CacheBackend::Memory(store) => Ok(store.get(key)),
        }
    }

    pub async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        match self {
            CacheBackend::Redis(store) => store.set(key, value, ttl).await,
            CacheBackend::Memory(store) => {
                store.set(key, value, ttl);
                Ok(())
            }
        }
    }

    /// Deletes every key starting with `prefix`, returning how many went.
    pub async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        match self {
            CacheBackend::Redis(store) => store.delete_prefix(prefix).await,
            CacheBackend::Memory(store) => Ok(store.delete_prefix(prefix)),
        }
    }

    pub async fn count_prefix(&self, prefix: &str) -> CacheResult<u64> {
        match self {
            CacheBackend::Redis(store) => Ok(store.scan_prefix(prefix).await?.len() as u64),
            CacheBackend::Memory(store) => Ok(store.count_prefix(prefix)),
        }
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let seconds = ttl.max(MIN_TTL).as_secs();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Walks the keyspace with SCAN so a large store is never blocked.
    async fn scan_prefix(&self, prefix: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", glob_escape(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let keys = self.scan_prefix(prefix).await?;
        let mut conn = self.conn.clone();
        let mut deleted = 0;
        for chunk in keys.chunks(SCAN_BATCH) {
            let removed: u64 = redis::cmd("DEL")
                .arg(chunk.to_vec())
                .query_async(&mut conn)
                .await?;
            deleted += removed;
        }
        Ok(deleted)
    }
}

/// Escapes glob metacharacters so `MATCH` treats `prefix` literally.
fn glob_escape(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for ch in prefix.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

struct MemoryEntry {
    value: String,
    /// `None` when the TTL reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Process-local store with per-entry expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.is_live(Instant::now()) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    fn set(&self, key: &str, value: String, ttl: Duration) {
        let expires_at = Instant::now().checked_add(ttl.max(MIN_TTL));
        self.entries
            .lock()
            .insert(key.to_string(), MemoryEntry { value, expires_at });
    }

    fn delete_prefix(&self, prefix: &str) -> u64 {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        (before - entries.len()) as u64
    }

    fn count_prefix(&self, prefix: &str) -> u64 {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.is_live(now));
        entries.keys().filter(|key| key.starts_with(prefix)).count() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn memory_entries_expire_after_ttl() {
        let backend = CacheBackend::Memory(MemoryStore::new());
        backend
            .set("classification:a", "payload".into(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            backend.get("classification:a").await.unwrap().as_deref(),
            Some("payload")
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(backend.get("classification:a").await.unwrap(), None);
        assert_eq!(backend.count_prefix("classification:").await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unrepresentable_ttl_never_expires() {
        let backend = CacheBackend::Memory(MemoryStore::new());
        backend
            .set("classification:a", "x".into(), Duration::from_secs(u64::MAX))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert_eq!(backend.get("classification:a").await.unwrap().as_deref(), Some("x"));
        assert_eq!(backend.count_prefix("classification:").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_lives_for_the_minimum() {
        let backend = CacheBackend::Memory(MemoryStore::new());
        backend
            .set("classification:a", "x".into(), Duration::ZERO)
            .await
            .unwrap();
        assert!(backend.get("classification:a").await.unwrap().is_some());

        tokio::time::advance(MIN_TTL).await;
        assert!(backend.get("classification:a").await.unwrap().is_none());
    }

    #[test]
    fn scan_pattern_escapes_glob_characters() {
        assert_eq!(glob_escape("classification:"), "classification:");
        assert_eq!(glob_escape("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[tokio::test]
    async fn prefix_operations_leave_other_namespaces_alone() {
        let backend = CacheBackend::Memory(MemoryStore::new());
        let ttl = Duration::from_secs(60);
        backend.set("classification:a", "1".into(), ttl).await.unwrap();
        backend.set("classification:b", "2".into(), ttl).await.unwrap();
        backend.set("sessions:a", "3".into(), ttl).await.unwrap();

        assert_eq!(backend.count_prefix("classification:").await.unwrap(), 2);
        assert_eq!(backend.delete_prefix("classification:").await.unwrap(), 2);
        assert_eq!(backend.count_prefix("classification:").await.unwrap(), 0);
        assert_eq!(backend.get("sessions:a").await.unwrap().as_deref(), Some("3"));
    }
}
