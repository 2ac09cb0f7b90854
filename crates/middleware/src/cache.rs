use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;

/// Digest of one call's arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(u64);

fn digest<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Arguments of a memoized call.
///
/// Positional arguments are keyed in order. Keyword arguments are keyed as an
/// unordered mapping, so `kwarg("a", ..).kwarg("b", ..)` and
/// `kwarg("b", ..).kwarg("a", ..)` produce the same key.
#[derive(Debug, Clone, Default)]
pub struct CallArgs {
    positional: Vec<u64>,
    keyword: BTreeMap<String, u64>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg<T: Hash + ?Sized>(mut self, value: &T) -> Self {
        self.positional.push(digest(value));
        self
    }

    /// Repeating a name replaces the earlier value
    pub fn kwarg<T: Hash + ?Sized>(mut self, name: &str, value: &T) -> Self {
        self.keyword.insert(name.to_string(), digest(value));
        self
    }

    pub fn key(&self) -> CacheKey {
        let mut hasher = DefaultHasher::new();
        self.positional.hash(&mut hasher);
        self.keyword.hash(&mut hasher);
        CacheKey(hasher.finish())
    }
}

/// Per-call controls. These never take part in the key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Ignore any cached entry and run the producer
    pub drop: bool,
    /// Lifetime for this call only, instead of the cache default
    pub lifetime: Option<Duration>,
}

impl CallOptions {
    pub fn fresh() -> Self {
        Self {
            drop: true,
            lifetime: None,
        }
    }

    pub fn lifetime(lifetime: Duration) -> Self {
        Self {
            drop: false,
            lifetime: Some(lifetime),
        }
    }
}

struct Entry<V> {
    written: Instant,
    value: V,
}

/// TTL memoization of a producer's results.
///
/// Entries are only replaced on a miss or a forced drop; nothing expires in
/// the background. A bounded cache evicts the least recently used key when a
/// new key is inserted at capacity, and every lookup refreshes recency.
pub struct Memo<V> {
    default_lifetime: Duration,
    entries: Mutex<LruCache<CacheKey, Entry<V>>>,
}

impl<V: Clone> Memo<V> {
    pub fn new(default_lifetime: Duration) -> Self {
        Self {
            default_lifetime,
            entries: Mutex::new(LruCache::unbounded()),
        }
    }

    pub fn bounded(default_lifetime: Duration, capacity: NonZeroUsize) -> Self {
        Self {
            default_lifetime,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn default_lifetime(&self) -> Duration {
        self.default_lifetime
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Remove the entry for `args`. Returns whether one existed.
    pub fn invalidate(&self, args: &CallArgs) -> bool {
        self.entries().pop(&args.key()).is_some()
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    pub fn get_or_insert_with<F>(&self, args: &CallArgs, options: CallOptions, produce: F) -> V
    where
        F: FnOnce() -> V,
    {
        let key = args.key();
        if let Some(value) = self.lookup(key, &options) {
            return value;
        }
        let value = produce();
        self.store(key, value.clone());
        value
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with); errors are
    /// returned as-is and not cached.
    pub fn try_get_or_insert_with<F, E>(
        &self,
        args: &CallArgs,
        options: CallOptions,
        produce: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let key = args.key();
        if let Some(value) = self.lookup(key, &options) {
            return Ok(value);
        }
        let value = produce()?;
        self.store(key, value.clone());
        Ok(value)
    }

    /// The lock is not held while the producer runs, so concurrent misses on
    /// the same key each run the producer and the last write wins.
    pub async fn get_or_insert_async<F, Fut>(
        &self,
        args: &CallArgs,
        options: CallOptions,
        produce: F,
    ) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let key = args.key();
        if let Some(value) = self.lookup(key, &options) {
            return value;
        }
        let value = produce().await;
        self.store(key, value.clone());
        value
    }

    pub async fn try_get_or_insert_async<F, Fut, E>(
        &self,
        args: &CallArgs,
        options: CallOptions,
        produce: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let key = args.key();
        if let Some(value) = self.lookup(key, &options) {
            return Ok(value);
        }
        let value = produce().await?;
        self.store(key, value.clone());
        Ok(value)
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<CacheKey, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: CacheKey, options: &CallOptions) -> Option<V> {
        let mut entries = self.entries();
        // get() refreshes recency even when the entry turns out stale
        let entry = entries.get(&key)?;
        if options.drop {
            trace!(?key, "cache drop requested");
            return None;
        }
        let lifetime = options.lifetime.unwrap_or(self.default_lifetime);
        let valid = entry
            .written
            .checked_add(lifetime)
            .map_or(true, |expires| Instant::now() < expires);
        valid.then(|| entry.value.clone())
    }

    fn store(&self, key: CacheKey, value: V) {
        let entry = Entry {
            written: Instant::now(),
            value,
        };
        if let Some((evicted, _)) = self.entries().push(key, entry) {
            if evicted != key {
                trace!(?evicted, "cache entry evicted");
            }
        }
    }
}
