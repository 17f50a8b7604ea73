//! Caches for issuer metadata and signing keys
//!
//! A verifier caches through the [`Cache`] trait. Unless another
//! implementation is given to the builder, it uses a time-limited cache in
//! which each key has its own slot behind an async mutex. Lookups for the
//! same key wait on one another, so at most one fetch per key is in flight;
//! lookups for different keys only contend on the brief, synchronous slot
//! lookup.

use std::{
    collections::HashMap,
    fmt,
    future::Future,
    hash::Hash,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use jwtverifier_clock::{Clock, DurationSecs, UnixTime};
use tokio::sync::Mutex as AsyncMutex;

pub(crate) type SharedClock = Arc<dyn Clock + Send + Sync>;

/// A pending fetch of a value missing from a [`Cache`]
///
/// Nothing is fetched until the future is awaited.
pub type Fetch<'a, V, E> = Pin<Box<dyn Future<Output = Result<V, E>> + Send + 'a>>;

/// Storage for values a verifier would otherwise fetch on every use
///
/// On a lookup, an implementation either returns a value it holds for `key`
/// or awaits `fetch`, decides whether to keep the result, and returns it.
/// A failed fetch must be returned to the caller as-is.
///
/// A verifier uses one cache of [`DiscoveryDocument`]s keyed by metadata
/// URL and one of [`ResolvedKey`]s keyed by key identifier. A
/// [`ResolvedKey::NotFound`] records that the keyset did not contain the
/// identifier, so a cache that keeps it spares the issuer a keyset request
/// for every token naming a bogus `kid`.
///
/// ```
/// use std::{collections::HashMap, hash::Hash};
///
/// use async_trait::async_trait;
/// use jwtverifier::{Cache, Fetch};
/// use tokio::sync::Mutex;
///
/// /// Keeps every value it is given
/// #[derive(Debug, Default)]
/// struct ForeverCache<K, V>(Mutex<HashMap<K, V>>);
///
/// #[async_trait]
/// impl<K, V, E> Cache<K, V, E> for ForeverCache<K, V>
/// where
///     K: Clone + Eq + Hash + std::fmt::Debug + Send + Sync + 'static,
///     V: Clone + std::fmt::Debug + Send + Sync + 'static,
///     E: Send + 'static,
/// {
///     async fn get_or_fetch<'a>(&'a self, key: &'a K, fetch: Fetch<'a, V, E>) -> Result<V, E> {
///         let mut values = self.0.lock().await;
///         if let Some(value) = values.get(key) {
///             return Ok(value.clone());
///         }
///
///         let value = fetch.await?;
///         values.insert(key.clone(), value.clone());
///         Ok(value)
///     }
/// }
/// ```
///
/// [`DiscoveryDocument`]: crate::DiscoveryDocument
/// [`ResolvedKey`]: crate::ResolvedKey
/// [`ResolvedKey::NotFound`]: crate::ResolvedKey::NotFound
#[async_trait]
pub trait Cache<K, V, E>: fmt::Debug + Send + Sync
where
    K: Sync + 'static,
    V: Send + 'static,
    E: Send + 'static,
{
    /// Returns the value held for `key`, or the result of `fetch`
    async fn get_or_fetch<'a>(&'a self, key: &'a K, fetch: Fetch<'a, V, E>) -> Result<V, E>;
}

/// Slot count above which idle, expired slots are dropped on insertion
const PURGE_THRESHOLD: usize = 1024;

struct Entry<V> {
    value: V,
    expires_at: UnixTime,
}

type Slot<V> = Arc<AsyncMutex<Option<Entry<V>>>>;

struct Slots<K, V> {
    map: HashMap<K, Slot<V>>,
    next_purge: UnixTime,
}

/// The default [`Cache`]: values are kept for a fixed time-to-live
pub(crate) struct TtlCache<K, V> {
    name: &'static str,
    ttl: DurationSecs,
    clock: SharedClock,
    slots: Mutex<Slots<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display,
    V: Clone,
{
    pub(crate) fn new(name: &'static str, ttl: DurationSecs, clock: SharedClock) -> Self {
        Self {
            name,
            ttl,
            clock,
            slots: Mutex::new(Slots {
                map: HashMap::new(),
                next_purge: UnixTime(0),
            }),
        }
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(slot) = slots.map.get(key) {
            return Arc::clone(slot);
        }

        if slots.map.len() >= PURGE_THRESHOLD {
            // An entry outlives a purge by at most one TTL
            let now = self.clock.now();
            if now >= slots.next_purge {
                self.purge_expired(&mut slots.map, now);
                slots.next_purge = now + self.ttl;
            }
        }

        let slot: Slot<V> = Arc::default();
        slots.map.insert(key.clone(), Arc::clone(&slot));
        slot
    }

    fn purge_expired(&self, slots: &mut HashMap<K, Slot<V>>, now: UnixTime) {
        let before = slots.len();

        slots.retain(|_, slot| {
            // Another caller holds this slot and may be about to fill it
            if Arc::strong_count(slot) > 1 {
                return true;
            }

            match slot.try_lock() {
                Ok(entry) => entry.as_ref().map_or(false, |e| now < e.expires_at),
                Err(_) => true,
            }
        });

        tracing::debug!(
            cache = self.name,
            purged = before - slots.len(),
            "purged expired cache entries"
        );
    }

    /// Returns the cached value for `key`, or runs `fetch` and caches its
    /// result
    ///
    /// Errors from `fetch` are returned as-is and nothing is cached, so the
    /// next lookup for the same key fetches again.
    pub(crate) async fn get_or_try_insert_with<F, Fut, E>(&self, key: &K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);
        let mut entry = slot.lock().await;

        let now = self.clock.now();
        if let Some(cached) = entry.as_ref() {
            if now < cached.expires_at {
                tracing::debug!(cache = self.name, %key, "cache hit");
                return Ok(cached.value.clone());
            }

            tracing::debug!(cache = self.name, %key, "cache entry expired");
        } else {
            tracing::debug!(cache = self.name, %key, "cache miss");
        }

        let value = fetch().await?;

        *entry = Some(Entry {
            value: value.clone(),
            expires_at: self.clock.now() + self.ttl,
        });

        Ok(value)
    }

    #[cfg(test)]
    fn slot_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }
}

#[async_trait]
impl<K, V, E> Cache<K, V, E> for TtlCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Display + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    async fn get_or_fetch<'a>(&'a self, key: &'a K, fetch: Fetch<'a, V, E>) -> Result<V, E> {
        self.get_or_try_insert_with(key, || fetch).await
    }
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self
            .slots
            .lock()
            .map(|s| s.map.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().map.len());

        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("slots", &slots)
            .finish()
    }
}
