use std::{collections::HashMap, future::Future, hash::Hash, time::Duration};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::{sync::Mutex, time::Instant};

use crate::error::FetchError;

type InFlight<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

struct CacheEntry<V> {
    cached: Option<(V, Instant)>,
    in_flight: Option<InFlight<V>>,
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self {
            cached: None,
            in_flight: None,
        }
    }
}

struct CacheState<K, V> {
    generation: u64,
    entries: HashMap<K, CacheEntry<V>>,
}

/// Keyed cache that coalesces concurrent fetches for the same key.
///
/// At most one fetch per key is in flight. Callers arriving while it runs
/// attach to its result, forced refreshes included. A failed fetch leaves the
/// previously cached value in place.
pub struct ResourceCache<K, V> {
    ttl: Option<Duration>,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_ttl(Some(ttl))
    }

    /// Entries never age out; only `invalidate` and `clear` drop them.
    pub fn without_expiry() -> Self {
        Self::with_ttl(None)
    }

    fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            ttl,
            state: Mutex::new(CacheState {
                generation: 0,
                entries: HashMap::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn is_fresh(&self, fetched_at: Instant) -> bool {
        match self.ttl {
            Some(ttl) => fetched_at.elapsed() < ttl,
            None => true,
        }
    }

    /// Returns the cached value for `key`, fetching it when absent, stale or
    /// forced. `fetch` is only invoked when this call starts a new fetch.
    pub async fn get<F, Fut>(&self, key: K, force_refresh: bool, fetch: F) -> Result<V, FetchError>
    where
        F: FnOnce(K) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        let (in_flight, generation) = {
            let mut state = self.state.lock().await;
            let generation = state.generation;
            let entry = state.entries.entry(key.clone()).or_default();

            if let Some(in_flight) = &entry.in_flight {
                (in_flight.clone(), generation)
            } else {
                if !force_refresh {
                    if let Some((value, fetched_at)) = &entry.cached {
                        if self.is_fresh(*fetched_at) {
                            return Ok(value.clone());
                        }
                    }
                }

                let pending = fetch(key.clone());
                let shared = async move { pending.await.map_err(FetchError::from) }
                    .boxed()
                    .shared();
                entry.in_flight = Some(shared.clone());
                (shared, generation)
            }
        };

        let result = in_flight.clone().await;
        self.settle(&key, generation, &in_flight, &result).await;
        result
    }

    /// Stores the outcome of `in_flight` if it is still the entry's current
    /// fetch. Whichever attached caller gets here first does the store.
    async fn settle(
        &self,
        key: &K,
        generation: u64,
        in_flight: &InFlight<V>,
        result: &Result<V, FetchError>,
    ) {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return;
        }
        let Some(entry) = state.entries.get_mut(key) else {
            return;
        };
        let is_current = entry
            .in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(in_flight));
        if !is_current {
            return;
        }

        entry.in_flight = None;
        match result {
            Ok(value) => entry.cached = Some((value.clone(), Instant::now())),
            Err(_) if entry.cached.is_none() => {
                state.entries.remove(key);
            }
            Err(_) => {}
        }
    }

    /// Drops the cached value for `key`. A fetch already in flight keeps
    /// running and its result is stored when it completes.
    pub async fn invalidate(&self, key: &K) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.entries.get_mut(key) {
            entry.cached = None;
        }
    }

    /// Drops every entry. Fetches in flight at this point still resolve for
    /// their callers but their results are not stored.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.generation = state.generation.wrapping_add(1);
        state.entries.clear();
    }

    pub async fn cached(&self, key: &K) -> Option<V> {
        let state = self.state.lock().await;
        state
            .entries
            .get(key)
            .and_then(|entry| entry.cached.as_ref())
            .map(|(value, _)| value.clone())
    }
}

#[cfg(test)]
#[path = "tests/resource_cache_tests.rs"]
mod tests;
