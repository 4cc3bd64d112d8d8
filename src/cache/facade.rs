//! Cache Facade
//!
//! The one entry point application code talks to. It builds the configured
//! backend on first use, encodes and decodes values, and owns the
//! `Uninitialized -> Active -> Stopped` lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, debug_span, error, info, warn};

use crate::cache::{CacheBackend, CacheStats, Codec, JsonCodec, LocalBackend, NoopBackend, RemoteBackend};
use crate::config::{BackendConfig, Properties};
use crate::diagnostics;
use crate::duration::parse_duration;
use crate::error::{CacheError, Result};
use crate::tasks::spawn_cleanup_task;

/// Lifecycle of a [`Cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Uninitialized,
    Active,
    Stopped,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Uninitialized => "uninitialized",
            CacheState::Active => "active",
            CacheState::Stopped => "stopped",
        }
    }
}

enum State {
    Uninitialized,
    Active {
        backend: Arc<dyn CacheBackend>,
        cleanup: Option<JoinHandle<()>>,
    },
    Stopped,
}

impl State {
    fn public(&self) -> CacheState {
        match self {
            State::Uninitialized => CacheState::Uninitialized,
            State::Active { .. } => CacheState::Active,
            State::Stopped => CacheState::Stopped,
        }
    }
}

// == Cache ==
/// Cache handle shared by request handlers, usually behind an `Arc`.
///
/// Reads are advisory: any failure while reading (stopped cache, backend
/// error, undecodable value) is reported as a miss. Writes after
/// [`Cache::stop`] fail with [`CacheError::IllegalState`].
///
/// ```no_run
/// # async fn demo() -> replay_cache::error::Result<()> {
/// use replay_cache::{Cache, Properties};
///
/// let properties = Properties::parse("cache.heapSizeInEntries=1000")?;
/// let cache = Cache::from_properties(&properties)?;
///
/// cache.set("user:42", &"Ada", 60).await?;
/// let name: Option<String> = cache.get("user:42").await;
/// assert_eq!(name.as_deref(), Some("Ada"));
///
/// cache.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Cache<C: Codec = JsonCodec> {
    config: BackendConfig,
    codec: C,
    cleanup_interval: Duration,
    state: RwLock<State>,
}

impl Cache<JsonCodec> {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            codec: JsonCodec,
            cleanup_interval: Duration::from_secs(1),
            state: RwLock::new(State::Uninitialized),
        }
    }

    /// Resolves the backend configuration now, so bad settings fail here and
    /// not on first use.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        Ok(Self::new(BackendConfig::from_properties(properties)?))
    }
}

impl<C: Codec> Cache<C> {
    pub fn with_codec<D: Codec>(self, codec: D) -> Cache<D> {
        Cache {
            config: self.config,
            codec,
            cleanup_interval: self.cleanup_interval,
            state: self.state,
        }
    }

    /// How often the local backend sweeps expired entries; zero disables
    /// the sweep (entries still expire on read).
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.config.name()
    }

    pub async fn state(&self) -> CacheState {
        self.state.read().await.public()
    }

    // == Init ==
    /// Builds the backend if not done yet.
    pub async fn init(&self) -> Result<()> {
        self.active_backend().await.map(|_| ())
    }

    /// Returns the active backend, building it on first use.
    async fn active_backend(&self) -> Result<Arc<dyn CacheBackend>> {
        {
            let state = self.state.read().await;
            match &*state {
                State::Active { backend, .. } => return Ok(Arc::clone(backend)),
                State::Stopped => return Err(stopped()),
                State::Uninitialized => {}
            }
        }

        let mut state = self.state.write().await;
        match &*state {
            State::Active { backend, .. } => Ok(Arc::clone(backend)),
            State::Stopped => Err(stopped()),
            State::Uninitialized => {
                let backend = self.build_backend()?;
                let cleanup = self.start_cleanup(&backend);
                info!(backend = backend.name(), "Cache started");
                *state = State::Active {
                    backend: Arc::clone(&backend),
                    cleanup,
                };
                Ok(backend)
            }
        }
    }

    fn build_backend(&self) -> Result<Arc<dyn CacheBackend>> {
        let backend: Arc<dyn CacheBackend> = match &self.config {
            BackendConfig::Local(plan) => Arc::new(LocalBackend::new(*plan)),
            BackendConfig::Remote(settings) => Arc::new(RemoteBackend::new(settings)?),
            BackendConfig::Disabled => {
                warn!("No cache backend configured, caching is disabled");
                Arc::new(NoopBackend)
            }
        };
        Ok(backend)
    }

    fn start_cleanup(&self, backend: &Arc<dyn CacheBackend>) -> Option<JoinHandle<()>> {
        if !matches!(self.config, BackendConfig::Local(_)) || self.cleanup_interval.is_zero() {
            return None;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(spawn_cleanup_task(Arc::clone(backend), self.cleanup_interval)),
            Err(_) => {
                debug!("No runtime available, expired entries are removed on read only");
                None
            }
        }
    }

    // == Get ==
    /// Returns the value stored under `key`, or `None` on a miss.
    ///
    /// A value stored as `null` is returned as `Some(None)` when `T` is an
    /// `Option`, so it stays distinguishable from a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = match self.active_backend().await {
            Ok(backend) => backend,
            Err(CacheError::IllegalState(_)) => {
                debug!(key, "Cache read after stop, reporting a miss");
                return None;
            }
            Err(e) => {
                error!(key, "Cache unavailable, reporting a miss: {}", e);
                return None;
            }
        };

        let bytes = match backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key, backend = backend.name(), "Cache read failed, reporting a miss: {}", e);
                return None;
            }
        };

        self.decode(key, &bytes)
    }

    /// Reads several keys at once. Keys that miss, or whose value does not
    /// decode as `T`, are left out.
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[&str]) -> HashMap<String, T> {
        let backend = match self.active_backend().await {
            Ok(backend) => backend,
            Err(e) => {
                debug!(keys = keys.len(), "Cache unavailable, reporting misses: {}", e);
                return HashMap::new();
            }
        };

        let found = match backend.get_many(keys).await {
            Ok(found) => found,
            Err(e) => {
                warn!(backend = backend.name(), "Cache read failed, reporting misses: {}", e);
                return HashMap::new();
            }
        };

        found
            .into_iter()
            .filter_map(|(key, bytes)| {
                let value = self.decode(&key, &bytes)?;
                Some((key, value))
            })
            .collect()
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, bytes: &[u8]) -> Option<T> {
        let mdc_parameter = match &self.config {
            BackendConfig::Remote(settings) => settings.mdc_parameter.as_deref(),
            _ => None,
        };
        let span = mdc_parameter.map(|name| {
            let value = diagnostics::current(name).unwrap_or_else(|| "?".to_string());
            debug_span!("cache_decode", key, mdc.name = name, mdc.value = %value)
        });
        let _entered = span.as_ref().map(|span| span.enter());

        match self.codec.decode(bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                error!(key, "Could not deserialize cached value, reporting a miss: {}", e);
                None
            }
        }
    }

    // == Set ==
    /// Stores `value` under `key` for `ttl_seconds` (0 = no expiration).
    ///
    /// A value the codec cannot encode is logged and not stored.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_seconds: u32) -> Result<()> {
        let backend = self.active_backend().await?;
        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(key, "Could not serialize value, write dropped: {}", e);
                return Ok(());
            }
        };
        backend.set(key, bytes, ttl_seconds).await
    }

    /// Like [`Cache::set`] with an expression such as `10s`, `3mn` or `2d4h`.
    pub async fn set_for<T: Serialize + ?Sized>(&self, key: &str, value: &T, expiration: &str) -> Result<()> {
        let ttl_seconds = parse_duration(expiration)?;
        self.set(key, value, ttl_seconds).await
    }

    // == Delete ==
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.active_backend().await?.delete(key).await
    }

    // == Clear ==
    /// Removes everything. Nothing to do before first use.
    pub async fn clear(&self) -> Result<()> {
        let backend = match &*self.state.read().await {
            State::Uninitialized => return Ok(()),
            State::Stopped => return Err(stopped()),
            State::Active { backend, .. } => Arc::clone(backend),
        };
        backend.clear().await
    }

    // == Stop ==
    /// Stops the backend and releases its resources. The cache stays stopped;
    /// build a new `Cache` to start again.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        match std::mem::replace(&mut *state, State::Stopped) {
            State::Uninitialized => {
                debug!("Cache stopped before first use");
                Ok(())
            }
            State::Stopped => {
                debug!("Cache already stopped");
                Ok(())
            }
            State::Active { backend, cleanup } => {
                if let Some(cleanup) = cleanup {
                    cleanup.abort();
                }
                backend.stop().await.inspect_err(|e| {
                    error!(backend = backend.name(), "Failed to stop the cache: {}", e)
                })?;
                info!(backend = backend.name(), "Cache stopped");
                Ok(())
            }
        }
    }

    /// Counters of the active backend, `None` unless active.
    pub async fn stats(&self) -> Option<CacheStats> {
        let backend = match &*self.state.read().await {
            State::Active { backend, .. } => Arc::clone(backend),
            _ => return None,
        };
        Some(backend.stats().await)
    }
}

impl<C: Codec> fmt::Debug for Cache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.config.name())
            .field("cleanup_interval", &self.cleanup_interval)
            .finish_non_exhaustive()
    }
}

fn stopped() -> CacheError {
    CacheError::IllegalState("cache has been stopped".to_string())
}
