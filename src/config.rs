//! Configuration Module
//!
//! Loads server settings from environment variables and cache settings from a
//! properties file, then resolves the cache settings into a validated
//! [`BackendConfig`].

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, info};

use crate::duration::parse_duration;
use crate::error::{CacheError, Result};

const BYTES_PER_MB: u64 = 1024 * 1024;

// == Property Keys ==
pub const IMPL_KEY: &str = "cache.impl";
pub const HEAP_SIZE_IN_MB_KEY: &str = "cache.heapSizeInMb";
pub const HEAP_SIZE_IN_ENTRIES_KEY: &str = "cache.heapSizeInEntries";
pub const OFF_HEAP_SIZE_IN_MB_KEY: &str = "cache.offHeapSizeInMb";
pub const REMOTE_HOST_KEY: &str = "cache.remote.host";
pub const REMOTE_MDC_PARAMETER_KEY: &str = "cache.remote.mdc.parameter";
pub const REMOTE_TIMEOUT_KEY: &str = "cache.remote.timeout";
pub const REMOTE_QUEUE_SIZE_KEY: &str = "cache.remote.queueSize";
pub const REMOTE_USER_KEY: &str = "cache.remote.user";
pub const REMOTE_PASSWORD_KEY: &str = "cache.remote.password";

const REMOTE_PREFIX: &str = "cache.remote.";
const HOST_SUFFIX: &str = ".host";

// == Properties ==
/// Flat `key=value` configuration, in the format of a Java properties file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key=value` lines. Blank lines and lines starting with `#` or
    /// `!` are ignored; keys and values are trimmed.
    pub fn parse(text: &str) -> Result<Self> {
        let mut properties = Self::new();
        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| {
                CacheError::Configuration(format!(
                    "Line {} is not a key=value pair: {}",
                    index + 1,
                    line
                ))
            })?;
            properties.set(key.trim(), value.trim());
        }
        Ok(properties)
    }

    /// Reads and parses a properties file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Parses the value of `key`, returning `default` when it is absent.
    pub fn get_parsed<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e| {
                CacheError::Configuration(format!("Invalid value for {key}: {raw:?} ({e})"))
            }),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut properties = Self::new();
        for (key, value) in iter {
            properties.set(key, value);
        }
        properties
    }
}

// == Server Config ==
/// Server configuration parameters.
///
/// Server values come from environment variables with sensible defaults;
/// cache values come from the properties file named by `REPLAY_CONFIG`.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache properties (`cache.*` keys)
    pub properties: Properties,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
}

impl Config {
    /// Creates a new Config from the process environment.
    ///
    /// # Environment Variables
    /// - `REPLAY_CONFIG` - Properties file (default: conf/application.conf, optional)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 1)
    pub fn from_env() -> Result<Self> {
        let path = env::var("REPLAY_CONFIG").unwrap_or_else(|_| "conf/application.conf".into());
        let properties = if Path::new(&path).exists() {
            info!("Loading cache properties from {}", path);
            Properties::load(&path)?
        } else {
            debug!("No properties file at {}, using empty configuration", path);
            Properties::new()
        };

        Ok(Self {
            properties,
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
            cleanup_interval: env::var("CLEANUP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            properties: Properties::new(),
            server_port: 3000,
            cleanup_interval: 1,
        }
    }
}

// == Capacity ==
/// Size bound of one storage tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierCapacity {
    /// At most this many entries
    Entries(u64),
    /// At most this many bytes of keys, values and bookkeeping
    Bytes(u64),
}

impl TierCapacity {
    pub fn megabytes(mb: u64) -> Self {
        TierCapacity::Bytes(mb.saturating_mul(BYTES_PER_MB))
    }
}

/// Validated set of tiers for the local backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityPlan {
    pub heap: Option<TierCapacity>,
    pub off_heap: Option<TierCapacity>,
}

impl CapacityPlan {
    pub fn builder() -> CapacityPlanBuilder {
        CapacityPlanBuilder::default()
    }

    /// Builds a plan from the three sizing dimensions; zero disables one.
    pub fn from_sizes(heap_mb: u64, heap_entries: u64, off_heap_mb: u64) -> Result<Self> {
        if heap_mb == 0 && heap_entries == 0 && off_heap_mb == 0 {
            return Err(CacheError::Configuration(format!(
                "Must specify nonzero {HEAP_SIZE_IN_MB_KEY}/{HEAP_SIZE_IN_ENTRIES_KEY} or {OFF_HEAP_SIZE_IN_MB_KEY}"
            )));
        }

        let mut builder = Self::builder();
        if heap_mb > 0 {
            builder = builder.heap(TierCapacity::megabytes(heap_mb))?;
        }
        if heap_entries > 0 {
            builder = builder.heap(TierCapacity::Entries(heap_entries))?;
        }
        if off_heap_mb > 0 {
            builder = builder.off_heap(off_heap_mb)?;
        }
        builder.build()
    }

    pub fn from_properties(properties: &Properties) -> Result<Self> {
        Self::from_sizes(
            properties.get_parsed(HEAP_SIZE_IN_MB_KEY, 0)?,
            properties.get_parsed(HEAP_SIZE_IN_ENTRIES_KEY, 0)?,
            properties.get_parsed(OFF_HEAP_SIZE_IN_MB_KEY, 0)?,
        )
    }
}

/// Accumulates tiers, refusing to define the same tier twice.
#[derive(Debug, Default)]
pub struct CapacityPlanBuilder {
    heap: Option<TierCapacity>,
    off_heap: Option<TierCapacity>,
}

impl CapacityPlanBuilder {
    pub fn heap(mut self, capacity: TierCapacity) -> Result<Self> {
        if let Some(existing) = self.heap {
            return Err(CacheError::Configuration(format!(
                "Can not add heap pool {capacity:?}; configuration already contains heap pool {existing:?}"
            )));
        }
        self.heap = Some(capacity);
        Ok(self)
    }

    pub fn off_heap(mut self, megabytes: u64) -> Result<Self> {
        let capacity = TierCapacity::megabytes(megabytes);
        if let Some(existing) = self.off_heap {
            return Err(CacheError::Configuration(format!(
                "Can not add off-heap pool {capacity:?}; configuration already contains off-heap pool {existing:?}"
            )));
        }
        self.off_heap = Some(capacity);
        Ok(self)
    }

    /// Overrides the off-heap tier with an arbitrary byte/entry capacity.
    pub fn off_heap_capacity(mut self, capacity: TierCapacity) -> Result<Self> {
        if self.off_heap.is_some() {
            return Err(CacheError::Configuration(
                "configuration already contains an off-heap pool".to_string(),
            ));
        }
        self.off_heap = Some(capacity);
        Ok(self)
    }

    pub fn build(self) -> Result<CapacityPlan> {
        let zero = |c: Option<TierCapacity>| {
            matches!(c, None | Some(TierCapacity::Entries(0)) | Some(TierCapacity::Bytes(0)))
        };
        if zero(self.heap) && zero(self.off_heap) {
            return Err(CacheError::Configuration(
                "Must specify nonzero heap or off-heap capacity".to_string(),
            ));
        }
        Ok(CapacityPlan {
            heap: self.heap.filter(|_| !zero(self.heap)),
            off_heap: self.off_heap.filter(|_| !zero(self.off_heap)),
        })
    }
}

// == Remote Addresses ==
/// One remote cache node, `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses a whitespace or comma separated list of `host:port` items.
    pub fn parse_list(text: &str) -> Result<Vec<Self>> {
        text.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|item| !item.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for NodeAddress {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CacheError::Configuration(format!("Invalid remote address: {s:?}"));
        let (host, port) = s.rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Resolves the remote node list.
///
/// `cache.remote.host` wins when present. Otherwise every
/// `cache.remote.<N>.host` is collected in ascending `N`; missing indices are
/// skipped. An empty result is a configuration error.
pub fn parse_addresses(properties: &Properties) -> Result<Vec<NodeAddress>> {
    let addresses = if let Some(single) = properties.get(REMOTE_HOST_KEY) {
        NodeAddress::parse_list(single)?
    } else {
        let mut numbered: Vec<(u32, &str)> = properties
            .keys()
            .filter_map(|key| {
                let index = key.strip_prefix(REMOTE_PREFIX)?.strip_suffix(HOST_SUFFIX)?;
                index.parse::<u32>().ok().map(|n| (n, key))
            })
            .collect();
        numbered.sort_by_key(|(n, _)| *n);

        let mut addresses = Vec::new();
        for (_, key) in numbered {
            if let Some(value) = properties.get(key) {
                addresses.extend(NodeAddress::parse_list(value)?);
            }
        }
        addresses
    };

    if addresses.is_empty() {
        return Err(CacheError::Configuration(
            "Bad configuration for remote cache: missing host(s)".to_string(),
        ));
    }
    Ok(addresses)
}

fn has_remote_hosts(properties: &Properties) -> bool {
    properties.contains_key(REMOTE_HOST_KEY)
        || properties.keys().any(|key| {
            key.strip_prefix(REMOTE_PREFIX)
                .and_then(|rest| rest.strip_suffix(HOST_SUFFIX))
                .is_some_and(|index| index.parse::<u32>().is_ok())
        })
}

fn has_local_sizing(properties: &Properties) -> bool {
    [
        HEAP_SIZE_IN_MB_KEY,
        HEAP_SIZE_IN_ENTRIES_KEY,
        OFF_HEAP_SIZE_IN_MB_KEY,
    ]
    .iter()
    .any(|key| properties.contains_key(key))
}

// == Credentials ==
/// Login for memcached servers started with authentication enabled.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// `cache.remote.user` turns authentication on and then requires
    /// `cache.remote.password`.
    pub fn from_properties(properties: &Properties) -> Result<Option<Self>> {
        let Some(user) = properties.get(REMOTE_USER_KEY).map(str::trim) else {
            return Ok(None);
        };
        match properties.get(REMOTE_PASSWORD_KEY) {
            Some(password) => Ok(Some(Self::new(user, password))),
            None => Err(CacheError::Configuration(
                "Bad configuration for remote cache: missing password".to_string(),
            )),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

// == Remote Settings ==
/// Connection settings for the remote backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSettings {
    /// Nodes in configuration order
    pub nodes: Vec<NodeAddress>,
    /// Upper bound for a single request, including connecting
    pub op_timeout: Duration,
    /// Operations waiting per node before writes are dropped
    pub queue_capacity: usize,
    pub credentials: Option<Credentials>,
    /// Diagnostic-context field copied onto the decode span
    pub mdc_parameter: Option<String>,
}

impl RemoteSettings {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    pub fn new(nodes: Vec<NodeAddress>) -> Self {
        Self {
            nodes,
            op_timeout: Self::DEFAULT_TIMEOUT,
            queue_capacity: Self::DEFAULT_QUEUE_CAPACITY,
            credentials: None,
            mdc_parameter: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn from_properties(properties: &Properties) -> Result<Self> {
        let nodes = parse_addresses(properties)?;
        let op_timeout = match properties.get(REMOTE_TIMEOUT_KEY) {
            Some(raw) => Duration::from_secs(u64::from(parse_duration(raw).map_err(|_| {
                CacheError::Configuration(format!("Invalid value for {REMOTE_TIMEOUT_KEY}: {raw:?}"))
            })?)),
            None => Self::DEFAULT_TIMEOUT,
        };
        if op_timeout.is_zero() {
            return Err(CacheError::Configuration(format!(
                "{REMOTE_TIMEOUT_KEY} must be greater than zero"
            )));
        }
        let queue_capacity =
            properties.get_parsed(REMOTE_QUEUE_SIZE_KEY, Self::DEFAULT_QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            return Err(CacheError::Configuration(format!(
                "{REMOTE_QUEUE_SIZE_KEY} must be greater than zero"
            )));
        }
        let mdc_parameter = properties
            .get(REMOTE_MDC_PARAMETER_KEY)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Ok(Self {
            nodes,
            op_timeout,
            queue_capacity,
            credentials: Credentials::from_properties(properties)?,
            mdc_parameter,
        })
    }
}

// == Backend Config ==
/// Which backend the cache runs on, with its validated settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Local(CapacityPlan),
    Remote(RemoteSettings),
    /// No caching: every read misses
    Disabled,
}

impl BackendConfig {
    /// Resolves and validates the backend from `cache.*` properties.
    ///
    /// `cache.impl` selects explicitly. Without it, remote hosts select the
    /// remote backend and sizing keys the local one; having both is an error.
    pub fn from_properties(properties: &Properties) -> Result<Self> {
        match properties.get(IMPL_KEY).map(str::trim) {
            Some("local") => Ok(BackendConfig::Local(CapacityPlan::from_properties(properties)?)),
            Some("remote") => Ok(BackendConfig::Remote(RemoteSettings::from_properties(
                properties,
            )?)),
            Some("none") => Ok(BackendConfig::Disabled),
            Some(other) => Err(CacheError::Configuration(format!(
                "Unknown {IMPL_KEY}: {other:?} (expected local, remote or none)"
            ))),
            None => match (has_remote_hosts(properties), has_local_sizing(properties)) {
                (true, true) => Err(CacheError::Configuration(
                    "Both remote hosts and local sizing are configured; remove either or set cache.impl"
                        .to_string(),
                )),
                (true, false) => Ok(BackendConfig::Remote(RemoteSettings::from_properties(
                    properties,
                )?)),
                (false, true) => Ok(BackendConfig::Local(CapacityPlan::from_properties(
                    properties,
                )?)),
                (false, false) => Ok(BackendConfig::Disabled),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::Local(_) => "local",
            BackendConfig::Remote(_) => "remote",
            BackendConfig::Disabled => "none",
        }
    }
}
