use crate::error::ConfigError;
use crate::model::PoolTarget;
use crate::serial::SerialScheme;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Id of the pool created when no pools are configured
pub const DEFAULT_POOL_ID: Uuid = Uuid::from_u128(0x794ccc2c_d751_44fe_b57f_8894c9f5c842);

/// A group of name servers serving the same zones
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub id: Uuid,
    pub name: String,
    /// Share of targets (1-100) that must acknowledge before a zone is ACTIVE
    pub threshold_percentage: u8,
    pub targets: Vec<PoolTarget>,
}

impl PoolConfig {
    /// Number of acknowledgements needed to reach quorum
    pub fn quorum(&self) -> usize {
        let total = self.targets.len();
        if total == 0 {
            return 0;
        }
        let needed = (total * self.threshold_percentage as usize).div_ceil(100);
        needed.clamp(1, total)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropagationConfig {
    /// Attempts per target before it is marked degraded
    pub max_attempts: usize,
    /// Base delay between attempts; doubles after every failure
    pub retry_base: Duration,
    /// Upper bound for the delay between attempts
    pub retry_max: Duration,
    /// Deadline for a single name server exchange
    pub target_timeout: Duration,
    /// Concurrent name server exchanges across all zones
    pub max_concurrent_targets: usize,
    /// Capacity of the propagation request queue
    pub queue_size: usize,
    /// How often ERROR and stuck PENDING zones are re-propagated (zero disables)
    pub recovery_interval: Duration,
    /// Age after which a PENDING zone without progress is considered stuck
    pub pending_grace: Duration,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            target_timeout: Duration::from_secs(5),
            max_concurrent_targets: 32,
            queue_size: 1024,
            recovery_interval: Duration::from_secs(60),
            pending_grace: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CentralConfig {
    /// HTTP server bind address for metrics and health checks (None = disabled)
    pub http_bind_addr: Option<SocketAddr>,

    /// Default deadline for RPC calls into the central service
    pub rpc_timeout: Duration,

    /// Max number of requests the RPC server handles concurrently
    pub rpc_workers: usize,

    /// Capacity of the RPC request channel
    pub rpc_queue_size: usize,

    /// How zone serials advance
    pub serial_scheme: SerialScheme,

    /// Retries of an optimistic serial update before reporting a conflict
    pub conflict_retries: usize,

    /// Base delay between optimistic update retries
    pub conflict_backoff: Duration,

    /// TTL applied to zones created without one
    pub default_ttl: u32,

    /// Smallest TTL tenants may set
    pub min_ttl: u32,

    /// Per-tenant zone limit (None = unlimited)
    pub max_domains_per_tenant: Option<usize>,

    /// Pool new zones are assigned to
    pub default_pool_id: Uuid,

    pub pools: Vec<PoolConfig>,

    pub propagation: PropagationConfig,
}

impl Default for CentralConfig {
    fn default() -> Self {
        Self {
            http_bind_addr: Some(SocketAddr::from(([127, 0, 0, 1], 9001))),
            rpc_timeout: Duration::from_secs(30),
            rpc_workers: 64,
            rpc_queue_size: 1024,
            serial_scheme: SerialScheme::Increment,
            conflict_retries: 5,
            conflict_backoff: Duration::from_millis(10),
            default_ttl: 3600,
            min_ttl: 0,
            max_domains_per_tenant: Some(10),
            default_pool_id: DEFAULT_POOL_ID,
            pools: vec![PoolConfig {
                id: DEFAULT_POOL_ID,
                name: "default".to_string(),
                threshold_percentage: 100,
                targets: vec![PoolTarget {
                    id: Uuid::from_u128(0xf26e0b32_736f_4f0a_831b_039a415c481e),
                    pool_id: DEFAULT_POOL_ID,
                    name: "local".to_string(),
                    address: "127.0.0.1:5354".to_string(),
                    description: Some("Local name server".to_string()),
                }],
            }],
            propagation: PropagationConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PoolSection {
    id: Option<Uuid>,
    name: String,
    threshold_percentage: Option<u8>,
    #[serde(default)]
    targets: Vec<TargetSection>,
}

#[derive(Debug, Deserialize)]
struct TargetSection {
    id: Option<Uuid>,
    name: String,
    address: String,
    description: Option<String>,
}

impl CentralConfig {
    /// Create a CentralConfig from environment variables
    /// Returns Err if critical configuration is invalid
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file on top of the defaults, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::default();
        config.apply_partial_update(&toml::from_str(&content)?)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override settings from `ZONECENTRAL_*` variables resolved by `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(enabled) = lookup("ZONECENTRAL_HTTP_ENABLED") {
            if !parse_bool(&enabled, true) {
                self.http_bind_addr = None;
            }
        }

        if let Some(addr) = lookup("ZONECENTRAL_HTTP_ADDR") {
            self.http_bind_addr = Some(
                addr.parse()
                    .map_err(|_| ConfigError::InvalidHttpBindAddress(addr))?,
            );
        }

        if let Some(timeout) = lookup("ZONECENTRAL_RPC_TIMEOUT_MS") {
            self.rpc_timeout = Duration::from_millis(parse_num(&timeout, ConfigError::InvalidTimeout)?);
        }

        if let Some(workers) = lookup("ZONECENTRAL_RPC_WORKERS") {
            self.rpc_workers = parse_num(&workers, ConfigError::ParseError)?;
        }

        if let Some(scheme) = lookup("ZONECENTRAL_SERIAL_SCHEME") {
            self.serial_scheme = scheme.parse()?;
        }

        if let Some(retries) = lookup("ZONECENTRAL_CONFLICT_RETRIES") {
            self.conflict_retries = parse_num(&retries, ConfigError::InvalidRetry)?;
        }

        if let Some(ttl) = lookup("ZONECENTRAL_DEFAULT_TTL") {
            self.default_ttl = parse_num(&ttl, ConfigError::ParseError)?;
        }

        if let Some(max) = lookup("ZONECENTRAL_MAX_DOMAINS") {
            let max: usize = parse_num(&max, ConfigError::ParseError)?;
            // 0 lifts the limit
            self.max_domains_per_tenant = (max > 0).then_some(max);
        }

        if let Some(attempts) = lookup("ZONECENTRAL_PROPAGATION_ATTEMPTS") {
            self.propagation.max_attempts = parse_num(&attempts, ConfigError::InvalidRetry)?;
        }

        if let Some(timeout) = lookup("ZONECENTRAL_TARGET_TIMEOUT_MS") {
            self.propagation.target_timeout =
                Duration::from_millis(parse_num(&timeout, ConfigError::InvalidTimeout)?);
        }

        if let Some(threshold) = lookup("ZONECENTRAL_THRESHOLD") {
            let threshold = parse_num(&threshold, ConfigError::InvalidThreshold)?;
            for pool in &mut self.pools {
                pool.threshold_percentage = threshold;
            }
        }

        // "ns1=10.0.0.1:53,ns2=10.0.0.2:53" replaces the default pool's targets
        if let Some(targets) = lookup("ZONECENTRAL_TARGETS") {
            let pool_id = self.default_pool_id;
            let parsed = targets
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|entry| {
                    let (name, address) = entry
                        .trim()
                        .split_once('=')
                        .ok_or_else(|| ConfigError::InvalidPool(entry.to_string()))?;
                    Ok(PoolTarget {
                        id: Uuid::new_v4(),
                        pool_id,
                        name: name.to_string(),
                        address: address.to_string(),
                        description: None,
                    })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;

            let pool = self
                .pools
                .iter_mut()
                .find(|p| p.id == pool_id)
                .ok_or_else(|| ConfigError::InvalidPool("default pool is not defined".to_string()))?;
            pool.targets = parsed;
        }

        Ok(())
    }

    /// Apply the keys present in a TOML document, leaving the rest untouched
    pub fn apply_partial_update(&mut self, value: &toml::Value) -> Result<(), ConfigError> {
        let table = value
            .as_table()
            .ok_or_else(|| ConfigError::ParseError("configuration root must be a table".into()))?;

        if let Some(addr) = table.get("http_bind_addr").and_then(|v| v.as_str()) {
            self.http_bind_addr = if addr.is_empty() {
                None
            } else {
                Some(
                    addr.parse()
                        .map_err(|_| ConfigError::InvalidHttpBindAddress(addr.to_string()))?,
                )
            };
        }
        if let Some(ms) = table.get("rpc_timeout_ms").and_then(|v| v.as_integer()) {
            self.rpc_timeout = Duration::from_millis(non_negative(ms, ConfigError::InvalidTimeout)?);
        }
        if let Some(workers) = table.get("rpc_workers").and_then(|v| v.as_integer()) {
            self.rpc_workers = non_negative(workers, ConfigError::ParseError)? as usize;
        }
        if let Some(size) = table.get("rpc_queue_size").and_then(|v| v.as_integer()) {
            self.rpc_queue_size = non_negative(size, ConfigError::ParseError)? as usize;
        }
        if let Some(scheme) = table.get("serial_scheme").and_then(|v| v.as_str()) {
            self.serial_scheme = scheme.parse()?;
        }
        if let Some(retries) = table.get("conflict_retries").and_then(|v| v.as_integer()) {
            self.conflict_retries = non_negative(retries, ConfigError::InvalidRetry)? as usize;
        }
        if let Some(ms) = table.get("conflict_backoff_ms").and_then(|v| v.as_integer()) {
            self.conflict_backoff = Duration::from_millis(non_negative(ms, ConfigError::InvalidRetry)?);
        }
        if let Some(ttl) = table.get("default_ttl").and_then(|v| v.as_integer()) {
            self.default_ttl = non_negative(ttl, ConfigError::ParseError)? as u32;
        }
        if let Some(ttl) = table.get("min_ttl").and_then(|v| v.as_integer()) {
            self.min_ttl = non_negative(ttl, ConfigError::ParseError)? as u32;
        }
        if let Some(max) = table.get("max_domains_per_tenant").and_then(|v| v.as_integer()) {
            let max = non_negative(max, ConfigError::ParseError)? as usize;
            self.max_domains_per_tenant = (max > 0).then_some(max);
        }
        if let Some(id) = table.get("default_pool_id").and_then(|v| v.as_str()) {
            self.default_pool_id = id
                .parse()
                .map_err(|_| ConfigError::InvalidPool(format!("bad pool id {}", id)))?;
        }

        if let Some(propagation) = table.get("propagation").and_then(|v| v.as_table()) {
            let p = &mut self.propagation;
            if let Some(v) = propagation.get("max_attempts").and_then(|v| v.as_integer()) {
                p.max_attempts = non_negative(v, ConfigError::InvalidRetry)? as usize;
            }
            if let Some(v) = propagation.get("retry_base_ms").and_then(|v| v.as_integer()) {
                p.retry_base = Duration::from_millis(non_negative(v, ConfigError::InvalidRetry)?);
            }
            if let Some(v) = propagation.get("retry_max_ms").and_then(|v| v.as_integer()) {
                p.retry_max = Duration::from_millis(non_negative(v, ConfigError::InvalidRetry)?);
            }
            if let Some(v) = propagation.get("target_timeout_ms").and_then(|v| v.as_integer()) {
                p.target_timeout = Duration::from_millis(non_negative(v, ConfigError::InvalidTimeout)?);
            }
            if let Some(v) = propagation
                .get("max_concurrent_targets")
                .and_then(|v| v.as_integer())
            {
                p.max_concurrent_targets = non_negative(v, ConfigError::ParseError)? as usize;
            }
            if let Some(v) = propagation.get("queue_size").and_then(|v| v.as_integer()) {
                p.queue_size = non_negative(v, ConfigError::ParseError)? as usize;
            }
            if let Some(v) = propagation
                .get("recovery_interval_secs")
                .and_then(|v| v.as_integer())
            {
                p.recovery_interval = Duration::from_secs(non_negative(v, ConfigError::InvalidTimeout)?);
            }
            if let Some(v) = propagation.get("pending_grace_secs").and_then(|v| v.as_integer()) {
                p.pending_grace = Duration::from_secs(non_negative(v, ConfigError::InvalidTimeout)?);
            }
        }

        if let Some(pools) = table.get("pools") {
            let sections: Vec<PoolSection> = pools
                .clone()
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::InvalidPool(e.to_string()))?;
            self.pools = sections.into_iter().map(PoolSection::into_pool).collect();
            debug!("Loaded {} pools from configuration", self.pools.len());

            // A single configured pool becomes the default unless stated otherwise
            if table.get("default_pool_id").is_none() && self.pools.len() == 1 {
                self.default_pool_id = self.pools[0].id;
            }
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_timeout.is_zero() || self.rpc_timeout > Duration::from_secs(300) {
            return Err(ConfigError::InvalidTimeout(format!(
                "RPC timeout must be between 1ms and 300s, got {:?}",
                self.rpc_timeout
            )));
        }

        if self.rpc_workers == 0 || self.rpc_queue_size == 0 {
            return Err(ConfigError::ParseError(
                "RPC workers and queue size must be greater than 0".to_string(),
            ));
        }

        if self.conflict_retries > 100 {
            return Err(ConfigError::InvalidRetry(format!(
                "conflict retries must be at most 100, got {}",
                self.conflict_retries
            )));
        }

        let p = &self.propagation;
        if p.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "propagation needs at least one attempt".to_string(),
            ));
        }
        if p.target_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "target timeout must be greater than 0".to_string(),
            ));
        }
        if p.max_concurrent_targets == 0 || p.queue_size == 0 {
            return Err(ConfigError::ParseError(
                "propagation concurrency and queue size must be greater than 0".to_string(),
            ));
        }

        if self.pools.is_empty() {
            return Err(ConfigError::InvalidPool("no pools configured".to_string()));
        }
        if !self.pools.iter().any(|p| p.id == self.default_pool_id) {
            return Err(ConfigError::InvalidPool(format!(
                "default pool {} is not defined",
                self.default_pool_id
            )));
        }

        for pool in &self.pools {
            if pool.threshold_percentage == 0 || pool.threshold_percentage > 100 {
                return Err(ConfigError::InvalidThreshold(format!(
                    "pool {} threshold {} outside 1-100",
                    pool.name, pool.threshold_percentage
                )));
            }
            for (i, target) in pool.targets.iter().enumerate() {
                if target.address.trim().is_empty() {
                    return Err(ConfigError::InvalidPool(format!(
                        "target {} in pool {} has no address",
                        target.name, pool.name
                    )));
                }
                if pool.targets[..i].iter().any(|t| t.name == target.name) {
                    return Err(ConfigError::InvalidPool(format!(
                        "duplicate target name {} in pool {}",
                        target.name, pool.name
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn pool(&self, id: Uuid) -> Option<&PoolConfig> {
        self.pools.iter().find(|p| p.id == id)
    }
}

impl PoolSection {
    fn into_pool(self) -> PoolConfig {
        let id = self.id.unwrap_or_else(Uuid::new_v4);
        PoolConfig {
            id,
            name: self.name,
            threshold_percentage: self.threshold_percentage.unwrap_or(100),
            targets: self
                .targets
                .into_iter()
                .map(|t| PoolTarget {
                    id: t.id.unwrap_or_else(Uuid::new_v4),
                    pool_id: id,
                    name: t.name,
                    address: t.address,
                    description: t.description,
                })
                .collect(),
        }
    }
}

fn parse_num<T: std::str::FromStr>(
    s: &str,
    err: fn(String) -> ConfigError,
) -> Result<T, ConfigError> {
    s.trim().parse::<T>().map_err(|_| err(s.to_string()))
}

fn non_negative(v: i64, err: fn(String) -> ConfigError) -> Result<u64, ConfigError> {
    u64::try_from(v).map_err(|_| err(v.to_string()))
}

/// Parse a boolean from a string, with a default value for invalid input
fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}
