//! Caches that hold projections of catalog records and must follow every
//! change.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::catalog::{AccessTier, EndpointRecord};

type EndpointKey = (String, String);

fn endpoint_key(path: &str, method: &str) -> EndpointKey {
    (path.to_string(), method.to_string())
}

/// A cache derived from catalog records.
pub trait DependentCache: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the whole projection.
    fn refresh(&self, records: &[EndpointRecord]);

    /// Update the projection of one record.
    fn apply(&self, record: &EndpointRecord);

    /// Forget one endpoint.
    fn invalidate(&self, path: &str, method: &str);

    /// Forget everything. Readers fall back to the registry snapshot.
    fn clear(&self);
}

// ============================================================================
// Access tiers
// ============================================================================

/// Access policy of one endpoint as last seen in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedAccess {
    pub tier: AccessTier,
    pub active: bool,
}

/// `(path, method) -> access policy`, consulted by the dispatcher on every
/// request.
#[derive(Debug, Default)]
pub struct AccessTierCache {
    entries: RwLock<HashMap<EndpointKey, CachedAccess>>,
}

impl AccessTierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str, method: &str) -> Option<CachedAccess> {
        self.entries.read().get(&endpoint_key(path, method)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DependentCache for AccessTierCache {
    fn name(&self) -> &str {
        "access_tier"
    }

    fn refresh(&self, records: &[EndpointRecord]) {
        let fresh: HashMap<EndpointKey, CachedAccess> = records
            .iter()
            .map(|r| {
                (endpoint_key(&r.path, &r.method), CachedAccess {
                    tier: r.access_tier,
                    active: r.active,
                })
            })
            .collect();
        *self.entries.write() = fresh;
    }

    fn apply(&self, record: &EndpointRecord) {
        self.entries.write().insert(endpoint_key(&record.path, &record.method), CachedAccess {
            tier: record.access_tier,
            active: record.active,
        });
    }

    fn invalidate(&self, path: &str, method: &str) {
        self.entries.write().remove(&endpoint_key(path, method));
    }

    fn clear(&self) {
        self.entries.write().clear();
    }
}

// ============================================================================
// Rate limits
// ============================================================================

/// Requests per minute allowed per caller, by endpoint tier. `None` means
/// unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    #[serde(default = "default_free_rpm")]
    pub free: Option<u32>,
    #[serde(default = "default_vip_rpm")]
    pub vip: Option<u32>,
    #[serde(default)]
    pub premium: Option<u32>,
}

fn default_free_rpm() -> Option<u32> {
    Some(60)
}

fn default_vip_rpm() -> Option<u32> {
    Some(300)
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            free: default_free_rpm(),
            vip: default_vip_rpm(),
            premium: None,
        }
    }
}

impl RateLimits {
    pub fn for_tier(&self, tier: AccessTier) -> Option<u32> {
        match tier {
            AccessTier::Free => self.free,
            AccessTier::Vip => self.vip,
            AccessTier::Premium => self.premium,
            AccessTier::Disabled => Some(0),
        }
    }
}

struct Window {
    started: Instant,
    count: u32,
}

/// Per-endpoint limits plus fixed one-minute windows per caller and endpoint.
pub struct RateLimitCache {
    limits: RateLimits,
    window: Duration,
    endpoint_limits: DashMap<EndpointKey, Option<u32>>,
    windows: DashMap<(String, EndpointKey), Window>,
    last_prune: Mutex<Instant>,
}

impl RateLimitCache {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_window(limits, Duration::from_secs(60))
    }

    pub fn with_window(limits: RateLimits, window: Duration) -> Self {
        Self {
            limits,
            window,
            endpoint_limits: DashMap::new(),
            windows: DashMap::new(),
            last_prune: Mutex::new(Instant::now()),
        }
    }

    /// Effective limit for an endpoint, falling back to `fallback_tier` when
    /// the endpoint has not been projected yet.
    pub fn limit_for(&self, path: &str, method: &str, fallback_tier: AccessTier) -> Option<u32> {
        match self.endpoint_limits.get(&endpoint_key(path, method)) {
            Some(limit) => *limit,
            None => self.limits.for_tier(fallback_tier),
        }
    }

    /// Count one request. On rejection returns the milliseconds left in the
    /// current window.
    pub fn check(
        &self,
        caller: &str,
        path: &str,
        method: &str,
        fallback_tier: AccessTier,
    ) -> Result<(), u64> {
        let Some(max_rpm) = self.limit_for(path, method, fallback_tier) else {
            return Ok(());
        };
        // Must run before the entry below is held; retain locks every shard.
        self.prune_if_due();

        let key = (caller.to_string(), endpoint_key(path, method));
        let mut window = self.windows.entry(key).or_insert_with(|| Window {
            started: Instant::now(),
            count: 0,
        });

        let elapsed = window.started.elapsed();
        if elapsed >= self.window {
            window.started = Instant::now();
            window.count = 0;
        }
        if window.count >= max_rpm {
            let remaining = self.window.saturating_sub(window.started.elapsed());
            return Err(remaining.as_millis() as u64);
        }
        window.count += 1;
        Ok(())
    }

    /// Drop every expired window. Caller keys come from request headers, so
    /// the map would otherwise grow with each distinct caller.
    pub fn prune_expired(&self) {
        *self.last_prune.lock() = Instant::now();
        let window = self.window;
        self.windows.retain(|_, w| w.started.elapsed() < window);
    }

    fn prune_if_due(&self) {
        let due = self
            .last_prune
            .try_lock()
            .is_some_and(|last| last.elapsed() >= self.window);
        if due {
            self.prune_expired();
        }
    }

    fn drop_windows(&self, key: &EndpointKey) {
        self.windows.retain(|(_, endpoint), _| endpoint != key);
    }
}

impl DependentCache for RateLimitCache {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn refresh(&self, records: &[EndpointRecord]) {
        self.endpoint_limits.clear();
        for record in records {
            self.endpoint_limits.insert(
                endpoint_key(&record.path, &record.method),
                self.limits.for_tier(record.access_tier),
            );
        }
        self.windows
            .retain(|(_, endpoint), _| self.endpoint_limits.contains_key(endpoint));
        self.prune_expired();
    }

    fn apply(&self, record: &EndpointRecord) {
        let key = endpoint_key(&record.path, &record.method);
        let limit = self.limits.for_tier(record.access_tier);
        let previous = self.endpoint_limits.insert(key.clone(), limit);
        if previous.is_some_and(|p| p != limit) {
            self.drop_windows(&key);
        }
    }

    fn invalidate(&self, path: &str, method: &str) {
        let key = endpoint_key(path, method);
        self.endpoint_limits.remove(&key);
        self.drop_windows(&key);
    }

    fn clear(&self) {
        self.endpoint_limits.clear();
        self.windows.clear();
    }
}
