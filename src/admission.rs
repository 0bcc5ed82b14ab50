//! The admission controller: per-IP connection caps, a global
//! cap, sliding-window request rate limiting, an explicit IP blocklist, and
//! loopback exemption.
//!
//! Mirrors the original `SecurityConfig`/`ConnectionInfo` pair
//! (`examples/original_source/include/WebSocket/HttpWsServer.h`); the
//! documentation density here follows
//! `examples/other_examples/60474c54_AmakeSashaDev-maker_web__src-limits.rs.rs`'s
//! `ServerLimits`/`ConnLimits` — a heavily-commented, `Default`-derived
//! config struct is the shape this corpus reaches for when it wants to
//! expose server-wide tunables.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Immutable security configuration, read lock-free by the admission
/// controller's hot path once the server has started.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Maximum concurrent connections from one non-loopback IP (default: `10`).
    pub max_connections_per_ip: usize,
    /// Maximum concurrent connections, across all IPs (default: `100`).
    pub max_connections_total: usize,
    /// Maximum requests one IP may issue within one window (default: `1000`).
    pub max_requests_per_ip: usize,
    /// Length of the rolling request-count window (default: `60s`).
    pub request_reset_period: Duration,
    /// How long a connection may sit idle before being closed (default: `300s`).
    pub connection_timeout: Duration,
    /// Maximum HTTP request size in bytes (default: `1MiB`).
    pub max_request_size: usize,
    /// Maximum WebSocket message (and frame) size in bytes (default: `1MiB`).
    pub max_message_size: usize,
    /// Enables the per-connection request-size check.
    pub enable_request_size_limit: bool,
    /// Enables the per-message size check.
    pub enable_message_size_limit: bool,
    /// Enables idle-connection eviction.
    pub enable_connection_timeout: bool,
    /// Enables the sliding-window request rate limit.
    pub enable_rate_limiting: bool,
    /// Enables the explicit IP blocklist.
    pub enable_ip_blocking: bool,
    /// IPs denied admission outright, regardless of other caps.
    pub blocked_ips: HashSet<IpAddr>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_connections_per_ip: 10,
            max_connections_total: 100,
            max_requests_per_ip: 1000,
            request_reset_period: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(300),
            max_request_size: 1024 * 1024,
            max_message_size: 1024 * 1024,
            enable_request_size_limit: true,
            enable_message_size_limit: true,
            enable_connection_timeout: true,
            enable_rate_limiting: true,
            enable_ip_blocking: true,
            blocked_ips: HashSet::new(),
        }
    }
}

/// Per-IP tracking state.
#[derive(Debug, Clone)]
struct IpCounters {
    first_seen: Instant,
    last_seen: Instant,
    last_activity: Instant,
    current_open: usize,
    requests_this_window: usize,
    window_start: Instant,
    total_requests: u64,
}

impl IpCounters {
    fn new(now: Instant) -> Self {
        Self {
            first_seen: now,
            last_seen: now,
            last_activity: now,
            current_open: 0,
            requests_this_window: 0,
            window_start: now,
            total_requests: 0,
        }
    }
}

/// Why admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Blocked,
    GlobalCapExceeded,
    PerIpCapExceeded,
    RateLimited,
}

impl Rejection {
    pub fn reason(self) -> &'static str {
        match self {
            Rejection::Blocked => "ip is blocklisted",
            Rejection::GlobalCapExceeded => "global connection cap exceeded",
            Rejection::PerIpCapExceeded => "per-ip connection cap exceeded",
            Rejection::RateLimited => "per-ip request cap exceeded for current window",
        }
    }
}

fn is_loopback(ip: IpAddr) -> bool {
    ip.is_loopback()
}

struct Inner {
    counters: HashMap<IpAddr, IpCounters>,
    blocked: HashSet<IpAddr>,
}

/// The admission controller: a counters map, a global counter, the
/// immutable config, and a mutex serialising all mutation.
pub struct Admission {
    config: SecurityConfig,
    inner: Mutex<Inner>,
    global_open: AtomicUsize,
}

impl Admission {
    pub fn new(config: SecurityConfig) -> Self {
        let blocked = config.blocked_ips.clone();
        Admission {
            config,
            inner: Mutex::new(Inner {
                counters: HashMap::new(),
                blocked,
            }),
            global_open: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Decision procedure for a new connection from `ip`.
    pub fn admit(&self, ip: IpAddr, now: Instant) -> Result<(), Rejection> {
        if is_loopback(ip) {
            self.global_open.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        let mut inner = self.inner.lock().unwrap();

        if self.config.enable_ip_blocking && inner.blocked.contains(&ip) {
            return Err(Rejection::Blocked);
        }

        if self.global_open.load(Ordering::SeqCst) >= self.config.max_connections_total {
            return Err(Rejection::GlobalCapExceeded);
        }

        let entry = inner
            .counters
            .entry(ip)
            .or_insert_with(|| IpCounters::new(now));

        if entry.current_open >= self.config.max_connections_per_ip {
            return Err(Rejection::PerIpCapExceeded);
        }

        if self.config.enable_rate_limiting {
            if now.duration_since(entry.window_start) >= self.config.request_reset_period {
                entry.requests_this_window = 0;
                entry.window_start = now;
            }
            if entry.requests_this_window >= self.config.max_requests_per_ip {
                return Err(Rejection::RateLimited);
            }
        }

        entry.current_open += 1;
        entry.requests_this_window += 1;
        entry.total_requests += 1;
        entry.last_seen = now;
        entry.last_activity = now;

        self.global_open.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Releases an admitted connection's slot.
    pub fn release(&self, ip: IpAddr) {
        self.global_open.fetch_sub(1, Ordering::SeqCst);

        if is_loopback(ip) {
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.counters.get_mut(&ip) {
            entry.current_open = entry.current_open.saturating_sub(1);
            if entry.current_open == 0 {
                inner.counters.remove(&ip);
            }
        }
    }

    /// Refreshes the activity timestamp for `ip`, used by idle-timeout checks.
    pub fn touch(&self, ip: IpAddr, now: Instant) {
        if is_loopback(ip) {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.counters.get_mut(&ip) {
            entry.last_activity = now;
        }
    }

    /// Whether `ip`'s last activity predates `now - connection_timeout`.
    pub fn is_idle(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.config.enable_connection_timeout || is_loopback(ip) {
            return false;
        }
        let inner = self.inner.lock().unwrap();
        inner
            .counters
            .get(&ip)
            .map(|entry| now.duration_since(entry.last_activity) >= self.config.connection_timeout)
            .unwrap_or(false)
    }

    /// Per-connection size check: loopback IPs bypass all size
    /// checks.
    pub fn check_size(&self, ip: IpAddr, size: usize, limit: usize, enabled: bool) -> bool {
        size <= self.effective_cap(ip, limit, enabled)
    }

    /// The effective byte cap for `ip` given `limit`/`enabled` — `usize::MAX`
    /// when the policy is disabled or `ip` is loopback-exempt.
    fn effective_cap(&self, ip: IpAddr, limit: usize, enabled: bool) -> usize {
        if !enabled || is_loopback(ip) {
            usize::MAX
        } else {
            limit
        }
    }

    /// The byte cap to apply to one WebSocket frame's *declared* payload
    /// length, checked against the frame header alone before the payload is
    /// buffered (spec.md §4.F/§6's `max-message-size`). `u64::MAX` when the
    /// message-size policy is disabled or `ip` is loopback-exempt — kept as
    /// a genuine `u64::MAX` rather than `usize::MAX as u64` so a 32-bit
    /// build doesn't silently cap disabled connections at 4 GiB.
    pub fn message_cap(&self, ip: IpAddr) -> u64 {
        if !self.config.enable_message_size_limit || is_loopback(ip) {
            u64::MAX
        } else {
            self.config.max_message_size as u64
        }
    }

    pub fn block_ip(&self, ip: IpAddr) {
        self.inner.lock().unwrap().blocked.insert(ip);
    }

    pub fn unblock_ip(&self, ip: IpAddr) {
        self.inner.lock().unwrap().blocked.remove(&ip);
    }

    pub fn blocked_ips(&self) -> Vec<IpAddr> {
        self.inner.lock().unwrap().blocked.iter().copied().collect()
    }

    pub fn connected_ips(&self) -> Vec<IpAddr> {
        self.inner.lock().unwrap().counters.keys().copied().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.global_open.load(Ordering::SeqCst)
    }

    /// Housekeeping pass: expires request-window
    /// state for IPs that have been idle long enough that the next request
    /// would start a fresh window anyway, keeping the map from carrying
    /// stale window state during the gap between last-close and zero-open
    /// garbage collection.
    pub fn sweep_stale_windows(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        let period = self.config.request_reset_period;
        for entry in inner.counters.values_mut() {
            if now.duration_since(entry.window_start) >= period {
                entry.requests_this_window = 0;
                entry.window_start = now;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ip(n: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 0, 2, n))
    }

    #[test]
    fn per_ip_cap_admits_exactly_cap_connections() {
        let config = SecurityConfig {
            max_connections_per_ip: 2,
            ..Default::default()
        };
        let admission = Admission::new(config);
        let now = Instant::now();
        let client = ip(1);

        assert!(admission.admit(client, now).is_ok());
        assert!(admission.admit(client, now).is_ok());
        assert_eq!(admission.admit(client, now), Err(Rejection::PerIpCapExceeded));

        admission.release(client);
        assert!(admission.admit(client, now).is_ok());
    }

    #[test]
    fn loopback_bypasses_all_caps() {
        let config = SecurityConfig {
            max_connections_per_ip: 1,
            max_connections_total: 1,
            ..Default::default()
        };
        let admission = Admission::new(config);
        let now = Instant::now();
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);

        for _ in 0..50 {
            assert!(admission.admit(loopback, now).is_ok());
        }
    }

    #[test]
    fn global_cap_is_enforced_across_ips() {
        let config = SecurityConfig {
            max_connections_total: 2,
            max_connections_per_ip: 10,
            ..Default::default()
        };
        let admission = Admission::new(config);
        let now = Instant::now();

        assert!(admission.admit(ip(1), now).is_ok());
        assert!(admission.admit(ip(2), now).is_ok());
        assert_eq!(admission.admit(ip(3), now), Err(Rejection::GlobalCapExceeded));
    }

    #[test]
    fn blocklist_rejects_before_caps_are_checked() {
        let mut config = SecurityConfig::default();
        config.blocked_ips.insert(ip(9));
        let admission = Admission::new(config);
        assert_eq!(admission.admit(ip(9), Instant::now()), Err(Rejection::Blocked));
    }

    #[test]
    fn dynamic_block_takes_effect_immediately() {
        let admission = Admission::new(SecurityConfig::default());
        let now = Instant::now();
        assert!(admission.admit(ip(5), now).is_ok());
        admission.release(ip(5));

        admission.block_ip(ip(5));
        assert_eq!(admission.admit(ip(5), now), Err(Rejection::Blocked));

        admission.unblock_ip(ip(5));
        assert!(admission.admit(ip(5), now).is_ok());
    }

    #[test]
    fn rate_window_resets_after_period_elapses() {
        let config = SecurityConfig {
            max_requests_per_ip: 2,
            max_connections_per_ip: 100,
            request_reset_period: Duration::from_millis(10),
            ..Default::default()
        };
        let admission = Admission::new(config);
        let client = ip(7);
        let t0 = Instant::now();

        assert!(admission.admit(client, t0).is_ok());
        admission.release(client);
        assert!(admission.admit(client, t0).is_ok());
        admission.release(client);
        assert_eq!(admission.admit(client, t0), Err(Rejection::RateLimited));

        let t1 = t0 + Duration::from_millis(11);
        assert!(admission.admit(client, t1).is_ok());
    }

    #[test]
    fn release_removes_entry_at_zero_open() {
        let admission = Admission::new(SecurityConfig::default());
        let client = ip(11);
        let now = Instant::now();
        admission.admit(client, now).unwrap();
        assert_eq!(admission.connected_ips(), vec![client]);
        admission.release(client);
        assert!(admission.connected_ips().is_empty());
    }

    #[test]
    fn size_check_bypassed_for_loopback() {
        let admission = Admission::new(SecurityConfig::default());
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert!(admission.check_size(loopback, usize::MAX, 10, true));
        assert!(!admission.check_size(ip(1), 11, 10, true));
        assert!(admission.check_size(ip(1), 11, 10, false));
    }
}
