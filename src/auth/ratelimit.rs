//! Per-client request rate limiter
//!
//! Each client IP gets its own token bucket: `burst` tokens of capacity,
//! refilled continuously at `rps` tokens per second. A request is admitted
//! only when a whole token is available; otherwise it is rejected at once.
//! A background sweeper evicts clients that have been idle for longer than
//! `idle_timeout`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Configuration for the rate limiter
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Whether admission control is applied at all
    pub enabled: bool,

    /// Steady refill rate in tokens per second
    pub rps: f64,

    /// Bucket capacity
    pub burst: u32,

    /// Clients idle longer than this are evicted by the sweeper
    pub idle_timeout: Duration,

    /// How often the sweeper runs
    pub sweep_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rps: 2.0,
            burst: 4,
            idle_timeout: Duration::from_secs(180),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Bucket state for one client
#[derive(Debug, Clone)]
struct ClientState {
    /// Tokens currently available (fractional while refilling)
    tokens: f64,

    /// Last time `tokens` was brought up to date
    last_refill: Instant,

    /// Last time this client made a request
    last_seen: Instant,
}

impl ClientState {
    fn new(burst: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(burst),
            last_refill: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, rps: f64, burst: u32, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rps).min(f64::from(burst));
        self.last_refill = now;
    }
}

/// Token bucket rate limiter keyed by client IP
///
/// All bucket reads and writes, including sweeper eviction, go through a
/// single mutex, so two concurrent requests from one client can never spend
/// the same token.
pub struct RateLimiter {
    config: RateLimitConfig,
    clients: Mutex<HashMap<IpAddr, ClientState>>,
}

impl RateLimiter {
    /// Create a new rate limiter with the given configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new rate limiter with default configuration
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<IpAddr, ClientState>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether a request from `ip` is admitted
    pub fn admit(&self, ip: IpAddr) -> bool {
        self.admit_at(ip, Instant::now())
    }

    /// `admit` with an explicit clock reading
    pub fn admit_at(&self, ip: IpAddr, now: Instant) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut clients = self.lock();
        let client = clients
            .entry(ip)
            .or_insert_with(|| ClientState::new(self.config.burst, now));

        client.refill(self.config.rps, self.config.burst, now);
        client.last_seen = now;

        if client.tokens >= 1.0 {
            client.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Evict clients idle for longer than the configured threshold
    ///
    /// Returns the number of evicted clients.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// `sweep` with an explicit clock reading
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut clients = self.lock();
        let before = clients.len();

        clients.retain(|_, client| {
            now.saturating_duration_since(client.last_seen) <= self.config.idle_timeout
        });

        before - clients.len()
    }

    /// Get current number of tracked clients
    pub fn tracked_clients_count(&self) -> usize {
        self.lock().len()
    }

    /// Spawn the periodic idle sweep
    ///
    /// The task runs every `sweep_interval` until a message (or a closed
    /// channel) arrives on `shutdown_rx`.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.sweep_interval);
            // The first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Rate limiter sweeper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let evicted = self.sweep();
                        if evicted > 0 {
                            tracing::debug!(
                                evicted,
                                remaining = self.tracked_clients_count(),
                                "Evicted idle rate limiter clients"
                            );
                        }
                    }
                }
            }
        })
    }
}
