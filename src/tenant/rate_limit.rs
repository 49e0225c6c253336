//! Sliding-window request limiter keyed by tenant.
//!
//! Each tenant owns a [`RateWindow`] behind its own mutex, so the
//! check-then-record step is linearized per tenant while different tenants
//! never wait on each other. The outer map lock is only held long enough to
//! find or insert a window.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Length of the trailing window quotas are counted over.
pub const RATE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Used to exercise window expiry
/// without sleeping.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        self.base + *offset
    }
}

/// Accepted request instants for one tenant, oldest first.
///
/// # Invariants
/// - After any access, no timestamp is older than the limiter window.
#[derive(Debug)]
pub struct RateWindow {
    pub tenant_id: String,
    timestamps: VecDeque<Instant>,
}

impl RateWindow {
    fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            timestamps: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.timestamps.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Outcome of a single check-and-record attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    /// Whether the request was admitted (and recorded)
    pub allowed: bool,
    /// Quota for the window
    pub limit: u32,
    /// Slots left after this decision
    pub remaining: u32,
    /// Time until the oldest recorded request leaves the window (rejections only)
    #[serde(skip)]
    pub retry_after: Option<Duration>,
}

pub struct RateLimiter {
    windows: RwLock<HashMap<String, Arc<Mutex<RateWindow>>>>,
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter over [`RATE_WINDOW`] using the system clock.
    pub fn new() -> Self {
        Self::with_clock(RATE_WINDOW, Arc::new(SystemClock))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            window,
            clock,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the tenant's window, creating it on first use.
    fn window_for(&self, tenant_id: &str) -> Arc<Mutex<RateWindow>> {
        {
            let map = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(window) = map.get(tenant_id) {
                return Arc::clone(window);
            }
        }

        // Another thread may have inserted between the two locks.
        let mut map = self.windows.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(tenant_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(tenant_id)))),
        )
    }

    /// Prune the tenant's window and, if fewer than `limit` requests remain in
    /// it, record the current instant.
    ///
    /// Rejected attempts are not recorded.
    pub fn check_and_record(&self, tenant_id: &str, limit: u32) -> RateDecision {
        let window = self.window_for(tenant_id);
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);

        let now = self.clock.now();
        window.prune(now, self.window);

        let count = window.len();
        if count < limit as usize {
            window.timestamps.push_back(now);
            let used = u32::try_from(count + 1).unwrap_or(u32::MAX);
            RateDecision {
                allowed: true,
                limit,
                remaining: limit.saturating_sub(used),
                retry_after: None,
            }
        } else {
            let retry_after = window
                .timestamps
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            RateDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after: Some(retry_after),
            }
        }
    }

    /// Number of requests recorded for the tenant in the trailing window.
    ///
    /// Prunes the window but never records. Tenants without a window report 0
    /// and no window is created for them.
    pub fn requests_in_window(&self, tenant_id: &str) -> usize {
        let window = {
            let map = self.windows.read().unwrap_or_else(PoisonError::into_inner);
            match map.get(tenant_id) {
                Some(window) => Arc::clone(window),
                None => return 0,
            }
        };
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.prune(self.clock.now(), self.window);
        window.len()
    }

    /// Number of tenants that have a window.
    pub fn tracked_tenants(&self) -> usize {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
