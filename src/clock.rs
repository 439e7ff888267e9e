//! Clocks, clock waits and running-time bookkeeping.
//!
//! - [`ClockTime`]: nanosecond timestamp with a `NONE` sentinel
//! - [`Clock`]: trait for time sources, with interruptible single-shot waits
//! - [`ClockId`]: handle for one wait that can be unscheduled from another thread
//! - [`SystemClock`]: monotonic fallback clock
//! - [`ClockState`]: active/inactive bookkeeping a scheduler keeps for the
//!   clock it selected

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Upper bound on a single sleep inside [`Clock::wait`].
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Time in nanoseconds.
///
/// `ClockTime::NONE` marks an unset time and poisons arithmetic.
///
/// ```rust
/// use padflow::clock::ClockTime;
///
/// let t = ClockTime::from_secs(1) + ClockTime::from_millis(500);
/// assert_eq!(t.millis(), 1500);
/// assert_eq!(t.to_string(), "1.500s");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// Maximum representable time (one less than the NONE sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Invalid/unset time.
    pub const NONE: Self = Self(u64::MAX);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Seconds (truncated).
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// True for the NONE sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// True for any valid time.
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Saturating addition. NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        let result = self.0.saturating_add(rhs.0);
        if result == u64::MAX {
            Self::MAX
        } else {
            Self(result)
        }
    }

    /// Saturating subtraction. NONE if either operand is NONE.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiply by a scalar.
    #[inline]
    pub const fn saturating_mul(self, rhs: u64) -> Self {
        if self.is_none() {
            return Self::NONE;
        }
        let result = self.0.saturating_mul(rhs);
        if result == u64::MAX {
            Self::MAX
        } else {
            Self(result)
        }
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl From<Duration> for ClockTime {
    #[inline]
    fn from(d: Duration) -> Self {
        Self(d.as_nanos().min(u128::from(u64::MAX - 1)) as u64)
    }
}

impl From<ClockTime> for Duration {
    #[inline]
    fn from(t: ClockTime) -> Self {
        if t.is_none() {
            Duration::ZERO
        } else {
            Duration::from_nanos(t.0)
        }
    }
}

impl std::fmt::Display for ClockTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            write!(f, "NONE")
        } else {
            let ms = (self.0 / 1_000_000) % 1000;
            write!(f, "{}.{:03}s", self.secs(), ms)
        }
    }
}

/// Outcome of a clock wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockReturn {
    /// The target time was reached.
    Ok,
    /// The target time had already passed when the wait started.
    Early,
    /// The wait was interrupted by [`ClockId::unschedule`].
    Unscheduled,
    /// The target time was NONE.
    BadTime,
    /// No clock was available to wait on.
    NoClock,
}

struct ClockIdInner {
    time: ClockTime,
    unscheduled: Mutex<bool>,
    cond: Condvar,
}

/// A single-shot wait request for an absolute clock time.
///
/// Clones share the same request, so one thread may wait while another
/// calls [`unschedule`](Self::unschedule).
#[derive(Clone)]
pub struct ClockId {
    inner: Arc<ClockIdInner>,
}

impl ClockId {
    /// Create a wait request for `time`.
    pub fn new(time: ClockTime) -> Self {
        Self {
            inner: Arc::new(ClockIdInner {
                time,
                unscheduled: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Absolute target time.
    pub fn time(&self) -> ClockTime {
        self.inner.time
    }

    /// Interrupt a pending or future wait on this id.
    pub fn unschedule(&self) {
        let mut flag = self.inner.unscheduled.lock();
        *flag = true;
        self.inner.cond.notify_all();
    }

    /// Whether [`unschedule`](Self::unschedule) was called.
    pub fn is_unscheduled(&self) -> bool {
        *self.inner.unscheduled.lock()
    }

    /// Block for up to `timeout`; returns true if the id got unscheduled.
    fn sleep(&self, timeout: Duration) -> bool {
        let mut flag = self.inner.unscheduled.lock();
        if !*flag {
            self.inner.cond.wait_for(&mut flag, timeout);
        }
        *flag
    }
}

impl std::fmt::Debug for ClockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockId")
            .field("time", &self.inner.time)
            .field("unscheduled", &self.is_unscheduled())
            .finish()
    }
}

/// A monotonic time source.
///
/// Elements that drive a clock (audio sinks, network receivers) implement
/// this and hand it out through
/// [`ElementImpl::provide_clock`](crate::element::ElementImpl::provide_clock).
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> ClockTime;

    /// Human-readable name.
    fn name(&self) -> &str {
        "unknown"
    }

    /// Block until `id`'s target time, or until it is unscheduled.
    fn wait(&self, id: &ClockId) -> ClockReturn {
        let target = id.time();
        if target.is_none() {
            return ClockReturn::BadTime;
        }
        if id.is_unscheduled() {
            return ClockReturn::Unscheduled;
        }
        if self.now() > target {
            return ClockReturn::Early;
        }
        loop {
            let now = self.now();
            if now >= target {
                return ClockReturn::Ok;
            }
            let slice = Duration::from(target - now).min(WAIT_SLICE);
            if id.sleep(slice) {
                return ClockReturn::Unscheduled;
            }
        }
    }
}

/// Monotonic clock based on [`Instant`], relative to its creation.
pub struct SystemClock {
    epoch: Instant,
    name: String,
}

impl SystemClock {
    /// Create a system clock with the current instant as epoch.
    pub fn new() -> Self {
        Self::with_name("system-monotonic")
    }

    /// Create a system clock with a custom name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            epoch: Instant::now(),
            name: name.into(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> ClockTime {
        ClockTime::from(self.epoch.elapsed())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Running-time bookkeeping for a selected clock.
///
/// Activating fixes a base time so that running time continues where it
/// stopped on the last deactivation.
pub struct ClockState {
    clock: Arc<dyn Clock>,
    /// Base time while active, `u64::MAX` while inactive.
    base_time: AtomicU64,
    /// Running time accumulated up to the last deactivation.
    elapsed: AtomicU64,
}

impl ClockState {
    /// Wrap `clock`, inactive, with zero running time.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            base_time: AtomicU64::new(u64::MAX),
            elapsed: AtomicU64::new(0),
        }
    }

    /// The wrapped clock.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Start counting running time. Returns the new base time.
    pub fn activate(&self) -> ClockTime {
        if self.is_active() {
            return self.base_time();
        }
        let elapsed = ClockTime(self.elapsed.load(Ordering::Acquire));
        let base = self.clock.now().saturating_sub(elapsed);
        self.base_time.store(base.0, Ordering::Release);
        base
    }

    /// Stop counting running time.
    pub fn deactivate(&self) {
        let base = self.base_time.swap(u64::MAX, Ordering::AcqRel);
        if base != u64::MAX {
            let running = self.clock.now().saturating_sub(ClockTime(base));
            self.elapsed.store(running.0, Ordering::Release);
        }
    }

    /// Forget accumulated running time.
    pub fn reset(&self) {
        self.base_time.store(u64::MAX, Ordering::Release);
        self.elapsed.store(0, Ordering::Release);
    }

    /// Whether running time is currently advancing.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.base_time.load(Ordering::Acquire) != u64::MAX
    }

    /// Base time, NONE while inactive.
    #[inline]
    pub fn base_time(&self) -> ClockTime {
        ClockTime(self.base_time.load(Ordering::Acquire))
    }

    /// Current running time.
    pub fn running_time(&self) -> ClockTime {
        let base = self.base_time.load(Ordering::Acquire);
        if base == u64::MAX {
            return ClockTime(self.elapsed.load(Ordering::Acquire));
        }
        self.clock.now().saturating_sub(ClockTime(base))
    }
}
