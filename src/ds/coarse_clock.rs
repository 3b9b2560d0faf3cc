//! Process-wide coarse clock with one-second resolution.
//!
//! Expiry comparisons in the shards need a "current time" on every hit, and
//! a syscall per lookup would dominate the short critical sections. Instead
//! a single `u32` tick (seconds since [`CLOCK_BASE`]) is published through
//! an atomic and refreshed once per second by a detached ticker thread.
//! Readers pay one atomic load and one unsigned compare.
//!
//! The base keeps ticks small enough that an absolute expiry fits in 32
//! bits for the library's lifetime; wall-clock recovery is
//! `CLOCK_BASE + tick` seconds since the Unix epoch.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Once;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix timestamp the tick counter is anchored to (2024-01-01T00:00:00Z).
pub const CLOCK_BASE: u64 = 1_704_067_200;

static TICK: AtomicU32 = AtomicU32::new(0);
static TICKER: Once = Once::new();

/// Returns the current tick: whole seconds elapsed since [`CLOCK_BASE`].
///
/// Callers must have gone through [`ensure_ticker`] (every cache
/// constructor does) or the tick stays at its initial value.
#[inline(always)]
pub fn now() -> u32 {
    TICK.load(Ordering::Acquire)
}

/// Converts a nonzero tick back to absolute wall-clock time.
#[inline]
pub fn wall_time(tick: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(CLOCK_BASE + u64::from(tick))
}

/// Stores the tick once and starts the once-per-second ticker thread.
///
/// Idempotent; the first caller wins. The thread is detached and runs for
/// the life of the process, mirroring how the shards treat the tick as
/// ambient state rather than an owned resource.
pub fn ensure_ticker() {
    TICKER.call_once(|| {
        refresh();
        let spawned = thread::Builder::new()
            .name("lrukit-clock".into())
            .spawn(|| loop {
                thread::sleep(Duration::from_secs(1));
                refresh();
            });
        match spawned {
            Ok(_) => log::debug!("coarse clock ticker started (base={CLOCK_BASE})"),
            // Without the ticker the tick stays frozen at its initial
            // value, so TTL entries simply stop expiring.
            Err(err) => log::warn!("coarse clock ticker failed to start: {err}"),
        }
    });
}

/// Converts an optional TTL to whole-second ticks.
///
/// `None` and `Duration::ZERO` both mean "never expires". Durations are
/// truncated to the 1 s resolution with a floor of one tick, so a nonzero
/// sub-second TTL expires after a tick instead of silently never arming.
#[inline]
pub fn ttl_ticks(ttl: Option<Duration>) -> Option<u32> {
    let ttl = ttl?;
    if ttl.is_zero() {
        return None;
    }
    Some(ttl.as_secs().clamp(1, u64::from(u32::MAX)) as u32)
}

fn refresh() {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    TICK.store(unix.saturating_sub(CLOCK_BASE) as u32, Ordering::Release);
}
