//! Wall-clock-free monotonic timebase.
//!
//! All timestamps inside the kernel come from here: milliseconds for ledger
//! decay and grid recency, nanoseconds for signed tree heads. The source
//! never steps backward and, on Linux, keeps counting across system suspend
//! (CLOCK_BOOTTIME). There is no wall-clock fallback; a platform without a
//! usable monotonic source fails closed at first call.

use anyhow::{anyhow, Result};
use std::sync::OnceLock;
#[cfg(not(target_os = "linux"))]
use std::time::Instant;

/// Monotonic clock anchored at first use.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    origin_ns: u64,
}

static CLOCK: OnceLock<MonotonicClock> = OnceLock::new();

#[cfg(target_os = "linux")]
fn raw_monotonic_ns() -> Result<u64> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // CLOCK_BOOTTIME survives suspend; CLOCK_MONOTONIC does not.
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_BOOTTIME, &mut ts) };
    if rc != 0 {
        return Err(anyhow!(
            "monotonic clock unavailable: clock_gettime(CLOCK_BOOTTIME) failed"
        ));
    }
    Ok(ts.tv_sec as u64 * 1_000_000_000 + ts.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

#[cfg(not(target_os = "linux"))]
fn raw_monotonic_ns() -> Result<u64> {
    let epoch = PROCESS_EPOCH.get_or_init(Instant::now);
    let elapsed = epoch.elapsed();
    u64::try_from(elapsed.as_nanos())
        .map_err(|_| anyhow!("monotonic clock overflowed u64 nanoseconds"))
}

impl MonotonicClock {
    /// Obtain the process-wide clock. Fails closed if no monotonic source
    /// exists on this platform.
    pub fn get() -> Result<Self> {
        if let Some(clock) = CLOCK.get() {
            return Ok(*clock);
        }
        let origin_ns = raw_monotonic_ns()?;
        Ok(*CLOCK.get_or_init(|| MonotonicClock { origin_ns }))
    }

    /// Nanoseconds since clock origin.
    pub fn now_ns(&self) -> Result<u64> {
        let now = raw_monotonic_ns()?;
        Ok(now.saturating_sub(self.origin_ns))
    }

    /// Milliseconds since clock origin.
    pub fn now_ms(&self) -> Result<i64> {
        Ok((self.now_ns()? / 1_000_000) as i64)
    }

    /// Whole seconds since clock origin.
    pub fn now_seconds(&self) -> Result<u64> {
        Ok(self.now_ns()? / 1_000_000_000)
    }

    /// Milliseconds elapsed since an earlier `now_ms` reading.
    pub fn elapsed_ms(&self, since_ms: i64) -> Result<i64> {
        Ok(self.now_ms()?.saturating_sub(since_ms))
    }

    /// Nanoseconds elapsed since an earlier `now_ns` reading.
    pub fn elapsed_ns(&self, since_ns: u64) -> Result<u64> {
        Ok(self.now_ns()?.saturating_sub(since_ns))
    }
}
