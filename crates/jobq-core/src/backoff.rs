//! Retry backoff.
//!
//! The delay is reported when a failed job is put back to `pending`; it does
//! not hold the job back from the next claim.

use std::time::Duration;

/// Delay before the next attempt: `base ^ attempts` seconds.
///
/// Saturates at `u64::MAX` seconds instead of overflowing.
pub fn backoff_delay(base: u32, attempts: u32) -> Duration {
    let secs = u64::from(base)
        .checked_pow(attempts)
        .unwrap_or(u64::MAX);
    Duration::from_secs(secs)
}
