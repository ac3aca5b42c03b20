//! Time utilities for turnstile
//!
//! Frequency caps, token expiry and interaction ages all work on wall-clock
//! milliseconds since the Unix epoch. Everything that needs "now" goes through
//! the [`Clock`] trait so tests can pin time with [`ManualClock`].
//!
//! # Mock Time for Development
//!
//! In debug builds, the `TURNSTILE_MOCK_TIME` environment variable can be set
//! to shift [`SystemClock`]. Useful for checking backoff windows by hand.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-25 14:30:00`)
//!
//! Example:
//! ```bash
//! TURNSTILE_MOCK_TIME="2025-12-25 14:30:00" turnstile decide
//! ```

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "TURNSTILE_MOCK_TIME";

/// Format accepted by [`MOCK_TIME_ENV_VAR`]
pub const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const SECOND_MS: i64 = 1000;

/// Cached mock time offset from the real time when the process started.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let mock_time_str = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            match parse_mock_time(&mock_time_str) {
                Some(mock_dt) => {
                    let offset = mock_dt.signed_duration_since(Local::now());
                    tracing::info!(
                        mock_time = %mock_time_str,
                        offset_secs = offset.num_seconds(),
                        "Mock time enabled"
                    );
                    Some(offset)
                }
                None => {
                    tracing::warn!(
                        mock_time = %mock_time_str,
                        expected_format = MOCK_TIME_FORMAT,
                        "Invalid mock time"
                    );
                    None
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Parse a mock time string in the local timezone
pub fn parse_mock_time(value: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(value, MOCK_TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).single()
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn now_secs(&self) -> i64 {
        self.now_ms().div_euclid(SECOND_MS)
    }
}

/// Real wall clock, shifted by `TURNSTILE_MOCK_TIME` in debug builds
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        let real_now = Local::now();
        match get_mock_time_offset() {
            Some(offset) => (real_now + offset).timestamp_millis(),
            None => real_now.timestamp_millis(),
        }
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance_ms(secs * SECOND_MS);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
