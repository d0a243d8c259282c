//! Tick sources for timing intercepted calls
//!
//! A tick is an opaque unit. On x86/x86_64 the hardware source reads the CPU
//! timestamp counter; elsewhere it degrades to zero, which keeps counting
//! intact while all timings read as 0.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Instant;

/// Where tick values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    /// CPU cycle counter (zero on unsupported targets)
    #[default]
    Hardware,
    /// Nanoseconds from a process-wide monotonic clock
    Monotonic,
    /// Always zero; counts are still maintained
    Disabled,
}

impl ClockSource {
    /// Read the current tick value
    #[inline]
    pub fn now(self) -> u64 {
        match self {
            ClockSource::Hardware => hwtime(),
            ClockSource::Monotonic => monotonic_ticks(),
            ClockSource::Disabled => 0,
        }
    }

    /// Ticks between two readings. A counter that went backwards (core
    /// migration on an unsynchronised TSC) reads as zero.
    #[inline]
    pub fn elapsed(start: u64, end: u64) -> u64 {
        end.saturating_sub(start)
    }

    /// Whether this source produces non-zero readings on the current target
    pub fn is_supported(self) -> bool {
        match self {
            ClockSource::Hardware => cfg!(any(target_arch = "x86", target_arch = "x86_64")),
            ClockSource::Monotonic => true,
            ClockSource::Disabled => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ClockSource::Hardware => "hardware",
            ClockSource::Monotonic => "monotonic",
            ClockSource::Disabled => "disabled",
        }
    }
}

/// Read the CPU timestamp counter
#[cfg(target_arch = "x86_64")]
#[inline]
#[allow(unused_unsafe)]
pub fn hwtime() -> u64 {
    // SAFETY: RDTSC has no preconditions on x86_64.
    unsafe {
        core::arch::x86_64::_rdtsc()
    }
}

/// Read the CPU timestamp counter
#[cfg(target_arch = "x86")]
#[inline]
#[allow(unused_unsafe)]
pub fn hwtime() -> u64 {
    // SAFETY: RDTSC is available on every x86 target Rust supports.
    unsafe {
        core::arch::x86::_rdtsc()
    }
}

/// No cycle counter on this target
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
#[inline]
pub fn hwtime() -> u64 {
    0
}

fn monotonic_ticks() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    u64::try_from(epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
}
