//! Per-operation counters for instrumented VFS instances
//!
//! Each wrapper keeps one slot per [`OperationKind`] holding a call count, the
//! cumulative tick total and the number of calls the delegate failed. Slots
//! are atomics so concurrent handles on one wrapper never lose increments.

use crate::clock::ClockSource;
use crate::events::{self, OperationKind};
use crossbeam::utils::CachePadded;
use serde::Serialize;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct Slot {
    calls: AtomicU64,
    ticks: AtomicU64,
    errors: AtomicU64,
}

/// Counter table for one wrapper instance
#[derive(Debug)]
pub struct OperationCounters {
    slots: [CachePadded<Slot>; OperationKind::COUNT],
}

impl Default for OperationCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationCounters {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| CachePadded::new(Slot::default())),
        }
    }

    /// Record one completed call
    #[inline]
    pub fn record(&self, kind: OperationKind, elapsed_ticks: u64, failed: bool) {
        let slot = &self.slots[kind.index()];
        slot.calls.fetch_add(1, Ordering::Relaxed);
        slot.ticks.fetch_add(elapsed_ticks, Ordering::Relaxed);
        if failed {
            slot.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get(&self, kind: OperationKind) -> OperationStat {
        let slot = &self.slots[kind.index()];
        OperationStat {
            kind,
            name: kind.name(),
            calls: slot.calls.load(Ordering::Relaxed),
            ticks: slot.ticks.load(Ordering::Relaxed),
            errors: slot.errors.load(Ordering::Relaxed),
        }
    }

    /// Zero every slot. Callers that need the reset to be indivisible from
    /// readers hold the owning instance's write lock.
    pub fn reset(&self) {
        for slot in &self.slots {
            slot.calls.store(0, Ordering::Relaxed);
            slot.ticks.store(0, Ordering::Relaxed);
            slot.errors.store(0, Ordering::Relaxed);
        }
    }

    /// Every kind in ascending id order
    pub fn snapshot(&self) -> Vec<OperationStat> {
        events::catalog().map(|kind| self.get(kind)).collect()
    }
}

/// Counters for one operation kind at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationStat {
    #[serde(skip)]
    pub kind: OperationKind,
    pub name: &'static str,
    pub calls: u64,
    pub ticks: u64,
    /// Calls the delegate failed (still timed and counted in `calls`)
    pub errors: u64,
}

impl OperationStat {
    pub fn id(&self) -> i32 {
        self.kind.id()
    }

    pub fn ticks_per_call(&self) -> u64 {
        if self.calls > 0 {
            self.ticks / self.calls
        } else {
            0
        }
    }
}

/// Summary totals across all kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatTotals {
    pub total_calls: u64,
    pub total_ticks: u64,
    pub total_errors: u64,
}

/// A full counter report for one wrapper
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub vfs: String,
    pub clock: ClockSource,
    pub entries: Vec<OperationStat>,
}

impl Report {
    pub fn totals(&self) -> StatTotals {
        self.entries
            .iter()
            .fold(StatTotals::default(), |acc, stat| StatTotals {
                total_calls: acc.total_calls + stat.calls,
                total_ticks: acc.total_ticks + stat.ticks,
                total_errors: acc.total_errors + stat.errors,
            })
    }

    pub fn entry(&self, kind: OperationKind) -> Option<&OperationStat> {
        self.entries.iter().find(|stat| stat.kind == kind)
    }

    pub fn is_zero(&self) -> bool {
        self.entries
            .iter()
            .all(|stat| stat.calls == 0 && stat.ticks == 0 && stat.errors == 0)
    }

    /// Render the summary table, one row per kind in id order
    pub fn write_summary<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let totals = self.totals();

        writeln!(out, "vfs {} (clock: {})", self.vfs, self.clock.as_str())?;
        writeln!(out, "% time        ticks  ticks/call     calls    errors operation")?;
        writeln!(out, "------ ------------ ----------- --------- --------- ----------------------")?;

        for stat in &self.entries {
            let time_percent = if totals.total_ticks > 0 {
                (stat.ticks as f64 / totals.total_ticks as f64) * 100.0
            } else {
                0.0
            };
            writeln!(
                out,
                "{:6.2} {:>12} {:>11} {:>9} {:>9} {}",
                time_percent,
                stat.ticks,
                stat.ticks_per_call(),
                stat.calls,
                if stat.errors > 0 {
                    stat.errors.to_string()
                } else {
                    String::new()
                },
                stat.name
            )?;
        }

        writeln!(out, "------ ------------ ----------- --------- --------- ----------------------")?;
        let avg_ticks = if totals.total_calls > 0 {
            totals.total_ticks / totals.total_calls
        } else {
            0
        };
        writeln!(
            out,
            "100.00 {:>12} {:>11} {:>9} {:>9} total",
            totals.total_ticks,
            avg_ticks,
            totals.total_calls,
            if totals.total_errors > 0 {
                totals.total_errors.to_string()
            } else {
                String::new()
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_and_ticks() {
        let counters = OperationCounters::new();
        counters.record(OperationKind::Read, 100, false);
        counters.record(OperationKind::Read, 50, true);
        counters.record(OperationKind::Open, 7, false);

        let read = counters.get(OperationKind::Read);
        assert_eq!(read.calls, 2);
        assert_eq!(read.ticks, 150);
        assert_eq!(read.errors, 1);
        assert_eq!(read.ticks_per_call(), 75);
        assert_eq!(counters.get(OperationKind::Open).calls, 1);
        assert_eq!(counters.get(OperationKind::Write).calls, 0);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let counters = OperationCounters::new();
        for kind in OperationKind::ALL {
            counters.record(kind, 3, true);
        }
        counters.reset();
        assert!(counters
            .snapshot()
            .iter()
            .all(|s| s.calls == 0 && s.ticks == 0 && s.errors == 0));
    }

    #[test]
    fn test_snapshot_is_dense_and_ordered() {
        let snapshot = OperationCounters::new().snapshot();
        assert_eq!(snapshot.len(), OperationKind::COUNT);
        for (i, stat) in snapshot.iter().enumerate() {
            assert_eq!(stat.id(), i as i32 + 1);
        }
    }

    #[test]
    fn test_totals() {
        let counters = OperationCounters::new();
        counters.record(OperationKind::Write, 10, false);
        counters.record(OperationKind::Sync, 30, true);
        let report = Report {
            vfs: "inst".into(),
            clock: ClockSource::Disabled,
            entries: counters.snapshot(),
        };
        assert_eq!(
            report.totals(),
            StatTotals {
                total_calls: 2,
                total_ticks: 40,
                total_errors: 1,
            }
        );
        assert!(!report.is_zero());
        assert_eq!(report.entry(OperationKind::Sync).unwrap().ticks, 30);
    }

    #[test]
    fn test_summary_table() {
        let counters = OperationCounters::new();
        counters.record(OperationKind::Read, 300, false);
        counters.record(OperationKind::Write, 100, false);
        let report = Report {
            vfs: "inst".into(),
            clock: ClockSource::Monotonic,
            entries: counters.snapshot(),
        };

        let mut out = Vec::new();
        report.write_summary(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("vfs inst (clock: monotonic)"));
        assert!(text.contains(" 75.00          300         300         1           xRead"));
        assert!(text.contains("xCurrentTime"));
        assert!(text.lines().last().unwrap().ends_with("total"));
    }

    #[test]
    fn test_empty_report_summary_does_not_divide_by_zero() {
        let report = Report {
            vfs: "idle".into(),
            clock: ClockSource::Hardware,
            entries: OperationCounters::new().snapshot(),
        };
        let mut out = Vec::new();
        report.write_summary(&mut out).unwrap();
        assert!(report.is_zero());
        assert!(String::from_utf8(out).unwrap().contains("  0.00"));
    }
}
