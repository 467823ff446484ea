// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access counters.
//!
//! Counters are shared by every vCPU and updated with relaxed atomics. They
//! are diagnostic only: a snapshot taken while vCPUs are running need not be
//! consistent across counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept for each range in a table.
#[derive(Debug, Default)]
pub struct RangeStats {
    reads: AtomicU64,
    writes: AtomicU64,
    ignored_bits: AtomicU64,
    gps: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RangeStatsSnapshot {
    pub reads: u64,
    pub writes: u64,
    pub ignored_bits: u64,
    pub gps: u64,
}

impl RangeStats {
    pub(crate) fn read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn ignored_bits(&self) {
        self.ignored_bits.fetch_add(1, Ordering::Relaxed);
    }
    pub(crate) fn gp(&self) {
        self.gps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RangeStatsSnapshot {
        RangeStatsSnapshot {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            ignored_bits: self.ignored_bits.load(Ordering::Relaxed),
            gps: self.gps.load(Ordering::Relaxed),
        }
    }
}

/// The range counters one access is charged to.
#[derive(Clone, Copy, Debug)]
pub(crate) struct HitStats<'a> {
    pub(crate) range: &'a RangeStats,
    pub(crate) alias: Option<&'a RangeStats>,
}

impl HitStats<'_> {
    fn each(&self, f: impl Fn(&RangeStats)) {
        f(self.range);
        if let Some(alias) = self.alias {
            f(alias);
        }
    }

    pub(crate) fn read(&self) {
        self.each(RangeStats::read)
    }
    pub(crate) fn write(&self) {
        self.each(RangeStats::write)
    }
    pub(crate) fn ignored_bits(&self) {
        self.each(RangeStats::ignored_bits)
    }
    pub(crate) fn gp(&self) {
        self.each(RangeStats::gp)
    }
}

/// Engine-wide counters.
#[derive(Debug, Default)]
pub struct MsrStats {
    pub(crate) reads: AtomicU64,
    pub(crate) reads_raise_gp: AtomicU64,
    pub(crate) reads_unknown: AtomicU64,
    pub(crate) writes: AtomicU64,
    pub(crate) writes_raise_gp: AtomicU64,
    pub(crate) writes_to_ignored_bits: AtomicU64,
    pub(crate) writes_unknown: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsrStatsSnapshot {
    pub reads: u64,
    pub reads_raise_gp: u64,
    pub reads_unknown: u64,
    pub writes: u64,
    pub writes_raise_gp: u64,
    pub writes_to_ignored_bits: u64,
    pub writes_unknown: u64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl MsrStats {
    pub fn snapshot(&self) -> MsrStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MsrStatsSnapshot {
            reads: load(&self.reads),
            reads_raise_gp: load(&self.reads_raise_gp),
            reads_unknown: load(&self.reads_unknown),
            writes: load(&self.writes),
            writes_raise_gp: load(&self.writes_raise_gp),
            writes_to_ignored_bits: load(&self.writes_to_ignored_bits),
            writes_unknown: load(&self.writes_unknown),
        }
    }
}
