// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MSR range descriptors and the sorted table that holds them.
//!
//! A table is assembled with a [`MsrRangeTableBuilder`] and is immutable once
//! built. Building validates the whole table up front so that lookups on the
//! access path never fail for structural reasons: ranges are sorted and
//! disjoint, every alias resolves in a single step to a non-alias range, and
//! every field-backed range names a state slot for each MSR it covers.

use std::borrow::Cow;

use thiserror::Error;

use crate::handlers::{RdFn, WrFn};
use crate::msr::MsrId;
use crate::state::StateSlot;
use crate::stats::{HitStats, RangeStats};

/// Describes the behavior of a contiguous, inclusive span of MSRs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsrRange {
    pub first: u32,
    pub last: u32,
    pub name: Cow<'static, str>,
    pub rd: RdFn,
    pub wr: WrFn,

    /// Handler-specific parameter. Fixed-value handlers return it; alias
    /// ranges store the number of the MSR `first` stands in for.
    pub value: u64,

    /// Bits dropped from written values before the write handler sees them.
    pub wr_ign_mask: u64,

    /// Bits which raise #GP(0) if set in a written value.
    pub wr_gp_mask: u64,

    /// Storage backing `first` for field-style handlers. Later MSRs in the
    /// range use the slots that follow it.
    pub field: Option<StateSlot>,
}

impl MsrRange {
    pub fn new(
        first: u32,
        last: u32,
        name: impl Into<Cow<'static, str>>,
        rd: RdFn,
        wr: WrFn,
    ) -> Self {
        Self {
            first,
            last,
            name: name.into(),
            rd,
            wr,
            value: 0,
            wr_ign_mask: 0,
            wr_gp_mask: 0,
            field: None,
        }
    }

    /// A single MSR.
    pub fn single(
        id: u32,
        name: impl Into<Cow<'static, str>>,
        rd: RdFn,
        wr: WrFn,
    ) -> Self {
        Self::new(id, id, name, rd, wr)
    }

    /// A range whose reads return `value` and whose writes are dropped.
    pub fn fixed(
        first: u32,
        last: u32,
        name: impl Into<Cow<'static, str>>,
        value: u64,
    ) -> Self {
        Self::new(first, last, name, RdFn::FixedValue, WrFn::IgnoreWrite)
            .with_value(value)
    }

    /// A range standing in for the same number of MSRs starting at `target`.
    pub fn alias(
        first: u32,
        last: u32,
        name: impl Into<Cow<'static, str>>,
        target: u32,
    ) -> Self {
        Self::new(first, last, name, RdFn::MsrAlias, WrFn::MsrAlias)
            .with_value(u64::from(target))
    }

    /// A single MSR stored in `slot`.
    pub fn field(
        id: u32,
        name: impl Into<Cow<'static, str>>,
        slot: StateSlot,
        wr: WrFn,
    ) -> Self {
        Self::single(id, name, RdFn::Field, wr).with_field(slot)
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn with_ign(mut self, mask: u64) -> Self {
        self.wr_ign_mask = mask;
        self
    }

    pub fn with_gp(mut self, mask: u64) -> Self {
        self.wr_gp_mask = mask;
        self
    }

    pub fn with_field(mut self, slot: StateSlot) -> Self {
        self.field = Some(slot);
        self
    }

    pub fn contains(&self, id: u32) -> bool {
        self.first <= id && id <= self.last
    }

    pub fn is_alias(&self) -> bool {
        self.rd == RdFn::MsrAlias || self.wr == WrFn::MsrAlias
    }

    /// The state slot backing `id`, which must lie in this range.
    pub fn slot_for(&self, id: MsrId) -> Option<StateSlot> {
        self.field?.at(id.0.checked_sub(self.first)?)
    }

    fn uses_field(&self) -> bool {
        self.rd == RdFn::Field
            || matches!(
                self.wr,
                WrFn::Field | WrFn::CanonicalField | WrFn::MemTypeField
            )
    }

    /// Drops MSRs from the front of this range so it begins at `first`,
    /// keeping the alias target and state slot of each remaining MSR.
    fn trim_front(&mut self, first: u32) {
        let delta = first - self.first;
        self.first = first;
        if self.is_alias() {
            self.value += u64::from(delta);
        }
        self.field = self.field.and_then(|slot| slot.at(delta));
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RangeTableError {
    #[error("range at {0:#x} has no name")]
    EmptyName(u32),

    #[error("range {name}: last {last:#x} precedes first {first:#x}")]
    InvertedBounds { name: String, first: u32, last: u32 },

    #[error("range {0} overlaps range {1}")]
    Overlap(String, String),

    #[error("alias {0} targets {1:#x}, which no range covers")]
    DanglingAlias(String, u64),

    #[error("alias {0} targets alias {1}")]
    AliasChain(String, String),

    #[error("alias {0} spans past the end of its target {1}")]
    AliasSpan(String, String),

    #[error("range {0} aliases only one of its read and write behaviors")]
    AliasMismatch(String),

    #[error("range {0} needs a state slot for every MSR it covers")]
    MissingSlot(String),
}

/// Collects ranges for a [`MsrRangeTable`].
#[derive(Clone, Debug, Default)]
pub struct MsrRangeTableBuilder {
    ranges: Vec<MsrRange>,
}

impl MsrRangeTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a range. Overlap with existing ranges is an error at build time.
    pub fn push(&mut self, range: MsrRange) -> &mut Self {
        self.ranges.push(range);
        self
    }

    pub fn extend<I: IntoIterator<Item = MsrRange>>(
        &mut self,
        ranges: I,
    ) -> &mut Self {
        self.ranges.extend(ranges);
        self
    }

    /// Adds a range, taking precedence over anything already present.
    ///
    /// Existing ranges entirely covered by `range` are removed. Ranges
    /// overlapping one of its ends are shrunk, and a range enclosing it is
    /// split in two around it.
    pub fn insert(&mut self, range: MsrRange) -> &mut Self {
        let mut out = Vec::with_capacity(self.ranges.len() + 2);
        for existing in self.ranges.drain(..) {
            if existing.last < range.first || existing.first > range.last {
                out.push(existing);
                continue;
            }
            if existing.first < range.first {
                let mut head = existing.clone();
                head.last = range.first - 1;
                out.push(head);
            }
            if existing.last > range.last {
                let mut tail = existing;
                tail.trim_front(range.last + 1);
                out.push(tail);
            }
        }
        out.push(range);
        out.sort_by_key(|r| r.first);
        self.ranges = out;
        self
    }

    pub fn ranges(&self) -> &[MsrRange] {
        &self.ranges
    }

    /// Validates the collected ranges and produces a table.
    pub fn build(self) -> Result<MsrRangeTable, RangeTableError> {
        let mut ranges = self.ranges;

        for r in ranges.iter() {
            if r.name.is_empty() {
                return Err(RangeTableError::EmptyName(r.first));
            }
            if r.last < r.first {
                return Err(RangeTableError::InvertedBounds {
                    name: r.name.to_string(),
                    first: r.first,
                    last: r.last,
                });
            }
            if (r.rd == RdFn::MsrAlias) != (r.wr == WrFn::MsrAlias) {
                return Err(RangeTableError::AliasMismatch(r.name.to_string()));
            }
            if r.uses_field()
                && r.field.and_then(|s| s.at(r.last - r.first)).is_none()
            {
                return Err(RangeTableError::MissingSlot(r.name.to_string()));
            }
        }

        ranges.sort_by_key(|r| r.first);
        for pair in ranges.windows(2) {
            if pair[1].first <= pair[0].last {
                return Err(RangeTableError::Overlap(
                    pair[0].name.to_string(),
                    pair[1].name.to_string(),
                ));
            }
        }

        let mut alias_target = Vec::with_capacity(ranges.len());
        for r in ranges.iter() {
            if !r.is_alias() {
                alias_target.push(None);
                continue;
            }
            let dangling =
                || RangeTableError::DanglingAlias(r.name.to_string(), r.value);
            let target = u32::try_from(r.value).map_err(|_| dangling())?;
            let idx = search(&ranges, target).ok_or_else(dangling)?;
            let t = &ranges[idx];
            if t.is_alias() {
                return Err(RangeTableError::AliasChain(
                    r.name.to_string(),
                    t.name.to_string(),
                ));
            }
            let span_end = u64::from(target) + u64::from(r.last - r.first);
            if span_end > u64::from(t.last) {
                return Err(RangeTableError::AliasSpan(
                    r.name.to_string(),
                    t.name.to_string(),
                ));
            }
            alias_target.push(Some(idx));
        }

        let stats = ranges.iter().map(|_| RangeStats::default()).collect();
        Ok(MsrRangeTable {
            ranges: ranges.into_boxed_slice(),
            alias_target: alias_target.into_boxed_slice(),
            stats,
        })
    }
}

fn search(ranges: &[MsrRange], id: u32) -> Option<usize> {
    use std::cmp::Ordering;
    ranges
        .binary_search_by(|r| {
            if r.last < id {
                Ordering::Less
            } else if r.first > id {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        })
        .ok()
}

/// The result of resolving an MSR number against a table.
#[derive(Clone, Copy, Debug)]
pub struct MsrLookup<'a> {
    /// The MSR the access is carried out against. For an aliased MSR this is
    /// the corresponding MSR in the alias target.
    pub id: MsrId,

    /// Position of `range` in the table.
    pub index: usize,

    /// Position of the range containing the requested MSR. Differs from
    /// `index` only when that range is an alias.
    pub entry: usize,

    /// The range that handles the access. Never an alias.
    pub range: &'a MsrRange,
}

/// A validated, sorted set of disjoint MSR ranges.
#[derive(Debug)]
pub struct MsrRangeTable {
    ranges: Box<[MsrRange]>,
    alias_target: Box<[Option<usize>]>,
    stats: Box<[RangeStats]>,
}

impl MsrRangeTable {
    pub fn builder() -> MsrRangeTableBuilder {
        MsrRangeTableBuilder::new()
    }

    pub fn ranges(&self) -> &[MsrRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Position of the range containing `id`, without alias resolution.
    pub fn position(&self, id: MsrId) -> Option<usize> {
        search(&self.ranges, id.0)
    }

    /// Same as [`MsrRangeTable::position`], by exhaustive scan.
    pub fn position_linear(&self, id: MsrId) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(id.0))
    }

    /// Finds the range handling `id`, following an alias if `id` is in one.
    pub fn lookup(&self, id: MsrId) -> Option<MsrLookup<'_>> {
        let entry = self.position(id)?;
        let range = &self.ranges[entry];
        match self.alias_target[entry] {
            None => Some(MsrLookup { id, index: entry, entry, range }),
            Some(target) => {
                // Both values were bounded against the target when built.
                let eff = range.value as u32 + (id.0 - range.first);
                Some(MsrLookup {
                    id: MsrId(eff),
                    index: target,
                    entry,
                    range: &self.ranges[target],
                })
            }
        }
    }

    pub fn stats(&self, index: usize) -> &RangeStats {
        &self.stats[index]
    }

    /// Counters charged for an access resolved to `hit`: the handling range
    /// and, for an aliased MSR, the alias range as well.
    pub(crate) fn hit_stats(&self, hit: &MsrLookup<'_>) -> HitStats<'_> {
        HitStats {
            range: &self.stats[hit.index],
            alias: (hit.entry != hit.index).then(|| &self.stats[hit.entry]),
        }
    }
}
