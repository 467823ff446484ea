// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MSRs of the Microsoft Hyper-V guest interface.
//!
//! Register behavior follows version 6.0b of the Hypervisor Top-Level
//! Functional Specification (TLFS). Only the partition-wide registers a guest
//! needs to recognize the interface are provided: the guest OS ID, the
//! hypercall page control, the VP index, and the reference time counter.
//!
//! Partition-wide registers are kept in atomics so that every vCPU may access
//! them concurrently without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use slog::info;

use crate::delegate::{Clock, DelegateError, DelegateResult, ParavirtMsrs};
use crate::msr::MsrId;
use crate::state::VcpuId;

#[usdt::provider(provider = "msr")]
mod probes {
    fn hyperv_wrmsr_guest_os_id(val: u64) {}
    fn hyperv_wrmsr_hypercall(val: u64, gpa: u64, locked: bool, enabled: bool) {
    }
    fn hyperv_wrmsr_reference_tsc(val: u64) {}
}

pub const HV_X64_MSR_GUEST_OS_ID: u32 = 0x4000_0000;
pub const HV_X64_MSR_HYPERCALL: u32 = 0x4000_0001;
pub const HV_X64_MSR_VP_INDEX: u32 = 0x4000_0002;
pub const HV_X64_MSR_TIME_REF_COUNT: u32 = 0x4000_0020;
pub const HV_X64_MSR_REFERENCE_TSC: u32 = 0x4000_0021;

/// The reference time counter ticks in 100 ns units.
const REF_TICKS_PER_SEC: u128 = 10_000_000;

const PAGE_SHIFT: u64 = 12;
const PAGE_MASK: u64 = !((1 << PAGE_SHIFT) - 1);

const LOCKED_BIT: u64 = 1;
const LOCKED_MASK: u64 = 1 << LOCKED_BIT;
const ENABLED_BIT: u64 = 0;
const ENABLED_MASK: u64 = 1 << ENABLED_BIT;

/// A value written to [`HV_X64_MSR_HYPERCALL`].
///
/// Bits 11:2 are reserved. The TLFS asks guests to preserve them but does not
/// penalize guests that modify them, so they are stored as written.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MsrHypercallValue(pub u64);

impl std::fmt::Debug for MsrHypercallValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsrHypercallValue")
            .field("raw", &format!("{:#x}", self.0))
            .field("gpa", &format!("{:#x}", self.gpa()))
            .field("locked", &self.locked())
            .field("enabled", &self.enabled())
            .finish()
    }
}

impl MsrHypercallValue {
    /// The guest physical address at which the guest wants the hypercall
    /// page.
    pub fn gpa(&self) -> u64 {
        self.0 & PAGE_MASK
    }

    /// Once locked, the register cannot change until the partition resets.
    pub fn locked(&self) -> bool {
        (self.0 & LOCKED_MASK) != 0
    }

    pub fn enabled(&self) -> bool {
        (self.0 & ENABLED_MASK) != 0
    }

    pub fn clear_enabled(&mut self) {
        self.0 &= !ENABLED_MASK;
    }
}

/// Optional parts of the interface.
#[derive(Clone, Copy, Debug, Default)]
pub struct Features {
    /// Enables the reference time counter and reference TSC MSRs.
    pub reference_tsc: bool,
}

pub struct HyperV {
    log: slog::Logger,
    features: Features,
    clock: Arc<dyn Clock>,
    guest_os_id: AtomicU64,
    hypercall: AtomicU64,
    reference_tsc: AtomicU64,
}

impl HyperV {
    pub fn new(
        log: &slog::Logger,
        features: Features,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let log = log.new(slog::o!("component" => "hyperv"));
        info!(
            log,
            "creating Hyper-V MSR interface";
            "features" => ?features
        );
        Self {
            log,
            features,
            clock,
            guest_os_id: AtomicU64::new(0),
            hypercall: AtomicU64::new(0),
            reference_tsc: AtomicU64::new(0),
        }
    }

    /// Returns every register to its value at partition creation.
    pub fn reset(&self) {
        self.guest_os_id.store(0, Ordering::Release);
        self.hypercall.store(0, Ordering::Release);
        self.reference_tsc.store(0, Ordering::Release);
    }

    pub fn hypercall_value(&self) -> MsrHypercallValue {
        MsrHypercallValue(self.hypercall.load(Ordering::Acquire))
    }

    fn wrmsr_guest_os_id(&self, value: u64) -> DelegateResult<()> {
        probes::hyperv_wrmsr_guest_os_id!(|| value);

        // Clearing the guest OS ID disables the hypercall page (TLFS 3.13).
        self.guest_os_id.store(value, Ordering::Release);
        if value == 0 {
            let _ = self.hypercall.fetch_update(
                Ordering::AcqRel,
                Ordering::Acquire,
                |old| {
                    let mut v = MsrHypercallValue(old);
                    v.clear_enabled();
                    Some(v.0)
                },
            );
        }
        Ok(())
    }

    fn wrmsr_hypercall(&self, value: u64) -> DelegateResult<()> {
        let mut new = MsrHypercallValue(value);
        probes::hyperv_wrmsr_hypercall!(|| (
            value,
            new.gpa(),
            new.locked(),
            new.enabled()
        ));

        // The Enabled bit cannot be set until the guest identifies itself.
        if self.guest_os_id.load(Ordering::Acquire) == 0 {
            new.clear_enabled();
        }

        let res = self.hypercall.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |old| {
                if MsrHypercallValue(old).locked() {
                    None
                } else {
                    Some(new.0)
                }
            },
        );
        if res.is_err() {
            info!(self.log, "ignoring write to locked hypercall MSR";
                "value" => value);
        }

        // Writes to a locked register are dropped, not faulted.
        Ok(())
    }

    fn rdmsr_time_ref_count(&self) -> DelegateResult<u64> {
        if !self.features.reference_tsc {
            return Err(DelegateError::Rejected);
        }
        let hz = u128::from(self.clock.frequency()).max(1);
        let ticks = u128::from(self.clock.now());
        Ok((ticks * REF_TICKS_PER_SEC / hz) as u64)
    }
}

impl ParavirtMsrs for HyperV {
    fn rdmsr(&self, vcpu: VcpuId, msr: MsrId) -> DelegateResult<u64> {
        match msr.0 {
            HV_X64_MSR_GUEST_OS_ID => {
                Ok(self.guest_os_id.load(Ordering::Acquire))
            }
            HV_X64_MSR_HYPERCALL => Ok(self.hypercall_value().0),
            HV_X64_MSR_VP_INDEX => Ok(u64::from(vcpu.0)),
            HV_X64_MSR_TIME_REF_COUNT => self.rdmsr_time_ref_count(),
            HV_X64_MSR_REFERENCE_TSC if self.features.reference_tsc => {
                Ok(self.reference_tsc.load(Ordering::Acquire))
            }
            _ => Err(DelegateError::Rejected),
        }
    }

    fn wrmsr(
        &self,
        _vcpu: VcpuId,
        msr: MsrId,
        value: u64,
        _raw: u64,
    ) -> DelegateResult<()> {
        match msr.0 {
            HV_X64_MSR_GUEST_OS_ID => self.wrmsr_guest_os_id(value),
            HV_X64_MSR_HYPERCALL => self.wrmsr_hypercall(value),
            HV_X64_MSR_REFERENCE_TSC if self.features.reference_tsc => {
                probes::hyperv_wrmsr_reference_tsc!(|| value);
                self.reference_tsc.store(value, Ordering::Release);
                Ok(())
            }
            _ => Err(DelegateError::Rejected),
        }
    }
}
