// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces to the subsystems some MSRs are delegated to.
//!
//! The engine does not model the local APIC, nested VMX, paravirtual
//! interfaces or time itself. Handlers for MSRs owned by those subsystems
//! forward the access through one of the traits here. Implementations are
//! called while a vCPU is stopped in an MSR exit and must not block.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::msr::MsrId;
use crate::state::VcpuId;

/// Why a delegated access did not complete.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DelegateError {
    /// The subsystem refused the access. The guest receives #GP(0).
    #[error("access rejected")]
    Rejected,

    /// The subsystem cannot complete the access from the current context.
    #[error("access must be retried in a full context")]
    RetryInFullContext,
}

pub type DelegateResult<T> = Result<T, DelegateError>;

/// The local APIC's MSR interface: IA32_APIC_BASE and the x2APIC registers.
pub trait ApicMsrs: Send + Sync {
    fn read_base(&self, vcpu: VcpuId) -> DelegateResult<u64>;
    fn write_base(&self, vcpu: VcpuId, value: u64) -> DelegateResult<()>;
    fn read(&self, vcpu: VcpuId, msr: MsrId) -> DelegateResult<u64>;
    fn write(&self, vcpu: VcpuId, msr: MsrId, value: u64)
        -> DelegateResult<()>;
}

/// The result of offering an x2APIC access to the nested-VMX virtual-APIC
/// emulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtApicOutcome<T> {
    /// The access was emulated against the virtual-APIC page.
    Emulated(T),

    /// The register is outside what the virtual APIC exposes. The guest
    /// receives #GP(0).
    OutOfRange,

    /// The nested hypervisor does not intercept this register. The access
    /// falls through to the vCPU's own APIC.
    NotIntercepted,
}

/// Virtual-APIC emulation for vCPUs in VMX non-root operation with
/// "virtualize x2APIC mode" enabled.
pub trait VirtApicAccess: Send + Sync {
    fn read(&self, vcpu: VcpuId, msr: MsrId) -> VirtApicOutcome<u64>;
    fn write(&self, vcpu: VcpuId, msr: MsrId, value: u64)
        -> VirtApicOutcome<()>;
}

/// The guest-interface manager for hypervisor-defined MSRs.
pub trait ParavirtMsrs: Send + Sync {
    fn rdmsr(&self, vcpu: VcpuId, msr: MsrId) -> DelegateResult<u64>;

    /// `value` has the range's ignore mask applied; `raw` is the value the
    /// guest wrote.
    fn wrmsr(
        &self,
        vcpu: VcpuId,
        msr: MsrId,
        value: u64,
        raw: u64,
    ) -> DelegateResult<()>;
}

/// A monotonic tick source from which guest TSC values are derived.
pub trait Clock: Send + Sync {
    /// The current tick count.
    fn now(&self) -> u64;

    /// Ticks per second.
    fn frequency(&self) -> u64;
}

/// Stands in for a subsystem the VM does not have. Every access through it
/// is rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unsupported;

impl ApicMsrs for Unsupported {
    fn read_base(&self, _vcpu: VcpuId) -> DelegateResult<u64> {
        Err(DelegateError::Rejected)
    }
    fn write_base(&self, _vcpu: VcpuId, _value: u64) -> DelegateResult<()> {
        Err(DelegateError::Rejected)
    }
    fn read(&self, _vcpu: VcpuId, _msr: MsrId) -> DelegateResult<u64> {
        Err(DelegateError::Rejected)
    }
    fn write(
        &self,
        _vcpu: VcpuId,
        _msr: MsrId,
        _value: u64,
    ) -> DelegateResult<()> {
        Err(DelegateError::Rejected)
    }
}

impl VirtApicAccess for Unsupported {
    fn read(&self, _vcpu: VcpuId, _msr: MsrId) -> VirtApicOutcome<u64> {
        VirtApicOutcome::NotIntercepted
    }
    fn write(
        &self,
        _vcpu: VcpuId,
        _msr: MsrId,
        _value: u64,
    ) -> VirtApicOutcome<()> {
        VirtApicOutcome::NotIntercepted
    }
}

impl ParavirtMsrs for Unsupported {
    fn rdmsr(&self, _vcpu: VcpuId, _msr: MsrId) -> DelegateResult<u64> {
        Err(DelegateError::Rejected)
    }
    fn wrmsr(
        &self,
        _vcpu: VcpuId,
        _msr: MsrId,
        _value: u64,
        _raw: u64,
    ) -> DelegateResult<()> {
        Err(DelegateError::Rejected)
    }
}

/// A [`Clock`] counting host monotonic time at a fixed nominal frequency.
#[derive(Clone, Copy, Debug)]
pub struct HostClock {
    epoch: Instant,
    hz: u64,
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

impl HostClock {
    pub fn new(hz: u64) -> Self {
        Self { epoch: Instant::now(), hz }
    }
}

impl Clock for HostClock {
    fn now(&self) -> u64 {
        let ns = self.epoch.elapsed().as_nanos();
        (ns * u128::from(self.hz) / NANOS_PER_SEC) as u64
    }

    fn frequency(&self) -> u64 {
        self.hz
    }
}

/// The delegates available to MSR handlers.
#[derive(Clone)]
pub struct Services {
    pub apic: Arc<dyn ApicMsrs>,
    pub virt_apic: Arc<dyn VirtApicAccess>,
    pub paravirt: Arc<dyn ParavirtMsrs>,
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Services for a VM with no APIC, nested VMX or paravirtual interface,
    /// whose TSC runs at `tsc_hz`.
    pub fn standalone(tsc_hz: u64) -> Self {
        Self {
            apic: Arc::new(Unsupported),
            virt_apic: Arc::new(Unsupported),
            paravirt: Arc::new(Unsupported),
            clock: Arc::new(HostClock::new(tsc_hz)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_clock_is_monotonic() {
        let clock = HostClock::new(1_000_000_000);
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert_eq!(clock.frequency(), 1_000_000_000);
    }

    #[test]
    fn unsupported_rejects() {
        let u = Unsupported;
        assert_eq!(
            ApicMsrs::read(&u, VcpuId(0), MsrId(0x802)),
            Err(DelegateError::Rejected)
        );
        assert_eq!(
            VirtApicAccess::read(&u, VcpuId(0), MsrId(0x802)),
            VirtApicOutcome::NotIntercepted
        );
        assert_eq!(
            u.rdmsr(VcpuId(0), MsrId(0x4000_0000)),
            Err(DelegateError::Rejected)
        );
    }
}
