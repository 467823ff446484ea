// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-vCPU MSR state.
//!
//! Each vCPU owns one [`VcpuMsrState`]. Read handlers borrow it shared and
//! write handlers borrow it exclusively, so a vCPU's state is only ever
//! touched by the thread running that vCPU.

use crate::bits::{
    MiscEnable, AMD_CORE_PERF_COUNTERS, FIXED_MTRR_COUNT, MAX_PERF_COUNTERS,
    MAX_VARIABLE_MTRRS, PAT_RESET_VALUE,
};

/// Identifies a vCPU within its VM.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VcpuId(pub u32);

/// The nested-virtualization mode a vCPU is currently executing in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NestedMode {
    /// The vCPU is not running a nested guest.
    #[default]
    None,

    /// The vCPU is running a nested guest under AMD SVM.
    SvmGuest,

    /// The vCPU is in VMX non-root operation.
    VmxNonRoot {
        /// The nested hypervisor enabled "virtualize x2APIC mode" for the
        /// current guest.
        virt_x2apic_mode: bool,
    },
}

impl NestedMode {
    pub fn is_nested(&self) -> bool {
        !matches!(self, NestedMode::None)
    }
}

bitflags! {
    /// Work a write handler asks the caller to carry out once the write has
    /// been committed.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PendingActions: u32 {
        /// Guest TLB contents must be flushed.
        const FLUSH_TLB = 1 << 0;
        /// EFER.NXE changed; cached paging structures depending on it are
        /// stale.
        const NXE_CHANGED = 1 << 1;
    }
}

/// One variable-range MTRR pair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VarMtrr {
    pub base: u64,
    pub mask: u64,
}

/// A named per-vCPU storage cell which plain field-backed MSRs read and write.
///
/// Fixed-range MTRRs are numbered 0 through 10 in MSR order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StateSlot {
    SysenterCs,
    SysenterEsp,
    SysenterEip,
    Star,
    Lstar,
    Cstar,
    Sfmask,
    FsBase,
    GsBase,
    KernelGsBase,
    TscAux,
    MtrrFixed(u8),
}

impl StateSlot {
    /// Returns the slot `offset` registers after this one, if there is one.
    ///
    /// Only the fixed-range MTRRs form a run of consecutive slots; every other
    /// slot backs exactly one MSR.
    pub fn at(self, offset: u32) -> Option<StateSlot> {
        match (self, offset) {
            (slot, 0) => Some(slot),
            (StateSlot::MtrrFixed(i), off) => {
                let idx = u32::from(i).checked_add(off)?;
                if (idx as usize) < FIXED_MTRR_COUNT {
                    Some(StateSlot::MtrrFixed(idx as u8))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VcpuMsrState {
    pub vcpu: VcpuId,

    /// The vCPU's current CR0, as supplied by the caller before dispatch.
    pub cr0: u64,
    pub nested: NestedMode,

    pub efer: u64,
    pub pat: u64,
    pub sysenter_cs: u64,
    pub sysenter_esp: u64,
    pub sysenter_eip: u64,
    pub star: u64,
    pub lstar: u64,
    pub cstar: u64,
    pub sfmask: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub kernel_gs_base: u64,
    pub tsc_aux: u64,

    /// Offset added to the host clock to produce the guest's TSC.
    pub tsc_offset: u64,

    pub mtrr_def_type: u64,
    pub mtrr_fixed: [u64; FIXED_MTRR_COUNT],
    pub mtrr_var: [VarMtrr; MAX_VARIABLE_MTRRS],

    pub misc_enable: u64,
    pub spec_ctrl: u64,
    pub pkg_cst_config_control: u64,
    pub vm_hsave_pa: u64,

    pub pmc: [u64; MAX_PERF_COUNTERS],
    pub perf_evt_sel: [u64; MAX_PERF_COUNTERS],
    pub amd_perf_ctl: [u64; AMD_CORE_PERF_COUNTERS],
    pub amd_perf_ctr: [u64; AMD_CORE_PERF_COUNTERS],

    pub pending: PendingActions,
}

/// CR0 at reset: ET, CD and NW set.
const CR0_RESET_VALUE: u64 = 0x6000_0010;

impl VcpuMsrState {
    /// Creates the architectural reset state for `vcpu`.
    pub fn new(vcpu: VcpuId) -> Self {
        Self {
            vcpu,
            cr0: CR0_RESET_VALUE,
            nested: NestedMode::None,
            efer: 0,
            pat: PAT_RESET_VALUE,
            sysenter_cs: 0,
            sysenter_esp: 0,
            sysenter_eip: 0,
            star: 0,
            lstar: 0,
            cstar: 0,
            sfmask: 0,
            fs_base: 0,
            gs_base: 0,
            kernel_gs_base: 0,
            tsc_aux: 0,
            tsc_offset: 0,
            mtrr_def_type: 0,
            mtrr_fixed: [0; FIXED_MTRR_COUNT],
            mtrr_var: [VarMtrr::default(); MAX_VARIABLE_MTRRS],
            misc_enable: (MiscEnable::FAST_STRINGS
                | MiscEnable::BTS_UNAVAIL
                | MiscEnable::PEBS_UNAVAIL)
                .bits(),
            spec_ctrl: 0,
            pkg_cst_config_control: 0,
            vm_hsave_pa: 0,
            pmc: [0; MAX_PERF_COUNTERS],
            perf_evt_sel: [0; MAX_PERF_COUNTERS],
            amd_perf_ctl: [0; AMD_CORE_PERF_COUNTERS],
            amd_perf_ctr: [0; AMD_CORE_PERF_COUNTERS],
            pending: PendingActions::empty(),
        }
    }

    /// Returns this vCPU to its reset state.
    pub fn reset(&mut self) {
        *self = Self::new(self.vcpu);
    }

    /// Takes the actions accumulated by writes since the last call.
    pub fn take_pending(&mut self) -> PendingActions {
        std::mem::take(&mut self.pending)
    }

    pub fn slot(&self, slot: StateSlot) -> u64 {
        match slot {
            StateSlot::SysenterCs => self.sysenter_cs,
            StateSlot::SysenterEsp => self.sysenter_esp,
            StateSlot::SysenterEip => self.sysenter_eip,
            StateSlot::Star => self.star,
            StateSlot::Lstar => self.lstar,
            StateSlot::Cstar => self.cstar,
            StateSlot::Sfmask => self.sfmask,
            StateSlot::FsBase => self.fs_base,
            StateSlot::GsBase => self.gs_base,
            StateSlot::KernelGsBase => self.kernel_gs_base,
            StateSlot::TscAux => self.tsc_aux,
            StateSlot::MtrrFixed(i) => self.mtrr_fixed[usize::from(i)],
        }
    }

    pub fn slot_mut(&mut self, slot: StateSlot) -> &mut u64 {
        match slot {
            StateSlot::SysenterCs => &mut self.sysenter_cs,
            StateSlot::SysenterEsp => &mut self.sysenter_esp,
            StateSlot::SysenterEip => &mut self.sysenter_eip,
            StateSlot::Star => &mut self.star,
            StateSlot::Lstar => &mut self.lstar,
            StateSlot::Cstar => &mut self.cstar,
            StateSlot::Sfmask => &mut self.sfmask,
            StateSlot::FsBase => &mut self.fs_base,
            StateSlot::GsBase => &mut self.gs_base,
            StateSlot::KernelGsBase => &mut self.kernel_gs_base,
            StateSlot::TscAux => &mut self.tsc_aux,
            StateSlot::MtrrFixed(i) => &mut self.mtrr_fixed[usize::from(i)],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fixed_mtrr_slots_are_bounded() {
        let base = StateSlot::MtrrFixed(3);
        assert_eq!(base.at(0), Some(StateSlot::MtrrFixed(3)));
        assert_eq!(base.at(7), Some(StateSlot::MtrrFixed(10)));
        assert_eq!(base.at(8), None);
        assert_eq!(StateSlot::Lstar.at(0), Some(StateSlot::Lstar));
        assert_eq!(StateSlot::Lstar.at(1), None);
    }

    #[test]
    fn slots_alias_fields() {
        let mut state = VcpuMsrState::new(VcpuId(0));
        *state.slot_mut(StateSlot::FsBase) = 0x1000;
        *state.slot_mut(StateSlot::MtrrFixed(10)) = 0x0606;
        assert_eq!(state.fs_base, 0x1000);
        assert_eq!(state.mtrr_fixed[10], 0x0606);
        assert_eq!(state.slot(StateSlot::FsBase), 0x1000);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut state = VcpuMsrState::new(VcpuId(3));
        state.lstar = 0xffff_8000_0000_0000;
        state.pat = 0;
        state.pending = PendingActions::FLUSH_TLB;
        state.reset();
        assert_eq!(state, VcpuMsrState::new(VcpuId(3)));
        assert_eq!(state.pat, PAT_RESET_VALUE);
    }

    #[test]
    fn pending_actions_drain() {
        let mut state = VcpuMsrState::new(VcpuId(0));
        state.pending |=
            PendingActions::FLUSH_TLB | PendingActions::NXE_CHANGED;
        assert_eq!(
            state.take_pending(),
            PendingActions::FLUSH_TLB | PendingActions::NXE_CHANGED
        );
        assert!(state.take_pending().is_empty());
    }
}
