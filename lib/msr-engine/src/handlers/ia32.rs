// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architectural (IA32_*) MSRs.

use super::{delegated_rd, delegated_wr, handled_if, index_in};
use crate::bits::*;
use crate::delegate::VirtApicOutcome;
use crate::features::GuestFeature;
use crate::guest::MsrEnv;
use crate::msr::{MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::range::MsrRange;
use crate::state::{NestedMode, VcpuMsrState};
use crate::validate::{is_valid_mtrr_type, pat_valid, phys_addr_fits};

//
// Time stamp counter and friends
//

pub(super) fn rd_tsc(
    env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(env.guest_tsc(state))
}

pub(super) fn wr_tsc(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    state.tsc_offset = value.wrapping_sub(env.services.clock.now());
    WrmsrOutcome::Handled
}

// MPERF and APERF both tick at the TSC rate: the guest always appears to run
// at its nominal frequency.

pub(super) fn rd_mperf(
    env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(env.guest_tsc(state))
}

pub(super) fn rd_aperf(
    env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(env.guest_tsc(state))
}

pub(super) fn rd_perf_status(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    range: &MsrRange,
) -> RdmsrOutcome {
    let ratio = env.tsc_ratio().min(0x1f);
    let value = range.value & !((0x1f << 40) | (1 << 46));
    RdmsrOutcome::Handled(value | ratio << 40)
}

//
// Local APIC
//

pub(super) fn rd_apic_base(
    env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    delegated_rd(env.services.apic.read_base(state.vcpu))
}

pub(super) fn wr_apic_base(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    delegated_wr(env.services.apic.write_base(state.vcpu, value))
}

fn uses_virt_apic(state: &VcpuMsrState) -> bool {
    matches!(state.nested, NestedMode::VmxNonRoot { virt_x2apic_mode: true })
}

pub(super) fn rd_x2apic(
    env: &MsrEnv,
    state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    if uses_virt_apic(state) {
        match env.services.virt_apic.read(state.vcpu, id) {
            VirtApicOutcome::Emulated(v) => return RdmsrOutcome::Handled(v),
            VirtApicOutcome::OutOfRange => return RdmsrOutcome::GpException,
            VirtApicOutcome::NotIntercepted => {}
        }
    }
    delegated_rd(env.services.apic.read(state.vcpu, id))
}

pub(super) fn wr_x2apic(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    if uses_virt_apic(state) {
        match env.services.virt_apic.write(state.vcpu, id, value) {
            VirtApicOutcome::Emulated(()) => return WrmsrOutcome::Handled,
            VirtApicOutcome::OutOfRange => return WrmsrOutcome::GpException,
            VirtApicOutcome::NotIntercepted => {}
        }
    }
    delegated_wr(env.services.apic.write(state.vcpu, id, value))
}

//
// Virtualization capabilities
//

pub(super) fn rd_feature_control(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    let mut value = FeatureControl::LOCK;
    if env.has(GuestFeature::Vmx) {
        value |= FeatureControl::VMXON;
    }
    RdmsrOutcome::Handled(value.bits())
}

pub(super) fn rd_vmx_capability(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    if !env.has(GuestFeature::Vmx) {
        return RdmsrOutcome::Handled(0);
    }
    match index_in(id, MSR_IA32_VMX_BASIC, 1, VMX_CAPABILITY_MSRS) {
        Some(idx) => RdmsrOutcome::Handled(env.info.vmx_caps[idx]),
        None => RdmsrOutcome::GpException,
    }
}

//
// Performance monitoring
//

fn perf_counters(env: &MsrEnv) -> usize {
    usize::from(env.info.perf_counter_count).min(MAX_PERF_COUNTERS)
}

pub(super) fn rd_pmc(
    env: &MsrEnv,
    state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    match index_in(id, MSR_IA32_PMC0, 1, perf_counters(env)) {
        Some(idx) => RdmsrOutcome::Handled(state.pmc[idx]),
        None => RdmsrOutcome::GpException,
    }
}

pub(super) fn wr_pmc(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    match index_in(id, MSR_IA32_PMC0, 1, perf_counters(env)) {
        Some(idx) => {
            state.pmc[idx] = value;
            WrmsrOutcome::Handled
        }
        None => WrmsrOutcome::GpException,
    }
}

pub(super) fn rd_perf_evt_sel(
    env: &MsrEnv,
    state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    match index_in(id, MSR_IA32_PERFEVTSEL0, 1, perf_counters(env)) {
        Some(idx) => RdmsrOutcome::Handled(state.perf_evt_sel[idx]),
        None => RdmsrOutcome::GpException,
    }
}

pub(super) fn wr_perf_evt_sel(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    match index_in(id, MSR_IA32_PERFEVTSEL0, 1, perf_counters(env)) {
        Some(idx) => {
            state.perf_evt_sel[idx] = value;
            WrmsrOutcome::Handled
        }
        None => WrmsrOutcome::GpException,
    }
}

//
// Memory typing
//

pub(super) fn rd_mtrr_cap(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    let vcnt =
        u64::from(env.info.var_mtrr_count).min(MAX_VARIABLE_MTRRS as u64);
    RdmsrOutcome::Handled((MtrrCap::FIX | MtrrCap::WC).bits() | vcnt)
}

/// Maps a PHYSBASEn/PHYSMASKn MSR to its pair index and whether it is the
/// mask half of the pair.
fn mtrr_var_index(env: &MsrEnv, id: MsrId) -> Option<(usize, bool)> {
    let off = id.0.checked_sub(MSR_IA32_MTRR_PHYSBASE0)?;
    let idx = (off / 2) as usize;
    let count = usize::from(env.info.var_mtrr_count).min(MAX_VARIABLE_MTRRS);
    (idx < count).then_some((idx, off & 1 == 1))
}

pub(super) fn rd_mtrr_phys(
    env: &MsrEnv,
    state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    match mtrr_var_index(env, id) {
        Some((idx, false)) => RdmsrOutcome::Handled(state.mtrr_var[idx].base),
        Some((idx, true)) => RdmsrOutcome::Handled(state.mtrr_var[idx].mask),
        None => RdmsrOutcome::GpException,
    }
}

pub(super) fn wr_mtrr_phys(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    let Some((idx, is_mask)) = mtrr_var_index(env, id) else {
        return WrmsrOutcome::GpException;
    };
    if !phys_addr_fits(value, env.info.max_phys_addr_width) {
        return WrmsrOutcome::GpException;
    }
    if is_mask {
        state.mtrr_var[idx].mask = value;
    } else {
        if !is_valid_mtrr_type((value & MTRR_TYPE_MASK) as u8) {
            return WrmsrOutcome::GpException;
        }
        state.mtrr_var[idx].base = value;
    }
    WrmsrOutcome::Handled
}

pub(super) fn rd_mtrr_def_type(
    _env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(state.mtrr_def_type)
}

pub(super) fn wr_mtrr_def_type(
    _env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    if !is_valid_mtrr_type((value & MTRR_TYPE_MASK) as u8) {
        return WrmsrOutcome::GpException;
    }
    state.mtrr_def_type = value;
    WrmsrOutcome::Handled
}

pub(super) fn rd_pat(
    _env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(state.pat)
}

pub(super) fn wr_pat(
    _env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    if !pat_valid(value) {
        return WrmsrOutcome::GpException;
    }
    state.pat = value;
    WrmsrOutcome::Handled
}

//
// Miscellaneous
//

pub(super) fn rd_misc_enable(
    _env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(state.misc_enable)
}

pub(super) fn wr_misc_enable(
    _env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    // Neither branch trace store nor PEBS is ever offered to the guest.
    state.misc_enable =
        value | (MiscEnable::BTS_UNAVAIL | MiscEnable::PEBS_UNAVAIL).bits();
    WrmsrOutcome::Handled
}

//
// Machine check
//

pub(super) fn rd_mcg_cap(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(u64::from(env.info.mc_bank_count))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum McReg {
    Ctl,
    Status,
    Addr,
    Misc,
}

fn mc_reg(env: &MsrEnv, id: MsrId) -> Option<McReg> {
    let off = id.0.checked_sub(MSR_IA32_MC0_CTL)?;
    let banks = usize::from(env.info.mc_bank_count).min(MAX_MC_BANKS);
    if (off / 4) as usize >= banks {
        return None;
    }
    Some(match off & 3 {
        0 => McReg::Ctl,
        1 => McReg::Status,
        2 => McReg::Addr,
        _ => McReg::Misc,
    })
}

pub(super) fn rd_mc_bank(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    match mc_reg(env, id) {
        Some(McReg::Ctl | McReg::Status) => RdmsrOutcome::Handled(0),
        // No error is ever logged, so there is no address or detail to read.
        Some(McReg::Addr | McReg::Misc) | None => RdmsrOutcome::GpException,
    }
}

pub(super) fn wr_mc_bank(
    env: &MsrEnv,
    _state: &mut VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    match mc_reg(env, id) {
        Some(McReg::Ctl) => WrmsrOutcome::Handled,
        Some(McReg::Status | McReg::Addr | McReg::Misc) => {
            handled_if(value == 0)
        }
        None => WrmsrOutcome::GpException,
    }
}

//
// Speculation control
//

pub(super) fn rd_spec_ctrl(
    env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    if !env.has(GuestFeature::SpecCtrl) {
        return RdmsrOutcome::Handled(0);
    }
    RdmsrOutcome::Handled(state.spec_ctrl)
}

pub(super) fn wr_spec_ctrl(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    if !env.has(GuestFeature::SpecCtrl) || SpecCtrl::from_bits(value).is_none()
    {
        return WrmsrOutcome::GpException;
    }
    state.spec_ctrl = value;
    WrmsrOutcome::Handled
}

pub(super) fn wr_pred_cmd(
    env: &MsrEnv,
    _state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    _value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    handled_if(env.has(GuestFeature::PredCmd))
}

pub(super) fn wr_flush_cmd(
    env: &MsrEnv,
    _state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    handled_if(
        env.has(GuestFeature::FlushCmd) && FlushCmd::from_bits(value).is_some(),
    )
}

pub(super) fn rd_arch_capabilities(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    if !env.has(GuestFeature::ArchCapabilities) {
        return RdmsrOutcome::Handled(0);
    }
    RdmsrOutcome::Handled(env.info.arch_capabilities)
}
