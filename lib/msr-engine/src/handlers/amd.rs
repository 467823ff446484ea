// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! AMD model-specific registers.

use super::handled_if;
use crate::bits::{
    VmCr, AMD_CORE_PERF_COUNTERS, AMD_TSC_RATE_RESET_VALUE, MSR_AMD_CPU_NAME0,
    MSR_AMD_CORE_PERF_CTL0,
};
use crate::features::GuestFeature;
use crate::guest::MsrEnv;
use crate::msr::{MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::range::MsrRange;
use crate::state::VcpuMsrState;
use crate::validate::phys_addr_fits;

/// The guest TSC always runs at a ratio of 1.0 to its nominal frequency.
pub(super) fn rd_tsc_rate(
    _env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(AMD_TSC_RATE_RESET_VALUE)
}

/// Core performance registers alternate PERF_CTLn, PERF_CTRn.
fn core_perf_index(id: MsrId) -> Option<(usize, bool)> {
    let off = id.0.checked_sub(MSR_AMD_CORE_PERF_CTL0)?;
    let idx = (off / 2) as usize;
    (idx < AMD_CORE_PERF_COUNTERS).then_some((idx, off & 1 == 1))
}

pub(super) fn rd_core_perf(
    _env: &MsrEnv,
    state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    match core_perf_index(id) {
        Some((idx, false)) => RdmsrOutcome::Handled(state.amd_perf_ctl[idx]),
        Some((idx, true)) => RdmsrOutcome::Handled(state.amd_perf_ctr[idx]),
        None => RdmsrOutcome::GpException,
    }
}

pub(super) fn wr_core_perf(
    _env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    match core_perf_index(id) {
        Some((idx, false)) => state.amd_perf_ctl[idx] = value,
        Some((idx, true)) => state.amd_perf_ctr[idx] = value,
        None => return WrmsrOutcome::GpException,
    }
    WrmsrOutcome::Handled
}

pub(super) fn rd_cpu_name(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    match id.0.checked_sub(MSR_AMD_CPU_NAME0) {
        Some(n) if n < 6 => {
            RdmsrOutcome::Handled(env.info.brand_chunk(n as usize))
        }
        _ => RdmsrOutcome::GpException,
    }
}

pub(super) fn rd_vm_cr(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    if env.has(GuestFeature::Svm) {
        RdmsrOutcome::Handled(VmCr::LOCK.bits())
    } else {
        RdmsrOutcome::Handled(0)
    }
}

/// VM_CR reads back as locked, so writes to LOCK and SVMDIS are dropped.
/// Setting any of the debug and INIT/A20 redirection controls faults.
pub(super) fn wr_vm_cr(
    env: &MsrEnv,
    _state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    let forbidden = VmCr::DPD | VmCr::R_INIT | VmCr::DIS_A20M;
    handled_if(
        env.has(GuestFeature::Svm)
            && !VmCr::from_bits_retain(value).intersects(forbidden),
    )
}

pub(super) fn rd_vm_hsave_pa(
    _env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(state.vm_hsave_pa)
}

pub(super) fn wr_vm_hsave_pa(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    if value & 0xfff != 0
        || !phys_addr_fits(value, env.info.max_phys_addr_width)
    {
        return WrmsrOutcome::GpException;
    }
    state.vm_hsave_pa = value;
    WrmsrOutcome::Handled
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bits::{MSR_AMD_VM_CR, MSR_AMD_VM_HSAVE_PA};
    use crate::features::FeatureSet;
    use crate::handlers::test::env;
    use crate::handlers::{RdFn, WrFn};
    use crate::state::VcpuId;
    use msr_profile_config::CpuVendor;

    fn range(id: u32) -> MsrRange {
        MsrRange::single(id, "test", RdFn::FixedValue, WrFn::IgnoreWrite)
    }

    #[test]
    fn vm_cr_depends_on_svm() {
        let svm = env(CpuVendor::Amd, FeatureSet::SVM);
        let none = env(CpuVendor::Amd, FeatureSet::empty());
        let mut state = VcpuMsrState::new(VcpuId(0));
        let r = range(MSR_AMD_VM_CR);
        let id = MsrId(MSR_AMD_VM_CR);

        assert_eq!(rd_vm_cr(&svm, &state, id, &r), RdmsrOutcome::Handled(8));
        assert_eq!(rd_vm_cr(&none, &state, id, &r), RdmsrOutcome::Handled(0));

        let lock = VmCr::LOCK.bits() | VmCr::SVMDIS.bits();
        assert_eq!(
            wr_vm_cr(&svm, &mut state, id, &r, lock, lock),
            WrmsrOutcome::Handled
        );
        let dpd = VmCr::DPD.bits();
        assert_eq!(
            wr_vm_cr(&svm, &mut state, id, &r, dpd, dpd),
            WrmsrOutcome::GpException
        );
        assert_eq!(
            wr_vm_cr(&none, &mut state, id, &r, 0, 0),
            WrmsrOutcome::GpException
        );
    }

    #[test]
    fn hsave_pa_alignment_and_width() {
        let env = env(CpuVendor::Amd, FeatureSet::SVM);
        let mut state = VcpuMsrState::new(VcpuId(0));
        let r = range(MSR_AMD_VM_HSAVE_PA);
        let id = MsrId(MSR_AMD_VM_HSAVE_PA);

        assert_eq!(
            wr_vm_hsave_pa(&env, &mut state, id, &r, 0x1000, 0x1000),
            WrmsrOutcome::Handled
        );
        assert_eq!(
            wr_vm_hsave_pa(&env, &mut state, id, &r, 0x1800, 0x1800),
            WrmsrOutcome::GpException
        );
        let wide = 1u64 << env.info.max_phys_addr_width;
        assert_eq!(
            wr_vm_hsave_pa(&env, &mut state, id, &r, wide, wide),
            WrmsrOutcome::GpException
        );
        assert_eq!(
            rd_vm_hsave_pa(&env, &state, id, &r),
            RdmsrOutcome::Handled(0x1000)
        );
    }

    #[test]
    fn core_perf_pairs() {
        let env = env(CpuVendor::Amd, FeatureSet::empty());
        let mut state = VcpuMsrState::new(VcpuId(0));
        let r = range(MSR_AMD_CORE_PERF_CTL0);
        let ctr2 = MsrId(MSR_AMD_CORE_PERF_CTL0 + 5);

        assert_eq!(
            wr_core_perf(&env, &mut state, ctr2, &r, 7, 7),
            WrmsrOutcome::Handled
        );
        assert_eq!(state.amd_perf_ctr[2], 7);
        assert_eq!(
            rd_core_perf(&env, &state, ctr2, &r),
            RdmsrOutcome::Handled(7)
        );
        assert_eq!(
            rd_core_perf(&env, &state, MsrId(MSR_AMD_CORE_PERF_CTL0 + 12), &r),
            RdmsrOutcome::GpException
        );
    }
}
