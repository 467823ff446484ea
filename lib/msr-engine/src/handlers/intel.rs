// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Intel model-specific registers.

use crate::bits::PKG_CST_CONFIG_LOCK;
use crate::guest::MsrEnv;
use crate::msr::{MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::range::MsrRange;
use crate::state::VcpuMsrState;

/// Cores in bits 31:16, threads in bits 15:0. Every vCPU is reported as a
/// single-threaded core.
pub(super) fn rd_core_thread_count(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    let n = u64::from(env.info.cpu_count.min(0xffff));
    RdmsrOutcome::Handled(n << 16 | n)
}

/// Reports a fixed TSC ratio with no turbo: the nominal, maximum turbo and
/// minimum operating ratios all equal the TSC ratio.
pub(super) fn rd_platform_info(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    let ratio = env.tsc_ratio() & 0xff;
    RdmsrOutcome::Handled(ratio << 8 | ratio << 40 | ratio << 48)
}

pub(super) fn rd_flex_ratio(
    env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    range: &MsrRange,
) -> RdmsrOutcome {
    let ratio = env.tsc_ratio() & 0xff;
    RdmsrOutcome::Handled((range.value & !0x1ff00) | ratio << 8)
}

pub(super) fn rd_pkg_cst_config_control(
    _env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(state.pkg_cst_config_control)
}

pub(super) fn wr_pkg_cst_config_control(
    _env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    if state.pkg_cst_config_control & PKG_CST_CONFIG_LOCK != 0 {
        return WrmsrOutcome::GpException;
    }
    state.pkg_cst_config_control = value;
    WrmsrOutcome::Handled
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bits::{MSR_PKG_CST_CONFIG_CONTROL, MSR_PLATFORM_INFO};
    use crate::features::FeatureSet;
    use crate::handlers::test::env;
    use crate::handlers::{RdFn, WrFn};
    use crate::state::VcpuId;
    use msr_profile_config::CpuVendor;

    #[test]
    fn platform_info_and_thread_count() {
        let mut env = env(CpuVendor::Intel, FeatureSet::empty());
        env.info.cpu_count = 4;
        let state = VcpuMsrState::new(VcpuId(0));
        let r = MsrRange::fixed(MSR_PLATFORM_INFO, MSR_PLATFORM_INFO, "x", 0);
        let id = MsrId(MSR_PLATFORM_INFO);

        assert_eq!(
            rd_platform_info(&env, &state, id, &r),
            RdmsrOutcome::Handled(20 << 8 | 20 << 40 | 20 << 48)
        );
        assert_eq!(
            rd_core_thread_count(&env, &state, id, &r),
            RdmsrOutcome::Handled(0x0004_0004)
        );
        let r = r.with_value(0xffff_ffff);
        assert_eq!(
            rd_flex_ratio(&env, &state, id, &r),
            RdmsrOutcome::Handled(0xfffe_14ff)
        );
    }

    #[test]
    fn cst_config_locks() {
        let env = env(CpuVendor::Intel, FeatureSet::empty());
        let mut state = VcpuMsrState::new(VcpuId(0));
        let id = MsrId(MSR_PKG_CST_CONFIG_CONTROL);
        let r = MsrRange::single(
            id.0,
            "cst",
            RdFn::IntelPkgCStConfigControl,
            WrFn::IntelPkgCStConfigControl,
        );

        let locked = PKG_CST_CONFIG_LOCK | 0x3;
        assert_eq!(
            wr_pkg_cst_config_control(&env, &mut state, id, &r, locked, locked),
            WrmsrOutcome::Handled
        );
        assert_eq!(
            wr_pkg_cst_config_control(&env, &mut state, id, &r, 0, 0),
            WrmsrOutcome::GpException
        );
        assert_eq!(
            rd_pkg_cst_config_control(&env, &state, id, &r),
            RdmsrOutcome::Handled(locked)
        );
    }
}
