// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! MSR read and write handlers.
//!
//! Each range in a table names one read behavior ([`RdFn`]) and one write
//! behavior ([`WrFn`]). The [`HandlerRegistry`] maps every tag to the function
//! implementing it; the mapping is a total `match`, so adding a tag without a
//! handler does not compile.
//!
//! Write handlers receive two values: `value`, which has the range's ignore
//! mask already cleared, and `raw`, exactly what the guest wrote. The
//! dispatcher has already rejected any write touching the range's #GP mask.

use strum::IntoEnumIterator;

use crate::delegate::{DelegateError, DelegateResult};
use crate::guest::MsrEnv;
use crate::msr::{MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::range::MsrRange;
use crate::state::VcpuMsrState;

mod amd;
mod amd64;
mod generic;
mod gim;
mod ia32;
mod intel;

pub type RdmsrFn =
    fn(&MsrEnv, &VcpuMsrState, MsrId, &MsrRange) -> RdmsrOutcome;

pub type WrmsrFn = fn(
    &MsrEnv,
    &mut VcpuMsrState,
    MsrId,
    &MsrRange,
    u64,
    u64,
) -> WrmsrOutcome;

/// Read behaviors.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::EnumCount,
    strum::IntoStaticStr,
)]
pub enum RdFn {
    FixedValue,
    MsrAlias,
    WriteOnly,
    Field,
    Ia32TimestampCounter,
    Ia32MPerf,
    Ia32APerf,
    Ia32ApicBase,
    Ia32FeatureControl,
    Ia32PmcN,
    Ia32PerfEvtSelN,
    Ia32MtrrCap,
    Ia32MtrrPhysN,
    Ia32MtrrDefType,
    Ia32Pat,
    Ia32MiscEnable,
    Ia32McgCap,
    Ia32McCtlStatusAddrMiscN,
    Ia32PerfStatus,
    Ia32X2ApicN,
    Ia32VmxCapability,
    Ia32SpecCtrl,
    Ia32ArchCapabilities,
    Amd64Efer,
    IntelCoreThreadCount,
    IntelPlatformInfo,
    IntelFlexRatio,
    IntelPkgCStConfigControl,
    AmdFam15hTscRate,
    AmdCorePerfN,
    AmdCpuNameN,
    AmdVmCr,
    AmdVmHSavePa,
    Gim,
}

/// Write behaviors.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::EnumIter,
    strum::EnumCount,
    strum::IntoStaticStr,
)]
pub enum WrFn {
    IgnoreWrite,
    MsrAlias,
    ReadOnly,
    Field,
    CanonicalField,
    MemTypeField,
    Ia32TimestampCounter,
    Ia32ApicBase,
    Ia32PmcN,
    Ia32PerfEvtSelN,
    AmdCorePerfN,
    Ia32MtrrPhysN,
    Ia32MtrrDefType,
    Ia32Pat,
    Ia32MiscEnable,
    Ia32McCtlStatusAddrMiscN,
    Ia32X2ApicN,
    Ia32SpecCtrl,
    Ia32PredCmd,
    Ia32FlushCmd,
    Amd64Efer,
    IntelPkgCStConfigControl,
    AmdVmCr,
    AmdVmHSavePa,
    Gim,
}

fn rd_handler(tag: RdFn) -> RdmsrFn {
    match tag {
        RdFn::FixedValue => generic::rd_fixed_value,
        RdFn::MsrAlias => generic::rd_alias,
        RdFn::WriteOnly => generic::rd_write_only,
        RdFn::Field => generic::rd_field,
        RdFn::Ia32TimestampCounter => ia32::rd_tsc,
        RdFn::Ia32MPerf => ia32::rd_mperf,
        RdFn::Ia32APerf => ia32::rd_aperf,
        RdFn::Ia32ApicBase => ia32::rd_apic_base,
        RdFn::Ia32FeatureControl => ia32::rd_feature_control,
        RdFn::Ia32PmcN => ia32::rd_pmc,
        RdFn::Ia32PerfEvtSelN => ia32::rd_perf_evt_sel,
        RdFn::Ia32MtrrCap => ia32::rd_mtrr_cap,
        RdFn::Ia32MtrrPhysN => ia32::rd_mtrr_phys,
        RdFn::Ia32MtrrDefType => ia32::rd_mtrr_def_type,
        RdFn::Ia32Pat => ia32::rd_pat,
        RdFn::Ia32MiscEnable => ia32::rd_misc_enable,
        RdFn::Ia32McgCap => ia32::rd_mcg_cap,
        RdFn::Ia32McCtlStatusAddrMiscN => ia32::rd_mc_bank,
        RdFn::Ia32PerfStatus => ia32::rd_perf_status,
        RdFn::Ia32X2ApicN => ia32::rd_x2apic,
        RdFn::Ia32VmxCapability => ia32::rd_vmx_capability,
        RdFn::Ia32SpecCtrl => ia32::rd_spec_ctrl,
        RdFn::Ia32ArchCapabilities => ia32::rd_arch_capabilities,
        RdFn::Amd64Efer => amd64::rd_efer,
        RdFn::IntelCoreThreadCount => intel::rd_core_thread_count,
        RdFn::IntelPlatformInfo => intel::rd_platform_info,
        RdFn::IntelFlexRatio => intel::rd_flex_ratio,
        RdFn::IntelPkgCStConfigControl => intel::rd_pkg_cst_config_control,
        RdFn::AmdFam15hTscRate => amd::rd_tsc_rate,
        RdFn::AmdCorePerfN => amd::rd_core_perf,
        RdFn::AmdCpuNameN => amd::rd_cpu_name,
        RdFn::AmdVmCr => amd::rd_vm_cr,
        RdFn::AmdVmHSavePa => amd::rd_vm_hsave_pa,
        RdFn::Gim => gim::rd_gim,
    }
}

fn wr_handler(tag: WrFn) -> WrmsrFn {
    match tag {
        WrFn::IgnoreWrite => generic::wr_ignore,
        WrFn::MsrAlias => generic::wr_alias,
        WrFn::ReadOnly => generic::wr_read_only,
        WrFn::Field => generic::wr_field,
        WrFn::CanonicalField => generic::wr_canonical_field,
        WrFn::MemTypeField => generic::wr_mem_type_field,
        WrFn::Ia32TimestampCounter => ia32::wr_tsc,
        WrFn::Ia32ApicBase => ia32::wr_apic_base,
        WrFn::Ia32PmcN => ia32::wr_pmc,
        WrFn::Ia32PerfEvtSelN => ia32::wr_perf_evt_sel,
        WrFn::AmdCorePerfN => amd::wr_core_perf,
        WrFn::Ia32MtrrPhysN => ia32::wr_mtrr_phys,
        WrFn::Ia32MtrrDefType => ia32::wr_mtrr_def_type,
        WrFn::Ia32Pat => ia32::wr_pat,
        WrFn::Ia32MiscEnable => ia32::wr_misc_enable,
        WrFn::Ia32McCtlStatusAddrMiscN => ia32::wr_mc_bank,
        WrFn::Ia32X2ApicN => ia32::wr_x2apic,
        WrFn::Ia32SpecCtrl => ia32::wr_spec_ctrl,
        WrFn::Ia32PredCmd => ia32::wr_pred_cmd,
        WrFn::Ia32FlushCmd => ia32::wr_flush_cmd,
        WrFn::Amd64Efer => amd64::wr_efer,
        WrFn::IntelPkgCStConfigControl => intel::wr_pkg_cst_config_control,
        WrFn::AmdVmCr => amd::wr_vm_cr,
        WrFn::AmdVmHSavePa => amd::wr_vm_hsave_pa,
        WrFn::Gim => gim::wr_gim,
    }
}

#[derive(Clone, Copy)]
struct RdEntry {
    tag: RdFn,
    handler: RdmsrFn,
}

#[derive(Clone, Copy)]
struct WrEntry {
    tag: WrFn,
    handler: WrmsrFn,
}

/// Maps behavior tags to handler functions.
///
/// Entries are stored in tag order so lookup is a single index.
pub struct HandlerRegistry {
    rd: Box<[RdEntry]>,
    wr: Box<[WrEntry]>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        let rd = RdFn::iter()
            .map(|tag| RdEntry { tag, handler: rd_handler(tag) })
            .collect();
        let wr = WrFn::iter()
            .map(|tag| WrEntry { tag, handler: wr_handler(tag) })
            .collect();
        Self { rd, wr }
    }

    #[inline]
    pub fn rd(&self, tag: RdFn) -> RdmsrFn {
        let entry = &self.rd[tag as usize];
        debug_assert_eq!(entry.tag, tag);
        entry.handler
    }

    #[inline]
    pub fn wr(&self, tag: WrFn) -> WrmsrFn {
        let entry = &self.wr[tag as usize];
        debug_assert_eq!(entry.tag, tag);
        entry.handler
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns the index of `id` within a bank of `count` registers starting at
/// `base` and spaced `stride` apart.
pub(crate) fn index_in(
    id: MsrId,
    base: u32,
    stride: u32,
    count: usize,
) -> Option<usize> {
    let off = id.0.checked_sub(base)?;
    if off % stride != 0 {
        return None;
    }
    let idx = (off / stride) as usize;
    (idx < count).then_some(idx)
}

fn delegated_rd(res: DelegateResult<u64>) -> RdmsrOutcome {
    match res {
        Ok(v) => RdmsrOutcome::Handled(v),
        Err(DelegateError::Rejected) => RdmsrOutcome::GpException,
        Err(DelegateError::RetryInFullContext) => {
            RdmsrOutcome::RetryInFullContext
        }
    }
}

fn delegated_wr(res: DelegateResult<()>) -> WrmsrOutcome {
    match res {
        Ok(()) => WrmsrOutcome::Handled,
        Err(DelegateError::Rejected) => WrmsrOutcome::GpException,
        Err(DelegateError::RetryInFullContext) => {
            WrmsrOutcome::RetryInFullContext
        }
    }
}

fn handled_if(ok: bool) -> WrmsrOutcome {
    if ok {
        WrmsrOutcome::Handled
    } else {
        WrmsrOutcome::GpException
    }
}
