// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Base MSR tables for each supported CPU vendor.
//!
//! The tables describe a generic modern part of the given vendor. Counts of
//! banked registers (variable MTRRs, machine-check banks, performance
//! counters) come from the [`GuestCpuInfo`].

use msr_profile_config::CpuVendor;

use crate::bits::*;
use crate::guest::GuestCpuInfo;
use crate::handlers::{RdFn, WrFn};
use crate::range::MsrRange;
use crate::state::StateSlot;

const HIGH32: u64 = 0xffff_ffff_0000_0000;

/// Returns the last MSR of a bank of `count` registers of `stride` starting
/// at `base`, or `None` for an empty bank.
fn bank_last(base: u32, stride: u32, count: usize) -> Option<u32> {
    let count = u32::try_from(count).ok()?.checked_sub(1)?;
    base.checked_add(count * stride + stride - 1)
}

fn common(info: &GuestCpuInfo) -> Vec<MsrRange> {
    use MsrRange as R;

    let mut v = vec![
        R::fixed(MSR_P5_MC_ADDR, MSR_P5_MC_TYPE, "P5_MC_ADDR_TYPE", 0),
        R::single(
            MSR_IA32_TSC,
            "IA32_TIME_STAMP_COUNTER",
            RdFn::Ia32TimestampCounter,
            WrFn::Ia32TimestampCounter,
        ),
        R::single(
            MSR_IA32_APIC_BASE,
            "IA32_APIC_BASE",
            RdFn::Ia32ApicBase,
            WrFn::Ia32ApicBase,
        ),
        R::single(
            MSR_IA32_SPEC_CTRL,
            "IA32_SPEC_CTRL",
            RdFn::Ia32SpecCtrl,
            WrFn::Ia32SpecCtrl,
        ),
        R::single(
            MSR_IA32_PRED_CMD,
            "IA32_PRED_CMD",
            RdFn::WriteOnly,
            WrFn::Ia32PredCmd,
        ),
        R::single(
            MSR_IA32_BIOS_UPDT_TRIG,
            "IA32_BIOS_UPDT_TRIG",
            RdFn::WriteOnly,
            WrFn::IgnoreWrite,
        ),
        R::fixed(
            MSR_IA32_BIOS_SIGN_ID,
            MSR_IA32_BIOS_SIGN_ID,
            "IA32_BIOS_SIGN_ID",
            u64::from(info.microcode_rev) << 32,
        ),
        R::single(
            MSR_IA32_MPERF,
            "IA32_MPERF",
            RdFn::Ia32MPerf,
            WrFn::IgnoreWrite,
        ),
        R::single(
            MSR_IA32_APERF,
            "IA32_APERF",
            RdFn::Ia32APerf,
            WrFn::IgnoreWrite,
        ),
        R::single(
            MSR_IA32_MTRR_CAP,
            "IA32_MTRRCAP",
            RdFn::Ia32MtrrCap,
            WrFn::ReadOnly,
        ),
        R::single(
            MSR_IA32_ARCH_CAPABILITIES,
            "IA32_ARCH_CAPABILITIES",
            RdFn::Ia32ArchCapabilities,
            WrFn::ReadOnly,
        ),
        R::single(
            MSR_IA32_FLUSH_CMD,
            "IA32_FLUSH_CMD",
            RdFn::WriteOnly,
            WrFn::Ia32FlushCmd,
        ),
        R::field(
            MSR_IA32_SYSENTER_CS,
            "IA32_SYSENTER_CS",
            StateSlot::SysenterCs,
            WrFn::Field,
        )
        .with_gp(HIGH32),
        R::field(
            MSR_IA32_SYSENTER_ESP,
            "IA32_SYSENTER_ESP",
            StateSlot::SysenterEsp,
            WrFn::CanonicalField,
        ),
        R::field(
            MSR_IA32_SYSENTER_EIP,
            "IA32_SYSENTER_EIP",
            StateSlot::SysenterEip,
            WrFn::CanonicalField,
        ),
        R::single(
            MSR_IA32_MCG_CAP,
            "IA32_MCG_CAP",
            RdFn::Ia32McgCap,
            WrFn::ReadOnly,
        ),
        R::fixed(
            MSR_IA32_MCG_STATUS,
            MSR_IA32_MCG_STATUS,
            "IA32_MCG_STATUS",
            0,
        ),
        R::single(
            MSR_IA32_PERF_STATUS,
            "IA32_PERF_STATUS",
            RdFn::Ia32PerfStatus,
            WrFn::IgnoreWrite,
        ),
        R::fixed(MSR_IA32_DEBUGCTL, MSR_IA32_DEBUGCTL, "IA32_DEBUGCTL", 0),
        R::new(
            MSR_IA32_MTRR_FIX64K_00000,
            MSR_IA32_MTRR_FIX64K_00000,
            "IA32_MTRR_FIX64K_00000",
            RdFn::Field,
            WrFn::MemTypeField,
        )
        .with_field(StateSlot::MtrrFixed(0)),
        R::new(
            MSR_IA32_MTRR_FIX16K_80000,
            MSR_IA32_MTRR_FIX16K_A0000,
            "IA32_MTRR_FIX16K",
            RdFn::Field,
            WrFn::MemTypeField,
        )
        .with_field(StateSlot::MtrrFixed(1)),
        R::new(
            MSR_IA32_MTRR_FIX4K_C0000,
            MSR_IA32_MTRR_FIX4K_F8000,
            "IA32_MTRR_FIX4K",
            RdFn::Field,
            WrFn::MemTypeField,
        )
        .with_field(StateSlot::MtrrFixed(3)),
        R::single(MSR_IA32_PAT, "IA32_PAT", RdFn::Ia32Pat, WrFn::Ia32Pat),
        R::single(
            MSR_IA32_MTRR_DEF_TYPE,
            "IA32_MTRR_DEF_TYPE",
            RdFn::Ia32MtrrDefType,
            WrFn::Ia32MtrrDefType,
        )
        .with_gp(!MTRR_DEF_TYPE_VALID_MASK),
        R::new(
            MSR_IA32_X2APIC_START,
            MSR_IA32_X2APIC_END,
            "IA32_X2APIC",
            RdFn::Ia32X2ApicN,
            WrFn::Ia32X2ApicN,
        ),
        R::new(
            MSR_HYPERVISOR_START,
            MSR_HYPERVISOR_END,
            "HYPERVISOR",
            RdFn::Gim,
            WrFn::Gim,
        ),
        R::single(MSR_EFER, "AMD64_EFER", RdFn::Amd64Efer, WrFn::Amd64Efer),
        R::field(MSR_STAR, "AMD64_STAR", StateSlot::Star, WrFn::Field),
        R::field(
            MSR_LSTAR,
            "AMD64_STAR64",
            StateSlot::Lstar,
            WrFn::CanonicalField,
        ),
        R::field(
            MSR_CSTAR,
            "AMD64_STARCOMPAT",
            StateSlot::Cstar,
            WrFn::CanonicalField,
        ),
        R::field(
            MSR_SFMASK,
            "AMD64_SYSCALL_FLAG_MASK",
            StateSlot::Sfmask,
            WrFn::Field,
        )
        .with_gp(HIGH32),
        R::field(MSR_FS_BASE, "AMD64_FS_BASE", StateSlot::FsBase, WrFn::Field),
        R::field(MSR_GS_BASE, "AMD64_GS_BASE", StateSlot::GsBase, WrFn::Field),
        R::field(
            MSR_KERNEL_GS_BASE,
            "AMD64_KERNEL_GS_BASE",
            StateSlot::KernelGsBase,
            WrFn::Field,
        ),
        R::field(MSR_TSC_AUX, "AMD64_TSC_AUX", StateSlot::TscAux, WrFn::Field)
            .with_gp(HIGH32),
    ];

    let var_mtrrs = usize::from(info.var_mtrr_count).min(MAX_VARIABLE_MTRRS);
    if let Some(last) = bank_last(MSR_IA32_MTRR_PHYSBASE0, 2, var_mtrrs) {
        v.push(R::new(
            MSR_IA32_MTRR_PHYSBASE0,
            last,
            "IA32_MTRR_PHYS",
            RdFn::Ia32MtrrPhysN,
            WrFn::Ia32MtrrPhysN,
        ));
    }

    let banks = usize::from(info.mc_bank_count).min(MAX_MC_BANKS);
    if let Some(last) = bank_last(MSR_IA32_MC0_CTL, 4, banks) {
        v.push(R::new(
            MSR_IA32_MC0_CTL,
            last,
            "IA32_MCi_CTL_STATUS_ADDR_MISC",
            RdFn::Ia32McCtlStatusAddrMiscN,
            WrFn::Ia32McCtlStatusAddrMiscN,
        ));
    }

    v
}

fn intel(info: &GuestCpuInfo) -> Vec<MsrRange> {
    use MsrRange as R;

    let mut v = vec![
        R::fixed(
            MSR_IA32_PLATFORM_ID,
            MSR_IA32_PLATFORM_ID,
            "IA32_PLATFORM_ID",
            0,
        ),
        R::single(
            MSR_CORE_THREAD_COUNT,
            "MSR_CORE_THREAD_COUNT",
            RdFn::IntelCoreThreadCount,
            WrFn::ReadOnly,
        ),
        R::single(
            MSR_IA32_FEATURE_CONTROL,
            "IA32_FEATURE_CONTROL",
            RdFn::Ia32FeatureControl,
            WrFn::ReadOnly,
        ),
        R::single(
            MSR_PLATFORM_INFO,
            "MSR_PLATFORM_INFO",
            RdFn::IntelPlatformInfo,
            WrFn::ReadOnly,
        ),
        R::single(
            MSR_PKG_CST_CONFIG_CONTROL,
            "MSR_PKG_CST_CONFIG_CONTROL",
            RdFn::IntelPkgCStConfigControl,
            WrFn::IntelPkgCStConfigControl,
        ),
        R::single(
            MSR_FLEX_RATIO,
            "MSR_FLEX_RATIO",
            RdFn::IntelFlexRatio,
            WrFn::IgnoreWrite,
        ),
        R::fixed(MSR_IA32_PERF_CTL, MSR_IA32_PERF_CTL, "IA32_PERF_CTL", 0),
        R::single(
            MSR_IA32_MISC_ENABLE,
            "IA32_MISC_ENABLE",
            RdFn::Ia32MiscEnable,
            WrFn::Ia32MiscEnable,
        )
        .with_ign(
            (MiscEnable::PERF_MON
                | MiscEnable::BTS_UNAVAIL
                | MiscEnable::PEBS_UNAVAIL)
                .bits(),
        ),
        R::fixed(
            MSR_TEMPERATURE_TARGET,
            MSR_TEMPERATURE_TARGET,
            "MSR_TEMPERATURE_TARGET",
            100 << 16,
        ),
        R::fixed(MSR_IA32_MCG_CTL, MSR_IA32_MCG_CTL, "IA32_MCG_CTL", 0),
        R::new(
            MSR_IA32_VMX_BASIC,
            MSR_IA32_VMX_VMFUNC,
            "IA32_VMX_CAPABILITIES",
            RdFn::Ia32VmxCapability,
            WrFn::ReadOnly,
        ),
    ];

    let counters = usize::from(info.perf_counter_count).min(MAX_PERF_COUNTERS);
    if let Some(last) = bank_last(MSR_IA32_PMC0, 1, counters) {
        v.push(R::new(
            MSR_IA32_PMC0,
            last,
            "IA32_PMC",
            RdFn::Ia32PmcN,
            WrFn::Ia32PmcN,
        ));
    }
    if let Some(last) = bank_last(MSR_IA32_PERFEVTSEL0, 1, counters) {
        v.push(R::new(
            MSR_IA32_PERFEVTSEL0,
            last,
            "IA32_PERFEVTSEL",
            RdFn::Ia32PerfEvtSelN,
            WrFn::Ia32PerfEvtSelN,
        ));
    }

    v
}

/// Names of the legacy performance registers, which alias into the core
/// performance register file.
const AMD_LEGACY_PERF: [(&str, &str); AMD_LEGACY_PERF_COUNTERS as usize] = [
    ("AMD_K8_PERF_CTL_0", "AMD_K8_PERF_CTR_0"),
    ("AMD_K8_PERF_CTL_1", "AMD_K8_PERF_CTR_1"),
    ("AMD_K8_PERF_CTL_2", "AMD_K8_PERF_CTR_2"),
    ("AMD_K8_PERF_CTL_3", "AMD_K8_PERF_CTR_3"),
];

fn amd(_info: &GuestCpuInfo) -> Vec<MsrRange> {
    use MsrRange as R;

    let core_perf_last =
        MSR_AMD_CORE_PERF_CTL0 + 2 * AMD_CORE_PERF_COUNTERS as u32 - 1;

    let mut v = vec![
        R::new(
            MSR_AMD_CORE_PERF_CTL0,
            core_perf_last,
            "AMD_FAM15H_PERF_CTL_CTR",
            RdFn::AmdCorePerfN,
            WrFn::AmdCorePerfN,
        ),
        R::fixed(MSR_AMD_SYSCFG, MSR_AMD_SYSCFG, "AMD_K8_SYS_CFG", 0),
        R::fixed(MSR_AMD_HWCR, MSR_AMD_HWCR, "AMD_K8_HW_CFG", 0),
        R::fixed(MSR_AMD_TOP_MEM, MSR_AMD_TOP_MEM, "AMD_K8_TOP_MEM", 0),
        R::fixed(MSR_AMD_TOP_MEM2, MSR_AMD_TOP_MEM2, "AMD_K8_TOP_MEM2", 0),
        R::new(
            MSR_AMD_CPU_NAME0,
            MSR_AMD_CPU_NAME5,
            "AMD_K8_CPU_NAME",
            RdFn::AmdCpuNameN,
            WrFn::IgnoreWrite,
        ),
        // P0 is the only enabled P-state.
        R::fixed(MSR_AMD_PSTATE0, MSR_AMD_PSTATE0, "AMD_10H_P_ST_0", 1 << 63),
        R::fixed(MSR_AMD_PSTATE0 + 1, MSR_AMD_PSTATE7, "AMD_10H_P_ST_N", 0),
        R::single(
            MSR_AMD_TSC_RATE,
            "AMD_FAM15H_TSC_RATE",
            RdFn::AmdFam15hTscRate,
            WrFn::IgnoreWrite,
        ),
        R::single(MSR_AMD_VM_CR, "AMD_K8_VM_CR", RdFn::AmdVmCr, WrFn::AmdVmCr),
        R::fixed(MSR_AMD_IGNNE, MSR_AMD_IGNNE, "AMD_K8_IGNNE", 0),
        R::single(
            MSR_AMD_VM_HSAVE_PA,
            "AMD_K8_VM_HSAVE_PA",
            RdFn::AmdVmHSavePa,
            WrFn::AmdVmHSavePa,
        ),
    ];

    for (n, (ctl, ctr)) in AMD_LEGACY_PERF.iter().enumerate() {
        let n = n as u32;
        let target = MSR_AMD_CORE_PERF_CTL0 + 2 * n;
        v.push(R::alias(
            MSR_AMD_PERF_CTL0 + n,
            MSR_AMD_PERF_CTL0 + n,
            *ctl,
            target,
        ));
        v.push(R::alias(
            MSR_AMD_PERF_CTR0 + n,
            MSR_AMD_PERF_CTR0 + n,
            *ctr,
            target + 1,
        ));
    }

    v
}

/// The base ranges for a guest CPU described by `info`.
pub fn base_ranges(info: &GuestCpuInfo) -> Vec<MsrRange> {
    let mut ranges = common(info);
    match info.vendor {
        CpuVendor::Intel => ranges.extend(intel(info)),
        CpuVendor::Amd => ranges.extend(amd(info)),
    }
    ranges
}
