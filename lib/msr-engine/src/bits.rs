// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Architectural MSR numbers and bit definitions.
//!
//! Names follow the Intel SDM (volume 4) and the AMD APM (volume 2) where the
//! register is documented there.

//
// Architectural (IA32) and Intel MSRs
//

pub const MSR_P5_MC_ADDR: u32 = 0x0;
pub const MSR_P5_MC_TYPE: u32 = 0x1;
pub const MSR_IA32_TSC: u32 = 0x10;
pub const MSR_IA32_PLATFORM_ID: u32 = 0x17;
pub const MSR_IA32_APIC_BASE: u32 = 0x1b;
pub const MSR_CORE_THREAD_COUNT: u32 = 0x35;
pub const MSR_IA32_FEATURE_CONTROL: u32 = 0x3a;
pub const MSR_IA32_SPEC_CTRL: u32 = 0x48;
pub const MSR_IA32_PRED_CMD: u32 = 0x49;
pub const MSR_IA32_BIOS_UPDT_TRIG: u32 = 0x79;
pub const MSR_IA32_BIOS_SIGN_ID: u32 = 0x8b;
pub const MSR_IA32_PMC0: u32 = 0xc1;
pub const MSR_PLATFORM_INFO: u32 = 0xce;
pub const MSR_PKG_CST_CONFIG_CONTROL: u32 = 0xe2;
pub const MSR_IA32_MPERF: u32 = 0xe7;
pub const MSR_IA32_APERF: u32 = 0xe8;
pub const MSR_IA32_MTRR_CAP: u32 = 0xfe;
pub const MSR_IA32_ARCH_CAPABILITIES: u32 = 0x10a;
pub const MSR_IA32_FLUSH_CMD: u32 = 0x10b;
pub const MSR_IA32_SYSENTER_CS: u32 = 0x174;
pub const MSR_IA32_SYSENTER_ESP: u32 = 0x175;
pub const MSR_IA32_SYSENTER_EIP: u32 = 0x176;
pub const MSR_IA32_MCG_CAP: u32 = 0x179;
pub const MSR_IA32_MCG_STATUS: u32 = 0x17a;
pub const MSR_IA32_MCG_CTL: u32 = 0x17b;
pub const MSR_IA32_PERFEVTSEL0: u32 = 0x186;
pub const MSR_FLEX_RATIO: u32 = 0x194;
pub const MSR_IA32_PERF_STATUS: u32 = 0x198;
pub const MSR_IA32_PERF_CTL: u32 = 0x199;
pub const MSR_IA32_MISC_ENABLE: u32 = 0x1a0;
pub const MSR_TEMPERATURE_TARGET: u32 = 0x1a2;
pub const MSR_IA32_DEBUGCTL: u32 = 0x1d9;
pub const MSR_IA32_MTRR_PHYSBASE0: u32 = 0x200;
pub const MSR_IA32_MTRR_FIX64K_00000: u32 = 0x250;
pub const MSR_IA32_MTRR_FIX16K_80000: u32 = 0x258;
pub const MSR_IA32_MTRR_FIX16K_A0000: u32 = 0x259;
pub const MSR_IA32_MTRR_FIX4K_C0000: u32 = 0x268;
pub const MSR_IA32_MTRR_FIX4K_F8000: u32 = 0x26f;
pub const MSR_IA32_PAT: u32 = 0x277;
pub const MSR_IA32_MTRR_DEF_TYPE: u32 = 0x2ff;
pub const MSR_IA32_MC0_CTL: u32 = 0x400;
pub const MSR_IA32_VMX_BASIC: u32 = 0x480;
pub const MSR_IA32_VMX_VMFUNC: u32 = 0x491;
pub const MSR_IA32_TSC_DEADLINE: u32 = 0x6e0;
pub const MSR_IA32_X2APIC_START: u32 = 0x800;
pub const MSR_IA32_X2APIC_END: u32 = 0x8ff;

/// The MSR range reserved for hypervisor-defined (paravirtual) registers.
pub const MSR_HYPERVISOR_START: u32 = 0x4000_0000;
pub const MSR_HYPERVISOR_END: u32 = 0x4000_00ff;

//
// AMD64 architectural MSRs
//

pub const MSR_EFER: u32 = 0xc000_0080;
pub const MSR_STAR: u32 = 0xc000_0081;
pub const MSR_LSTAR: u32 = 0xc000_0082;
pub const MSR_CSTAR: u32 = 0xc000_0083;
pub const MSR_SFMASK: u32 = 0xc000_0084;
pub const MSR_FS_BASE: u32 = 0xc000_0100;
pub const MSR_GS_BASE: u32 = 0xc000_0101;
pub const MSR_KERNEL_GS_BASE: u32 = 0xc000_0102;
pub const MSR_TSC_AUX: u32 = 0xc000_0103;

//
// AMD implementation-specific MSRs
//

pub const MSR_AMD_PERF_CTL0: u32 = 0xc001_0000;
pub const MSR_AMD_PERF_CTR0: u32 = 0xc001_0004;
pub const MSR_AMD_SYSCFG: u32 = 0xc001_0010;
pub const MSR_AMD_HWCR: u32 = 0xc001_0015;
pub const MSR_AMD_TOP_MEM: u32 = 0xc001_001a;
pub const MSR_AMD_TOP_MEM2: u32 = 0xc001_001d;
pub const MSR_AMD_CPU_NAME0: u32 = 0xc001_0030;
pub const MSR_AMD_CPU_NAME5: u32 = 0xc001_0035;
pub const MSR_AMD_PSTATE0: u32 = 0xc001_0064;
pub const MSR_AMD_PSTATE7: u32 = 0xc001_006b;
pub const MSR_AMD_TSC_RATE: u32 = 0xc001_0104;
pub const MSR_AMD_VM_CR: u32 = 0xc001_0114;
pub const MSR_AMD_IGNNE: u32 = 0xc001_0115;
pub const MSR_AMD_VM_HSAVE_PA: u32 = 0xc001_0117;
pub const MSR_AMD_CORE_PERF_CTL0: u32 = 0xc001_0200;

/// Number of legacy AMD performance counters (PERF_CTL0-3/PERF_CTR0-3).
pub const AMD_LEGACY_PERF_COUNTERS: u32 = 4;

/// Number of extended AMD core performance counters.
pub const AMD_CORE_PERF_COUNTERS: usize = 6;

/// Number of fixed-range MTRRs.
pub const FIXED_MTRR_COUNT: usize = 11;

/// Upper bound on the number of variable-range MTRR pairs a guest may see.
pub const MAX_VARIABLE_MTRRS: usize = 16;

/// Upper bound on the number of general-purpose performance counters.
pub const MAX_PERF_COUNTERS: usize = 8;

/// Upper bound on the number of machine-check banks.
pub const MAX_MC_BANKS: usize = 32;

/// Number of VMX capability MSRs (IA32_VMX_BASIC through IA32_VMX_VMFUNC).
pub const VMX_CAPABILITY_MSRS: usize =
    (MSR_IA32_VMX_VMFUNC - MSR_IA32_VMX_BASIC + 1) as usize;

/// Reset value of IA32_PAT.
pub const PAT_RESET_VALUE: u64 = 0x0007_0406_0007_0406;

/// Reset value of the AMD TSC ratio MSR: a ratio of 1.0 in 8.32 fixed point.
pub const AMD_TSC_RATE_RESET_VALUE: u64 = 1 << 32;

/// Write-protect (lock) bit of MSR_PKG_CST_CONFIG_CONTROL.
pub const PKG_CST_CONFIG_LOCK: u64 = 1 << 15;

/// CR0.PG
pub const CR0_PG: u64 = 1 << 31;

/// Mask of the memory type field in MTRR base and default-type registers.
pub const MTRR_TYPE_MASK: u64 = 0xff;

/// Bits of IA32_MTRR_DEF_TYPE the guest may write: type, FE and E.
pub const MTRR_DEF_TYPE_VALID_MASK: u64 = 0xcff;

bitflags! {
    /// Extended Feature Enable Register (MSR C000_0080h).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct Efer: u64 {
        const SCE = 1 << 0;
        const LME = 1 << 8;
        const LMA = 1 << 10;
        const NXE = 1 << 11;
        const SVME = 1 << 12;
        const LMSLE = 1 << 13;
        const FFXSR = 1 << 14;
    }
}

bitflags! {
    /// IA32_MISC_ENABLE. Only the bits this crate refers to are enumerated.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MiscEnable: u64 {
        const FAST_STRINGS = 1 << 0;
        const TCC = 1 << 3;
        const PERF_MON = 1 << 7;
        const BTS_UNAVAIL = 1 << 11;
        const PEBS_UNAVAIL = 1 << 12;
        const ENHANCED_SPEEDSTEP = 1 << 16;
        const MONITOR = 1 << 18;
        const LIMIT_CPUID = 1 << 22;
        const XTPR_DISABLE = 1 << 23;
        const XD_DISABLE = 1 << 34;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FeatureControl: u64 {
        const LOCK = 1 << 0;
        const VMXON_IN_SMX = 1 << 1;
        const VMXON = 1 << 2;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SpecCtrl: u64 {
        const IBRS = 1 << 0;
        const STIBP = 1 << 1;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FlushCmd: u64 {
        const L1D = 1 << 0;
    }
}

bitflags! {
    /// AMD VM_CR (MSR C001_0114h).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct VmCr: u64 {
        const DPD = 1 << 0;
        const R_INIT = 1 << 1;
        const DIS_A20M = 1 << 2;
        const LOCK = 1 << 3;
        const SVMDIS = 1 << 4;
    }
}

bitflags! {
    /// Capability bits of IA32_MTRRCAP. The variable range count lives in
    /// bits 7:0.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MtrrCap: u64 {
        const FIX = 1 << 8;
        const WC = 1 << 10;
        const SMRR = 1 << 11;
    }
}
