// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use msr_profile_config::CpuVendor;

use crate::bits::VMX_CAPABILITY_MSRS;
use crate::delegate::Services;
use crate::features::{GuestFeature, GuestFeatures};
use crate::state::VcpuMsrState;

/// Bus frequency assumed when the guest CPU profile does not specify one.
pub const DEFAULT_BUS_HZ: u64 = 100_000_000;

/// Static description of the CPU presented to the guest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuestCpuInfo {
    pub vendor: CpuVendor,
    pub family: u8,
    pub model: u8,
    pub stepping: u8,

    /// Number of vCPUs in the VM.
    pub cpu_count: u32,

    /// Width of guest physical addresses, in bits.
    pub max_phys_addr_width: u8,

    /// Scalable bus frequency in Hz, if the profile defines one.
    pub scalable_bus_hz: Option<u64>,

    pub var_mtrr_count: u8,
    pub mc_bank_count: u8,
    pub perf_counter_count: u8,
    pub microcode_rev: u32,

    /// Value reported through IA32_ARCH_CAPABILITIES.
    pub arch_capabilities: u64,

    /// Values reported through IA32_VMX_BASIC and the capability MSRs that
    /// follow it, indexed by MSR number less 0x480.
    pub vmx_caps: [u64; VMX_CAPABILITY_MSRS],

    /// Processor brand string, NUL padded.
    pub brand: [u8; 48],
}

impl GuestCpuInfo {
    pub fn new(vendor: CpuVendor) -> Self {
        let (family, model) = match vendor {
            CpuVendor::Intel => (6, 0x55),
            CpuVendor::Amd => (0x19, 0x01),
        };
        Self {
            vendor,
            family,
            model,
            stepping: 0,
            cpu_count: 1,
            max_phys_addr_width: 39,
            scalable_bus_hz: None,
            var_mtrr_count: 8,
            mc_bank_count: 4,
            perf_counter_count: 4,
            microcode_rev: 0,
            arch_capabilities: 0,
            vmx_caps: [0; VMX_CAPABILITY_MSRS],
            brand: [0; 48],
        }
    }

    /// Sets the brand string, truncating it to 47 bytes.
    pub fn with_brand(mut self, brand: &str) -> Self {
        self.brand = [0; 48];
        let len = brand.len().min(47);
        self.brand[..len].copy_from_slice(&brand.as_bytes()[..len]);
        self
    }

    pub fn bus_hz(&self) -> u64 {
        self.scalable_bus_hz.filter(|hz| *hz != 0).unwrap_or(DEFAULT_BUS_HZ)
    }

    /// The TSC frequency expressed as a multiple of the bus clock, rounded to
    /// the nearest integer.
    pub fn tsc_ratio(&self, tsc_hz: u64) -> u64 {
        let bus = self.bus_hz();
        (tsc_hz + bus / 2) / bus
    }

    /// The eight brand-string bytes reported by AMD CPU name MSR `n`.
    pub fn brand_chunk(&self, n: usize) -> u64 {
        let start = n * 8;
        match self.brand.get(start..start + 8) {
            Some(chunk) => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                u64::from_le_bytes(bytes)
            }
            None => 0,
        }
    }
}

/// Everything a handler may consult besides the calling vCPU's own state.
///
/// One environment is shared by every vCPU in a VM.
#[derive(Clone)]
pub struct MsrEnv {
    pub log: slog::Logger,
    pub info: GuestCpuInfo,
    pub features: Arc<dyn GuestFeatures>,
    pub services: Services,
}

impl MsrEnv {
    pub fn new(
        log: &slog::Logger,
        info: GuestCpuInfo,
        features: Arc<dyn GuestFeatures>,
        services: Services,
    ) -> Self {
        Self { log: log.clone(), info, features, services }
    }

    pub fn has(&self, feature: GuestFeature) -> bool {
        self.features.has(feature)
    }

    pub fn tsc_hz(&self) -> u64 {
        self.services.clock.frequency()
    }

    pub fn tsc_ratio(&self) -> u64 {
        self.info.tsc_ratio(self.tsc_hz())
    }

    /// The TSC value `state`'s vCPU currently observes.
    pub fn guest_tsc(&self, state: &VcpuMsrState) -> u64 {
        self.services.clock.now().wrapping_add(state.tsc_offset)
    }
}
