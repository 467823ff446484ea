// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Whole-engine tests: tables, dispatch, handlers and delegates together.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use proptest::prelude::*;
use slog::Drain;

use crate::bits::*;
use crate::delegate::{
    ApicMsrs, Clock, DelegateError, DelegateResult, Services, VirtApicAccess,
    VirtApicOutcome,
};
use crate::features::FeatureSet;
use crate::guest::{GuestCpuInfo, MsrEnv};
use crate::handlers::{RdFn, WrFn};
use crate::paravirt::hyperv::{self, HyperV};
use crate::profile::build_table;
use crate::range::{MsrRange, MsrRangeTable};
use crate::state::{NestedMode, StateSlot, VcpuId, VcpuMsrState};
use crate::{
    CpuVendor, DispatchResult, MsrEngine, MsrId, RdmsrOutcome, WrmsrOutcome,
};

pub fn build_log() -> slog::Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

const TSC_HZ: u64 = 2_000_000_000;

struct FixedClock(AtomicU64);

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
    fn frequency(&self) -> u64 {
        TSC_HZ
    }
}

const ICR: u32 = 0x830;
const TPR: u32 = 0x808;

/// An APIC whose registers read back their own MSR number, and whose ICR
/// can only be written from a full context.
#[derive(Default)]
struct FakeApic {
    base: AtomicU64,
}

impl ApicMsrs for FakeApic {
    fn read_base(&self, _vcpu: VcpuId) -> DelegateResult<u64> {
        Ok(self.base.load(Ordering::Relaxed))
    }
    fn write_base(&self, _vcpu: VcpuId, value: u64) -> DelegateResult<()> {
        self.base.store(value, Ordering::Relaxed);
        Ok(())
    }
    fn read(&self, _vcpu: VcpuId, msr: MsrId) -> DelegateResult<u64> {
        Ok(u64::from(msr.0))
    }
    fn write(
        &self,
        _vcpu: VcpuId,
        msr: MsrId,
        _value: u64,
    ) -> DelegateResult<()> {
        match msr.0 {
            ICR => Err(DelegateError::RetryInFullContext),
            _ => Ok(()),
        }
    }
}

/// A virtual APIC exposing only the TPR.
struct FakeVirtApic;

impl VirtApicAccess for FakeVirtApic {
    fn read(&self, _vcpu: VcpuId, msr: MsrId) -> VirtApicOutcome<u64> {
        match msr.0 {
            TPR => VirtApicOutcome::Emulated(0x20),
            _ => VirtApicOutcome::OutOfRange,
        }
    }
    fn write(
        &self,
        _vcpu: VcpuId,
        msr: MsrId,
        _value: u64,
    ) -> VirtApicOutcome<()> {
        match msr.0 {
            TPR => VirtApicOutcome::Emulated(()),
            _ => VirtApicOutcome::OutOfRange,
        }
    }
}

fn services(log: &slog::Logger) -> Services {
    let clock: Arc<dyn Clock> = Arc::new(FixedClock(AtomicU64::new(TSC_HZ)));
    let hv = HyperV::new(
        log,
        hyperv::Features { reference_tsc: true },
        clock.clone(),
    );
    Services {
        apic: Arc::new(FakeApic::default()),
        virt_apic: Arc::new(FakeVirtApic),
        paravirt: Arc::new(hv),
        clock,
    }
}

fn env(log: &slog::Logger, vendor: CpuVendor, features: FeatureSet) -> MsrEnv {
    MsrEnv::new(
        log,
        GuestCpuInfo::new(vendor),
        Arc::new(features),
        services(log),
    )
}

fn engine(vendor: CpuVendor, features: FeatureSet) -> MsrEngine {
    let log = build_log();
    let env = env(&log, vendor, features);
    let table = build_table(&log, &env.info, None).unwrap();
    MsrEngine::new(&log, table, env)
}

fn engine_with(ranges: Vec<MsrRange>) -> MsrEngine {
    let log = build_log();
    let mut b = MsrRangeTable::builder();
    b.extend(ranges);
    MsrEngine::new(
        &log,
        b.build().unwrap(),
        env(&log, CpuVendor::Intel, FeatureSet::all()),
    )
}

fn vcpu() -> VcpuMsrState {
    VcpuMsrState::new(VcpuId(0))
}

#[test]
fn fs_base_write_reads_back() {
    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    let mut st = vcpu();

    assert_eq!(
        eng.set(&mut st, MsrId(MSR_FS_BASE), 0x1000),
        WrmsrOutcome::Handled
    );
    assert_eq!(
        eng.query(&st, MsrId(MSR_FS_BASE)),
        RdmsrOutcome::Handled(0x1000)
    );
    assert_eq!(st.fs_base, 0x1000);
}

#[test]
fn non_canonical_cstar_faults_without_effect() {
    let eng = engine(CpuVendor::Amd, FeatureSet::all());
    let mut st = vcpu();
    st.cstar = 0xffff_8000_0000_1000;
    let before = st.clone();

    let out = eng.set(&mut st, MsrId(MSR_CSTAR), 0x8000_0000_0000_0000);
    assert_eq!(out.result(), DispatchResult::GpException);
    assert_eq!(st, before);

    let rs = eng.range_stats(MsrId(MSR_CSTAR)).unwrap();
    assert_eq!((rs.writes, rs.gps), (1, 1));
}

#[test]
fn unknown_msr_faults_both_ways() {
    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    let mut st = vcpu();
    let before = st.clone();

    assert_eq!(
        eng.query(&st, MsrId(0xdead_beef)).into_parts(),
        (DispatchResult::GpException, 0)
    );
    assert_eq!(
        eng.set(&mut st, MsrId(0xdead_beef), 1),
        WrmsrOutcome::GpException
    );
    assert_eq!(st, before);

    let stats = eng.stats();
    assert_eq!((stats.reads, stats.reads_unknown), (1, 1));
    assert_eq!((stats.writes, stats.writes_unknown), (1, 1));
    assert_eq!(stats.reads_raise_gp, 0);
    assert_eq!(stats.writes_raise_gp, 0);
}

#[test]
fn absent_feature_reads_zero_and_rejects_writes() {
    let eng =
        engine(CpuVendor::Intel, FeatureSet::all() - FeatureSet::SPEC_CTRL);
    let mut st = vcpu();

    assert_eq!(
        eng.query(&st, MsrId(MSR_IA32_SPEC_CTRL)),
        RdmsrOutcome::Handled(0)
    );
    assert_eq!(
        eng.set(&mut st, MsrId(MSR_IA32_SPEC_CTRL), SpecCtrl::IBRS.bits()),
        WrmsrOutcome::GpException
    );
    assert_eq!(st.spec_ctrl, 0);

    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    assert_eq!(
        eng.set(&mut st, MsrId(MSR_IA32_SPEC_CTRL), SpecCtrl::IBRS.bits()),
        WrmsrOutcome::Handled
    );
    assert_eq!(
        eng.query(&st, MsrId(MSR_IA32_SPEC_CTRL)),
        RdmsrOutcome::Handled(SpecCtrl::IBRS.bits())
    );
}

#[test]
fn alias_is_transparent() {
    let eng = engine_with(vec![
        MsrRange::new(0x1000, 0x1001, "PAIR", RdFn::Field, WrFn::Field)
            .with_field(StateSlot::MtrrFixed(0)),
        MsrRange::alias(0x2000, 0x2001, "PAIR_ALIAS", 0x1000),
    ]);
    let mut st = vcpu();

    assert_eq!(eng.set(&mut st, MsrId(0x2001), 0xabcd), WrmsrOutcome::Handled);
    assert_eq!(st.mtrr_fixed[1], 0xabcd);
    assert_eq!(eng.query(&st, MsrId(0x1001)), RdmsrOutcome::Handled(0xabcd));
    assert_eq!(eng.query(&st, MsrId(0x2001)), RdmsrOutcome::Handled(0xabcd));

    eng.set(&mut st, MsrId(0x1000), 0x55);
    assert_eq!(eng.query(&st, MsrId(0x2000)), eng.query(&st, MsrId(0x1000)));

    // The target counts every access, the alias only its own.
    let target = eng.range_stats(MsrId(0x1000)).unwrap();
    assert_eq!((target.reads, target.writes), (4, 2));
    let alias = eng.range_stats(MsrId(0x2001)).unwrap();
    assert_eq!((alias.reads, alias.writes), (2, 1));
}

#[test]
fn alias_faults_count_against_both_ranges() {
    let eng = engine_with(vec![
        MsrRange::field(0x1000, "TARGET", StateSlot::Star, WrFn::Field)
            .with_gp(1 << 63),
        MsrRange::alias(0x2000, 0x2000, "ALIAS", 0x1000),
    ]);
    let mut st = vcpu();

    assert_eq!(
        eng.set(&mut st, MsrId(0x2000), 1 << 63),
        WrmsrOutcome::GpException
    );
    assert_eq!(eng.set(&mut st, MsrId(0x1000), 1), WrmsrOutcome::Handled);

    let target = eng.range_stats(MsrId(0x1000)).unwrap();
    assert_eq!((target.writes, target.gps), (2, 1));
    let alias = eng.range_stats(MsrId(0x2000)).unwrap();
    assert_eq!((alias.reads, alias.writes, alias.gps), (0, 1, 1));
}

#[test]
fn amd_legacy_counters_share_core_counters() {
    let eng = engine(CpuVendor::Amd, FeatureSet::all());
    let mut st = vcpu();

    assert_eq!(
        eng.set(&mut st, MsrId(MSR_AMD_PERF_CTR0 + 2), 77),
        WrmsrOutcome::Handled
    );
    assert_eq!(
        eng.query(&st, MsrId(MSR_AMD_CORE_PERF_CTL0 + 5)),
        RdmsrOutcome::Handled(77)
    );
}

#[test]
fn fixed_value_is_stable() {
    let eng = engine_with(vec![MsrRange::fixed(
        0x3000,
        0x3003,
        "FIXED",
        0x1234_5678,
    )]);
    let mut st = vcpu();
    let before = st.clone();

    for id in 0x3000..=0x3003 {
        assert_eq!(
            eng.query(&st, MsrId(id)),
            RdmsrOutcome::Handled(0x1234_5678)
        );
        assert_eq!(eng.set(&mut st, MsrId(id), !0), WrmsrOutcome::Handled);
        assert_eq!(
            eng.query(&st, MsrId(id)),
            RdmsrOutcome::Handled(0x1234_5678)
        );
    }
    assert_eq!(st, before);
}

#[test]
fn canonical_fields_reject_non_canonical_addresses() {
    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    let mut st = vcpu();

    for msr in
        [MSR_LSTAR, MSR_CSTAR, MSR_IA32_SYSENTER_ESP, MSR_IA32_SYSENTER_EIP]
    {
        assert_eq!(
            eng.set(&mut st, MsrId(msr), 0xffff_8000_0000_0000),
            WrmsrOutcome::Handled
        );
        assert_eq!(
            eng.set(&mut st, MsrId(msr), 0x0000_8000_0000_0000),
            WrmsrOutcome::GpException
        );
        assert_eq!(
            eng.query(&st, MsrId(msr)),
            RdmsrOutcome::Handled(0xffff_8000_0000_0000)
        );
    }
}

#[test]
fn sysenter_cs_rejects_high_bits() {
    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    let mut st = vcpu();

    assert_eq!(
        eng.set(&mut st, MsrId(MSR_IA32_SYSENTER_CS), 0x10),
        WrmsrOutcome::Handled
    );
    assert_eq!(
        eng.set(&mut st, MsrId(MSR_IA32_SYSENTER_CS), 1 << 32),
        WrmsrOutcome::GpException
    );
    assert_eq!(st.sysenter_cs, 0x10);
    assert_eq!(eng.stats().writes_raise_gp, 1);
}

#[test]
fn x2apic_goes_through_virtual_apic_when_nested() {
    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    let mut st = vcpu();

    assert_eq!(
        eng.query(&st, MsrId(TPR)),
        RdmsrOutcome::Handled(u64::from(TPR))
    );

    st.nested = NestedMode::VmxNonRoot { virt_x2apic_mode: true };
    assert_eq!(eng.query(&st, MsrId(TPR)), RdmsrOutcome::Handled(0x20));
    assert_eq!(eng.query(&st, MsrId(0x80f)), RdmsrOutcome::GpException);
    assert_eq!(eng.set(&mut st, MsrId(TPR), 0x30), WrmsrOutcome::Handled);

    st.nested = NestedMode::VmxNonRoot { virt_x2apic_mode: false };
    assert_eq!(eng.query(&st, MsrId(0x80f)), RdmsrOutcome::Handled(0x80f));
}

#[test]
fn retry_leaves_no_trace_but_range_counts() {
    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    let mut st = vcpu();
    let before = st.clone();

    let out = eng.set(&mut st, MsrId(ICR), 0x4000);
    assert_eq!(out.result(), DispatchResult::RetryInFullContext);
    assert_eq!(st, before);

    let stats = eng.stats();
    assert_eq!((stats.writes, stats.writes_raise_gp), (1, 0));
    let rs = eng.range_stats(MsrId(ICR)).unwrap();
    assert_eq!((rs.writes, rs.gps), (1, 0));
}

#[test]
fn hyperv_msrs_reach_the_paravirt_interface() {
    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    let mut st = VcpuMsrState::new(VcpuId(3));

    assert_eq!(
        eng.query(&st, MsrId(hyperv::HV_X64_MSR_VP_INDEX)),
        RdmsrOutcome::Handled(3)
    );
    assert_eq!(
        eng.set(&mut st, MsrId(hyperv::HV_X64_MSR_GUEST_OS_ID), 0x8100),
        WrmsrOutcome::Handled
    );
    assert_eq!(
        eng.query(&st, MsrId(hyperv::HV_X64_MSR_GUEST_OS_ID)),
        RdmsrOutcome::Handled(0x8100)
    );
    // One second of guest time in 100 ns units.
    assert_eq!(
        eng.query(&st, MsrId(hyperv::HV_X64_MSR_TIME_REF_COUNT)),
        RdmsrOutcome::Handled(10_000_000)
    );
    assert_eq!(
        eng.set(&mut st, MsrId(hyperv::HV_X64_MSR_VP_INDEX), 1),
        WrmsrOutcome::GpException
    );

    st.nested = NestedMode::SvmGuest;
    assert_eq!(
        eng.query(&st, MsrId(hyperv::HV_X64_MSR_VP_INDEX)),
        RdmsrOutcome::GpException
    );
}

#[test]
fn stats_count_every_access() {
    let eng = engine(CpuVendor::Intel, FeatureSet::all());
    let mut st = vcpu();

    eng.query(&st, MsrId(MSR_STAR));
    eng.set(&mut st, MsrId(MSR_STAR), 1);
    eng.set(&mut st, MsrId(MSR_SFMASK), 1 << 40);
    eng.query(&st, MsrId(0x1234_5678));

    let stats = eng.stats();
    assert_eq!(stats.reads, 2);
    assert_eq!(stats.reads_unknown, 1);
    assert_eq!(stats.writes, 2);
    assert_eq!(stats.writes_raise_gp, 1);
    assert_eq!(stats.writes_to_ignored_bits, 0);

    let rs = eng.range_stats(MsrId(MSR_STAR)).unwrap();
    assert_eq!((rs.reads, rs.writes, rs.gps), (1, 1, 0));
}

const MASKED: u32 = 0x5000;
const GP_MASK: u64 = 0xff00_0000_0000_0000;
const IGN_MASK: u64 = 0x0000_0000_0000_ff00;

fn masked_engine() -> MsrEngine {
    engine_with(vec![MsrRange::field(
        MASKED,
        "MASKED",
        StateSlot::Star,
        WrFn::Field,
    )
    .with_gp(GP_MASK)
    .with_ign(IGN_MASK)])
}

proptest! {
    #[test]
    fn gp_mask_faults_before_any_effect(raw in any::<u64>()) {
        let eng = masked_engine();
        let mut st = vcpu();
        st.star = 0x77;
        let before = st.clone();

        let out = eng.set(&mut st, MsrId(MASKED), raw);
        if raw & GP_MASK != 0 {
            prop_assert_eq!(out, WrmsrOutcome::GpException);
            prop_assert_eq!(&st, &before);
            prop_assert_eq!(eng.stats().writes_to_ignored_bits, 0);
        } else {
            prop_assert_eq!(out, WrmsrOutcome::Handled);
            prop_assert_eq!(st.star, raw & !IGN_MASK);
        }
    }

    #[test]
    fn ignored_bits_do_not_matter(raw in any::<u64>()) {
        let raw = raw & !GP_MASK;
        let eng = masked_engine();

        let mut a = vcpu();
        let mut b = vcpu();
        prop_assert_eq!(
            eng.set(&mut a, MsrId(MASKED), raw),
            WrmsrOutcome::Handled
        );
        prop_assert_eq!(
            eng.set(&mut b, MsrId(MASKED), raw & !IGN_MASK),
            WrmsrOutcome::Handled
        );
        prop_assert_eq!(&a, &b);

        let counted = u64::from(raw & IGN_MASK != 0);
        prop_assert_eq!(eng.stats().writes_to_ignored_bits, counted);
    }

    #[test]
    fn unmapped_ids_always_fault(id in any::<u32>()) {
        let eng = engine(CpuVendor::Amd, FeatureSet::all());
        prop_assume!(eng.table().lookup(MsrId(id)).is_none());
        let mut st = vcpu();
        prop_assert_eq!(eng.query(&st, MsrId(id)), RdmsrOutcome::GpException);
        prop_assert_eq!(
            eng.set(&mut st, MsrId(id), 0),
            WrmsrOutcome::GpException
        );
    }
}

fn base_engines() -> [MsrEngine; 2] {
    [
        engine(CpuVendor::Intel, FeatureSet::all()),
        engine(CpuVendor::Amd, FeatureSet::all()),
    ]
}

/// Non-alias ranges of `eng` matching `pick`.
fn base_ranges_where(
    eng: &MsrEngine,
    pick: impl Fn(&MsrRange) -> bool,
) -> Vec<MsrRange> {
    eng.table()
        .ranges()
        .iter()
        .filter(|r| !r.is_alias() && pick(r))
        .cloned()
        .collect()
}

/// `raw` with at least one bit of `mask` set, chosen by `bit` when it falls
/// inside the mask.
fn touching(mask: u64, raw: u64, bit: u32) -> u64 {
    let pick = mask & (1 << bit);
    raw | if pick != 0 { pick } else { mask & mask.wrapping_neg() }
}

#[test]
fn base_tables_carry_masked_ranges() {
    let [intel, amd] = base_engines();
    let ids = |eng: &MsrEngine, pick: fn(&MsrRange) -> bool| {
        base_ranges_where(eng, pick)
            .iter()
            .map(|r| r.first)
            .collect::<Vec<_>>()
    };

    for eng in [&intel, &amd] {
        let gp = ids(eng, |r| r.wr_gp_mask != 0);
        for msr in [
            MSR_IA32_SYSENTER_CS,
            MSR_IA32_MTRR_DEF_TYPE,
            MSR_SFMASK,
            MSR_TSC_AUX,
        ] {
            assert!(gp.contains(&msr), "{msr:#x}");
        }
    }
    assert!(
        ids(&intel, |r| r.wr_ign_mask != 0).contains(&MSR_IA32_MISC_ENABLE)
    );
}

proptest! {
    #[test]
    fn base_gp_masks_fault_before_any_effect(
        raw in any::<u64>(),
        bit in 0u32..64,
    ) {
        for eng in base_engines() {
            for r in base_ranges_where(&eng, |r| r.wr_gp_mask != 0) {
                let value = touching(r.wr_gp_mask, raw, bit);
                for id in r.first..=r.last {
                    let mut st = vcpu();
                    st.sysenter_cs = 0x10;
                    st.mtrr_def_type = 0x806;
                    let before = st.clone();

                    let out = eng.set(&mut st, MsrId(id), value);
                    prop_assert_eq!(
                        out,
                        WrmsrOutcome::GpException,
                        "{} <- {:#x}",
                        r.name,
                        value
                    );
                    prop_assert_eq!(&st, &before);
                }
            }
            prop_assert_eq!(eng.stats().writes_to_ignored_bits, 0);
        }
    }

    #[test]
    fn base_ignored_bits_do_not_matter(raw in any::<u64>()) {
        for eng in base_engines() {
            for r in base_ranges_where(&eng, |r| r.wr_ign_mask != 0) {
                let raw = raw & !r.wr_gp_mask;
                let kept = raw & !r.wr_ign_mask;
                for id in r.first..=r.last {
                    let mut a = vcpu();
                    let mut b = vcpu();
                    let out = eng.set(&mut a, MsrId(id), raw);
                    prop_assert_eq!(out, eng.set(&mut b, MsrId(id), kept));
                    prop_assert_eq!(&a, &b, "{}", r.name);

                    if out == WrmsrOutcome::Handled
                        && r.rd == RdFn::Field
                        && r.wr == WrFn::Field
                    {
                        prop_assert_eq!(
                            eng.query(&a, MsrId(id)),
                            RdmsrOutcome::Handled(kept)
                        );
                    }
                }
            }
        }
    }
}
