// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest-visible CPU features which gate MSR behavior.

/// A CPU feature whose presence in the guest's CPUID view changes how some
/// MSRs behave.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum::EnumIter)]
pub enum GuestFeature {
    /// No-execute pages (EFER.NXE).
    Nx,
    /// Long mode (EFER.LME).
    LongMode,
    /// SYSCALL/SYSRET (EFER.SCE).
    Syscall,
    /// Fast FXSAVE/FXRSTOR (EFER.FFXSR).
    Ffxsr,
    /// AMD secure virtual machine.
    Svm,
    /// Intel virtual machine extensions.
    Vmx,
    /// IA32_SPEC_CTRL with IBRS and STIBP.
    SpecCtrl,
    /// IA32_PRED_CMD with IBPB.
    PredCmd,
    /// IA32_FLUSH_CMD with L1D flush.
    FlushCmd,
    /// IA32_ARCH_CAPABILITIES.
    ArchCapabilities,
}

/// Answers feature-presence questions about the guest CPU.
///
/// Implementations must be cheap and non-blocking: this is consulted while
/// dispatching MSR accesses.
pub trait GuestFeatures: Send + Sync {
    fn has(&self, feature: GuestFeature) -> bool;
}

bitflags! {
    /// A fixed set of guest features.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FeatureSet: u32 {
        const NX = 1 << 0;
        const LONG_MODE = 1 << 1;
        const SYSCALL = 1 << 2;
        const FFXSR = 1 << 3;
        const SVM = 1 << 4;
        const VMX = 1 << 5;
        const SPEC_CTRL = 1 << 6;
        const PRED_CMD = 1 << 7;
        const FLUSH_CMD = 1 << 8;
        const ARCH_CAPABILITIES = 1 << 9;
    }
}

impl From<GuestFeature> for FeatureSet {
    fn from(value: GuestFeature) -> Self {
        match value {
            GuestFeature::Nx => Self::NX,
            GuestFeature::LongMode => Self::LONG_MODE,
            GuestFeature::Syscall => Self::SYSCALL,
            GuestFeature::Ffxsr => Self::FFXSR,
            GuestFeature::Svm => Self::SVM,
            GuestFeature::Vmx => Self::VMX,
            GuestFeature::SpecCtrl => Self::SPEC_CTRL,
            GuestFeature::PredCmd => Self::PRED_CMD,
            GuestFeature::FlushCmd => Self::FLUSH_CMD,
            GuestFeature::ArchCapabilities => Self::ARCH_CAPABILITIES,
        }
    }
}

impl GuestFeatures for FeatureSet {
    fn has(&self, feature: GuestFeature) -> bool {
        self.contains(FeatureSet::from(feature))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_feature_has_a_distinct_bit() {
        let mut seen = FeatureSet::empty();
        for feat in GuestFeature::iter() {
            let bit = FeatureSet::from(feat);
            assert_eq!(bit.bits().count_ones(), 1, "{feat:?}");
            assert!(!seen.intersects(bit), "{feat:?} reuses a bit");
            seen |= bit;
        }
        assert_eq!(seen, FeatureSet::all());
    }

    #[test]
    fn feature_set_answers_queries() {
        let set = FeatureSet::NX | FeatureSet::SVM;
        assert!(set.has(GuestFeature::Nx));
        assert!(set.has(GuestFeature::Svm));
        assert!(!set.has(GuestFeature::Vmx));
        assert!(!FeatureSet::empty().has(GuestFeature::Nx));
    }
}
