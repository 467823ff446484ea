// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use slog::debug;

use crate::bits::Efer;
use crate::guest::MsrEnv;
use crate::msr::{MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::range::MsrRange;
use crate::state::{PendingActions, VcpuMsrState};
use crate::validate::efer_write;

pub(super) fn rd_efer(
    _env: &MsrEnv,
    state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(state.efer)
}

/// Updates EFER, queueing a TLB flush if a paging-related bit changed.
pub(super) fn wr_efer(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    let old = state.efer;
    let new = match efer_write(old, value, state.cr0, env.features.as_ref()) {
        Ok(new) => new,
        Err(e) => {
            debug!(env.log, "rejected EFER write";
                "vcpu" => state.vcpu.0,
                "old" => old,
                "value" => value,
                "error" => %e
            );
            return WrmsrOutcome::GpException;
        }
    };

    let changed = Efer::from_bits_retain(old ^ new);
    if changed.intersects(Efer::NXE | Efer::LME | Efer::LMA) {
        state.pending |= PendingActions::FLUSH_TLB;
    }
    if changed.contains(Efer::NXE) {
        state.pending |= PendingActions::NXE_CHANGED;
    }
    state.efer = new;
    WrmsrOutcome::Handled
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bits::{CR0_PG, MSR_EFER};
    use crate::features::FeatureSet;
    use crate::handlers::test::env;
    use crate::handlers::{RdFn, WrFn};
    use crate::state::VcpuId;
    use msr_profile_config::CpuVendor;

    #[test]
    fn efer_writes_queue_actions() {
        let env = env(
            CpuVendor::Amd,
            FeatureSet::NX | FeatureSet::LONG_MODE | FeatureSet::SYSCALL,
        );
        let r = MsrRange::single(
            MSR_EFER,
            "EFER",
            RdFn::Amd64Efer,
            WrFn::Amd64Efer,
        );
        let id = MsrId(MSR_EFER);
        let mut state = VcpuMsrState::new(VcpuId(0));

        let sce = Efer::SCE.bits();
        assert_eq!(
            wr_efer(&env, &mut state, id, &r, sce, sce),
            WrmsrOutcome::Handled
        );
        assert!(state.take_pending().is_empty());

        let v = sce | Efer::NXE.bits();
        assert_eq!(
            wr_efer(&env, &mut state, id, &r, v, v),
            WrmsrOutcome::Handled
        );
        assert_eq!(
            state.take_pending(),
            PendingActions::FLUSH_TLB | PendingActions::NXE_CHANGED
        );

        let v = v | Efer::LME.bits();
        assert_eq!(
            wr_efer(&env, &mut state, id, &r, v, v),
            WrmsrOutcome::Handled
        );
        assert_eq!(state.take_pending(), PendingActions::FLUSH_TLB);
        assert_eq!(rd_efer(&env, &state, id, &r), RdmsrOutcome::Handled(v));

        // Clearing LME with paging on faults and leaves EFER alone.
        state.cr0 |= CR0_PG;
        assert_eq!(
            wr_efer(&env, &mut state, id, &r, sce, sce),
            WrmsrOutcome::GpException
        );
        assert_eq!(state.efer, v);
        assert!(state.take_pending().is_empty());

        // SVME is not offered to this guest.
        let bad = v | Efer::SVME.bits();
        assert_eq!(
            wr_efer(&env, &mut state, id, &r, bad, bad),
            WrmsrOutcome::GpException
        );
    }
}
