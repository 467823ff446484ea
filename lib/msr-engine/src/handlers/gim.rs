// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hypervisor-defined MSRs, forwarded to the paravirtual interface.

use super::{delegated_rd, delegated_wr};
use crate::guest::MsrEnv;
use crate::msr::{MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::range::MsrRange;
use crate::state::VcpuMsrState;

// A nested guest sees these registers only if its own hypervisor provides
// them. Reaching here means the nested hypervisor did not intercept the
// access, so the guest gets what hardware would give it: #GP.

pub(super) fn rd_gim(
    env: &MsrEnv,
    state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    if state.nested.is_nested() {
        return RdmsrOutcome::GpException;
    }
    delegated_rd(env.services.paravirt.rdmsr(state.vcpu, id))
}

pub(super) fn wr_gim(
    env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
    value: u64,
    raw: u64,
) -> WrmsrOutcome {
    if state.nested.is_nested() {
        return WrmsrOutcome::GpException;
    }
    delegated_wr(env.services.paravirt.wrmsr(state.vcpu, id, value, raw))
}
