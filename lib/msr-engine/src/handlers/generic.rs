// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Behaviors not tied to any particular register.

use crate::guest::MsrEnv;
use crate::msr::{MsrId, RdmsrOutcome, WrmsrOutcome};
use crate::range::MsrRange;
use crate::state::VcpuMsrState;
use crate::validate::{is_canonical, mtrr_fixed_valid};

pub(super) fn rd_fixed_value(
    _env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::Handled(range.value)
}

pub(super) fn rd_alias(
    _env: &MsrEnv,
    _state: &VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    unreachable!("alias for {id} reached dispatch unresolved")
}

pub(super) fn rd_write_only(
    _env: &MsrEnv,
    _state: &VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
) -> RdmsrOutcome {
    RdmsrOutcome::GpException
}

pub(super) fn rd_field(
    _env: &MsrEnv,
    state: &VcpuMsrState,
    id: MsrId,
    range: &MsrRange,
) -> RdmsrOutcome {
    match range.slot_for(id) {
        Some(slot) => RdmsrOutcome::Handled(state.slot(slot)),
        None => RdmsrOutcome::GpException,
    }
}

pub(super) fn wr_ignore(
    _env: &MsrEnv,
    _state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    _value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    WrmsrOutcome::Handled
}

pub(super) fn wr_alias(
    _env: &MsrEnv,
    _state: &mut VcpuMsrState,
    id: MsrId,
    _range: &MsrRange,
    _value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    unreachable!("alias for {id} reached dispatch unresolved")
}

pub(super) fn wr_read_only(
    _env: &MsrEnv,
    _state: &mut VcpuMsrState,
    _id: MsrId,
    _range: &MsrRange,
    _value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    WrmsrOutcome::GpException
}

fn store(
    state: &mut VcpuMsrState,
    id: MsrId,
    range: &MsrRange,
    value: u64,
    valid: impl FnOnce(u64) -> bool,
) -> WrmsrOutcome {
    match range.slot_for(id) {
        Some(slot) if valid(value) => {
            *state.slot_mut(slot) = value;
            WrmsrOutcome::Handled
        }
        _ => WrmsrOutcome::GpException,
    }
}

pub(super) fn wr_field(
    _env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    store(state, id, range, value, |_| true)
}

/// Stores a linear address, rejecting non-canonical values.
pub(super) fn wr_canonical_field(
    _env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    store(state, id, range, value, is_canonical)
}

/// Stores eight packed memory types, as in a fixed-range MTRR.
pub(super) fn wr_mem_type_field(
    _env: &MsrEnv,
    state: &mut VcpuMsrState,
    id: MsrId,
    range: &MsrRange,
    value: u64,
    _raw: u64,
) -> WrmsrOutcome {
    store(state, id, range, value, mtrr_fixed_valid)
}
