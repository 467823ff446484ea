// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Model-specific register virtualization.
//!
//! This crate decides what happens when a guest vCPU executes RDMSR or WRMSR.
//! A per-VM [`MsrRangeTable`] maps every MSR the guest may touch to a
//! descriptor carrying a read and a write behavior tag. The [`MsrEngine`]
//! looks up the descriptor for an access, applies the descriptor's write masks
//! and runs the selected handler against the calling vCPU's
//! [`VcpuMsrState`]. Every access ends in one of three outcomes: it is
//! handled, it raises #GP(0) in the guest, or it must be retried from a
//! context with access to fuller services.
//!
//! The engine never blocks, allocates or takes locks while dispatching. The
//! range table and handler registry are immutable once built and are shared
//! by all vCPUs; the only shared mutable data are relaxed atomic statistics.

#![allow(clippy::style)]

pub extern crate usdt;
#[macro_use]
extern crate bitflags;

pub mod bits;
pub mod db;
pub mod delegate;
pub mod dispatch;
pub mod features;
pub mod guest;
pub mod handlers;
pub mod msr;
pub mod paravirt;
pub mod profile;
pub mod range;
pub mod state;
pub mod stats;
pub mod validate;

pub use dispatch::MsrEngine;
pub use msr::{DispatchResult, MsrId, RdmsrOutcome, WrmsrOutcome};
pub use range::{MsrRange, MsrRangeTable};
pub use state::VcpuMsrState;

pub use msr_profile_config::CpuVendor;

#[cfg(test)]
mod test;
