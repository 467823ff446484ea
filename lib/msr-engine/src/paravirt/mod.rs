// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Paravirtual interfaces exposed through hypervisor-range MSRs.
//!
//! Each interface implements [`ParavirtMsrs`](crate::delegate::ParavirtMsrs)
//! and is installed in a VM's [`Services`](crate::delegate::Services). The
//! engine forwards every access in the hypervisor MSR range to it.

pub mod hyperv;

pub use hyperv::HyperV;
