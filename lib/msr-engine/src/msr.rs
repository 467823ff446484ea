// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// A model-specific register (MSR) number.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsrId(pub u32);

impl fmt::Debug for MsrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MsrId({:#x})", self.0)
    }
}

impl fmt::Display for MsrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u32> for MsrId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// The disposition of an MSR access, without any value it produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::IntoStaticStr)]
#[repr(u8)]
pub enum DispatchResult {
    /// The access completed.
    Ok = 0,

    /// The access is illegal. The caller should inject #GP(0) into the vCPU
    /// that attempted it.
    GpException = 1,

    /// The access is legal but could not be completed in the current
    /// execution context. The caller must reissue the same access from a
    /// context with fuller services; nothing was changed.
    RetryInFullContext = 2,
}

/// An outcome resulting from a request to emulate the RDMSR instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RdmsrOutcome {
    /// This read was handled and produced the contained value, which should be
    /// returned to the guest.
    Handled(u64),

    /// This read is illegal. The caller should inject #GP into the CPU that
    /// attempted it.
    GpException,

    /// This read must be reissued from a fuller execution context.
    RetryInFullContext,
}

impl RdmsrOutcome {
    pub fn result(&self) -> DispatchResult {
        match self {
            Self::Handled(_) => DispatchResult::Ok,
            Self::GpException => DispatchResult::GpException,
            Self::RetryInFullContext => DispatchResult::RetryInFullContext,
        }
    }

    /// The value read, which is defined to be 0 for any outcome other than
    /// [`RdmsrOutcome::Handled`].
    pub fn value(&self) -> u64 {
        match self {
            Self::Handled(v) => *v,
            _ => 0,
        }
    }

    /// Splits this outcome into its disposition and value.
    pub fn into_parts(self) -> (DispatchResult, u64) {
        (self.result(), self.value())
    }
}

/// An outcome resulting from a request to emulate the WRMSR instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrmsrOutcome {
    /// This write was handled and no further action is needed from the caller.
    Handled,

    /// This write is illegal. The caller should inject #GP into the CPU that
    /// attempted it.
    GpException,

    /// This write must be reissued from a fuller execution context.
    RetryInFullContext,
}

impl WrmsrOutcome {
    pub fn result(&self) -> DispatchResult {
        match self {
            Self::Handled => DispatchResult::Ok,
            Self::GpException => DispatchResult::GpException,
            Self::RetryInFullContext => DispatchResult::RetryInFullContext,
        }
    }
}

impl From<WrmsrOutcome> for DispatchResult {
    fn from(value: WrmsrOutcome) -> Self {
        value.result()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn faulting_reads_yield_zero() {
        assert_eq!(
            RdmsrOutcome::GpException.into_parts(),
            (DispatchResult::GpException, 0)
        );
        assert_eq!(
            RdmsrOutcome::RetryInFullContext.into_parts(),
            (DispatchResult::RetryInFullContext, 0)
        );
        assert_eq!(
            RdmsrOutcome::Handled(0x1234).into_parts(),
            (DispatchResult::Ok, 0x1234)
        );
    }
}
