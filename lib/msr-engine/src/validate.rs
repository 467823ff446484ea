// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Value checks shared by the write handlers.

use thiserror::Error;

use crate::bits::{Efer, CR0_PG};
use crate::features::{GuestFeature, GuestFeatures};

/// Returns true if `addr` is canonical for 48-bit linear addresses, i.e. bits
/// 63:47 are all copies of bit 47.
pub fn is_canonical(addr: u64) -> bool {
    ((addr as i64) << 16 >> 16) as u64 == addr
}

/// Memory types which may appear in an MTRR. Types 2, 3 and anything above 6
/// are reserved.
pub fn is_valid_mtrr_type(ty: u8) -> bool {
    matches!(ty, 0 | 1 | 4 | 5 | 6)
}

/// Every byte of a fixed-range MTRR holds a memory type for one sub-range.
pub fn mtrr_fixed_valid(value: u64) -> bool {
    value.to_le_bytes().iter().all(|ty| is_valid_mtrr_type(*ty))
}

/// Each of the eight PAT entries must hold an architecturally defined memory
/// type. Unlike MTRRs, type 7 (UC-) is valid here.
pub fn pat_valid(value: u64) -> bool {
    value.to_le_bytes().iter().all(|ty| matches!(ty, 0 | 1 | 4 | 5 | 6 | 7))
}

/// Returns true if `addr` has no bits set above the guest's physical address
/// width.
pub fn phys_addr_fits(addr: u64, max_phys_addr_width: u8) -> bool {
    if max_phys_addr_width >= 64 {
        return true;
    }
    addr & !((1u64 << max_phys_addr_width) - 1) == 0
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum InvalidEfer {
    #[error("EFER bits {0:#x} are reserved for this guest")]
    ReservedBits(u64),
    #[error("EFER.LME cannot change while paging is enabled")]
    LmeWhilePaging,
}

/// The EFER bits a guest may set given its exposed features. LMA is always
/// reported as valid so the current value can be written back.
pub fn efer_valid_mask(features: &dyn GuestFeatures) -> Efer {
    let mut mask = Efer::LMA;
    for (bit, feat) in [
        (Efer::NXE, GuestFeature::Nx),
        (Efer::LME, GuestFeature::LongMode),
        (Efer::SCE, GuestFeature::Syscall),
        (Efer::FFXSR, GuestFeature::Ffxsr),
        (Efer::SVME, GuestFeature::Svm),
    ] {
        if features.has(feat) {
            mask |= bit;
        }
    }
    mask
}

/// Computes the EFER value resulting from a guest write of `new` over `old`.
///
/// LMA is owned by the processor and is carried over from `old` regardless of
/// the value written.
pub fn efer_write(
    old: u64,
    new: u64,
    cr0: u64,
    features: &dyn GuestFeatures,
) -> Result<u64, InvalidEfer> {
    let valid = efer_valid_mask(features).bits();
    let reserved = new & !valid;
    if reserved != 0 {
        return Err(InvalidEfer::ReservedBits(reserved));
    }

    let lme = Efer::LME.bits();
    if cr0 & CR0_PG != 0 && (old ^ new) & lme != 0 {
        return Err(InvalidEfer::LmeWhilePaging);
    }

    let writable = valid & !Efer::LMA.bits();
    Ok((old & !writable) | (new & writable))
}
