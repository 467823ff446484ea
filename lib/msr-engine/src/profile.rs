// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Assembly of a VM's MSR table from the vendor base table and a configured
//! profile.

use msr_profile_config::{
    CpuVendor, MsrOverride, MsrProfile, OverrideKind, OverrideParseError,
};
use slog::info;
use thiserror::Error;

use crate::db;
use crate::guest::GuestCpuInfo;
use crate::msr::MsrId;
use crate::range::{
    MsrRange, MsrRangeTable, MsrRangeTableBuilder, RangeTableError,
};

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile targets {profile:?} CPUs but the guest CPU is {guest:?}")]
    VendorMismatch { profile: CpuVendor, guest: CpuVendor },

    #[error("invalid MSR override: {0}")]
    Override(#[from] OverrideParseError),

    #[error("invalid MSR table: {0}")]
    Table(#[from] RangeTableError),
}

impl From<MsrOverride> for MsrRange {
    fn from(value: MsrOverride) -> Self {
        match value.kind {
            OverrideKind::FixedValue => MsrRange::fixed(
                value.first,
                value.last,
                value.name,
                value.value,
            )
            .with_gp(value.wr_gp_mask)
            .with_ign(value.wr_ign_mask),
        }
    }
}

/// Builds the MSR table for a guest CPU described by `info`, applying the
/// overrides in `profile` (if any) over the vendor's base table.
///
/// Overrides are applied in name order. Each one takes precedence over
/// whatever it overlaps, including earlier overrides.
pub fn build_table(
    log: &slog::Logger,
    info: &GuestCpuInfo,
    profile: Option<&MsrProfile>,
) -> Result<MsrRangeTable, ProfileError> {
    let log = log.new(slog::o!("component" => "msr"));

    let mut builder = MsrRangeTableBuilder::new();
    builder.extend(db::base_ranges(info));

    if let Some(profile) = profile {
        if profile.vendor != info.vendor {
            return Err(ProfileError::VendorMismatch {
                profile: profile.vendor,
                guest: info.vendor,
            });
        }
        for entry in Vec::<MsrOverride>::try_from(profile)? {
            info!(
                log,
                "applying MSR override";
                "name" => %entry.name,
                "first" => %MsrId(entry.first),
                "last" => %MsrId(entry.last),
                "value" => entry.value
            );
            builder.insert(entry.into());
        }
    }

    let table = builder.build()?;
    info!(
        log,
        "built MSR table";
        "vendor" => ?info.vendor,
        "ranges" => table.len()
    );
    Ok(table)
}
