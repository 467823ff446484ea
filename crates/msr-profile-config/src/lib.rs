// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration types for guest MSR profiles.
//!
//! A profile names the CPU vendor whose base MSR table the guest should see
//! and, optionally, a set of named overrides that replace parts of that table
//! with fixed-value ranges:
//!
//! ```toml
//! [msr.sandy]
//! vendor = "intel"
//!
//! [msr.sandy.IA32_PLATFORM_ID]
//! first = 0x17
//! value = "0x0004000000000000"
//! wr-gp-mask = "0xffffffffffffffff"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Deserialize, Serialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CpuVendor {
    Amd,
    Intel,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct MsrProfile {
    pub vendor: CpuVendor,
    #[serde(flatten, default)]
    pub overrides: BTreeMap<String, toml::Value>,
}

/// A document holding any number of named MSR profiles.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct MsrConfig {
    #[serde(default, rename = "msr")]
    pub profiles: BTreeMap<String, MsrProfile>,
}

/// The kinds of range an override may install.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverrideKind {
    /// Reads return the override's value and writes are ignored.
    FixedValue,
}

/// MSR override entry parsed from a configured profile
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MsrOverride {
    /// Name of the override, used as the name of the resulting range
    pub name: String,
    /// First MSR covered by the override
    pub first: u32,
    /// Last MSR covered by the override (inclusive)
    pub last: u32,
    pub kind: OverrideKind,
    /// Value returned on reads
    pub value: u64,
    /// Bits which raise #GP when written
    pub wr_gp_mask: u64,
    /// Bits which are silently dropped when written
    pub wr_ign_mask: u64,
}

#[derive(Debug, Error)]
pub enum OverrideParseError {
    #[error("MSR override {0} must be a table")]
    NotATable(String),
    #[error("MSR override {0} is missing mandatory key `first`")]
    MissingFirst(String),
    #[error("MSR override {0}: key `{1}`: {2}")]
    Value(String, &'static str, &'static str),
    #[error("MSR override {0}: unknown type `{1}`")]
    UnknownType(String, String),
    #[error("MSR override {0}: unknown key `{1}`")]
    UnknownKey(String, String),
    #[error("MSR override {name}: last {last:#x} precedes first {first:#x}")]
    InvertedBounds { name: String, first: u32, last: u32 },
}

const KEY_FIRST: &str = "first";
const KEY_LAST: &str = "last";
const KEY_TYPE: &str = "type";
const KEY_VALUE: &str = "value";
const KEY_WR_GP_MASK: &str = "wr-gp-mask";
const KEY_WR_IGN_MASK: &str = "wr-ign-mask";

/// Reads an unsigned integer out of an override entry.
///
/// TOML integers are signed 64-bit, so values with bit 63 set can only be
/// expressed as strings (decimal, or hexadecimal with a `0x` prefix).
///
/// Booleans are read as 1 and 0. Older profiles rely on `true` standing in for
/// a value of 1, so this is kept even though it is rarely what a user means.
fn parse_u64(
    name: &str,
    key: &'static str,
    raw: &toml::Value,
) -> Result<u64, OverrideParseError> {
    let err = |msg: &'static str| {
        OverrideParseError::Value(name.to_owned(), key, msg)
    };
    match raw {
        toml::Value::Integer(v) => {
            u64::try_from(*v).map_err(|_| err("value must not be negative"))
        }
        toml::Value::String(s) => {
            let s = s.trim().replace('_', "");
            let parsed = match s.strip_prefix("0x").or(s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16),
                None => s.parse::<u64>(),
            };
            parsed.map_err(|_| err("string is not a valid integer"))
        }
        toml::Value::Boolean(b) => Ok(u64::from(*b)),
        _ => Err(err("expected an integer")),
    }
}

fn parse_u32(
    name: &str,
    key: &'static str,
    raw: &toml::Value,
) -> Result<u32, OverrideParseError> {
    let v = parse_u64(name, key, raw)?;
    u32::try_from(v).map_err(|_| {
        OverrideParseError::Value(name.to_owned(), key, "MSR ids are 32 bits")
    })
}

impl TryFrom<&MsrProfile> for Vec<MsrOverride> {
    type Error = OverrideParseError;

    fn try_from(value: &MsrProfile) -> Result<Self, Self::Error> {
        let mut entries = Vec::with_capacity(value.overrides.len());

        for (name, raw) in value.overrides.iter() {
            let table = raw
                .as_table()
                .ok_or_else(|| OverrideParseError::NotATable(name.clone()))?;

            if let Some(key) = table.keys().find(|k| {
                ![
                    KEY_FIRST,
                    KEY_LAST,
                    KEY_TYPE,
                    KEY_VALUE,
                    KEY_WR_GP_MASK,
                    KEY_WR_IGN_MASK,
                ]
                .contains(&k.as_str())
            }) {
                return Err(OverrideParseError::UnknownKey(
                    name.clone(),
                    key.clone(),
                ));
            }

            let first = table
                .get(KEY_FIRST)
                .ok_or_else(|| OverrideParseError::MissingFirst(name.clone()))
                .and_then(|v| parse_u32(name, KEY_FIRST, v))?;
            let last = match table.get(KEY_LAST) {
                Some(v) => parse_u32(name, KEY_LAST, v)?,
                None => first,
            };
            if last < first {
                return Err(OverrideParseError::InvertedBounds {
                    name: name.clone(),
                    first,
                    last,
                });
            }

            let kind = match table.get(KEY_TYPE) {
                None => OverrideKind::FixedValue,
                Some(toml::Value::String(s))
                    if s.eq_ignore_ascii_case("FixedValue") =>
                {
                    OverrideKind::FixedValue
                }
                Some(toml::Value::String(s)) => {
                    return Err(OverrideParseError::UnknownType(
                        name.clone(),
                        s.clone(),
                    ))
                }
                Some(_) => {
                    return Err(OverrideParseError::Value(
                        name.clone(),
                        KEY_TYPE,
                        "expected a string",
                    ))
                }
            };

            let get = |key: &'static str| match table.get(key) {
                Some(v) => parse_u64(name, key, v),
                None => Ok(0),
            };

            entries.push(MsrOverride {
                name: name.clone(),
                first,
                last,
                kind,
                value: get(KEY_VALUE)?,
                wr_gp_mask: get(KEY_WR_GP_MASK)?,
                wr_ign_mask: get(KEY_WR_IGN_MASK)?,
            });
        }
        Ok(entries)
    }
}

/// Errors which may be returned when loading an MSR profile document.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses a TOML file into an MSR profile document.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<MsrConfig, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

/// Parses TOML text into an MSR profile document.
pub fn parse_str(contents: &str) -> Result<MsrConfig, ParseError> {
    Ok(toml::from_str::<MsrConfig>(contents)?)
}
