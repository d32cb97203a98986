// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! API types for the hardware flow-offload engine.
//!
//! Everything in this crate is plain data shared between the engine,
//! its admin client, and the CLI.

#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

use core::fmt;
use core::fmt::Display;
use core::ops::BitXor;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

pub mod cmd;

pub use cmd::*;

/// The overall version of the admin API. Anytime a command is added,
/// removed, or modified, this number should increment. We attach no
/// semantic meaning to the number other than as a means to verify that
/// the client and the engine agree on the command set.
pub const API_VERSION: u64 = 2;

/// The 128-bit unique flow identifier.
///
/// Composed hardware entries are keyed by the XOR of the two
/// contributing ufids; XOR keeps composition commutative and lets a
/// pair be re-derived from either side.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct Ufid(pub u128);

impl Ufid {
    pub const fn from_u64_pair(hi: u64, lo: u64) -> Self {
        Self(((hi as u128) << 64) | lo as u128)
    }
}

impl BitXor for Ufid {
    type Output = Ufid;

    fn bitxor(self, rhs: Ufid) -> Ufid {
        Ufid(self.0 ^ rhs.0)
    }
}

impl From<u128> for Ufid {
    fn from(val: u128) -> Self {
        Self(val)
    }
}

impl Display for Ufid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let b = self.0.to_be_bytes();
        write!(
            f,
            "ufid:{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-\
             {:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0],
            b[1],
            b[2],
            b[3],
            b[4],
            b[5],
            b[6],
            b[7],
            b[8],
            b[9],
            b[10],
            b[11],
            b[12],
            b[13],
            b[14],
            b[15],
        )
    }
}

/// A MAC address.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct MacAddr {
    inner: [u8; 6],
}

impl MacAddr {
    pub const ZERO: Self = Self { inner: [0x00; 6] };

    /// Return the bytes of the MAC address.
    #[inline]
    pub fn bytes(&self) -> [u8; 6] {
        self.inner
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self { inner: bytes }
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let octets: Vec<u8> = s
            .split(':')
            .map(|s| {
                u8::from_str_radix(s, 16).map_err(|_| format!("bad octet: {s}"))
            })
            .collect::<Result<Vec<u8>, _>>()?;

        if octets.len() != 6 {
            return Err(format!("incorrect number of bytes: {}", octets.len()));
        }

        let bytes =
            [octets[0], octets[1], octets[2], octets[3], octets[4], octets[5]];

        Ok(MacAddr { inner: bytes })
    }
}

impl Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.inner[0],
            self.inner[1],
            self.inner[2],
            self.inner[3],
            self.inner[4],
            self.inner[5]
        )
    }
}

/// The offload status of a flow.
///
/// The values are bits: `InProgress` is OR'd into the status word by
/// producers while a request sits in the offload queue, and the worker
/// overwrites the whole word on completion.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[repr(u32)]
pub enum OffloadStatus {
    /// Not offloaded.
    None = 0,
    /// A request for this flow is queued or being processed.
    InProgress = 1 << 0,
    /// Only the match was offloaded; actions still run in software.
    Mask = 1 << 1,
    /// Match and actions are both offloaded.
    Full = 1 << 2,
    /// The hardware rejected the flow.
    Failed = 1 << 3,
}

impl OffloadStatus {
    /// Is the flow programmed in hardware in any form?
    pub fn is_offloaded(self) -> bool {
        matches!(self, Self::Full | Self::Mask)
    }
}

impl Display for OffloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::InProgress => "in-progress",
            Self::Mask => "mask",
            Self::Full => "full",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ufid_xor_commutes() {
        let a = Ufid::from_u64_pair(0xdead_beef, 0x0123_4567);
        let b = Ufid::from_u64_pair(0xcafe_f00d, 0x89ab_cdef);
        assert_eq!(a ^ b, b ^ a);
        assert_eq!((a ^ b) ^ b, a);
    }

    #[test]
    fn ufid_format() {
        let u = Ufid(0x00112233_4455_6677_8899_aabbccddeeff_u128);
        assert_eq!(
            u.to_string(),
            "ufid:00112233-4455-6677-8899-aabbccddeeff"
        );
    }

    #[test]
    fn mac_from_str() {
        let mac: MacAddr = "A8:40:25:00:00:63".parse().unwrap();
        assert_eq!(mac.bytes(), [0xa8, 0x40, 0x25, 0x00, 0x00, 0x63]);
        assert!("A8:40:25:00:63".parse::<MacAddr>().is_err());
    }
}
