//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::fmt::Write as _;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// 16-bit local identifier.
pub type Lid = u16;

// Physical port number within a node (0 = switch management port).
pub type PortNum = u8;

// First LID reserved for multicast groups.
pub const LID_MCAST_START: Lid = 0xC000;
// Last usable multicast LID (0xFFFF is the permissive LID).
pub const LID_MCAST_END: Lid = 0xFFFE;
// Last unicast LID.
pub const LID_UCAST_END: Lid = 0xBFFF;
// The permissive LID.
pub const LID_PERMISSIVE: Lid = 0xFFFF;

// Hop count value meaning "unreachable" in min-hop tables.
pub const HOPS_UNREACHABLE: u8 = 0xFF;
// LFT entry meaning "no path".
pub const LFT_NO_PATH: u8 = 0xFF;

/// 64-bit globally unique identifier.
///
/// Every node, physical port and switch carries one. GUIDs are compared and
/// displayed in host byte order.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Guid(pub u64);

/// 128-bit global identifier (subnet prefix + GUID, or a multicast GID).
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Gid(pub [u8; 16]);

/// 16-bit partition key. Bit 15 is the full-membership bit; the low 15 bits
/// identify the partition.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Pkey(pub u16);

// The default partition, full membership.
pub const PKEY_DEFAULT: Pkey = Pkey(0xFFFF);

// Node types as carried in NodeInfo.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum NodeType {
    ChannelAdapter = 1,
    Switch = 2,
    Router = 3,
}

// Logical port states as carried in PortInfo.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum PortState {
    #[default]
    Down = 1,
    Init = 2,
    Armed = 3,
    Active = 4,
}

// Physical port states as carried in PortInfo.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum PortPhysState {
    Sleep = 1,
    Polling = 2,
    #[default]
    Disabled = 3,
    PortConfigurationTraining = 4,
    LinkUp = 5,
    LinkErrorRecovery = 6,
}

// MTU wire encodings. The discriminant order matches the size order, so the
// derived `Ord` is the size ordering.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Mtu {
    Mtu256 = 1,
    Mtu512 = 2,
    Mtu1024 = 3,
    #[default]
    Mtu2048 = 4,
    Mtu4096 = 5,
}

// Static link rate wire encodings. Wire values are not ordered by bandwidth,
// so comparisons go through `weight`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Rate {
    Gbps2_5 = 2,
    Gbps10 = 3,
    Gbps30 = 4,
    Gbps5 = 5,
    Gbps20 = 6,
    Gbps40 = 7,
    Gbps60 = 8,
    Gbps80 = 9,
    #[default]
    Gbps120 = 10,
}

// 2-bit selector operator used by SA component fields (MTU, rate, lifetime).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Selector {
    Greater = 0,
    Less = 1,
    #[default]
    Exactly = 2,
    Best = 3,
}

/// A directed route: the sequence of egress port numbers walked from the SM
/// port to reach a device before LIDs are usable.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DrPath(SmallVec<[PortNum; 16]>);

// Maximum number of hops in a directed route.
pub const DR_PATH_MAX_HOPS: usize = 64;

// ===== impl Guid =====

impl Guid {
    pub const ZERO: Guid = Guid(0);

    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for Guid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl From<u64> for Guid {
    fn from(guid: u64) -> Guid {
        Guid(guid)
    }
}

impl From<Guid> for u64 {
    fn from(guid: Guid) -> u64 {
        guid.0
    }
}

impl std::str::FromStr for Guid {
    type Err = std::num::ParseIntError;

    // Accepts "0x0002c90200412345" as well as bare hex digits.
    fn from_str(s: &str) -> Result<Guid, Self::Err> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        u64::from_str_radix(s, 16).map(Guid)
    }
}

// ===== impl Gid =====

impl Gid {
    pub const ZERO: Gid = Gid([0; 16]);

    pub fn from_parts(prefix: u64, guid: Guid) -> Gid {
        let mut raw = [0; 16];
        raw[..8].copy_from_slice(&prefix.to_be_bytes());
        raw[8..].copy_from_slice(&guid.0.to_be_bytes());
        Gid(raw)
    }

    pub fn prefix(&self) -> u64 {
        u64::from_be_bytes(self.0[..8].try_into().unwrap())
    }

    pub fn guid(&self) -> Guid {
        Guid(u64::from_be_bytes(self.0[8..].try_into().unwrap()))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 16]
    }

    pub fn is_multicast(&self) -> bool {
        self.0[0] == 0xFF
    }

    // Multicast scope nibble (valid for multicast GIDs only).
    pub fn mcast_scope(&self) -> u8 {
        self.0[1] & 0x0F
    }
}

impl std::fmt::Display for Gid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, chunk) in self.0.chunks(2).enumerate() {
            if i > 0 {
                f.write_char(':')?;
            }
            write!(f, "{:02x}{:02x}", chunk[0], chunk[1])?;
        }
        Ok(())
    }
}

// ===== impl Pkey =====

impl Pkey {
    // The 15-bit partition identifier, membership bit cleared.
    pub const fn base(&self) -> u16 {
        self.0 & 0x7FFF
    }

    pub const fn is_full_member(&self) -> bool {
        self.0 & 0x8000 != 0
    }

    pub const fn is_zero(&self) -> bool {
        self.base() == 0 && self.0 != 0x8000
    }

    // Two P_Keys match when their bases are equal and at least one side has
    // full membership.
    pub const fn matches(&self, other: Pkey) -> bool {
        self.base() == other.base()
            && (self.is_full_member() || other.is_full_member())
    }
}

impl std::fmt::Display for Pkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}

impl From<u16> for Pkey {
    fn from(pkey: u16) -> Pkey {
        Pkey(pkey)
    }
}

// ===== impl NodeType =====

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeType::ChannelAdapter => write!(f, "CA"),
            NodeType::Switch => write!(f, "SW"),
            NodeType::Router => write!(f, "RT"),
        }
    }
}

// ===== impl PortState =====

impl std::fmt::Display for PortState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortState::Down => write!(f, "DOWN"),
            PortState::Init => write!(f, "INIT"),
            PortState::Armed => write!(f, "ARMED"),
            PortState::Active => write!(f, "ACTIVE"),
        }
    }
}

// ===== impl Mtu =====

impl Mtu {
    pub const fn bytes(&self) -> u16 {
        match self {
            Mtu::Mtu256 => 256,
            Mtu::Mtu512 => 512,
            Mtu::Mtu1024 => 1024,
            Mtu::Mtu2048 => 2048,
            Mtu::Mtu4096 => 4096,
        }
    }
}

// ===== impl Rate =====

impl Rate {
    // Relative bandwidth rank, usable for ordering comparisons.
    pub const fn weight(&self) -> u8 {
        match self {
            Rate::Gbps2_5 => 0,
            Rate::Gbps5 => 1,
            Rate::Gbps10 => 2,
            Rate::Gbps20 => 3,
            Rate::Gbps30 => 4,
            Rate::Gbps40 => 5,
            Rate::Gbps60 => 6,
            Rate::Gbps80 => 7,
            Rate::Gbps120 => 8,
        }
    }
}

impl Ord for Rate {
    fn cmp(&self, other: &Rate) -> std::cmp::Ordering {
        self.weight().cmp(&other.weight())
    }
}

impl PartialOrd for Rate {
    fn partial_cmp(&self, other: &Rate) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

// ===== impl Selector =====

impl Selector {
    // Component-field encoding: selector in the top two bits, value in the
    // low six.
    pub fn decode(byte: u8) -> (Selector, u8) {
        let sel = match byte >> 6 {
            0 => Selector::Greater,
            1 => Selector::Less,
            2 => Selector::Exactly,
            _ => Selector::Best,
        };
        (sel, byte & 0x3F)
    }

    pub fn encode(self, value: u8) -> u8 {
        ((self as u8) << 6) | (value & 0x3F)
    }

    // Whether an existing ordered value satisfies the selector against the
    // requested value. `Best` always matches; realization against port
    // capabilities happens separately.
    pub fn satisfied_by<T: Ord>(self, requested: T, actual: T) -> bool {
        match self {
            Selector::Greater => actual > requested,
            Selector::Less => actual < requested,
            Selector::Exactly => actual == requested,
            Selector::Best => true,
        }
    }
}

// ===== impl DrPath =====

impl DrPath {
    // The zero-hop path addressing the local port.
    pub fn local() -> DrPath {
        DrPath(SmallVec::new())
    }

    pub fn hop_count(&self) -> usize {
        self.0.len()
    }

    pub fn hops(&self) -> &[PortNum] {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0.is_empty()
    }

    // Returns the path extended by one egress port, unless the hop limit
    // would be exceeded.
    pub fn extended(&self, port_num: PortNum) -> Option<DrPath> {
        if self.0.len() >= DR_PATH_MAX_HOPS {
            return None;
        }
        let mut path = self.clone();
        path.0.push(port_num);
        Some(path)
    }
}

impl From<&[PortNum]> for DrPath {
    fn from(hops: &[PortNum]) -> DrPath {
        DrPath(SmallVec::from_slice(hops))
    }
}

impl std::fmt::Display for DrPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_local() {
            return write!(f, "<local>");
        }
        for (i, hop) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write!(f, "{}", hop)?;
        }
        Ok(())
    }
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_parse_display() {
        let guid: Guid = "0x0002c90200412345".parse().unwrap();
        assert_eq!(guid, Guid(0x0002c90200412345));
        assert_eq!(guid.to_string(), "0x0002c90200412345");
        assert_eq!("2".parse::<Guid>().unwrap(), Guid(2));
    }

    #[test]
    fn gid_parts() {
        let gid = Gid::from_parts(0xfe80_0000_0000_0000, Guid(0x10));
        assert_eq!(gid.prefix(), 0xfe80_0000_0000_0000);
        assert_eq!(gid.guid(), Guid(0x10));
        assert!(!gid.is_multicast());
    }

    #[test]
    fn pkey_matching() {
        let full = Pkey(0x8001);
        let limited = Pkey(0x0001);
        let other = Pkey(0x8002);
        assert!(full.matches(limited));
        assert!(full.matches(full));
        assert!(!limited.matches(limited));
        assert!(!full.matches(other));
    }

    #[test]
    fn rate_ordering() {
        assert!(Rate::Gbps10 > Rate::Gbps5);
        assert!(Rate::Gbps30 < Rate::Gbps40);
        assert!(Rate::Gbps120 > Rate::Gbps80);
    }

    #[test]
    fn selector_roundtrip() {
        let byte = Selector::Exactly.encode(Mtu::Mtu2048 as u8);
        let (sel, value) = Selector::decode(byte);
        assert_eq!(sel, Selector::Exactly);
        assert_eq!(value, Mtu::Mtu2048 as u8);
    }

    #[test]
    fn dr_path_extension() {
        let path = DrPath::local();
        assert!(path.is_local());
        let path = path.extended(3).unwrap();
        let path = path.extended(1).unwrap();
        assert_eq!(path.hops(), &[3, 1]);
        assert_eq!(path.to_string(), "3,1");
    }
}
