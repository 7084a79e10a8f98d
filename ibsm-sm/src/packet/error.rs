//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use bytes::TryGetError;
use serde::{Deserialize, Serialize};

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// MAD decoding errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DecodeError {
    IncompletePacket,
    InvalidBaseVersion(u8),
    InvalidClass(u8),
    InvalidClassVersion(u8),
    InvalidMethod(u8),
    InvalidAttribute(u16),
    InvalidNodeType(u8),
    InvalidDrHopCount(u8),
    InvalidAttrOffset(u16),
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePacket => {
                write!(f, "incomplete packet")
            }
            DecodeError::InvalidBaseVersion(version) => {
                write!(f, "invalid base version: {}", version)
            }
            DecodeError::InvalidClass(class) => {
                write!(f, "invalid management class: {:#04x}", class)
            }
            DecodeError::InvalidClassVersion(version) => {
                write!(f, "invalid class version: {}", version)
            }
            DecodeError::InvalidMethod(method) => {
                write!(f, "invalid method: {:#04x}", method)
            }
            DecodeError::InvalidAttribute(attr_id) => {
                write!(f, "invalid attribute: {:#06x}", attr_id)
            }
            DecodeError::InvalidNodeType(node_type) => {
                write!(f, "invalid node type: {}", node_type)
            }
            DecodeError::InvalidDrHopCount(hop_cnt) => {
                write!(f, "invalid directed route hop count: {}", hop_cnt)
            }
            DecodeError::InvalidAttrOffset(offset) => {
                write!(f, "invalid attribute offset: {}", offset)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

impl From<TryGetError> for DecodeError {
    fn from(_error: TryGetError) -> DecodeError {
        DecodeError::IncompletePacket
    }
}
