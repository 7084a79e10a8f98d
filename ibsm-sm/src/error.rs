//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{Guid, Lid, PortNum};
use tracing::{error, warn};

use crate::collections::NodeId;
use crate::packet::error::DecodeError;

// Subnet manager errors.
#[derive(Debug)]
pub enum Error {
    // Inter-task communication
    NodeIdNotFound(NodeId),
    NodeGuidNotFound(Guid),
    PortGuidNotFound(Guid),
    PortNumNotFound(Guid, PortNum),
    LidNotFound(Lid),
    // Discovery
    DuplicateGuid(Guid),
    LinkInconsistent(Guid, PortNum),
    MadInput(DecodeError),
    WrongResponder(Guid, Guid),
    // Election
    InvalidSmKey(Guid),
    InvalidSmInfoSet(&'static str),
    // Addressing and routing
    LidSpaceExhausted,
    RoutingFailed(&'static str),
    // SA plane
    SaRecordInvalid(&'static str),
    // Transport
    TransportSend(&'static str),
    Timeout,
    // Files
    FileIo(std::path::PathBuf, std::io::Error),
    FileParse(std::path::PathBuf, String),
    // Other
    InternalError(&'static str),
    Fatal(&'static str),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::NodeIdNotFound(node_id) => {
                warn!(?node_id, "{}", self);
            }
            Error::NodeGuidNotFound(guid) | Error::PortGuidNotFound(guid) => {
                warn!(%guid, "{}", self);
            }
            Error::PortNumNotFound(guid, port_num) => {
                warn!(%guid, %port_num, "{}", self);
            }
            Error::LidNotFound(lid) => {
                warn!(%lid, "{}", self);
            }
            Error::DuplicateGuid(guid) => {
                error!(%guid, "{}", self);
            }
            Error::LinkInconsistent(guid, port_num) => {
                warn!(%guid, %port_num, "{}", self);
            }
            Error::MadInput(error) => {
                warn!(%error, "{}", self);
            }
            Error::WrongResponder(expected, actual) => {
                warn!(%expected, %actual, "{}", self);
            }
            Error::InvalidSmKey(guid) => {
                warn!(%guid, "{}", self);
            }
            Error::InvalidSmInfoSet(reason) => {
                warn!(%reason, "{}", self);
            }
            Error::LidSpaceExhausted => {
                error!("{}", self);
            }
            Error::RoutingFailed(reason) => {
                error!(%reason, "{}", self);
            }
            Error::SaRecordInvalid(reason) => {
                warn!(%reason, "{}", self);
            }
            Error::TransportSend(reason) => {
                warn!(%reason, "{}", self);
            }
            Error::Timeout => {
                warn!("{}", self);
            }
            Error::FileIo(path, error) => {
                error!(path = %path.display(), %error, "{}", self);
            }
            Error::FileParse(path, reason) => {
                error!(path = %path.display(), %reason, "{}", self);
            }
            Error::InternalError(reason) => {
                error!(%reason, "{}", self);
            }
            Error::Fatal(reason) => {
                error!(%reason, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NodeIdNotFound(..) => {
                write!(f, "node ID not found")
            }
            Error::NodeGuidNotFound(..) => {
                write!(f, "node GUID not found")
            }
            Error::PortGuidNotFound(..) => {
                write!(f, "port GUID not found")
            }
            Error::PortNumNotFound(..) => {
                write!(f, "physical port not found")
            }
            Error::LidNotFound(..) => {
                write!(f, "no port covers LID")
            }
            Error::DuplicateGuid(..) => {
                write!(f, "duplicated GUID on different routes")
            }
            Error::LinkInconsistent(..) => {
                write!(f, "link endpoint already connected elsewhere")
            }
            Error::MadInput(..) => {
                write!(f, "failed to decode datagram")
            }
            Error::WrongResponder(..) => {
                write!(f, "response GUID does not match request")
            }
            Error::InvalidSmKey(..) => {
                write!(f, "SM key mismatch")
            }
            Error::InvalidSmInfoSet(..) => {
                write!(f, "invalid SMInfo Set request")
            }
            Error::LidSpaceExhausted => {
                write!(f, "unicast LID space exhausted")
            }
            Error::RoutingFailed(..) => {
                write!(f, "routing engine failed")
            }
            Error::SaRecordInvalid(..) => {
                write!(f, "invalid SA record operation")
            }
            Error::TransportSend(..) => {
                write!(f, "failed to send datagram")
            }
            Error::Timeout => {
                write!(f, "transaction timed out")
            }
            Error::FileIo(..) => {
                write!(f, "file I/O error")
            }
            Error::FileParse(..) => {
                write!(f, "failed to parse file")
            }
            Error::InternalError(..) => {
                write!(f, "internal error")
            }
            Error::Fatal(..) => {
                write!(f, "fatal error")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MadInput(error) => Some(error),
            Error::FileIo(_, error) => Some(error),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(error: DecodeError) -> Error {
        Error::MadInput(error)
    }
}
