//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod loopback;

use derive_new::new;
use ibsm_utils::ib::{DrPath, Gid, Guid, Lid};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::packet::Mad;
use crate::packet::error::DecodeError;

// Destination of an outgoing management datagram.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum MadAddr {
    // Directed-route addressing, usable before LIDs are assigned.
    Dr(DrPath),
    // LID-routed addressing.
    Lid(Lid),
}

// An outgoing datagram handed to the transport.
#[derive(Clone, Debug, new)]
#[derive(Deserialize, Serialize)]
pub struct TxMad {
    pub dest: MadAddr,
    pub mad: Mad,
    pub expect_response: bool,
}

// An incoming datagram delivered by the transport. Decoding happens at the
// receive edge so malformed datagrams surface as typed errors.
#[derive(Clone, Debug)]
#[derive(Deserialize, Serialize)]
pub struct RxMad {
    pub src_lid: Lid,
    pub src_gid: Gid,
    pub mad: Result<Mad, DecodeError>,
}

// Transport binding errors.
#[derive(Debug)]
pub enum TransportError {
    BindFailed(String),
    Closed,
}

/// The consumed transport abstraction: bind a local port, obtain a sender
/// for outgoing datagrams, and receive completions/datagrams through the
/// channel supplied at bind time. Framing, CRC and QP0/QP1 delivery live
/// behind this seam.
pub trait MadTransport: Send {
    /// Binds the given local port GUID. Received datagrams are pushed into
    /// `rx`. Returns the sender for outgoing datagrams.
    fn bind(
        &mut self,
        port_guid: Guid,
        rx: UnboundedSender<RxMad>,
    ) -> Result<UnboundedSender<TxMad>, TransportError>;

    /// Releases the binding. After this returns no further datagrams are
    /// delivered.
    fn unbind(&mut self);

    /// The port GUID the transport would bind when none is configured.
    fn default_port_guid(&self) -> Guid;
}

// ===== impl TransportError =====

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::BindFailed(reason) => {
                write!(f, "failed to bind transport: {}", reason)
            }
            TransportError::Closed => {
                write!(f, "transport closed")
            }
        }
    }
}

impl std::error::Error for TransportError {}
