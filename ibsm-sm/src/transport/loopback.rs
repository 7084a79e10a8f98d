//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use ibsm_utils::ib::{
    Gid, Guid, Mtu, NodeType, PortPhysState, PortState,
};
use ibsm_utils::task::Task;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::packet::smp::{
    ATTR_NODE_DESCRIPTION, ATTR_NODE_INFO, ATTR_PORT_INFO, NodeDescription,
    NodeInfo, PortInfo, Smp, SmpAttr,
};
use crate::packet::{
    MAD_STATUS_OK, MAD_STATUS_UNSUP_METHOD_ATTR, Mad, MadBody, Method,
    MgmtClass,
};
use crate::transport::{
    MadAddr, MadTransport, RxMad, TransportError, TxMad,
};

// A transport backend emulating only the local HCA endport. It lets the SM
// bring up a single-port subnet standalone and is the reference for what a
// production backend must deliver through the seam.
#[derive(Debug)]
pub struct LoopbackTransport {
    node_guid: Guid,
    port_guid: Guid,
    description: String,
    task: Option<Task<()>>,
}

#[derive(Debug)]
struct LoopbackPort {
    node_guid: Guid,
    port_guid: Guid,
    description: String,
    port_info: PortInfo,
}

// ===== impl LoopbackTransport =====

impl LoopbackTransport {
    pub fn new(node_guid: Guid, port_guid: Guid) -> LoopbackTransport {
        LoopbackTransport {
            node_guid,
            port_guid,
            description: "ibsm loopback HCA".to_owned(),
            task: None,
        }
    }
}

impl MadTransport for LoopbackTransport {
    fn bind(
        &mut self,
        port_guid: Guid,
        rx: UnboundedSender<RxMad>,
    ) -> Result<UnboundedSender<TxMad>, TransportError> {
        if !port_guid.is_zero() && port_guid != self.port_guid {
            return Err(TransportError::BindFailed(format!(
                "unknown port GUID {}",
                port_guid
            )));
        }

        let (tx, mut tx_rx) = mpsc::unbounded_channel::<TxMad>();
        let mut port = LoopbackPort {
            node_guid: self.node_guid,
            port_guid: self.port_guid,
            description: self.description.clone(),
            port_info: PortInfo {
                local_port_num: 1,
                port_state: PortState::Init,
                phys_state: PortPhysState::LinkUp,
                link_width_enabled: 1,
                link_width_supported: 1,
                link_width_active: 1,
                mtu_cap: Mtu::Mtu2048,
                neighbor_mtu: Mtu::Mtu2048,
                vl_cap: 4,
                guid_cap: 32,
                ..Default::default()
            },
        };

        self.task = Some(Task::spawn(async move {
            while let Some(tx_mad) = tx_rx.recv().await {
                if !tx_mad.expect_response {
                    continue;
                }
                // Emulate the wire: encode and re-decode the datagram.
                let bytes = tx_mad.mad.encode();
                let mad = match Mad::decode(bytes) {
                    Ok(mad) => mad,
                    Err(error) => {
                        debug!(%error, "loopback dropped datagram");
                        continue;
                    }
                };
                if let Some(resp) = port.respond(&tx_mad.dest, mad)
                    && rx
                        .send(RxMad {
                            src_lid: port.port_info.base_lid,
                            src_gid: Gid::from_parts(
                                port.port_info.subnet_prefix,
                                port.port_guid,
                            ),
                            mad: Ok(resp),
                        })
                        .is_err()
                {
                    break;
                }
            }
        }));

        Ok(tx)
    }

    fn unbind(&mut self) {
        self.task = None;
    }

    fn default_port_guid(&self) -> Guid {
        self.port_guid
    }
}

// ===== impl LoopbackPort =====

impl LoopbackPort {
    fn respond(&mut self, dest: &MadAddr, mad: Mad) -> Option<Mad> {
        // Only directed-route SMPs addressed to the local port are served.
        match dest {
            MadAddr::Dr(path) if path.is_local() => (),
            _ => return None,
        }
        let MadBody::Smp(smp) = &mad.body else {
            return None;
        };

        let (status, attr) = match (mad.hdr.method, mad.hdr.attr_id) {
            (Method::Get, ATTR_NODE_INFO) => (
                MAD_STATUS_OK,
                Some(SmpAttr::NodeInfo(NodeInfo {
                    node_type: NodeType::ChannelAdapter,
                    num_ports: 1,
                    system_image_guid: self.node_guid,
                    node_guid: self.node_guid,
                    port_guid: self.port_guid,
                    partition_cap: 64,
                    device_id: 0,
                    revision: 0,
                    local_port_num: 1,
                    vendor_id: 0,
                })),
            ),
            (Method::Get, ATTR_NODE_DESCRIPTION) => (
                MAD_STATUS_OK,
                Some(SmpAttr::NodeDescription(NodeDescription {
                    description: self.description.clone(),
                })),
            ),
            (Method::Get, ATTR_PORT_INFO) => (
                MAD_STATUS_OK,
                Some(SmpAttr::PortInfo(self.port_info.clone())),
            ),
            (Method::Set, ATTR_PORT_INFO) => {
                if let Some(SmpAttr::PortInfo(new_info)) = &smp.attr {
                    self.port_info = new_info.clone();
                    if self.port_info.port_state == PortState::Down {
                        self.port_info.port_state = PortState::Init;
                    }
                }
                (
                    MAD_STATUS_OK,
                    Some(SmpAttr::PortInfo(self.port_info.clone())),
                )
            }
            _ => (MAD_STATUS_UNSUP_METHOD_ATTR, smp.attr.clone()),
        };

        let mut hdr = mad.hdr.response(status);
        hdr.mgmt_class = MgmtClass::SubnDirectedRoute;
        Some(Mad {
            hdr,
            body: MadBody::Smp(Smp {
                m_key: smp.m_key,
                dr: smp.dr.clone(),
                attr,
            }),
        })
    }
}
