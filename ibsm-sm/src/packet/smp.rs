//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ibsm_utils::bytes::{BytesExt, BytesMutExt};
use ibsm_utils::ib::{
    DR_PATH_MAX_HOPS, DrPath, Gid, Guid, Lid, Mtu, NodeType, PortNum,
    PortPhysState, PortState,
};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::{MadHeader, Method, MgmtClass};

// Subnet management attribute identifiers.
pub const ATTR_NOTICE: u16 = 0x0002;
pub const ATTR_NODE_DESCRIPTION: u16 = 0x0010;
pub const ATTR_NODE_INFO: u16 = 0x0011;
pub const ATTR_SWITCH_INFO: u16 = 0x0012;
pub const ATTR_PORT_INFO: u16 = 0x0015;
pub const ATTR_PKEY_TABLE: u16 = 0x0016;
pub const ATTR_SL_TO_VL_TABLE: u16 = 0x0017;
pub const ATTR_VL_ARB_TABLE: u16 = 0x0018;
pub const ATTR_LINEAR_FWD_TABLE: u16 = 0x0019;
pub const ATTR_MCAST_FWD_TABLE: u16 = 0x001B;
pub const ATTR_SM_INFO: u16 = 0x0020;

// Well-known trap numbers.
pub const TRAP_GID_IN_SERVICE: u16 = 64;
pub const TRAP_GID_OUT_OF_SERVICE: u16 = 65;
pub const TRAP_MCAST_GROUP_CREATED: u16 = 66;
pub const TRAP_MCAST_GROUP_DELETED: u16 = 67;
pub const TRAP_LINK_STATE_CHANGE: u16 = 128;
pub const TRAP_CAPABILITY_MASK_CHANGE: u16 = 144;

// Notice producer types.
pub const PRODUCER_TYPE_CA: u32 = 1;
pub const PRODUCER_TYPE_SWITCH: u32 = 2;
pub const PRODUCER_TYPE_ROUTER: u32 = 3;
pub const PRODUCER_TYPE_CLASS_MGR: u32 = 4;

// Number of LFT entries per block.
pub const LFT_BLOCK_SIZE: usize = 64;
// Number of MLIDs per MFT block.
pub const MFT_BLOCK_SIZE: usize = 32;
// Number of ports covered by one MFT position.
pub const MFT_POSITION_PORTS: usize = 16;
// Number of P_Keys per table block.
pub const PKEY_BLOCK_SIZE: usize = 32;

// SMP body: M_Key, optional directed-route addressing, and the attribute
// payload (absent on Get requests).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Smp {
    pub m_key: u64,
    pub dr: Option<DrInfo>,
    pub attr: Option<SmpAttr>,
}

// Directed-route addressing state.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DrInfo {
    pub hop_ptr: u8,
    pub initial_path: DrPath,
    pub return_path: DrPath,
}

// Subnet management attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SmpAttr {
    Notice(Notice),
    NodeDescription(NodeDescription),
    NodeInfo(NodeInfo),
    SwitchInfo(SwitchInfo),
    PortInfo(PortInfo),
    PkeyTable(PkeyTableBlock),
    SlToVlTable(SlToVlTable),
    VlArbTable(VlArbTableBlock),
    LinearFt(LftBlock),
    MulticastFt(MftBlock),
    SmInfo(SmInfo),
}

// NodeInfo attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NodeInfo {
    pub node_type: NodeType,
    pub num_ports: u8,
    pub system_image_guid: Guid,
    pub node_guid: Guid,
    pub port_guid: Guid,
    pub partition_cap: u16,
    pub device_id: u16,
    pub revision: u32,
    pub local_port_num: PortNum,
    pub vendor_id: u32,
}

// NodeDescription attribute.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NodeDescription {
    pub description: String,
}

bitflags! {
    // PortInfo capability mask bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct PortCapabilityMask: u32 {
        const IS_SM = 1 << 1;
        const IS_NOTICE_SUP = 1 << 2;
        const IS_TRAP_SUP = 1 << 3;
        const IS_SL_MAP_SUP = 1 << 6;
        const IS_SM_DISABLED = 1 << 10;
        const IS_CAP_MASK_NOTICE_SUP = 1 << 22;
        const IS_CLIENT_REREG_SUP = 1 << 25;
    }
}

// PortInfo attribute.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PortInfo {
    pub m_key: u64,
    pub subnet_prefix: u64,
    pub base_lid: Lid,
    pub master_sm_base_lid: Lid,
    pub capability_mask: PortCapabilityMask,
    pub m_key_lease_period: u16,
    pub local_port_num: PortNum,
    pub link_width_enabled: u8,
    pub link_width_supported: u8,
    pub link_width_active: u8,
    pub link_speed_supported: u8,
    pub port_state: PortState,
    pub phys_state: PortPhysState,
    pub m_key_protect: u8,
    pub lmc: u8,
    pub link_speed_active: u8,
    pub link_speed_enabled: u8,
    pub neighbor_mtu: Mtu,
    pub master_sm_sl: u8,
    pub vl_cap: u8,
    pub vl_high_limit: u8,
    pub vl_arb_high_cap: u8,
    pub vl_arb_low_cap: u8,
    pub mtu_cap: Mtu,
    pub operational_vls: u8,
    pub pkey_violations: u16,
    pub qkey_violations: u16,
    pub guid_cap: u8,
    pub subnet_timeout: u8,
    pub resp_time_value: u8,
}

// SwitchInfo attribute.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SwitchInfo {
    pub lin_fdb_cap: u16,
    pub random_fdb_cap: u16,
    pub mcast_fdb_cap: u16,
    pub lin_fdb_top: u16,
    pub default_port: PortNum,
    pub default_mcast_primary_port: PortNum,
    pub default_mcast_not_primary_port: PortNum,
    pub life_state: u8,
    pub lids_per_port: u16,
    pub partition_enf_cap: u16,
    pub enforcement_flags: u8,
    pub mcast_fdb_top: u16,
}

// One P_Key table block (32 entries).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PkeyTableBlock {
    pub pkeys: [u16; PKEY_BLOCK_SIZE],
}

// SL-to-VL mapping table (16 nibbles).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SlToVlTable {
    pub vls: [u8; 16],
}

// One VL arbitration table block: 32 (VL, weight) pairs.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct VlArbTableBlock {
    pub entries: [(u8, u8); 32],
}

// One linear forwarding table block (64 entries). The block number is
// carried in the attribute modifier.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LftBlock {
    pub ports: [u8; LFT_BLOCK_SIZE],
}

// One multicast forwarding table block: 32 MLIDs by one 16-port position.
// The attribute modifier carries the block number in its low bits and the
// port position in its top four bits.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MftBlock {
    pub masks: [u16; MFT_BLOCK_SIZE],
}

// SM states as carried in SMInfo.
#[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum SmState {
    NotActive = 0,
    #[default]
    Discovering = 1,
    Standby = 2,
    Master = 3,
}

// SMInfo Set control dispositions, carried in the attribute modifier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum SmInfoControl {
    Acknowledge = 1,
    Disable = 2,
    Standby = 3,
    Handover = 4,
    Discover = 5,
}

// SMInfo attribute.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct SmInfo {
    pub guid: Guid,
    pub sm_key: u64,
    pub act_count: u32,
    pub priority: u8,
    pub state: SmState,
}

// Notice attribute (trap payload).
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Notice {
    pub generic: bool,
    pub notice_type: NoticeType,
    // Producer type for generic notices, vendor ID otherwise (24 bits).
    pub producer_or_vendor: u32,
    // Trap number for generic notices, device ID otherwise.
    pub trap_num: u16,
    pub issuer_lid: Lid,
    pub toggle_count: u16,
    pub details: NoticeDetails,
    // Only present on the SA plane (Reports).
    pub issuer_gid: Gid,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum NoticeType {
    Fatal = 0,
    Urgent = 1,
    Security = 2,
    SubnetManagement = 3,
    #[default]
    Informational = 4,
}

// Trap data details. Unrecognized traps keep their raw payload so Reports
// can forward the original notice verbatim.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum NoticeDetails {
    // Traps 64-67.
    PortChange { gid: Gid },
    // Trap 128.
    LinkStateChange { lid: Lid },
    // Trap 144.
    CapMaskChange { lid: Lid, cap_mask: u32 },
    Raw(Vec<u8>),
}

// Byte length of the attribute payload area inside an SMP.
const SMP_ATTR_AREA: usize = 64;
// Byte length of the notice details field.
const NOTICE_DETAILS_LEN: usize = 54;

// ===== impl Smp =====

impl Smp {
    pub(crate) fn decode(
        hdr: &MadHeader,
        class_specific: u16,
        buf: &mut Bytes,
    ) -> DecodeResult<Smp> {
        let m_key = buf.try_get_u64()?;
        let _dr_slid = buf.try_get_u16()?;
        let _dr_dlid = buf.try_get_u16()?;
        // Reserved area up to the attribute payload.
        if buf.remaining() < 28 {
            return Err(DecodeError::IncompletePacket);
        }
        buf.advance(28);

        // Attribute payload area.
        let mut attr_buf = buf.split_to(SMP_ATTR_AREA.min(buf.remaining()));
        let attr = match hdr.method {
            Method::Get => None,
            _ => Some(SmpAttr::decode(hdr.attr_id, &mut attr_buf)?),
        };

        // Directed-route paths.
        let dr = if hdr.mgmt_class == MgmtClass::SubnDirectedRoute {
            let hop_ptr = (class_specific >> 8) as u8;
            let hop_cnt = (class_specific & 0xFF) as u8;
            if hop_cnt as usize > DR_PATH_MAX_HOPS {
                return Err(DecodeError::InvalidDrHopCount(hop_cnt));
            }
            let mut initial = [0; DR_PATH_MAX_HOPS];
            buf.try_copy_to_slice(&mut initial)?;
            let mut ret = [0; DR_PATH_MAX_HOPS];
            buf.try_copy_to_slice(&mut ret)?;
            Some(DrInfo {
                hop_ptr,
                initial_path: DrPath::from(&initial[..hop_cnt as usize]),
                return_path: DrPath::from(&ret[..hop_cnt as usize]),
            })
        } else {
            None
        };

        Ok(Smp { m_key, dr, attr })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.m_key);
        // DR SLID/DLID are the permissive LID; LID routing is handled by
        // the transport.
        buf.put_u16(0xFFFF);
        buf.put_u16(0xFFFF);
        buf.put_bytes(0, 28);

        let attr_start = buf.len();
        if let Some(attr) = &self.attr {
            attr.encode(buf);
        }
        debug_assert!(buf.len() - attr_start <= SMP_ATTR_AREA);
        buf.resize(attr_start + SMP_ATTR_AREA, 0);

        if let Some(dr) = &self.dr {
            let mut initial = [0; DR_PATH_MAX_HOPS];
            initial[..dr.initial_path.hop_count()]
                .copy_from_slice(dr.initial_path.hops());
            buf.put_slice(&initial);
            let mut ret = [0; DR_PATH_MAX_HOPS];
            ret[..dr.return_path.hop_count()]
                .copy_from_slice(dr.return_path.hops());
            buf.put_slice(&ret);
        }
    }

    // The class-specific header field: hop pointer and hop count for
    // directed-route SMPs.
    pub(crate) fn class_specific(&self) -> u16 {
        match &self.dr {
            Some(dr) => {
                ((dr.hop_ptr as u16) << 8)
                    | dr.initial_path.hop_count() as u16
            }
            None => 0,
        }
    }
}

// ===== impl SmpAttr =====

impl SmpAttr {
    pub fn attr_id(&self) -> u16 {
        match self {
            SmpAttr::Notice(_) => ATTR_NOTICE,
            SmpAttr::NodeDescription(_) => ATTR_NODE_DESCRIPTION,
            SmpAttr::NodeInfo(_) => ATTR_NODE_INFO,
            SmpAttr::SwitchInfo(_) => ATTR_SWITCH_INFO,
            SmpAttr::PortInfo(_) => ATTR_PORT_INFO,
            SmpAttr::PkeyTable(_) => ATTR_PKEY_TABLE,
            SmpAttr::SlToVlTable(_) => ATTR_SL_TO_VL_TABLE,
            SmpAttr::VlArbTable(_) => ATTR_VL_ARB_TABLE,
            SmpAttr::LinearFt(_) => ATTR_LINEAR_FWD_TABLE,
            SmpAttr::MulticastFt(_) => ATTR_MCAST_FWD_TABLE,
            SmpAttr::SmInfo(_) => ATTR_SM_INFO,
        }
    }

    fn decode(attr_id: u16, buf: &mut Bytes) -> DecodeResult<SmpAttr> {
        let attr = match attr_id {
            ATTR_NOTICE => SmpAttr::Notice(Notice::decode(buf, false)?),
            ATTR_NODE_DESCRIPTION => {
                SmpAttr::NodeDescription(NodeDescription::decode(buf)?)
            }
            ATTR_NODE_INFO => SmpAttr::NodeInfo(NodeInfo::decode(buf)?),
            ATTR_SWITCH_INFO => SmpAttr::SwitchInfo(SwitchInfo::decode(buf)?),
            ATTR_PORT_INFO => SmpAttr::PortInfo(PortInfo::decode(buf)?),
            ATTR_PKEY_TABLE => {
                SmpAttr::PkeyTable(PkeyTableBlock::decode(buf)?)
            }
            ATTR_SL_TO_VL_TABLE => {
                SmpAttr::SlToVlTable(SlToVlTable::decode(buf)?)
            }
            ATTR_VL_ARB_TABLE => {
                SmpAttr::VlArbTable(VlArbTableBlock::decode(buf)?)
            }
            ATTR_LINEAR_FWD_TABLE => SmpAttr::LinearFt(LftBlock::decode(buf)?),
            ATTR_MCAST_FWD_TABLE => {
                SmpAttr::MulticastFt(MftBlock::decode(buf)?)
            }
            ATTR_SM_INFO => SmpAttr::SmInfo(SmInfo::decode(buf)?),
            _ => return Err(DecodeError::InvalidAttribute(attr_id)),
        };
        Ok(attr)
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            SmpAttr::Notice(notice) => notice.encode(buf, false),
            SmpAttr::NodeDescription(nd) => nd.encode(buf),
            SmpAttr::NodeInfo(ni) => ni.encode(buf),
            SmpAttr::SwitchInfo(si) => si.encode(buf),
            SmpAttr::PortInfo(pi) => pi.encode(buf),
            SmpAttr::PkeyTable(pkeys) => pkeys.encode(buf),
            SmpAttr::SlToVlTable(slvl) => slvl.encode(buf),
            SmpAttr::VlArbTable(vlarb) => vlarb.encode(buf),
            SmpAttr::LinearFt(lft) => lft.encode(buf),
            SmpAttr::MulticastFt(mft) => mft.encode(buf),
            SmpAttr::SmInfo(sminfo) => sminfo.encode(buf),
        }
    }
}

// ===== impl NodeInfo =====

impl NodeInfo {
    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<NodeInfo> {
        let _base_version = buf.try_get_u8()?;
        let _class_version = buf.try_get_u8()?;
        let node_type_raw = buf.try_get_u8()?;
        let node_type = NodeType::from_u8(node_type_raw)
            .ok_or(DecodeError::InvalidNodeType(node_type_raw))?;
        let num_ports = buf.try_get_u8()?;
        let system_image_guid = buf.try_get_guid()?;
        let node_guid = buf.try_get_guid()?;
        let port_guid = buf.try_get_guid()?;
        let partition_cap = buf.try_get_u16()?;
        let device_id = buf.try_get_u16()?;
        let revision = buf.try_get_u32()?;
        let local_port_vendor = buf.try_get_u32()?;

        Ok(NodeInfo {
            node_type,
            num_ports,
            system_image_guid,
            node_guid,
            port_guid,
            partition_cap,
            device_id,
            revision,
            local_port_num: (local_port_vendor >> 24) as u8,
            vendor_id: local_port_vendor & 0x00FF_FFFF,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(1);
        buf.put_u8(1);
        buf.put_u8(self.node_type as u8);
        buf.put_u8(self.num_ports);
        buf.put_guid(self.system_image_guid);
        buf.put_guid(self.node_guid);
        buf.put_guid(self.port_guid);
        buf.put_u16(self.partition_cap);
        buf.put_u16(self.device_id);
        buf.put_u32(self.revision);
        buf.put_u32(
            ((self.local_port_num as u32) << 24)
                | (self.vendor_id & 0x00FF_FFFF),
        );
    }
}

// ===== impl NodeDescription =====

impl NodeDescription {
    const LEN: usize = 64;

    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<NodeDescription> {
        let mut raw = [0; Self::LEN];
        buf.try_copy_to_slice(&mut raw)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(Self::LEN);
        let description = String::from_utf8_lossy(&raw[..end]).into_owned();
        Ok(NodeDescription { description })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        let mut raw = [0; Self::LEN];
        let bytes = self.description.as_bytes();
        let len = bytes.len().min(Self::LEN);
        raw[..len].copy_from_slice(&bytes[..len]);
        buf.put_slice(&raw);
    }
}

// ===== impl PortInfo =====

impl PortInfo {
    pub(crate) fn decode(buf: &mut Bytes) -> DecodeResult<PortInfo> {
        let m_key = buf.try_get_u64()?;
        let subnet_prefix = buf.try_get_u64()?;
        let base_lid = buf.try_get_u16()?;
        let master_sm_base_lid = buf.try_get_u16()?;
        let capability_mask =
            PortCapabilityMask::from_bits_retain(buf.try_get_u32()?);
        let m_key_lease_period = buf.try_get_u16()?;
        let local_port_num = buf.try_get_u8()?;
        let link_width_enabled = buf.try_get_u8()?;
        let link_width_supported = buf.try_get_u8()?;
        let link_width_active = buf.try_get_u8()?;
        let speed_state = buf.try_get_u8()?;
        let phys_state_raw = buf.try_get_u8()?;
        let mkey_lmc = buf.try_get_u8()?;
        let link_speed = buf.try_get_u8()?;
        let mtu_sl = buf.try_get_u8()?;
        let vl_cap = buf.try_get_u8()?;
        let vl_high_limit = buf.try_get_u8()?;
        let vl_arb_high_cap = buf.try_get_u8()?;
        let vl_arb_low_cap = buf.try_get_u8()?;
        let mtu_cap_raw = buf.try_get_u8()?;
        let op_vls = buf.try_get_u8()?;
        let pkey_violations = buf.try_get_u16()?;
        let qkey_violations = buf.try_get_u16()?;
        let guid_cap = buf.try_get_u8()?;
        let subnet_timeout = buf.try_get_u8()?;
        let resp_time_value = buf.try_get_u8()?;

        Ok(PortInfo {
            m_key,
            subnet_prefix,
            base_lid,
            master_sm_base_lid,
            capability_mask,
            m_key_lease_period,
            local_port_num,
            link_width_enabled,
            link_width_supported,
            link_width_active,
            link_speed_supported: speed_state >> 4,
            port_state: PortState::from_u8(speed_state & 0x0F)
                .unwrap_or_default(),
            phys_state: PortPhysState::from_u8(phys_state_raw >> 4)
                .unwrap_or_default(),
            m_key_protect: mkey_lmc >> 6,
            lmc: mkey_lmc & 0x07,
            link_speed_active: link_speed >> 4,
            link_speed_enabled: link_speed & 0x0F,
            neighbor_mtu: Mtu::from_u8(mtu_sl >> 4).unwrap_or_default(),
            master_sm_sl: mtu_sl & 0x0F,
            vl_cap: vl_cap >> 4,
            vl_high_limit,
            vl_arb_high_cap,
            vl_arb_low_cap,
            mtu_cap: Mtu::from_u8(mtu_cap_raw & 0x0F).unwrap_or_default(),
            operational_vls: op_vls >> 4,
            pkey_violations,
            qkey_violations,
            guid_cap,
            subnet_timeout: subnet_timeout & 0x1F,
            resp_time_value: resp_time_value & 0x1F,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.m_key);
        buf.put_u64(self.subnet_prefix);
        buf.put_u16(self.base_lid);
        buf.put_u16(self.master_sm_base_lid);
        buf.put_u32(self.capability_mask.bits());
        buf.put_u16(self.m_key_lease_period);
        buf.put_u8(self.local_port_num);
        buf.put_u8(self.link_width_enabled);
        buf.put_u8(self.link_width_supported);
        buf.put_u8(self.link_width_active);
        buf.put_u8(
            (self.link_speed_supported << 4) | (self.port_state as u8),
        );
        buf.put_u8((self.phys_state as u8) << 4);
        buf.put_u8((self.m_key_protect << 6) | (self.lmc & 0x07));
        buf.put_u8(
            (self.link_speed_active << 4) | (self.link_speed_enabled & 0x0F),
        );
        buf.put_u8(
            ((self.neighbor_mtu as u8) << 4) | (self.master_sm_sl & 0x0F),
        );
        buf.put_u8(self.vl_cap << 4);
        buf.put_u8(self.vl_high_limit);
        buf.put_u8(self.vl_arb_high_cap);
        buf.put_u8(self.vl_arb_low_cap);
        buf.put_u8(self.mtu_cap as u8);
        buf.put_u8(self.operational_vls << 4);
        buf.put_u16(self.pkey_violations);
        buf.put_u16(self.qkey_violations);
        buf.put_u8(self.guid_cap);
        buf.put_u8(self.subnet_timeout & 0x1F);
        buf.put_u8(self.resp_time_value & 0x1F);
    }
}

// ===== impl SwitchInfo =====

impl SwitchInfo {
    fn decode(buf: &mut Bytes) -> DecodeResult<SwitchInfo> {
        Ok(SwitchInfo {
            lin_fdb_cap: buf.try_get_u16()?,
            random_fdb_cap: buf.try_get_u16()?,
            mcast_fdb_cap: buf.try_get_u16()?,
            lin_fdb_top: buf.try_get_u16()?,
            default_port: buf.try_get_u8()?,
            default_mcast_primary_port: buf.try_get_u8()?,
            default_mcast_not_primary_port: buf.try_get_u8()?,
            life_state: buf.try_get_u8()?,
            lids_per_port: buf.try_get_u16()?,
            partition_enf_cap: buf.try_get_u16()?,
            enforcement_flags: buf.try_get_u8()?,
            mcast_fdb_top: {
                let _reserved = buf.try_get_u8()?;
                buf.try_get_u16()?
            },
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.lin_fdb_cap);
        buf.put_u16(self.random_fdb_cap);
        buf.put_u16(self.mcast_fdb_cap);
        buf.put_u16(self.lin_fdb_top);
        buf.put_u8(self.default_port);
        buf.put_u8(self.default_mcast_primary_port);
        buf.put_u8(self.default_mcast_not_primary_port);
        buf.put_u8(self.life_state);
        buf.put_u16(self.lids_per_port);
        buf.put_u16(self.partition_enf_cap);
        buf.put_u8(self.enforcement_flags);
        buf.put_u8(0);
        buf.put_u16(self.mcast_fdb_top);
    }
}

// ===== impl PkeyTableBlock =====

impl PkeyTableBlock {
    fn decode(buf: &mut Bytes) -> DecodeResult<PkeyTableBlock> {
        let mut pkeys = [0; PKEY_BLOCK_SIZE];
        for pkey in pkeys.iter_mut() {
            *pkey = buf.try_get_u16()?;
        }
        Ok(PkeyTableBlock { pkeys })
    }

    fn encode(&self, buf: &mut BytesMut) {
        for pkey in &self.pkeys {
            buf.put_u16(*pkey);
        }
    }
}

// ===== impl SlToVlTable =====

impl SlToVlTable {
    fn decode(buf: &mut Bytes) -> DecodeResult<SlToVlTable> {
        let mut vls = [0; 16];
        for pair in vls.chunks_mut(2) {
            let byte = buf.try_get_u8()?;
            pair[0] = byte >> 4;
            pair[1] = byte & 0x0F;
        }
        Ok(SlToVlTable { vls })
    }

    fn encode(&self, buf: &mut BytesMut) {
        for pair in self.vls.chunks(2) {
            buf.put_u8((pair[0] << 4) | (pair[1] & 0x0F));
        }
    }
}

// ===== impl VlArbTableBlock =====

impl VlArbTableBlock {
    fn decode(buf: &mut Bytes) -> DecodeResult<VlArbTableBlock> {
        let mut entries = [(0, 0); 32];
        for entry in entries.iter_mut() {
            entry.0 = buf.try_get_u8()? & 0x0F;
            entry.1 = buf.try_get_u8()?;
        }
        Ok(VlArbTableBlock { entries })
    }

    fn encode(&self, buf: &mut BytesMut) {
        for (vl, weight) in &self.entries {
            buf.put_u8(vl & 0x0F);
            buf.put_u8(*weight);
        }
    }
}

// ===== impl LftBlock =====

impl Default for LftBlock {
    fn default() -> LftBlock {
        LftBlock {
            ports: [ibsm_utils::ib::LFT_NO_PATH; LFT_BLOCK_SIZE],
        }
    }
}

impl LftBlock {
    fn decode(buf: &mut Bytes) -> DecodeResult<LftBlock> {
        let mut ports = [0; LFT_BLOCK_SIZE];
        buf.try_copy_to_slice(&mut ports)?;
        Ok(LftBlock { ports })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.ports);
    }
}

impl serde::Serialize for LftBlock {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.ports)
    }
}

impl<'de> serde::Deserialize<'de> for LftBlock {
    fn deserialize<D>(deserializer: D) -> Result<LftBlock, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bytes = Vec::<u8>::deserialize(deserializer)?;
        if bytes.len() != LFT_BLOCK_SIZE {
            return Err(serde::de::Error::invalid_length(
                bytes.len(),
                &"an LFT block of 64 entries",
            ));
        }
        let mut ports = [0; LFT_BLOCK_SIZE];
        ports.copy_from_slice(&bytes);
        Ok(LftBlock { ports })
    }
}

// ===== impl MftBlock =====

impl MftBlock {
    fn decode(buf: &mut Bytes) -> DecodeResult<MftBlock> {
        let mut masks = [0; MFT_BLOCK_SIZE];
        for mask in masks.iter_mut() {
            *mask = buf.try_get_u16()?;
        }
        Ok(MftBlock { masks })
    }

    fn encode(&self, buf: &mut BytesMut) {
        for mask in &self.masks {
            buf.put_u16(*mask);
        }
    }
}

// ===== impl SmInfo =====

impl SmInfo {
    fn decode(buf: &mut Bytes) -> DecodeResult<SmInfo> {
        let guid = buf.try_get_guid()?;
        let sm_key = buf.try_get_u64()?;
        let act_count = buf.try_get_u32()?;
        let pri_state = buf.try_get_u8()?;
        Ok(SmInfo {
            guid,
            sm_key,
            act_count,
            priority: pri_state >> 4,
            state: SmState::from_u8(pri_state & 0x0F).unwrap_or_default(),
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_guid(self.guid);
        buf.put_u64(self.sm_key);
        buf.put_u32(self.act_count);
        buf.put_u8((self.priority << 4) | (self.state as u8));
    }
}

// ===== impl Notice =====

impl Notice {
    pub(crate) fn decode(
        buf: &mut Bytes,
        with_gid: bool,
    ) -> DecodeResult<Notice> {
        let word = buf.try_get_u32()?;
        let generic = word & 0x8000_0000 != 0;
        let notice_type = NoticeType::from_u32((word >> 24) & 0x7F)
            .unwrap_or_default();
        let producer_or_vendor = word & 0x00FF_FFFF;
        let trap_num = buf.try_get_u16()?;
        let issuer_lid = buf.try_get_u16()?;
        let toggle_count = buf.try_get_u16()?;
        let mut raw = [0; NOTICE_DETAILS_LEN];
        buf.try_copy_to_slice(&mut raw)?;
        let details = NoticeDetails::decode(generic, trap_num, &raw);
        let issuer_gid = if with_gid { buf.try_get_gid()? } else { Gid::ZERO };

        Ok(Notice {
            generic,
            notice_type,
            producer_or_vendor,
            trap_num,
            issuer_lid,
            toggle_count,
            details,
            issuer_gid,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut, with_gid: bool) {
        let mut word = (self.producer_or_vendor & 0x00FF_FFFF)
            | ((self.notice_type as u32) << 24);
        if self.generic {
            word |= 0x8000_0000;
        }
        buf.put_u32(word);
        buf.put_u16(self.trap_num);
        buf.put_u16(self.issuer_lid);
        buf.put_u16(self.toggle_count);
        self.details.encode(buf);
        if with_gid {
            buf.put_gid(&self.issuer_gid);
        }
    }
}

// ===== impl NoticeDetails =====

impl NoticeDetails {
    fn decode(
        generic: bool,
        trap_num: u16,
        raw: &[u8; NOTICE_DETAILS_LEN],
    ) -> NoticeDetails {
        if !generic {
            return NoticeDetails::Raw(raw.to_vec());
        }
        match trap_num {
            TRAP_GID_IN_SERVICE..=TRAP_MCAST_GROUP_DELETED => {
                let mut gid = [0; 16];
                gid.copy_from_slice(&raw[6..22]);
                NoticeDetails::PortChange { gid: Gid(gid) }
            }
            TRAP_LINK_STATE_CHANGE => NoticeDetails::LinkStateChange {
                lid: u16::from_be_bytes([raw[0], raw[1]]),
            },
            TRAP_CAPABILITY_MASK_CHANGE => NoticeDetails::CapMaskChange {
                lid: u16::from_be_bytes([raw[0], raw[1]]),
                cap_mask: u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]),
            },
            _ => NoticeDetails::Raw(raw.to_vec()),
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        let mut raw = [0; NOTICE_DETAILS_LEN];
        match self {
            NoticeDetails::PortChange { gid } => {
                raw[6..22].copy_from_slice(&gid.0);
            }
            NoticeDetails::LinkStateChange { lid } => {
                raw[0..2].copy_from_slice(&lid.to_be_bytes());
            }
            NoticeDetails::CapMaskChange { lid, cap_mask } => {
                raw[0..2].copy_from_slice(&lid.to_be_bytes());
                raw[4..8].copy_from_slice(&cap_mask.to_be_bytes());
            }
            NoticeDetails::Raw(bytes) => {
                let len = bytes.len().min(NOTICE_DETAILS_LEN);
                raw[..len].copy_from_slice(&bytes[..len]);
            }
        }
        buf.put_slice(&raw);
    }
}
