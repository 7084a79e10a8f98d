//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use ibsm_utils::bytes::{BytesExt, BytesMutExt};
use ibsm_utils::ib::{Gid, Lid, Mtu, Pkey, PortNum, Rate, Selector};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::smp::{NodeDescription, NodeInfo, Notice, PortInfo};
use crate::packet::MadHeader;

// Subnet administration attribute identifiers.
pub const ATTR_NOTICE: u16 = 0x0002;
pub const ATTR_INFORM_INFO: u16 = 0x0003;
pub const ATTR_NODE_RECORD: u16 = 0x0011;
pub const ATTR_PORT_INFO_RECORD: u16 = 0x0012;
pub const ATTR_SERVICE_RECORD: u16 = 0x0031;
pub const ATTR_PATH_RECORD: u16 = 0x0035;
pub const ATTR_MC_MEMBER_RECORD: u16 = 0x0038;
pub const ATTR_INFORM_INFO_RECORD: u16 = 0x00F3;

// Service lease value meaning "indefinite".
pub const SERVICE_LEASE_INFINITE: u32 = 0xFFFF_FFFF;

bitflags! {
    // RMPP flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct RmppFlags: u8 {
        const ACTIVE = 1 << 0;
        const FIRST = 1 << 1;
        const LAST = 1 << 2;
    }
}

bitflags! {
    // Multicast JoinState bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct JoinState: u8 {
        const FULL = 1 << 0;
        const NON_MEMBER = 1 << 1;
        const SEND_ONLY_NON_MEMBER = 1 << 2;
    }
}

// RMPP segmentation header.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Rmpp {
    pub flags: RmppFlags,
    pub segment: u32,
    pub paylen: u32,
}

// SA body: RMPP header, SA-specific header and the record payload.
//
// Requests carry at most one record (the match template); GetTable
// responses carry the full record list at a fixed per-record offset.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Sa {
    pub rmpp: Rmpp,
    pub sm_key: u64,
    pub comp_mask: u64,
    pub records: Vec<SaAttr>,
}

// Subnet administration attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SaAttr {
    Notice(Notice),
    InformInfo(InformInfo),
    NodeRecord(NodeRecord),
    PortInfoRecord(PortInfoRecord),
    ServiceRecord(ServiceRecord),
    PathRecord(PathRecord),
    McMemberRecord(McMemberRecord),
    InformInfoRecord(InformInfoRecord),
}

// NodeRecord: LID plus the node's NodeInfo and description.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct NodeRecord {
    pub lid: Lid,
    pub node_info: NodeInfo,
    pub node_desc: NodeDescription,
}

// PortInfoRecord: end-port LID, port number and the port's PortInfo.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PortInfoRecord {
    pub endport_lid: Lid,
    pub port_num: PortNum,
    pub port_info: PortInfo,
}

// PathRecord.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PathRecord {
    pub dgid: Gid,
    pub sgid: Gid,
    pub dlid: Lid,
    pub slid: Lid,
    pub raw_traffic: bool,
    pub flow_label: u32,
    pub hop_limit: u8,
    pub tclass: u8,
    pub reversible: bool,
    pub num_path: u8,
    pub pkey: Pkey,
    pub qos_class: u16,
    pub sl: u8,
    pub mtu_selector: Selector,
    pub mtu: Mtu,
    pub rate_selector: Selector,
    pub rate: Rate,
    pub pkt_life_selector: Selector,
    pub pkt_life: u8,
    pub preference: u8,
}

// MCMemberRecord.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct McMemberRecord {
    pub mgid: Gid,
    pub port_gid: Gid,
    pub qkey: u32,
    pub mlid: Lid,
    pub mtu_selector: Selector,
    pub mtu: Mtu,
    pub tclass: u8,
    pub pkey: Pkey,
    pub rate_selector: Selector,
    pub rate: Rate,
    pub pkt_life_selector: Selector,
    pub pkt_life: u8,
    pub sl: u8,
    pub flow_label: u32,
    pub hop_limit: u8,
    pub scope: u8,
    pub join_state: JoinState,
    pub proxy_join: bool,
}

// ServiceRecord.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct ServiceRecord {
    pub service_id: u64,
    pub service_gid: Gid,
    pub service_pkey: Pkey,
    pub service_lease: u32,
    pub service_key: [u8; 16],
    pub service_name: String,
}

// InformInfo: an event subscription descriptor.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InformInfo {
    pub gid: Gid,
    pub lid_range_begin: Lid,
    pub lid_range_end: Lid,
    pub is_generic: bool,
    pub subscribe: bool,
    // 0xFFFF matches any type.
    pub trap_type: u16,
    // Trap number (generic) or device ID; 0xFFFF matches any.
    pub trap_num: u16,
    pub qpn: u32,
    pub resp_time_value: u8,
    // Producer type (generic) or vendor ID; 0xFFFFFF matches any.
    pub producer_or_vendor: u32,
}

// InformInfoRecord: a stored subscription keyed by subscriber.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InformInfoRecord {
    pub subscriber_gid: Gid,
    pub subscriber_enum: u16,
    pub inform: InformInfo,
}

bitflags! {
    // NodeRecord component mask bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct NodeRecordMask: u64 {
        const LID = 1 << 0;
        const NODE_TYPE = 1 << 4;
        const NUM_PORTS = 1 << 5;
        const SYSTEM_IMAGE_GUID = 1 << 6;
        const NODE_GUID = 1 << 7;
        const PORT_GUID = 1 << 8;
        const PARTITION_CAP = 1 << 9;
        const DEVICE_ID = 1 << 10;
        const REVISION = 1 << 11;
        const LOCAL_PORT_NUM = 1 << 12;
        const VENDOR_ID = 1 << 13;
        const NODE_DESC = 1 << 14;
    }
}

bitflags! {
    // PortInfoRecord component mask bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct PortInfoRecordMask: u64 {
        const ENDPORT_LID = 1 << 0;
        const PORT_NUM = 1 << 1;
        const BASE_LID = 1 << 4;
        const MASTER_SM_BASE_LID = 1 << 5;
        const CAPABILITY_MASK = 1 << 6;
        const LMC = 1 << 7;
        const PORT_STATE = 1 << 8;
        const PHYS_STATE = 1 << 9;
        const MTU_CAP = 1 << 10;
        const SUBNET_TIMEOUT = 1 << 11;
    }
}

bitflags! {
    // PathRecord component mask bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct PathRecordMask: u64 {
        const DGID = 1 << 2;
        const SGID = 1 << 3;
        const DLID = 1 << 4;
        const SLID = 1 << 5;
        const RAW_TRAFFIC = 1 << 6;
        const FLOW_LABEL = 1 << 7;
        const HOP_LIMIT = 1 << 8;
        const TCLASS = 1 << 9;
        const REVERSIBLE = 1 << 10;
        const NUM_PATH = 1 << 11;
        const PKEY = 1 << 12;
        const QOS_CLASS = 1 << 13;
        const SL = 1 << 14;
        const MTU_SELECTOR = 1 << 15;
        const MTU = 1 << 16;
        const RATE_SELECTOR = 1 << 17;
        const RATE = 1 << 18;
        const PKT_LIFE_SELECTOR = 1 << 19;
        const PKT_LIFE = 1 << 20;
        const PREFERENCE = 1 << 21;
    }
}

bitflags! {
    // MCMemberRecord component mask bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct McMemberRecordMask: u64 {
        const MGID = 1 << 0;
        const PORT_GID = 1 << 1;
        const QKEY = 1 << 2;
        const MLID = 1 << 3;
        const MTU_SELECTOR = 1 << 4;
        const MTU = 1 << 5;
        const TCLASS = 1 << 6;
        const PKEY = 1 << 7;
        const RATE_SELECTOR = 1 << 8;
        const RATE = 1 << 9;
        const PKT_LIFE_SELECTOR = 1 << 10;
        const PKT_LIFE = 1 << 11;
        const SL = 1 << 12;
        const FLOW_LABEL = 1 << 13;
        const HOP_LIMIT = 1 << 14;
        const SCOPE = 1 << 15;
        const JOIN_STATE = 1 << 16;
        const PROXY_JOIN = 1 << 17;
    }
}

bitflags! {
    // ServiceRecord component mask bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct ServiceRecordMask: u64 {
        const SERVICE_ID = 1 << 0;
        const SERVICE_GID = 1 << 1;
        const SERVICE_PKEY = 1 << 2;
        const SERVICE_LEASE = 1 << 4;
        const SERVICE_KEY = 1 << 5;
        const SERVICE_NAME = 1 << 6;
    }
}

bitflags! {
    // InformInfoRecord component mask bits.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct InformInfoRecordMask: u64 {
        const SUBSCRIBER_GID = 1 << 0;
        const SUBSCRIBER_ENUM = 1 << 1;
    }
}

// ===== impl Rmpp =====

impl Rmpp {
    // Single-segment response framing.
    pub fn single() -> Rmpp {
        Rmpp {
            flags: RmppFlags::ACTIVE | RmppFlags::FIRST | RmppFlags::LAST,
            segment: 1,
            paylen: 0,
        }
    }

    fn decode(buf: &mut Bytes) -> DecodeResult<Rmpp> {
        let _version = buf.try_get_u8()?;
        let _rmpp_type = buf.try_get_u8()?;
        let flags = RmppFlags::from_bits_retain(buf.try_get_u8()?);
        let _status = buf.try_get_u8()?;
        let segment = buf.try_get_u32()?;
        let paylen = buf.try_get_u32()?;
        Ok(Rmpp {
            flags,
            segment,
            paylen,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(1);
        // RMPP DATA when active.
        buf.put_u8(if self.flags.contains(RmppFlags::ACTIVE) {
            1
        } else {
            0
        });
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u32(self.segment);
        buf.put_u32(self.paylen);
    }
}

// ===== impl Sa =====

impl Sa {
    pub(crate) fn decode(hdr: &MadHeader, buf: &mut Bytes) -> DecodeResult<Sa> {
        let rmpp = Rmpp::decode(buf)?;
        let sm_key = buf.try_get_u64()?;
        let attr_offset = buf.try_get_u16()?;
        let _reserved = buf.try_get_u16()?;
        let comp_mask = buf.try_get_u64()?;

        let rec_len = SaAttr::wire_len(hdr.attr_id)
            .ok_or(DecodeError::InvalidAttribute(hdr.attr_id))?;
        let stride = if attr_offset != 0 {
            let stride = attr_offset as usize * 8;
            if stride < rec_len {
                return Err(DecodeError::InvalidAttrOffset(attr_offset));
            }
            stride
        } else {
            rec_len
        };

        let mut records = vec![];
        while buf.remaining() >= rec_len {
            let mut rec_buf = buf.split_to(stride.min(buf.remaining()));
            records.push(SaAttr::decode(hdr.attr_id, &mut rec_buf)?);
        }

        Ok(Sa {
            rmpp,
            sm_key,
            comp_mask,
            records,
        })
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        self.rmpp.encode(buf);
        buf.put_u64(self.sm_key);
        let stride = self
            .records
            .first()
            .map(|record| record.padded_len())
            .unwrap_or(0);
        buf.put_u16((stride / 8) as u16);
        buf.put_u16(0);
        buf.put_u64(self.comp_mask);

        for record in &self.records {
            let start = buf.len();
            record.encode(buf);
            debug_assert!(buf.len() - start <= stride);
            buf.resize(start + stride, 0);
        }
    }

    // The request match template, when one was supplied.
    pub fn template(&self) -> Option<&SaAttr> {
        self.records.first()
    }
}

// ===== impl SaAttr =====

impl SaAttr {
    pub fn attr_id(&self) -> u16 {
        match self {
            SaAttr::Notice(_) => ATTR_NOTICE,
            SaAttr::InformInfo(_) => ATTR_INFORM_INFO,
            SaAttr::NodeRecord(_) => ATTR_NODE_RECORD,
            SaAttr::PortInfoRecord(_) => ATTR_PORT_INFO_RECORD,
            SaAttr::ServiceRecord(_) => ATTR_SERVICE_RECORD,
            SaAttr::PathRecord(_) => ATTR_PATH_RECORD,
            SaAttr::McMemberRecord(_) => ATTR_MC_MEMBER_RECORD,
            SaAttr::InformInfoRecord(_) => ATTR_INFORM_INFO_RECORD,
        }
    }

    // Unpadded wire length for the given attribute. Returns None for
    // attributes the SA does not serve.
    fn wire_len(attr_id: u16) -> Option<usize> {
        let len = match attr_id {
            ATTR_NOTICE => 80,
            ATTR_INFORM_INFO => 36,
            ATTR_NODE_RECORD => 108,
            ATTR_PORT_INFO_RECORD => 52,
            ATTR_SERVICE_RECORD => 110,
            ATTR_PATH_RECORD => 56,
            ATTR_MC_MEMBER_RECORD => 52,
            ATTR_INFORM_INFO_RECORD => 60,
            _ => return None,
        };
        Some(len)
    }

    // Wire length padded to the 8-byte RMPP record granularity.
    pub fn padded_len(&self) -> usize {
        let len = SaAttr::wire_len(self.attr_id()).unwrap();
        len.next_multiple_of(8)
    }

    fn decode(attr_id: u16, buf: &mut Bytes) -> DecodeResult<SaAttr> {
        let attr = match attr_id {
            ATTR_NOTICE => SaAttr::Notice(Notice::decode(buf, true)?),
            ATTR_INFORM_INFO => {
                SaAttr::InformInfo(InformInfo::decode(buf)?)
            }
            ATTR_NODE_RECORD => SaAttr::NodeRecord(NodeRecord::decode(buf)?),
            ATTR_PORT_INFO_RECORD => {
                SaAttr::PortInfoRecord(PortInfoRecord::decode(buf)?)
            }
            ATTR_SERVICE_RECORD => {
                SaAttr::ServiceRecord(ServiceRecord::decode(buf)?)
            }
            ATTR_PATH_RECORD => SaAttr::PathRecord(PathRecord::decode(buf)?),
            ATTR_MC_MEMBER_RECORD => {
                SaAttr::McMemberRecord(McMemberRecord::decode(buf)?)
            }
            ATTR_INFORM_INFO_RECORD => {
                SaAttr::InformInfoRecord(InformInfoRecord::decode(buf)?)
            }
            _ => return Err(DecodeError::InvalidAttribute(attr_id)),
        };
        Ok(attr)
    }

    fn encode(&self, buf: &mut BytesMut) {
        match self {
            SaAttr::Notice(notice) => notice.encode(buf, true),
            SaAttr::InformInfo(info) => info.encode(buf),
            SaAttr::NodeRecord(record) => record.encode(buf),
            SaAttr::PortInfoRecord(record) => record.encode(buf),
            SaAttr::ServiceRecord(record) => record.encode(buf),
            SaAttr::PathRecord(record) => record.encode(buf),
            SaAttr::McMemberRecord(record) => record.encode(buf),
            SaAttr::InformInfoRecord(record) => record.encode(buf),
        }
    }
}

// ===== impl NodeRecord =====

impl NodeRecord {
    fn decode(buf: &mut Bytes) -> DecodeResult<NodeRecord> {
        let lid = buf.try_get_u16()?;
        let _reserved = buf.try_get_u16()?;
        // NodeInfo and NodeDescription reuse the SMP attribute layouts.
        let mut ni_buf = buf.split_to(40.min(buf.remaining()));
        let node_info = NodeInfo::decode(&mut ni_buf)?;
        let node_desc = NodeDescription::decode(buf)?;
        Ok(NodeRecord {
            lid,
            node_info,
            node_desc,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.lid);
        buf.put_u16(0);
        self.node_info.encode(buf);
        self.node_desc.encode(buf);
    }
}

// ===== impl PortInfoRecord =====

impl PortInfoRecord {
    fn decode(buf: &mut Bytes) -> DecodeResult<PortInfoRecord> {
        let endport_lid = buf.try_get_u16()?;
        let port_num = buf.try_get_u8()?;
        let _reserved = buf.try_get_u8()?;
        let port_info = PortInfo::decode(buf)?;
        Ok(PortInfoRecord {
            endport_lid,
            port_num,
            port_info,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.endport_lid);
        buf.put_u8(self.port_num);
        buf.put_u8(0);
        self.port_info.encode(buf);
    }
}

// ===== impl PathRecord =====

impl PathRecord {
    fn decode(buf: &mut Bytes) -> DecodeResult<PathRecord> {
        let dgid = buf.try_get_gid()?;
        let sgid = buf.try_get_gid()?;
        let dlid = buf.try_get_u16()?;
        let slid = buf.try_get_u16()?;
        let raw_flow_hop = buf.try_get_u32()?;
        let tclass = buf.try_get_u8()?;
        let rev_numpath = buf.try_get_u8()?;
        let pkey = Pkey(buf.try_get_u16()?);
        let qos_sl = buf.try_get_u16()?;
        let (mtu_selector, mtu_raw) = Selector::decode(buf.try_get_u8()?);
        let (rate_selector, rate_raw) = Selector::decode(buf.try_get_u8()?);
        let (pkt_life_selector, pkt_life) =
            Selector::decode(buf.try_get_u8()?);
        let preference = buf.try_get_u8()?;
        if buf.remaining() < 6 {
            return Err(DecodeError::IncompletePacket);
        }
        buf.advance(6);

        Ok(PathRecord {
            dgid,
            sgid,
            dlid,
            slid,
            raw_traffic: raw_flow_hop & 0x8000_0000 != 0,
            flow_label: (raw_flow_hop >> 8) & 0x000F_FFFF,
            hop_limit: (raw_flow_hop & 0xFF) as u8,
            tclass,
            reversible: rev_numpath & 0x80 != 0,
            num_path: rev_numpath & 0x7F,
            pkey,
            qos_class: qos_sl >> 4,
            sl: (qos_sl & 0x0F) as u8,
            mtu_selector,
            mtu: Mtu::from_u8(mtu_raw).unwrap_or_default(),
            rate_selector,
            rate: Rate::from_u8(rate_raw).unwrap_or_default(),
            pkt_life_selector,
            pkt_life,
            preference,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_gid(&self.dgid);
        buf.put_gid(&self.sgid);
        buf.put_u16(self.dlid);
        buf.put_u16(self.slid);
        let mut raw_flow_hop = ((self.flow_label & 0x000F_FFFF) << 8)
            | (self.hop_limit as u32);
        if self.raw_traffic {
            raw_flow_hop |= 0x8000_0000;
        }
        buf.put_u32(raw_flow_hop);
        buf.put_u8(self.tclass);
        let mut rev_numpath = self.num_path & 0x7F;
        if self.reversible {
            rev_numpath |= 0x80;
        }
        buf.put_u8(rev_numpath);
        buf.put_u16(self.pkey.0);
        buf.put_u16((self.qos_class << 4) | (self.sl as u16 & 0x0F));
        buf.put_u8(self.mtu_selector.encode(self.mtu as u8));
        buf.put_u8(self.rate_selector.encode(self.rate as u8));
        buf.put_u8(self.pkt_life_selector.encode(self.pkt_life));
        buf.put_u8(self.preference);
        buf.put_bytes(0, 6);
    }
}

// ===== impl McMemberRecord =====

impl McMemberRecord {
    fn decode(buf: &mut Bytes) -> DecodeResult<McMemberRecord> {
        let mgid = buf.try_get_gid()?;
        let port_gid = buf.try_get_gid()?;
        let qkey = buf.try_get_u32()?;
        let mlid = buf.try_get_u16()?;
        let (mtu_selector, mtu_raw) = Selector::decode(buf.try_get_u8()?);
        let tclass = buf.try_get_u8()?;
        let pkey = Pkey(buf.try_get_u16()?);
        let (rate_selector, rate_raw) = Selector::decode(buf.try_get_u8()?);
        let (pkt_life_selector, pkt_life) =
            Selector::decode(buf.try_get_u8()?);
        let sl_flow_hop = buf.try_get_u32()?;
        let scope_join = buf.try_get_u8()?;
        let proxy = buf.try_get_u8()?;
        let _reserved = buf.try_get_u16()?;

        Ok(McMemberRecord {
            mgid,
            port_gid,
            qkey,
            mlid,
            mtu_selector,
            mtu: Mtu::from_u8(mtu_raw).unwrap_or_default(),
            tclass,
            pkey,
            rate_selector,
            rate: Rate::from_u8(rate_raw).unwrap_or_default(),
            pkt_life_selector,
            pkt_life,
            sl: (sl_flow_hop >> 28) as u8,
            flow_label: (sl_flow_hop >> 8) & 0x000F_FFFF,
            hop_limit: (sl_flow_hop & 0xFF) as u8,
            scope: scope_join >> 4,
            join_state: JoinState::from_bits_retain(scope_join & 0x0F),
            proxy_join: proxy & 0x80 != 0,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_gid(&self.mgid);
        buf.put_gid(&self.port_gid);
        buf.put_u32(self.qkey);
        buf.put_u16(self.mlid);
        buf.put_u8(self.mtu_selector.encode(self.mtu as u8));
        buf.put_u8(self.tclass);
        buf.put_u16(self.pkey.0);
        buf.put_u8(self.rate_selector.encode(self.rate as u8));
        buf.put_u8(self.pkt_life_selector.encode(self.pkt_life));
        buf.put_u32(
            ((self.sl as u32) << 28)
                | ((self.flow_label & 0x000F_FFFF) << 8)
                | (self.hop_limit as u32),
        );
        buf.put_u8((self.scope << 4) | self.join_state.bits());
        buf.put_u8(if self.proxy_join { 0x80 } else { 0 });
        buf.put_u16(0);
    }

    // The scope/state byte as stored in the group membership database.
    pub fn scope_state(&self) -> u8 {
        (self.scope << 4) | self.join_state.bits()
    }
}

// ===== impl ServiceRecord =====

impl ServiceRecord {
    const NAME_LEN: usize = 64;

    fn decode(buf: &mut Bytes) -> DecodeResult<ServiceRecord> {
        let service_id = buf.try_get_u64()?;
        let service_gid = buf.try_get_gid()?;
        let service_pkey = Pkey(buf.try_get_u16()?);
        let service_lease = buf.try_get_u32()?;
        let mut service_key = [0; 16];
        buf.try_copy_to_slice(&mut service_key)?;
        let mut raw_name = [0; Self::NAME_LEN];
        buf.try_copy_to_slice(&mut raw_name)?;
        let end = raw_name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(Self::NAME_LEN);
        let service_name =
            String::from_utf8_lossy(&raw_name[..end]).into_owned();

        Ok(ServiceRecord {
            service_id,
            service_gid,
            service_pkey,
            service_lease,
            service_key,
            service_name,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64(self.service_id);
        buf.put_gid(&self.service_gid);
        buf.put_u16(self.service_pkey.0);
        buf.put_u32(self.service_lease);
        buf.put_slice(&self.service_key);
        let mut raw_name = [0; Self::NAME_LEN];
        let bytes = self.service_name.as_bytes();
        let len = bytes.len().min(Self::NAME_LEN);
        raw_name[..len].copy_from_slice(&bytes[..len]);
        buf.put_slice(&raw_name);
    }
}

// ===== impl InformInfo =====

impl InformInfo {
    fn decode(buf: &mut Bytes) -> DecodeResult<InformInfo> {
        let gid = buf.try_get_gid()?;
        let lid_range_begin = buf.try_get_u16()?;
        let lid_range_end = buf.try_get_u16()?;
        let _reserved = buf.try_get_u16()?;
        let is_generic = buf.try_get_u8()? != 0;
        let subscribe = buf.try_get_u8()? != 0;
        let trap_type = buf.try_get_u16()?;
        let trap_num = buf.try_get_u16()?;
        let qpn_resptime = buf.try_get_u32()?;
        let producer = buf.try_get_u32()?;

        Ok(InformInfo {
            gid,
            lid_range_begin,
            lid_range_end,
            is_generic,
            subscribe,
            trap_type,
            trap_num,
            qpn: qpn_resptime >> 8,
            resp_time_value: (qpn_resptime & 0x1F) as u8,
            producer_or_vendor: producer & 0x00FF_FFFF,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_gid(&self.gid);
        buf.put_u16(self.lid_range_begin);
        buf.put_u16(self.lid_range_end);
        buf.put_u16(0);
        buf.put_u8(self.is_generic as u8);
        buf.put_u8(self.subscribe as u8);
        buf.put_u16(self.trap_type);
        buf.put_u16(self.trap_num);
        buf.put_u32(
            (self.qpn << 8) | (self.resp_time_value as u32 & 0x1F),
        );
        buf.put_u32(self.producer_or_vendor & 0x00FF_FFFF);
    }
}

// ===== impl InformInfoRecord =====

impl InformInfoRecord {
    fn decode(buf: &mut Bytes) -> DecodeResult<InformInfoRecord> {
        let subscriber_gid = buf.try_get_gid()?;
        let subscriber_enum = buf.try_get_u16()?;
        if buf.remaining() < 6 {
            return Err(DecodeError::IncompletePacket);
        }
        buf.advance(6);
        let inform = InformInfo::decode(buf)?;
        Ok(InformInfoRecord {
            subscriber_gid,
            subscriber_enum,
            inform,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_gid(&self.subscriber_gid);
        buf.put_u16(self.subscriber_enum);
        buf.put_bytes(0, 6);
        self.inform.encode(buf);
    }
}
