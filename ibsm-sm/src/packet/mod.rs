//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod sa;
pub mod smp;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use enum_as_inner::EnumAsInner;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::sa::Sa;
use crate::packet::smp::Smp;

// Base management datagram version.
pub const MAD_BASE_VERSION: u8 = 1;
// Fixed size of a subnet management datagram.
pub const MAD_BLOCK_SIZE: usize = 256;

// Management classes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum MgmtClass {
    SubnLid = 0x01,
    SubnAdm = 0x03,
    Performance = 0x04,
    SubnDirectedRoute = 0x81,
}

// Management datagram methods.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum Method {
    Get = 0x01,
    Set = 0x02,
    Trap = 0x05,
    Report = 0x06,
    TrapRepress = 0x07,
    GetTable = 0x12,
    Delete = 0x15,
    GetResp = 0x81,
    ReportResp = 0x86,
    GetTableResp = 0x92,
    DeleteResp = 0x95,
}

// MAD status field values (common plane).
pub const MAD_STATUS_OK: u16 = 0x0000;
pub const MAD_STATUS_BUSY: u16 = 0x0001;
pub const MAD_STATUS_UNSUP_CLASS_VERSION: u16 = 0x0004;
pub const MAD_STATUS_UNSUP_METHOD: u16 = 0x0008;
pub const MAD_STATUS_UNSUP_METHOD_ATTR: u16 = 0x000C;
pub const MAD_STATUS_INVALID_FIELD: u16 = 0x001C;

// SA-class status values, carried in the class-specific bits of the status
// field.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(FromPrimitive, ToPrimitive)]
#[derive(Deserialize, Serialize)]
pub enum SaStatus {
    #[default]
    Success = 0x0000,
    NoResources = 0x0100,
    ReqInvalid = 0x0200,
    NoRecords = 0x0300,
    TooManyRecords = 0x0400,
    InvalidGid = 0x0500,
    InsufficientComponents = 0x0600,
}

// Common MAD header.
//
// The class-specific 16-bit field at offset 6 holds the directed-route
// hop pointer and hop count for SubnDirectedRoute datagrams and is
// reserved otherwise; it is owned by the SMP body.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct MadHeader {
    pub mgmt_class: MgmtClass,
    pub class_version: u8,
    pub method: Method,
    pub status: u16,
    pub tid: u64,
    pub attr_id: u16,
    pub attr_mod: u32,
}

// A complete management datagram: common header plus the class body.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Mad {
    pub hdr: MadHeader,
    pub body: MadBody,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[derive(EnumAsInner)]
pub enum MadBody {
    Smp(Smp),
    Sa(Sa),
}

// ===== impl Method =====

impl Method {
    pub const fn is_response(&self) -> bool {
        matches!(
            self,
            Method::GetResp
                | Method::ReportResp
                | Method::GetTableResp
                | Method::DeleteResp
        )
    }

    // The response method paired with a request method.
    pub const fn response(&self) -> Option<Method> {
        match self {
            Method::Get | Method::Set => Some(Method::GetResp),
            Method::GetTable => Some(Method::GetTableResp),
            Method::Delete => Some(Method::DeleteResp),
            Method::Report => Some(Method::ReportResp),
            _ => None,
        }
    }
}

// ===== impl MadHeader =====

impl MadHeader {
    pub const LEN: usize = 24;

    // Decodes the common header, returning it together with the raw
    // class-specific field.
    fn decode(buf: &mut Bytes) -> DecodeResult<(Self, u16)> {
        let base_version = buf.try_get_u8()?;
        if base_version != MAD_BASE_VERSION {
            return Err(DecodeError::InvalidBaseVersion(base_version));
        }
        let mgmt_class_raw = buf.try_get_u8()?;
        let mgmt_class = MgmtClass::from_u8(mgmt_class_raw)
            .ok_or(DecodeError::InvalidClass(mgmt_class_raw))?;
        let class_version = buf.try_get_u8()?;
        if class_version != 1 {
            return Err(DecodeError::InvalidClassVersion(class_version));
        }
        let method_raw = buf.try_get_u8()?;
        let method = Method::from_u8(method_raw)
            .ok_or(DecodeError::InvalidMethod(method_raw))?;
        let status = buf.try_get_u16()?;
        let class_specific = buf.try_get_u16()?;
        let tid = buf.try_get_u64()?;
        let attr_id = buf.try_get_u16()?;
        let _reserved = buf.try_get_u16()?;
        let attr_mod = buf.try_get_u32()?;

        let hdr = MadHeader {
            mgmt_class,
            class_version,
            method,
            status,
            tid,
            attr_id,
            attr_mod,
        };
        Ok((hdr, class_specific))
    }

    fn encode(&self, buf: &mut BytesMut, class_specific: u16) {
        buf.put_u8(MAD_BASE_VERSION);
        buf.put_u8(self.mgmt_class as u8);
        buf.put_u8(self.class_version);
        buf.put_u8(self.method as u8);
        buf.put_u16(self.status);
        buf.put_u16(class_specific);
        buf.put_u64(self.tid);
        buf.put_u16(self.attr_id);
        buf.put_u16(0);
        buf.put_u32(self.attr_mod);
    }

    pub fn request(
        mgmt_class: MgmtClass,
        method: Method,
        attr_id: u16,
        attr_mod: u32,
        tid: u64,
    ) -> MadHeader {
        MadHeader {
            mgmt_class,
            class_version: 1,
            method,
            status: MAD_STATUS_OK,
            tid,
            attr_id,
            attr_mod,
        }
    }

    // Builds the response header for this request header.
    pub fn response(&self, status: u16) -> MadHeader {
        let mut hdr = self.clone();
        hdr.method = self.method.response().unwrap_or(Method::GetResp);
        hdr.status = status;
        hdr
    }
}

// ===== impl Mad =====

impl Mad {
    // Decodes a management datagram from a bytes buffer.
    pub fn decode(mut buf: Bytes) -> DecodeResult<Mad> {
        let (hdr, class_specific) = MadHeader::decode(&mut buf)?;

        let body = match hdr.mgmt_class {
            MgmtClass::SubnLid | MgmtClass::SubnDirectedRoute => {
                MadBody::Smp(Smp::decode(&hdr, class_specific, &mut buf)?)
            }
            MgmtClass::SubnAdm => MadBody::Sa(Sa::decode(&hdr, &mut buf)?),
            MgmtClass::Performance => {
                return Err(DecodeError::InvalidClass(
                    MgmtClass::Performance as u8,
                ));
            }
        };

        Ok(Mad { hdr, body })
    }

    // Encodes the datagram into a bytes buffer.
    pub fn encode(&self) -> Bytes {
        ibsm_utils::bytes::TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();

            match &self.body {
                MadBody::Smp(smp) => {
                    self.hdr.encode(&mut buf, smp.class_specific());
                    smp.encode(&mut buf);
                    // SMPs are fixed-size datagrams.
                    buf.resize(MAD_BLOCK_SIZE, 0);
                }
                MadBody::Sa(sa) => {
                    self.hdr.encode(&mut buf, 0);
                    sa.encode(&mut buf);
                }
            }

            buf.clone().freeze()
        })
    }

    pub fn sa(&self) -> Option<&Sa> {
        self.body.as_sa()
    }

    pub fn smp(&self) -> Option<&Smp> {
        self.body.as_smp()
    }
}
