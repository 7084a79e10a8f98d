//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;

use bytes::{Buf, BufMut, Bytes, BytesMut, TryGetError};

use crate::ib::{Gid, Guid};

thread_local!(
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(65536))
);

// Extension methods for Bytes.
pub trait BytesExt {
    /// Gets a GUID from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 8.
    ///
    /// # Panics
    ///
    /// This function panics if there is no more remaining data in `self`.
    fn get_guid(&mut self) -> Guid;

    /// Gets a GUID from `self` in big-endian byte order.
    ///
    /// The current position is advanced by 8.
    ///
    /// Returns `Err(TryGetError)` when there are not enough remaining bytes to
    /// read the value.
    fn try_get_guid(&mut self) -> Result<Guid, TryGetError>;

    /// Gets a GID from `self`.
    ///
    /// The current position is advanced by 16.
    ///
    /// # Panics
    ///
    /// This function panics if there is no more remaining data in `self`.
    fn get_gid(&mut self) -> Gid;

    /// Gets a GID from `self`.
    ///
    /// The current position is advanced by 16.
    ///
    /// Returns `Err(TryGetError)` when there are not enough remaining bytes to
    /// read the value.
    fn try_get_gid(&mut self) -> Result<Gid, TryGetError>;
}

// Extension methods for BytesMut.
pub trait BytesMutExt {
    /// Writes a GUID to `self` in big-endian byte order.
    ///
    /// The current position is advanced by 8.
    fn put_guid(&mut self, guid: Guid);

    /// Writes a GID to `self`.
    ///
    /// The current position is advanced by 16.
    fn put_gid(&mut self, gid: &Gid);
}

// ===== impl Bytes =====

impl BytesExt for Bytes {
    fn get_guid(&mut self) -> Guid {
        self.try_get_guid().unwrap()
    }

    fn try_get_guid(&mut self) -> Result<Guid, TryGetError> {
        Ok(Guid(self.try_get_u64()?))
    }

    fn get_gid(&mut self) -> Gid {
        self.try_get_gid().unwrap()
    }

    fn try_get_gid(&mut self) -> Result<Gid, TryGetError> {
        let mut raw = [0; 16];
        self.try_copy_to_slice(&mut raw)?;
        Ok(Gid(raw))
    }
}

// ===== impl BytesMut =====

impl BytesMutExt for BytesMut {
    fn put_guid(&mut self, guid: Guid) {
        self.put_u64(guid.0);
    }

    fn put_gid(&mut self, gid: &Gid) {
        self.put_slice(&gid.0);
    }
}
