
pub(crate) mod name;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const UINT16_LEN: usize = 2;

/// A DNS SRV record as delivered to callers.
///
/// All numeric fields are in host byte order.
///
/// ```text
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                   PRIORITY                    |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                    WEIGHT                     |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// |                     PORT                      |
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// /                    TARGET                     /
/// +--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+--+
/// ```
#[derive(Default, Debug, Clone, PartialEq, Eq, Hash)]
pub struct SrvRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Target host name without a trailing dot; `"."` when the service is
    /// decidedly not available at this domain.
    pub target: String,
}

impl fmt::Display for SrvRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.priority, self.weight, self.port, self.target
        )
    }
}

impl SrvRecord {
    pub fn new(priority: u16, weight: u16, port: u16, target: impl Into<String>) -> Self {
        Self {
            priority,
            weight,
            port,
            target: target.into(),
        }
    }

    /// Parses SRV RDATA.
    ///
    /// The target must be an uncompressed name that ends exactly at the end
    /// of `rdata`.
    pub fn unpack(rdata: &[u8]) -> Result<Self> {
        let (priority, off) = unpack_uint16(rdata, 0)?;
        let (weight, off) = unpack_uint16(rdata, off)?;
        let (port, off) = unpack_uint16(rdata, off)?;
        let (target, off) = name::unpack(rdata, off)?;
        if off != rdata.len() {
            return Err(Error::ErrTrailingData);
        }
        Ok(Self {
            priority,
            weight,
            port,
            target,
        })
    }

    /// Encodes the record as SRV RDATA.
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(3 * UINT16_LEN + self.target.len() + 2);
        buf.put_u16(self.priority);
        buf.put_u16(self.weight);
        buf.put_u16(self.port);
        name::pack(&mut buf, &self.target);
        buf.freeze()
    }
}

fn unpack_uint16(msg: &[u8], off: usize) -> Result<(u16, usize)> {
    if off + UINT16_LEN > msg.len() {
        return Err(Error::ErrBaseLen);
    }
    Ok((
        (msg[off] as u16) << 8 | (msg[off + 1] as u16),
        off + UINT16_LEN,
    ))
}
