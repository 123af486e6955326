//! Fixed-size records of the index region.

use std::fmt;
use std::net::IpAddr;

use crate::byte_util::{self, OutOfBounds};

/// Address family of a database. Bit 0 of the super block selects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    Ipv4,
    Ipv6,
}

impl DbType {
    pub fn from_flag(flag: u8) -> Self {
        if flag & 1 == 0 {
            DbType::Ipv4
        } else {
            DbType::Ipv6
        }
    }

    pub fn flag(self) -> u8 {
        match self {
            DbType::Ipv4 => 0,
            DbType::Ipv6 => 1,
        }
    }

    pub fn ip_bytes_len(self) -> usize {
        match self {
            DbType::Ipv4 => 4,
            DbType::Ipv6 => 16,
        }
    }

    /// start ip + end ip + data ptr (4) + data len (1)
    pub fn index_block_len(self) -> usize {
        self.ip_bytes_len() * 2 + 5
    }

    /// Big-endian key bytes for `ip`, or `None` for the other family.
    pub fn ip_bytes(self, ip: IpAddr) -> Option<Vec<u8>> {
        match (self, ip) {
            (DbType::Ipv4, IpAddr::V4(addr)) => Some(addr.octets().to_vec()),
            (DbType::Ipv6, IpAddr::V6(addr)) => Some(addr.octets().to_vec()),
            _ => None,
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbType::Ipv4 => f.write_str("IPv4"),
            DbType::Ipv6 => f.write_str("IPv6"),
        }
    }
}

/// One `[start_ip, end_ip] -> (data_ptr, data_len)` entry.
///
/// ```text
/// +------------+------------+----------+---------+
/// | 4/16 bytes | 4/16 bytes | 4 bytes  | 1 byte  |
/// +------------+------------+----------+---------+
///  start ip     end ip       data ptr   data len
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub start_ip: Vec<u8>,
    pub end_ip: Vec<u8>,
    pub data_ptr: u32,
    pub data_len: u8,
}

impl IndexBlock {
    /// Parses the record at `offset` in `buf`.
    pub fn from_bytes(buf: &[u8], offset: usize, db_type: DbType) -> Result<Self, OutOfBounds> {
        let ip_len = db_type.ip_bytes_len();
        let record = byte_util::slice(buf, offset, db_type.index_block_len())?;
        Ok(IndexBlock {
            start_ip: record[..ip_len].to_vec(),
            end_ip: record[ip_len..ip_len * 2].to_vec(),
            data_ptr: byte_util::get_int_long(record, ip_len * 2)?,
            data_len: byte_util::get_int1(record, ip_len * 2 + 4)? as u8,
        })
    }

    pub fn to_bytes(&self, db_type: DbType) -> Result<Vec<u8>, OutOfBounds> {
        let ip_len = db_type.ip_bytes_len();
        let mut b = vec![0u8; db_type.index_block_len()];
        let start = byte_util::slice(&self.start_ip, 0, ip_len)?;
        let end = byte_util::slice(&self.end_ip, 0, ip_len)?;
        b[..ip_len].copy_from_slice(start);
        b[ip_len..ip_len * 2].copy_from_slice(end);
        byte_util::write_int_long(&mut b, ip_len * 2, self.data_ptr)?;
        byte_util::write(&mut b, ip_len * 2 + 4, self.data_len as u32, 1)?;
        Ok(b)
    }
}

/// Sparse header index entry: start ip of an index block and its pointer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderBlock {
    /// Zero padded to 16 bytes for IPv4 databases.
    pub index_start_ip: [u8; 16],
    pub index_ptr: u32,
}

impl HeaderBlock {
    pub const HEADER_LINE_SIZE: usize = 20;

    pub fn new(start_ip: &[u8], index_ptr: u32) -> Self {
        let mut index_start_ip = [0u8; 16];
        let n = start_ip.len().min(16);
        index_start_ip[..n].copy_from_slice(&start_ip[..n]);
        HeaderBlock {
            index_start_ip,
            index_ptr,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::HEADER_LINE_SIZE] {
        let mut b = [0u8; Self::HEADER_LINE_SIZE];
        b[..16].copy_from_slice(&self.index_start_ip);
        b[16..].copy_from_slice(&self.index_ptr.to_le_bytes());
        b
    }

    /// Reads consecutive 20-byte lines, stopping at the first zero pointer
    /// or at the end of `bytes`. A trailing partial line is ignored.
    pub fn parse_all(bytes: &[u8]) -> Result<Vec<HeaderBlock>, OutOfBounds> {
        let mut blocks = Vec::with_capacity(bytes.len() / Self::HEADER_LINE_SIZE);
        for line in bytes.chunks_exact(Self::HEADER_LINE_SIZE) {
            let index_ptr = byte_util::get_int_long(line, 16)?;
            if index_ptr == 0 {
                break;
            }
            blocks.push(HeaderBlock::new(&line[..16], index_ptr));
        }
        Ok(blocks)
    }
}
