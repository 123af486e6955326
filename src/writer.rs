//! Writer for license-protected database files.
//!
//! Content layout produced here:
//!
//! ```text
//! | super block | header index | region payloads | index blocks | column selection | geo map size | geo map |
//! ```
//!
//! The column selection mask always follows the last index block; the geo
//! map size and the XOR-protected geo map follow only when the mask is
//! non-zero.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;

use log::debug;

use crate::block::{DbType, HeaderBlock, IndexBlock};
use crate::byte_util;
use crate::compare::compare_bytes;
use crate::decrypt::decrypt_xor;
use crate::error::{CzdbError, Result};
use crate::header::{DecryptedBlock, HyperHeaderBlock};
use crate::searcher::{END_INDEX_PTR, FILE_SIZE_PTR, FIRST_INDEX_PTR, HEADER_BLOCK_PTR, SUPER_PART_LENGTH};

const MAX_GEO_PTR: usize = 0x00FF_FFFF;

fn encode_err<E: fmt::Display>(e: E) -> CzdbError {
    CzdbError::Encode(e.to_string())
}

#[derive(Debug, Clone)]
struct Record {
    start_ip: Vec<u8>,
    end_ip: Vec<u8>,
    geo: Option<Vec<String>>,
    tail: String,
}

/// Builds database files from sorted, non-overlapping IP ranges.
#[derive(Debug, Clone)]
pub struct DatabaseBuilder {
    db_type: DbType,
    records: Vec<Record>,
    header_interval: usize,
    column_selection: u32,
}

impl DatabaseBuilder {
    pub fn new(db_type: DbType) -> Self {
        DatabaseBuilder {
            db_type,
            records: Vec::new(),
            header_interval: 16,
            column_selection: 0,
        }
    }

    /// Index blocks per header index entry.
    pub fn header_interval(mut self, interval: usize) -> Self {
        self.header_interval = interval.max(1);
        self
    }

    /// Bit `i + 1` selects geo column `i`. Zero disables the geo map.
    pub fn column_selection(mut self, mask: u32) -> Self {
        self.column_selection = mask;
        self
    }

    /// Adds `[start, end]` with a plain region string.
    pub fn add_range(&mut self, start: &str, end: &str, region: &str) -> Result<&mut Self> {
        self.push(start, end, None, region)
    }

    /// Adds `[start, end]` whose region is the selected geo columns followed by `tail`.
    pub fn add_geo_range(
        &mut self,
        start: &str,
        end: &str,
        columns: &[&str],
        tail: &str,
    ) -> Result<&mut Self> {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.push(start, end, Some(columns), tail)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, start: &str, end: &str, geo: Option<Vec<String>>, tail: &str) -> Result<&mut Self> {
        let start_ip = self.parse_ip(start)?;
        let end_ip = self.parse_ip(end)?;
        if compare_bytes(&start_ip, &end_ip, start_ip.len()).is_gt() {
            return Err(CzdbError::Encode(format!("range {start} > {end}")));
        }
        self.records.push(Record {
            start_ip,
            end_ip,
            geo,
            tail: tail.to_string(),
        });
        Ok(self)
    }

    fn parse_ip(&self, ip: &str) -> Result<Vec<u8>> {
        let addr: IpAddr = ip
            .parse()
            .map_err(|e| CzdbError::InvalidAddress(format!("{ip}: {e}")))?;
        self.db_type.ip_bytes(addr).ok_or_else(|| {
            CzdbError::InvalidAddress(format!("{ip} is not an {} address", self.db_type))
        })
    }

    /// Serializes the logical content, the part after the license header.
    pub fn build_content(&self, key: &str) -> Result<Vec<u8>> {
        if self.records.is_empty() {
            return Err(CzdbError::Encode("no ranges added".into()));
        }
        if self.column_selection == 0 && self.records.iter().any(|r| r.geo.is_some()) {
            return Err(CzdbError::Encode(
                "geo columns require a non-zero column selection".into(),
            ));
        }

        let mut records = self.records.clone();
        records.sort_by(|a, b| compare_bytes(&a.start_ip, &b.start_ip, a.start_ip.len()));
        for pair in records.windows(2) {
            if compare_bytes(&pair[0].end_ip, &pair[1].start_ip, pair[0].end_ip.len()).is_ge() {
                return Err(CzdbError::Encode("overlapping ranges".into()));
            }
        }

        let (geo_map, payloads) = self.encode_payloads(&records)?;

        let blen = self.db_type.index_block_len();
        let header_rows: Vec<usize> = (0..records.len())
            .filter(|i| i % self.header_interval == 0 || *i == records.len() - 1)
            .collect();

        let header_len = header_rows.len() * HeaderBlock::HEADER_LINE_SIZE;
        let data_start = SUPER_PART_LENGTH + header_len;
        let payload_len: usize = payloads.iter().map(Vec::len).sum();
        let index_start = data_start + payload_len;
        let last_index_ptr = index_start + (records.len() - 1) * blen;

        let mut content = vec![0u8; SUPER_PART_LENGTH];
        content[0] = self.db_type.flag();

        for &row in &header_rows {
            let header = HeaderBlock::new(&records[row].start_ip, to_u32(index_start + row * blen)?);
            content.extend_from_slice(&header.to_bytes());
        }

        let mut data_ptrs = Vec::with_capacity(payloads.len());
        for payload in &payloads {
            data_ptrs.push(to_u32(content.len())?);
            content.extend_from_slice(payload);
        }

        for ((record, payload), data_ptr) in records.iter().zip(&payloads).zip(data_ptrs) {
            let block = IndexBlock {
                start_ip: record.start_ip.clone(),
                end_ip: record.end_ip.clone(),
                data_ptr,
                data_len: payload.len() as u8,
            };
            content.extend_from_slice(&block.to_bytes(self.db_type).map_err(encode_err)?);
        }

        content.extend_from_slice(&self.column_selection.to_le_bytes());
        if self.column_selection != 0 {
            let mut geo_map = geo_map;
            content.extend_from_slice(&to_u32(geo_map.len())?.to_le_bytes());
            // XOR is its own inverse
            decrypt_xor(key, &mut geo_map)?;
            content.extend_from_slice(&geo_map);
        }

        let file_size = to_u32(content.len())?;
        let super_fields = [
            (FILE_SIZE_PTR, file_size),
            (FIRST_INDEX_PTR, to_u32(index_start)?),
            (HEADER_BLOCK_PTR, to_u32(header_len)?),
            (END_INDEX_PTR, to_u32(last_index_ptr)?),
        ];
        for (ptr, value) in super_fields {
            byte_util::write_int_long(&mut content, ptr as usize, value).map_err(encode_err)?;
        }

        debug!(
            "built {} database: {} ranges, {} header entries, {} bytes",
            self.db_type,
            records.len(),
            header_rows.len(),
            content.len()
        );
        Ok(content)
    }

    /// Region payloads per record, plus the plain geo map they point into.
    fn encode_payloads(&self, records: &[Record]) -> Result<(Vec<u8>, Vec<Vec<u8>>)> {
        let mut geo_map = Vec::new();
        let mut geo_rows: HashMap<&[String], u64> = HashMap::new();
        let mut payloads = Vec::with_capacity(records.len());

        for record in records {
            let geo_pos_mix_size = match &record.geo {
                None => 0,
                Some(columns) => match geo_rows.get(columns.as_slice()) {
                    Some(&mix) => mix,
                    None => {
                        let mut row = Vec::new();
                        rmp::encode::write_array_len(&mut row, columns.len() as u32)
                            .map_err(encode_err)?;
                        for column in columns {
                            rmp::encode::write_str(&mut row, column).map_err(encode_err)?;
                        }
                        if row.len() > 0xFF || geo_map.len() > MAX_GEO_PTR {
                            return Err(CzdbError::Encode("geo map row out of range".into()));
                        }
                        let mix = ((row.len() as u64) << 24) | geo_map.len() as u64;
                        geo_map.extend_from_slice(&row);
                        geo_rows.insert(columns.as_slice(), mix);
                        mix
                    }
                },
            };

            let mut payload = Vec::new();
            rmp::encode::write_uint(&mut payload, geo_pos_mix_size).map_err(encode_err)?;
            rmp::encode::write_str(&mut payload, &record.tail).map_err(encode_err)?;
            if payload.len() > 0xFF {
                return Err(CzdbError::Encode(format!(
                    "region payload of {} bytes exceeds 255",
                    payload.len()
                )));
            }
            payloads.push(payload);
        }

        Ok((geo_map, payloads))
    }

    /// License header followed by the content.
    pub fn build(&self, version: u32, license: DecryptedBlock, key: &str) -> Result<Vec<u8>> {
        let mut out = HyperHeaderBlock::encode(version, license, key)?;
        out.extend_from_slice(&self.build_content(key)?);
        Ok(out)
    }

    pub fn write_to<P: AsRef<Path>>(
        &self,
        path: P,
        version: u32,
        license: DecryptedBlock,
        key: &str,
    ) -> Result<()> {
        std::fs::write(path, self.build(version, license, key)?)?;
        Ok(())
    }
}

fn to_u32(v: usize) -> Result<u32> {
    u32::try_from(v).map_err(|_| CzdbError::Encode(format!("offset {v} exceeds 32 bits")))
}
