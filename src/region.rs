//! Region payload decoding.
//!
//! A payload is two msgpack values written back to back: an unsigned
//! `geo_pos_mix_size` and a string tail. A non-zero mix value packs a
//! length (high 8 bits) and pointer (low 24 bits) into the decrypted geo
//! map, which holds a msgpack array of column strings.

use std::io::Cursor;

use log::debug;
use thiserror::Error;

use crate::byte_util::{self, OutOfBounds};

#[derive(Error, Debug)]
enum RegionError {
    #[error("msgpack decode error: {0}")]
    Msgpack(#[from] rmp::decode::ValueReadError),
    #[error("msgpack integer decode error: {0}")]
    MsgpackInt(#[from] rmp::decode::NumValueReadError),
    #[error("payload overrun: {0}")]
    OutOfBounds(#[from] OutOfBounds),
    #[error("geo map is not loaded")]
    MissingGeoMap,
}

/// Raw payload bytes of a matched index record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    region: Vec<u8>,
    data_ptr: u32,
}

impl DataBlock {
    pub fn new(region: Vec<u8>, data_ptr: u32) -> Self {
        DataBlock { region, data_ptr }
    }

    pub fn data_ptr(&self) -> u32 {
        self.data_ptr
    }

    pub fn region_bytes(&self) -> &[u8] {
        &self.region
    }

    /// Decoded, tab-delimited region string.
    ///
    /// Returns `None` when the payload references a geo map that is not
    /// loaded or when any part fails to decode.
    pub fn get_region(&self, geo_map_data: Option<&[u8]>, column_selection: u32) -> Option<String> {
        match self.unpack(geo_map_data, column_selection) {
            Ok(region) => Some(region),
            Err(e) => {
                debug!("region at {:#x} not decoded: {}", self.data_ptr, e);
                None
            }
        }
    }

    fn unpack(&self, geo_map_data: Option<&[u8]>, column_selection: u32) -> Result<String, RegionError> {
        let mut buf = Cursor::new(self.region.as_slice());

        let geo_pos_mix_size: u64 = rmp::decode::read_int(&mut buf)?;
        let other_data = read_str(&mut buf)?;

        if geo_pos_mix_size == 0 {
            return Ok(other_data);
        }

        let data_len = ((geo_pos_mix_size >> 24) & 0xFF) as usize;
        let data_ptr = (geo_pos_mix_size & 0x00FF_FFFF) as usize;

        let geo_map_data = geo_map_data.ok_or(RegionError::MissingGeoMap)?;
        let data_row = byte_util::slice(geo_map_data, data_ptr, data_len)?;

        let mut result = String::with_capacity(64);
        let mut buf = Cursor::new(data_row);
        let columns = rmp::decode::read_array_len(&mut buf)?;
        for i in 0..columns {
            let value = read_str(&mut buf)?;
            if column_selection.checked_shr(i + 1).unwrap_or(0) & 1 == 1 {
                if value.trim().is_empty() {
                    result.push_str("null");
                } else {
                    result.push_str(&value);
                }
                result.push('\t');
            }
        }

        result.push_str(&other_data);
        Ok(result)
    }
}

fn read_str(buf: &mut Cursor<&[u8]>) -> Result<String, RegionError> {
    let len = rmp::decode::read_str_len(buf)? as usize;
    let pos = buf.position() as usize;
    let data: &[u8] = buf.get_ref();
    let value = String::from_utf8_lossy(byte_util::slice(data, pos, len)?).into_owned();
    buf.set_position((pos + len) as u64);
    Ok(value)
}
