//! License-protected hyper header placed in front of the database content.
//!
//! ```text
//! +---------+-----------+----------------------+-----------------+--------------+
//! | version | client id | encrypted block size | encrypted block | random bytes |
//! |   4B    |    4B     |          4B          |       n B       |     r B      |
//! +---------+-----------+----------------------+-----------------+--------------+
//! ```
//!
//! The encrypted block decrypts (AES-128-ECB, PKCS#7) to a [`DecryptedBlock`]
//! whose random size `r` completes the header length.

use std::path::Path;

use chrono::{Datelike, Utc};

use crate::byte_util;
use crate::decrypt::{decrypt_aes_ecb, encrypt_aes_cbc, encrypt_aes_ecb};
use crate::error::{CzdbError, Result};
use crate::raf::{AccessMode, RandomAccessFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptedBlock {
    /// High 12 bits of the packed word.
    pub client_id: u32,
    /// `YYMMDD`, low 20 bits of the packed word.
    pub expiration_date: u32,
    pub random_size: u32,
}

impl DecryptedBlock {
    pub const SIZE: usize = 16;

    /// Packed word, random size, then 8 reserved zero bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut b = [0u8; Self::SIZE];
        let word = (self.client_id << 20) | (self.expiration_date & 0xFFFFF);
        b[..4].copy_from_slice(&word.to_le_bytes());
        b[4..8].copy_from_slice(&self.random_size.to_le_bytes());
        b
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        let word = byte_util::get_int_long(b, 0)?;
        Ok(DecryptedBlock {
            client_id: word >> 20,
            expiration_date: word & 0xFFFFF,
            random_size: byte_util::get_int_long(b, 4)?,
        })
    }

    /// The form read back by [`DecryptedBlock::decrypt`].
    pub fn to_encrypted_bytes(&self, key: &str) -> Result<Vec<u8>> {
        Ok(encrypt_aes_ecb(key, &self.to_bytes())?)
    }

    /// CBC form for distribution tooling: a random 16-byte IV followed by
    /// the ciphertext. Lookups never read this form.
    pub fn to_encrypted_bytes_cbc(&self, key: &str) -> Result<Vec<u8>> {
        Ok(encrypt_aes_cbc(key, &self.to_bytes())?)
    }

    pub fn decrypt(key: &str, encrypted: &[u8]) -> Result<Self> {
        let decrypted = decrypt_aes_ecb(key, encrypted)?;
        if decrypted.len() < 8 {
            return Err(CzdbError::CorruptDatabase(format!(
                "decrypted license block is {} bytes",
                decrypted.len()
            )));
        }
        Self::from_bytes(&decrypted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HyperHeaderBlock {
    pub version: u32,
    pub client_id: u32,
    pub encrypted_block_size: u32,
    pub decrypted_block: DecryptedBlock,
}

impl HyperHeaderBlock {
    pub const HEADER_SIZE: usize = 12;

    /// The clear 12-byte prefix.
    pub fn to_bytes(&self) -> [u8; Self::HEADER_SIZE] {
        let mut b = [0u8; Self::HEADER_SIZE];
        b[..4].copy_from_slice(&self.version.to_le_bytes());
        b[4..8].copy_from_slice(&self.client_id.to_le_bytes());
        b[8..].copy_from_slice(&self.encrypted_block_size.to_le_bytes());
        b
    }

    /// Parses the clear prefix. The decrypted block is left empty.
    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        Ok(HyperHeaderBlock {
            version: byte_util::get_int_long(b, 0)?,
            client_id: byte_util::get_int_long(b, 4)?,
            encrypted_block_size: byte_util::get_int_long(b, 8)?,
            decrypted_block: DecryptedBlock {
                client_id: 0,
                expiration_date: 0,
                random_size: 0,
            },
        })
    }

    /// Total bytes in front of the database content: the content offset.
    pub fn header_size(&self) -> u64 {
        Self::HEADER_SIZE as u64
            + self.encrypted_block_size as u64
            + self.decrypted_block.random_size as u64
    }

    /// Serializes a complete protected header: clear prefix, ECB-encrypted
    /// license block and `random_size` random bytes.
    pub fn encode(version: u32, license: DecryptedBlock, key: &str) -> Result<Vec<u8>> {
        let encrypted = license.to_encrypted_bytes(key)?;
        let header = HyperHeaderBlock {
            version,
            client_id: license.client_id,
            encrypted_block_size: encrypted.len() as u32,
            decrypted_block: license,
        };

        let mut out = Vec::with_capacity(header.header_size() as usize);
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&encrypted);
        out.extend((0..license.random_size).map(|_| rand::random::<u8>()));
        Ok(out)
    }
}

pub struct HyperHeaderDecoder;

impl HyperHeaderDecoder {
    /// Reads and validates the header against today's UTC date.
    pub fn decrypt<P: AsRef<Path>>(path: P, key: &str) -> Result<HyperHeaderBlock> {
        Self::decrypt_at(path, key, today_yymmdd())
    }

    /// Same as [`HyperHeaderDecoder::decrypt`] with an explicit `YYMMDD` date.
    pub fn decrypt_at<P: AsRef<Path>>(path: P, key: &str, today: u32) -> Result<HyperHeaderBlock> {
        let mut raf = RandomAccessFile::open(path, AccessMode::Read, 0)?;

        let mut header_bytes = [0u8; HyperHeaderBlock::HEADER_SIZE];
        raf.read_fully(&mut header_bytes)?;
        let mut header = HyperHeaderBlock::from_bytes(&header_bytes)?;

        let mut encrypted = vec![0u8; header.encrypted_block_size as usize];
        raf.read_fully(&mut encrypted)?;
        raf.close();

        let decrypted = DecryptedBlock::decrypt(key, &encrypted)?;
        if decrypted.client_id != header.client_id {
            return Err(CzdbError::ClientIdMismatch {
                header: header.client_id,
                decrypted: decrypted.client_id,
            });
        }
        if decrypted.expiration_date < today {
            return Err(CzdbError::Expired {
                expiration: decrypted.expiration_date,
                today,
            });
        }

        header.decrypted_block = decrypted;
        Ok(header)
    }
}

/// Current UTC date as `YYMMDD`, e.g. 240711.
pub fn today_yymmdd() -> u32 {
    let now = Utc::now().date_naive();
    (now.year().rem_euclid(100) as u32) * 10000 + now.month() * 100 + now.day()
}
