use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::io::Cursor;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;

use byteorder::{ReadBytesExt, LE};
use log::{debug, trace};
use parking_lot::Mutex;

use crate::block::{DbType, HeaderBlock, IndexBlock};
use crate::byte_util;
use crate::compare::compare_bytes;
use crate::decrypt::decrypt_xor;
use crate::error::{CzdbError, Result};
use crate::header::{HyperHeaderBlock, HyperHeaderDecoder};
use crate::raf::{AccessMode, RandomAccessFile};
use crate::region::DataBlock;

pub const FILE_SIZE_PTR: u64 = 1;
pub const FIRST_INDEX_PTR: u64 = 5;
pub const HEADER_BLOCK_PTR: u64 = 9;
pub const END_INDEX_PTR: u64 = 13;
pub const SUPER_PART_LENGTH: usize = 17;

/// How a [`DbSearcher`] reaches the database content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    /// The whole content is loaded into memory and the file is closed.
    Memory,
    /// The file stays open; each query reads one index window and one payload.
    BTree,
}

impl FromStr for SearchMode {
    type Err = CzdbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(SearchMode::Memory),
            "btree" | "b-tree" => Ok(SearchMode::BTree),
            _ => Err(CzdbError::InvalidSearchMode(s.to_string())),
        }
    }
}

/// 0 = memory, 1 = btree.
impl TryFrom<u8> for SearchMode {
    type Error = CzdbError;

    fn try_from(mode: u8) -> Result<Self> {
        match mode {
            0 => Ok(SearchMode::Memory),
            1 => Ok(SearchMode::BTree),
            other => Err(CzdbError::InvalidSearchMode(other.to_string())),
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchMode::Memory => f.write_str("memory"),
            SearchMode::BTree => f.write_str("btree"),
        }
    }
}

/// The fixed 17-byte structure at content position 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SuperBlock {
    db_type: DbType,
    file_size: u32,
    first_index_ptr: u32,
    header_block_size: u32,
    last_index_ptr: u32,
}

impl SuperBlock {
    fn from_bytes(b: &[u8]) -> Result<Self> {
        if b.len() < SUPER_PART_LENGTH {
            return Err(CzdbError::CorruptDatabase(format!(
                "super block needs {SUPER_PART_LENGTH} bytes, got {}",
                b.len()
            )));
        }
        let mut rd = Cursor::new(b);
        Ok(SuperBlock {
            db_type: DbType::from_flag(rd.read_u8()?),
            file_size: rd.read_u32::<LE>()?,
            first_index_ptr: rd.read_u32::<LE>()?,
            header_block_size: rd.read_u32::<LE>()?,
            last_index_ptr: rd.read_u32::<LE>()?,
        })
    }

    fn check_file_size(&self, real: u64) -> Result<()> {
        if self.file_size as u64 != real {
            return Err(CzdbError::CorruptDatabase(format!(
                "db file size error, expected {}, real {}",
                self.file_size, real
            )));
        }
        Ok(())
    }

    /// The header index must fit after the super block, the index blocks
    /// must be whole records from first to last, and the column selection
    /// mask must fit after the last one.
    fn check_layout(&self, real: u64) -> Result<()> {
        let blen = self.db_type.index_block_len() as u64;
        let (first, last) = (self.first_index_ptr as u64, self.last_index_ptr as u64);

        let header_end = SUPER_PART_LENGTH as u64 + self.header_block_size as u64;
        if header_end > real {
            return Err(CzdbError::CorruptDatabase(format!(
                "header index ends at {header_end}, past content length {real}"
            )));
        }
        if first < header_end || last < first || (last - first) % blen != 0 {
            return Err(CzdbError::CorruptDatabase(format!(
                "index pointers {first}..={last} do not span whole {blen}-byte blocks"
            )));
        }
        if last + blen + 4 > real {
            return Err(CzdbError::CorruptDatabase(format!(
                "last index block at {last} leaves no column selection in {real} bytes"
            )));
        }
        Ok(())
    }
}

/// Where index windows and payloads are read from.
trait DataSource {
    fn read_range(&mut self, position: u64, len: usize) -> Result<Cow<'_, [u8]>>;
}

impl DataSource for &[u8] {
    fn read_range(&mut self, position: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let position = usize::try_from(position).map_err(|_| {
            CzdbError::CorruptDatabase(format!("position {position} is not addressable"))
        })?;
        Ok(Cow::Borrowed(byte_util::slice(*self, position, len)?))
    }
}

impl DataSource for RandomAccessFile {
    fn read_range(&mut self, position: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let mut buf = vec![0u8; len];
        self.seek(position);
        self.read_fully(&mut buf)?;
        Ok(Cow::Owned(buf))
    }
}

enum Storage {
    Memory(Vec<u8>),
    File(Mutex<RandomAccessFile>),
    Closed,
}

/// Searcher over a license-protected CZDB file.
///
/// # Concurrency
///
/// In [`SearchMode::Memory`] all state is immutable after [`DbSearcher::open`]
/// and queries from many threads run in parallel.
///
/// In [`SearchMode::BTree`] the searcher owns one file handle with a single
/// cursor. Queries lock it for their seek+read pairs, so concurrent callers
/// are serialized; open one searcher per worker for parallel throughput.
pub struct DbSearcher {
    db_type: DbType,
    search_mode: SearchMode,
    header_size: u64,
    header_blocks: Vec<HeaderBlock>,
    first_index_ptr: u32,
    last_index_ptr: u32,
    column_selection: u32,
    geo_map_data: Option<Vec<u8>>,
    storage: Storage,
}

impl DbSearcher {
    /// Decrypts the license header, validates the file and builds the
    /// header index. Any failure closes whatever was opened.
    pub fn open<P: AsRef<Path>>(path: P, search_mode: SearchMode, key: &str) -> Result<Self> {
        let header = HyperHeaderDecoder::decrypt(path.as_ref(), key)?;
        Self::open_with_header(path.as_ref(), search_mode, key, &header)
    }

    /// Opens past an already validated license header.
    pub fn open_with_header<P: AsRef<Path>>(
        path: P,
        search_mode: SearchMode,
        key: &str,
        header: &HyperHeaderBlock,
    ) -> Result<Self> {
        let header_size = header.header_size();
        let mut raf = RandomAccessFile::open(path, AccessMode::Read, header_size)?;

        let length = raf.length()?;
        if length < SUPER_PART_LENGTH as u64 {
            return Err(CzdbError::CorruptDatabase(format!(
                "content of {length} bytes has no super block"
            )));
        }

        let mut super_bytes = [0u8; SUPER_PART_LENGTH];
        raf.seek(0);
        raf.read_fully(&mut super_bytes)?;
        let super_block = SuperBlock::from_bytes(&super_bytes)?;
        super_block.check_file_size(length)?;
        super_block.check_layout(length)?;
        let db_type = super_block.db_type;

        let (column_selection, geo_map_data) = Self::load_geo_setting(&mut raf, &super_block, key)?;

        let (storage, header_blocks) = match search_mode {
            SearchMode::Memory => {
                let length = usize::try_from(length).map_err(|_| {
                    CzdbError::CorruptDatabase("database does not fit in memory".into())
                })?;
                let mut data = vec![0u8; length];
                raf.seek(0);
                raf.read_fully(&mut data)?;
                raf.close();

                let header_blocks = Self::init_header(&mut data.as_slice(), &super_block)?;
                (Storage::Memory(data), header_blocks)
            }
            SearchMode::BTree => {
                let header_blocks = Self::init_header(&mut raf, &super_block)?;
                (Storage::File(Mutex::new(raf)), header_blocks)
            }
        };

        debug!(
            "opened {} database in {} mode: content offset {}, {} header entries, column selection {:#x}, geo map {} bytes",
            db_type,
            search_mode,
            header_size,
            header_blocks.len(),
            column_selection,
            geo_map_data.as_ref().map_or(0, Vec::len)
        );

        Ok(DbSearcher {
            db_type,
            search_mode,
            header_size,
            header_blocks,
            first_index_ptr: super_block.first_index_ptr,
            last_index_ptr: super_block.last_index_ptr,
            column_selection,
            geo_map_data,
            storage,
        })
    }

    /// Reads the column selection mask after the last index block and, if
    /// it is non-zero, the XOR-protected geo map that follows it.
    fn load_geo_setting(
        raf: &mut RandomAccessFile,
        super_block: &SuperBlock,
        key: &str,
    ) -> Result<(u32, Option<Vec<u8>>)> {
        let mut data = [0u8; 4];

        let column_selection_ptr =
            super_block.last_index_ptr as u64 + super_block.db_type.index_block_len() as u64;
        raf.seek(column_selection_ptr);
        raf.read_fully(&mut data)?;
        let column_selection = byte_util::get_int_long(&data, 0)?;

        // no geo mapping
        if column_selection == 0 {
            return Ok((0, None));
        }

        let length = raf.length()?;
        if column_selection_ptr + 8 > length {
            return Err(CzdbError::CorruptDatabase("geo map size is missing".into()));
        }
        raf.read_fully(&mut data)?;
        let geo_map_size = byte_util::get_int_long(&data, 0)?;

        let geo_map_end = column_selection_ptr + 8 + geo_map_size as u64;
        if geo_map_end > length {
            return Err(CzdbError::CorruptDatabase(format!(
                "geo map of {geo_map_size} bytes ends at {geo_map_end}, past content length {length}"
            )));
        }
        let mut geo_map_data = vec![0u8; geo_map_size as usize];
        raf.read_fully(&mut geo_map_data)?;
        decrypt_xor(key, &mut geo_map_data)?;

        Ok((column_selection, Some(geo_map_data)))
    }

    /// Builds the header index. Every entry must point at an index block.
    fn init_header<S: DataSource>(source: &mut S, super_block: &SuperBlock) -> Result<Vec<HeaderBlock>> {
        let header_bytes =
            source.read_range(SUPER_PART_LENGTH as u64, super_block.header_block_size as usize)?;
        let header_blocks = HeaderBlock::parse_all(&header_bytes)?;
        if header_blocks.is_empty() {
            return Err(CzdbError::CorruptDatabase("empty header index".into()));
        }

        let blen = super_block.db_type.index_block_len() as u32;
        let (first, last) = (super_block.first_index_ptr, super_block.last_index_ptr);
        if let Some(bad) = header_blocks
            .iter()
            .find(|h| h.index_ptr < first || h.index_ptr > last || (h.index_ptr - first) % blen != 0)
        {
            return Err(CzdbError::CorruptDatabase(format!(
                "header index entry points at {}, outside index blocks {first}..={last}",
                bad.index_ptr
            )));
        }
        Ok(header_blocks)
    }

    /// Looks up `ip` and returns its decoded region.
    ///
    /// `Ok(None)` means no record covers the address, or its region could
    /// not be decoded. Malformed addresses and addresses of the other family
    /// fail with [`CzdbError::InvalidAddress`]; the searcher stays usable.
    pub fn search(&self, ip: &str) -> Result<Option<String>> {
        Ok(self.search_block(ip)?.and_then(|block| {
            block.get_region(self.geo_map_data.as_deref(), self.column_selection)
        }))
    }

    /// Looks up `ip` and returns the raw payload of the covering record.
    pub fn search_block(&self, ip: &str) -> Result<Option<DataBlock>> {
        let ip_bytes = self.ip_bytes(ip)?;

        match &self.storage {
            Storage::Memory(data) => self.find_data_block(&mut data.as_slice(), &ip_bytes),
            Storage::File(raf) => {
                let mut raf = raf.lock();
                self.find_data_block(&mut *raf, &ip_bytes)
            }
            Storage::Closed => Err(CzdbError::Closed),
        }
    }

    pub fn search_many(&self, ips: &[&str]) -> Vec<Result<Option<String>>> {
        ips.iter().map(|ip| self.search(ip)).collect()
    }

    fn ip_bytes(&self, ip: &str) -> Result<Vec<u8>> {
        let addr = IpAddr::from_str(ip).map_err(|e| CzdbError::InvalidAddress(format!("{ip}: {e}")))?;
        self.db_type.ip_bytes(addr).ok_or_else(|| {
            CzdbError::InvalidAddress(format!("{ip} is not an {} address", self.db_type))
        })
    }

    fn find_data_block<S: DataSource>(&self, source: &mut S, ip: &[u8]) -> Result<Option<DataBlock>> {
        let (sptr, eptr) = self.search_in_header(ip);
        if sptr == 0 {
            return Ok(None);
        }

        let blen = self.db_type.index_block_len() as u64;
        let (sptr, eptr) = (sptr as u64, eptr as u64);
        let last_index_ptr = self.last_index_ptr as u64;
        if eptr < sptr || sptr > last_index_ptr {
            return Err(CzdbError::CorruptDatabase(format!(
                "header index window {sptr}..{eptr} outside index blocks ending at {last_index_ptr}"
            )));
        }

        // include the right border block, never past the last index block
        let end = (eptr + blen).min(last_index_ptr + blen);
        trace!("index window {}..{} for {:?}", sptr, end, ip);

        let found = {
            let index_buffer = source.read_range(sptr, (end - sptr) as usize)?;
            self.search_index_blocks(&index_buffer, ip)?
        };

        // not matched
        let Some((data_ptr, data_len)) = found else {
            return Ok(None);
        };
        if data_ptr == 0 {
            return Ok(None);
        }

        let region = source.read_range(data_ptr as u64, data_len as usize)?.into_owned();
        Ok(Some(DataBlock::new(region, data_ptr)))
    }

    /// Locates the `[sptr, eptr]` pointer pair bracketing `ip`.
    /// `sptr == 0` means the address is below the first header entry.
    fn search_in_header(&self, ip: &[u8]) -> (u32, u32) {
        let headers = &self.header_blocks;
        let ip_len = self.db_type.ip_bytes_len();

        let (mut l, mut h) = (0isize, headers.len() as isize - 1);
        while l <= h {
            let m = (l + h) >> 1;
            let mu = m as usize;
            match compare_bytes(ip, &headers[mu].index_start_ip, ip_len) {
                Ordering::Less => h = m - 1,
                Ordering::Greater => l = m + 1,
                Ordering::Equal => {
                    return (headers[mu.saturating_sub(1)].index_ptr, headers[mu].index_ptr);
                }
            }
        }

        // less than header range
        if l == 0 {
            return (0, 0);
        }

        let l = l as usize;
        if l < headers.len() {
            (headers[l - 1].index_ptr, headers[l].index_ptr)
        } else {
            // past the last header line, possibly in the last index block
            let sptr = headers[headers.len() - 1].index_ptr;
            (sptr, sptr.saturating_add(self.db_type.index_block_len() as u32))
        }
    }

    /// Binary search over consecutive index blocks in `buf`.
    fn search_index_blocks(&self, buf: &[u8], ip: &[u8]) -> Result<Option<(u32, u8)>> {
        let ip_len = self.db_type.ip_bytes_len();
        let blen = self.db_type.index_block_len();

        let count = buf.len() / blen;
        if count == 0 {
            return Ok(None);
        }

        let (mut l, mut h) = (0usize, count - 1);
        while l <= h {
            let m = (l + h) >> 1;
            let p = m * blen;
            let sip = &buf[p..p + ip_len];
            let eip = &buf[p + ip_len..p + ip_len * 2];

            let cmp_start = compare_bytes(ip, sip, ip_len);
            let cmp_end = compare_bytes(ip, eip, ip_len);

            if cmp_start != Ordering::Less && cmp_end != Ordering::Greater {
                let block = IndexBlock::from_bytes(buf, p, self.db_type)?;
                return Ok(Some((block.data_ptr, block.data_len)));
            } else if cmp_start == Ordering::Less {
                if m == 0 {
                    break;
                }
                h = m - 1;
            } else {
                l = m + 1;
            }
        }

        Ok(None)
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    pub fn search_mode(&self) -> SearchMode {
        self.search_mode
    }

    /// Bytes of license header in front of the content.
    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    pub fn column_selection(&self) -> u32 {
        self.column_selection
    }

    /// Number of index blocks between the first and last index pointers.
    pub fn total_index_blocks(&self) -> u32 {
        self.last_index_ptr.saturating_sub(self.first_index_ptr) / self.db_type.index_block_len() as u32 + 1
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.storage, Storage::Closed)
    }

    /// Releases the header index, the loaded content and the file handle.
    /// Calling it again is a no-op.
    pub fn close(&mut self) {
        if let Storage::File(raf) = &mut self.storage {
            raf.get_mut().close();
        }
        self.storage = Storage::Closed;
        self.header_blocks = Vec::new();
        self.geo_map_data = None;
    }
}

impl fmt::Debug for DbSearcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSearcher")
            .field("db_type", &self.db_type)
            .field("search_mode", &self.search_mode)
            .field("header_size", &self.header_size)
            .field("header_blocks", &self.header_blocks.len())
            .field("column_selection", &self.column_selection)
            .field("closed", &self.is_closed())
            .finish()
    }
}
