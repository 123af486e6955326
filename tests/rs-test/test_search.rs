mod common;

use std::env;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::Arc;
use std::thread;

use common::*;
use czdb_engine::raf::{AccessMode, RandomAccessFile};
use czdb_engine::searcher::{END_INDEX_PTR, FILE_SIZE_PTR, FIRST_INDEX_PTR, HEADER_BLOCK_PTR, SUPER_PART_LENGTH};
use czdb_engine::{CzdbError, DbSearcher, DbType, DecryptedBlock, HyperHeaderDecoder, SearchMode};

fn open_both(path: &Path) -> (DbSearcher, DbSearcher) {
    (
        DbSearcher::open(path, SearchMode::Memory, KEY).unwrap(),
        DbSearcher::open(path, SearchMode::BTree, KEY).unwrap(),
    )
}

/// Overwrites a little-endian u32 at a content position, past the license header.
fn patch_content(path: &Path, position: u64, value: u32) -> anyhow::Result<()> {
    let header = HyperHeaderDecoder::decrypt(path, KEY)?;
    let mut raf = RandomAccessFile::open(path, AccessMode::ReadWrite, header.header_size())?;
    raf.seek(position);
    raf.write_all(&value.to_le_bytes())?;
    raf.close();
    Ok(())
}

fn read_content_u32(path: &Path, position: u64) -> anyhow::Result<u32> {
    let header = HyperHeaderDecoder::decrypt(path, KEY)?;
    let mut raf = RandomAccessFile::open(path, AccessMode::Read, header.header_size())?;
    let mut buf = [0u8; 4];
    raf.seek(position);
    raf.read_fully(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn assert_corrupt(path: &Path) {
    for mode in [SearchMode::Memory, SearchMode::BTree] {
        let result = DbSearcher::open(path, mode, KEY);
        assert!(matches!(result, Err(CzdbError::CorruptDatabase(_))), "{mode}: {result:?}");
    }
}

#[test]
fn test_ipv4_ranges_in_both_modes() -> anyhow::Result<()> {
    init_logger();
    for interval in [1, 3, 16, 1000] {
        let file = write_db(&v4_builder(interval), valid_license());
        let (memory, btree) = open_both(file.path());

        for i in 0..V4_RANGES {
            let (start, end) = v4_range(i);
            let mid = Ipv4Addr::from(u32::from(start) + 0x0012_3456);
            let expected = v4_expected(i);
            for ip in [start, mid, end] {
                let ip = ip.to_string();
                assert_eq!(memory.search(&ip)?.as_deref(), Some(expected.as_str()), "{ip}");
                assert_eq!(btree.search(&ip)?.as_deref(), Some(expected.as_str()), "{ip}");
            }

            // upper half of the /8 is a gap
            let gap = Ipv4Addr::from(u32::from(end) + 1).to_string();
            assert_eq!(memory.search(&gap)?, None, "{gap}");
            assert_eq!(btree.search(&gap)?, None, "{gap}");
        }
    }
    Ok(())
}

#[test]
fn test_outside_indexed_ranges() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(8), valid_license());
    let (memory, btree) = open_both(file.path());

    for ip in ["0.0.0.0", "0.255.255.255", "251.0.0.0", "255.255.255.255"] {
        assert_eq!(memory.search(ip)?, None, "{ip}");
        assert_eq!(btree.search(ip)?, None, "{ip}");
    }
    Ok(())
}

#[test]
fn test_search_block_pointers_agree() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(5), valid_license());
    let (memory, btree) = open_both(file.path());

    let mut last_ptr = 0;
    for i in 0..V4_RANGES {
        let ip = v4_range(i).0.to_string();
        let a = memory.search_block(&ip)?.expect("memory block");
        let b = btree.search_block(&ip)?.expect("btree block");
        assert_eq!(a.data_ptr(), b.data_ptr());
        assert_eq!(a.region_bytes(), b.region_bytes());
        // payloads are laid out in range order
        assert!(a.data_ptr() > last_ptr);
        last_ptr = a.data_ptr();
    }
    Ok(())
}

#[test]
fn test_ipv6_ranges_and_shorthand() -> anyhow::Result<()> {
    init_logger();
    let file = write_db(&v6_builder(4), valid_license());
    let (memory, btree) = open_both(file.path());
    assert_eq!(memory.db_type(), DbType::Ipv6);

    for searcher in [&memory, &btree] {
        let short = searcher.search("::1")?;
        assert_eq!(short.as_deref(), Some("loopback"));
        assert_eq!(searcher.search("0:0:0:0:0:0:0:1")?, short);
        assert_eq!(searcher.search("0000:0000:0000:0000:0000:0000:0000:00ff")?, short);
        assert_eq!(searcher.search("::")?, None);
        assert_eq!(searcher.search("::100")?, None);

        for i in 0..V6_RANGES {
            let (start, end) = v6_range(i);
            let expected = format!("v6-{i}");
            assert_eq!(searcher.search(&start.to_string())?.as_deref(), Some(expected.as_str()));
            assert_eq!(searcher.search(&end.to_string())?.as_deref(), Some(expected.as_str()));
        }

        assert_eq!(searcher.search("ff00::1")?.as_deref(), Some("multicast"));
        assert_eq!(searcher.search("ff00::1:0")?, None);
        assert_eq!(searcher.search("ffff:ffff:ffff:ffff:ffff:ffff:ffff:ffff")?, None);
    }
    Ok(())
}

#[test]
fn test_invalid_address_keeps_searcher_usable() {
    let file = write_db(&v4_builder(16), valid_license());
    let (memory, btree) = open_both(file.path());

    for searcher in [&memory, &btree] {
        for bad in ["", "1.2.3", "256.1.1.1", "hello", "::1", "2001:db8::1"] {
            assert!(
                matches!(searcher.search(bad), Err(CzdbError::InvalidAddress(_))),
                "{bad}"
            );
        }
        assert_eq!(searcher.search("2.0.0.1").unwrap().as_deref(), Some("plain-1"));
    }
}

#[test]
fn test_geo_map_column_selection() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(16), valid_license());
    let searcher = DbSearcher::open(file.path(), SearchMode::BTree, KEY)?;
    assert_eq!(searcher.column_selection(), COLUMN_SELECTION);

    // geo columns ["Country3", " ", "City3", "hidden"] with bits 1..=3 set
    assert_eq!(searcher.search("4.1.2.3")?.as_deref(), Some("Country3\tnull\tCity3\tISP3"));
    Ok(())
}

#[test]
fn test_declared_size_mismatch() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(16), valid_license());
    let real = read_content_u32(file.path(), FILE_SIZE_PTR)?;
    patch_content(file.path(), FILE_SIZE_PTR, real + 1)?;
    assert_corrupt(file.path());
    Ok(())
}

#[test]
fn test_oversized_header_index() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(16), valid_license());
    patch_content(file.path(), HEADER_BLOCK_PTR, 0x00ff_ffff)?;
    assert_corrupt(file.path());
    Ok(())
}

#[test]
fn test_inconsistent_last_index_ptr() -> anyhow::Result<()> {
    let pristine = write_db(&v4_builder(16), valid_license());
    let first = read_content_u32(pristine.path(), FIRST_INDEX_PTR)?;
    let last = read_content_u32(pristine.path(), END_INDEX_PTR)?;

    // before the first block, misaligned, one block early, past the end
    for value in [first - 13, last + 1, last - 13, 0xffff_ff00] {
        let file = write_db(&v4_builder(16), valid_license());
        patch_content(file.path(), END_INDEX_PTR, value)?;
        assert_corrupt(file.path());
    }
    Ok(())
}

#[test]
fn test_header_entry_outside_index_blocks() -> anyhow::Result<()> {
    let pristine = write_db(&v6_builder(4), valid_license());
    let first = read_content_u32(pristine.path(), FIRST_INDEX_PTR)?;
    let last = read_content_u32(pristine.path(), END_INDEX_PTR)?;

    // pointer field of the first header line
    let first_line_ptr = SUPER_PART_LENGTH as u64 + 16;
    for value in [first + 1, last + 37, first - 37] {
        let file = write_db(&v6_builder(4), valid_license());
        patch_content(file.path(), first_line_ptr, value)?;
        assert_corrupt(file.path());
    }
    Ok(())
}

#[test]
fn test_oversized_geo_map() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(16), valid_license());
    let last = read_content_u32(file.path(), END_INDEX_PTR)?;

    // index block, column selection, then the geo map size
    patch_content(file.path(), last as u64 + 13 + 4, 0xffff_fff0)?;
    assert_corrupt(file.path());
    Ok(())
}

#[test]
fn test_trailing_bytes_are_corruption() -> anyhow::Result<()> {
    use std::io::Write;

    let file = write_db(&v6_builder(16), valid_license());
    std::fs::OpenOptions::new()
        .append(true)
        .open(file.path())?
        .write_all(&[0])?;

    for mode in [SearchMode::Memory, SearchMode::BTree] {
        assert!(matches!(
            DbSearcher::open(file.path(), mode, KEY),
            Err(CzdbError::CorruptDatabase(_))
        ));
    }
    Ok(())
}

#[test]
fn test_license_rejection() -> anyhow::Result<()> {
    let expired = DecryptedBlock {
        expiration_date: 200101,
        ..valid_license()
    };
    let file = write_db(&v4_builder(16), expired);
    assert!(matches!(
        DbSearcher::open(file.path(), SearchMode::Memory, KEY),
        Err(CzdbError::Expired {
            expiration: 200101,
            ..
        })
    ));

    let file = write_db(&v4_builder(16), valid_license());
    let mut raf = RandomAccessFile::open(file.path(), AccessMode::ReadWrite, 0)?;
    raf.seek(4);
    raf.write_all(&7u32.to_le_bytes())?;
    raf.close();
    assert!(matches!(
        DbSearcher::open(file.path(), SearchMode::BTree, KEY),
        Err(CzdbError::ClientIdMismatch {
            header: 7,
            decrypted: 1024
        })
    ));

    // a different key cannot unpad the license block
    let other_key = "ZmVkY2JhOTg3NjU0MzIxMA==";
    assert!(DbSearcher::open(file.path(), SearchMode::BTree, other_key).is_err());
    Ok(())
}

#[test]
fn test_close_is_idempotent() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(16), valid_license());
    for mode in [SearchMode::Memory, SearchMode::BTree] {
        let mut searcher = DbSearcher::open(file.path(), mode, KEY)?;
        assert_eq!(searcher.search_mode(), mode);
        assert!(searcher.search("1.0.0.1")?.is_some());

        searcher.close();
        searcher.close();
        assert!(searcher.is_closed());
        assert!(matches!(searcher.search("1.0.0.1"), Err(CzdbError::Closed)));
    }
    Ok(())
}

#[test]
fn test_search_many() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(16), valid_license());
    let searcher = DbSearcher::open(file.path(), SearchMode::Memory, KEY)?;
    assert_eq!(searcher.total_index_blocks(), V4_RANGES);

    let results = searcher.search_many(&["2.0.0.1", "2.200.0.0", "bogus"]);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().as_deref(), Some("plain-1"));
    assert_eq!(results[1].as_ref().unwrap(), &None);
    assert!(results[2].is_err());
    Ok(())
}

#[test]
fn test_shared_across_threads() -> anyhow::Result<()> {
    let file = write_db(&v4_builder(16), valid_license());

    for mode in [SearchMode::Memory, SearchMode::BTree] {
        let searcher = Arc::new(DbSearcher::open(file.path(), mode, KEY)?);
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let searcher = Arc::clone(&searcher);
                thread::spawn(move || {
                    for i in (t..V4_RANGES).step_by(4) {
                        let ip = v4_range(i).1.to_string();
                        assert_eq!(searcher.search(&ip).unwrap(), Some(v4_expected(i)));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }
    Ok(())
}

/// Runs against real databases when `CZDB_SECRET` and the paths are set.
#[test]
fn test_real_database() {
    let Ok(key) = env::var("CZDB_SECRET") else {
        return;
    };

    for (var, ip) in [("CZDB_V4_PATH", "8.8.8.8"), ("CZDB_V6_PATH", "2001:4860:4860::8888")] {
        let Ok(path) = env::var(var) else {
            continue;
        };
        let (memory, btree) = (
            DbSearcher::open(&path, SearchMode::Memory, &key).expect("Failed to init searcher"),
            DbSearcher::open(&path, SearchMode::BTree, &key).expect("Failed to init searcher"),
        );
        let result = memory.search(ip).expect("Search failed");
        println!("{ip}: {result:?}");
        assert!(result.is_some());
        assert_eq!(btree.search(ip).expect("Search failed"), result);
    }
}
