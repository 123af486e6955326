#![allow(dead_code)]

use std::net::{Ipv4Addr, Ipv6Addr};

use czdb_engine::{DatabaseBuilder, DbType, DecryptedBlock};
use tempfile::NamedTempFile;

/// base64 of "0123456789abcdef"
pub const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZg==";

pub const V4_RANGES: u32 = 250;
pub const V6_RANGES: u32 = 100;

/// Geo columns 0, 1 and 2.
pub const COLUMN_SELECTION: u32 = 0b1110;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn valid_license() -> DecryptedBlock {
    DecryptedBlock {
        client_id: 1024,
        expiration_date: 991231,
        random_size: 37,
    }
}

/// `[n.0.0.0, n.127.255.255]` for n in 1..=250, leaving the upper half of
/// every /8 uncovered.
pub fn v4_range(i: u32) -> (Ipv4Addr, Ipv4Addr) {
    let start = (i + 1) << 24;
    (Ipv4Addr::from(start), Ipv4Addr::from(start + 0x007F_FFFF))
}

pub fn v4_expected(i: u32) -> String {
    if i % 3 == 0 {
        format!("Country{}\tnull\tCity{}\tISP{}", i % 5, i, i)
    } else {
        format!("plain-{i}")
    }
}

pub fn v4_builder(header_interval: usize) -> DatabaseBuilder {
    let mut builder = DatabaseBuilder::new(DbType::Ipv4)
        .header_interval(header_interval)
        .column_selection(COLUMN_SELECTION);
    for i in 0..V4_RANGES {
        let (start, end) = v4_range(i);
        let (start, end) = (start.to_string(), end.to_string());
        if i % 3 == 0 {
            let country = format!("Country{}", i % 5);
            let city = format!("City{i}");
            // the fourth column is never selected
            builder
                .add_geo_range(&start, &end, &[country.as_str(), " ", city.as_str(), "hidden"], &format!("ISP{i}"))
                .unwrap();
        } else {
            builder.add_range(&start, &end, &format!("plain-{i}")).unwrap();
        }
    }
    builder
}

/// `::1-::ff`, then `[(0x2000 + i)::, (0x2000 + i)::/16 + 2^100]`.
pub fn v6_range(i: u32) -> (Ipv6Addr, Ipv6Addr) {
    let start = (0x2000u128 + i as u128) << 112;
    (Ipv6Addr::from(start), Ipv6Addr::from(start + (1u128 << 100)))
}

pub fn v6_builder(header_interval: usize) -> DatabaseBuilder {
    let mut builder = DatabaseBuilder::new(DbType::Ipv6).header_interval(header_interval);
    builder.add_range("::1", "::ff", "loopback").unwrap();
    for i in 0..V6_RANGES {
        let (start, end) = v6_range(i);
        builder
            .add_range(&start.to_string(), &end.to_string(), &format!("v6-{i}"))
            .unwrap();
    }
    builder.add_range("ff00::", "ff00::ffff", "multicast").unwrap();
    builder
}

pub fn write_db(builder: &DatabaseBuilder, license: DecryptedBlock) -> NamedTempFile {
    let file = NamedTempFile::new().unwrap();
    builder.write_to(file.path(), 2, license, KEY).unwrap();
    file
}
