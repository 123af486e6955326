mod common;

use std::time::Instant;

use common::*;
use czdb_engine::{DbSearcher, SearchMode};

struct BenchResult {
    name: String,
    mode: String,
    total_time_ms: f64,
    avg_time_ms: f64,
    count: usize,
    hits: usize,
}

fn run_benchmark_mode(name: &str, mode: SearchMode, searcher_path: &std::path::Path, ips: &[String]) -> BenchResult {
    let searcher = DbSearcher::open(searcher_path, mode, KEY).expect("Failed to init searcher");

    let start = Instant::now();
    let mut hits = 0;
    for ip in ips {
        if searcher.search(ip).expect("Search failed").is_some() {
            hits += 1;
        }
    }
    let duration = start.elapsed();

    let total_time_ms = duration.as_secs_f64() * 1000.0;
    BenchResult {
        name: name.to_string(),
        mode: mode.to_string(),
        total_time_ms,
        avg_time_ms: total_time_ms / ips.len() as f64,
        count: ips.len(),
        hits,
    }
}

fn print_table(results: &[BenchResult]) {
    println!("\n=== Benchmark Summary ===");
    println!("┌─────┬──────────────────┬──────────┬─────────────────┬─────────────────┬─────────┬─────────┐");
    println!("│ No. │ Name             │ Mode     │ Total Time (ms) │ Avg Time (ms)   │ Count   │ Hits    │");
    println!("├─────┼──────────────────┼──────────┼─────────────────┼─────────────────┼─────────┼─────────┤");

    for (i, res) in results.iter().enumerate() {
        println!(
            "│{:^5}│{:^18}│{:^10}│{:^17}│{:^17}│{:^9}│{:^9}│",
            i + 1,
            res.name,
            res.mode,
            format!("{:.2}", res.total_time_ms),
            format!("{:.4}", res.avg_time_ms),
            res.count,
            res.hits
        );
    }

    println!("└─────┴──────────────────┴──────────┴─────────────────┴─────────────────┴─────────┴─────────┘");
}

/// Every address in the sample is looked up in both modes; hit counts must agree.
#[test]
fn bench_all_modes() {
    init_logger();
    let v4 = write_db(&v4_builder(16), valid_license());
    let v6 = write_db(&v6_builder(16), valid_license());

    let v4_ips: Vec<String> = (0..V4_RANGES * 40)
        .map(|n| std::net::Ipv4Addr::from((n / 40 + 1) << 24 | (n % 40) * 0x0003_3333).to_string())
        .collect();
    let v6_ips: Vec<String> = (0..V6_RANGES * 40)
        .map(|n| {
            let (start, _) = v6_range(n / 40);
            std::net::Ipv6Addr::from(u128::from(start) + (n % 40) as u128 * (1u128 << 96)).to_string()
        })
        .collect();

    let results = vec![
        run_benchmark_mode("IPv4", SearchMode::Memory, v4.path(), &v4_ips),
        run_benchmark_mode("IPv4", SearchMode::BTree, v4.path(), &v4_ips),
        run_benchmark_mode("IPv6", SearchMode::Memory, v6.path(), &v6_ips),
        run_benchmark_mode("IPv6", SearchMode::BTree, v6.path(), &v6_ips),
    ];
    print_table(&results);

    assert_eq!(results[0].hits, results[1].hits);
    assert_eq!(results[2].hits, results[3].hits);
    assert!(results[0].hits > 0 && results[2].hits > 0);
}
