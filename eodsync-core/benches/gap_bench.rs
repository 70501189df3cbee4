//! Criterion benchmarks for the sync hot paths.
//!
//! Benchmarks:
//! 1. Gap planning over ten years of trading days
//! 2. Normalizing a cumulative exchange table

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use eodsync_core::domain::{Grouping, RawTable};
use eodsync_core::gap::plan_missing;
use eodsync_core::normalize::RecordNormalizer;
use std::collections::BTreeSet;

// ── Helpers ──────────────────────────────────────────────────────────

fn trading_days(n: usize) -> Vec<NaiveDate> {
    let mut date = NaiveDate::from_ymd_opt(2014, 1, 1).unwrap();
    let mut days = Vec::with_capacity(n);
    while days.len() < n {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(date);
        }
        date += Duration::days(1);
    }
    days
}

fn cumulative_table(tickers: usize, days: &[NaiveDate]) -> RawTable {
    let headers = ["<Ticker>", "<DTYYYYMMDD>", "<Open>", "<High>", "<Low>", "<Close>", "<Volume>"]
        .into_iter()
        .map(String::from)
        .collect();
    let mut records = Vec::with_capacity(tickers * days.len());
    for t in 0..tickers {
        for (i, d) in days.iter().enumerate() {
            let close = 10.0 + (i as f64 * 0.1).sin();
            records.push(vec![
                format!("T{t:03}"),
                d.format("%Y%m%d").to_string(),
                format!("{:.2}", close - 0.1),
                format!("{:.2}", close + 0.2),
                format!("{:.2}", close - 0.2),
                format!("{close:.2}"),
                (1000 + i).to_string(),
            ]);
        }
    }
    RawTable { headers, records }
}

// ── 1. Gap planning ──────────────────────────────────────────────────

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_missing");
    let days = trading_days(2_500);
    let fetched: BTreeSet<_> = days.iter().copied().collect();
    let as_of = *days.last().unwrap();

    for stored_pct in [0usize, 50, 99] {
        let known: BTreeSet<_> = days
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 100 < stored_pct)
            .map(|(_, d)| *d)
            .collect();
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{stored_pct}pct_stored")),
            &known,
            |b, known| b.iter(|| plan_missing(black_box(known), black_box(&fetched), as_of)),
        );
    }
    group.finish();
}

// ── 2. Normalization ─────────────────────────────────────────────────

fn bench_normalize(c: &mut Criterion) {
    let table = cumulative_table(50, &trading_days(250));
    let grouping = Grouping::Fixed("HSX".into());
    let normalizer = RecordNormalizer::default();

    c.bench_function("normalize_12500_rows", |b| {
        b.iter(|| {
            normalizer
                .normalize_table("CafeF.HSX.Upto.csv", black_box(&table), &grouping)
                .map(|rows| rows.count())
        })
    });
}

criterion_group!(benches, bench_plan, bench_normalize);
criterion_main!(benches);
