//! Hot path benchmarks: granularity parsing, calendar flooring, key
//! encoding and value merging. These run once per granularity on every
//! write.

use bucketry_lib::bucket::{AddressingMode, BucketKey, Calendar, Granularity, GranularitySpec};
use bucketry_lib::codec::{self, value_map, Value};
use chrono::{DateTime, Weekday};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn bench_granularity_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("granularity_parsing");

    for raw in ["1h", "15m", "1mo", "bogus"] {
        group.bench_with_input(BenchmarkId::from_parameter(raw), raw, |b, raw| {
            b.iter(|| black_box(GranularitySpec::parse(black_box(raw))));
        });
    }

    group.finish();
}

fn bench_floor(c: &mut Criterion) {
    let mut group = c.benchmark_group("calendar_floor");
    let calendar = Calendar::new(chrono_tz::Europe::Berlin, Weekday::Mon);
    let instant = calendar.localize(&DateTime::parse_from_rfc3339("2024-05-01T10:37:45Z").unwrap());

    for raw in ["1m", "33m", "1h", "1d", "1w", "1mo", "1q", "1y"] {
        let granularity: Granularity = raw.parse().unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(raw), &granularity, |b, &granularity| {
            b.iter(|| black_box(calendar.floor(black_box(&instant), granularity)));
        });
    }

    group.bench_function("timeline_1h_week", |b| {
        let end = calendar.add(&instant, "1w".parse().unwrap());
        let hour: Granularity = "1h".parse().unwrap();
        b.iter(|| black_box(calendar.timeline(&instant, &end, hour).iter().count()));
    });

    group.finish();
}

fn bench_keys(c: &mut Criterion) {
    let mut group = c.benchmark_group("bucket_key");
    let calendar = Calendar::default();
    let instant = calendar.localize(&DateTime::parse_from_rfc3339("2024-05-01T10:37:45Z").unwrap());
    let key = BucketKey::new("requests", "1h".parse().unwrap(), &instant, &calendar).with_prefix("stats");

    group.bench_function("encode", |b| {
        b.iter(|| black_box(key.encode(":")));
    });

    for mode in [AddressingMode::FullJoined, AddressingMode::PartialJoined, AddressingMode::Separated] {
        group.bench_with_input(BenchmarkId::new("identifier", format!("{mode:?}")), &mode, |b, &mode| {
            b.iter(|| black_box(key.simple_identifier(":", mode)));
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");
    let values = value_map([
        ("count", Value::from(1)),
        (
            "status",
            Value::Map(value_map([("2xx", 1), ("4xx", 0), ("5xx", 0)])),
        ),
        ("latency_ms", Value::from(12.5)),
    ]);

    group.bench_function("flatten", |b| {
        b.iter(|| black_box(codec::flatten(black_box(&values))));
    });

    group.bench_function("merge_add", |b| {
        b.iter(|| black_box(codec::merge_add(black_box(&values), black_box(&values)).unwrap()));
    });

    let flat = codec::flatten(&values);
    group.bench_function("unflatten", |b| {
        b.iter(|| black_box(codec::unflatten(black_box(&flat)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_granularity_parsing, bench_floor, bench_keys, bench_codec);
criterion_main!(benches);
