//! Filter parsing and evaluation throughput.
//!
//! Run with: cargo bench --bench filter_bench

use bastion_core::filter::{self, ParseResult};
use bastion_core::{CallerScope, FilterBuilder, Metadata};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;

fn or_chain(groups: usize) -> String {
    (0..groups)
        .map(|i| format!("department == 'FINANCE' && source == 'file-{i}.txt'"))
        .collect::<Vec<_>>()
        .join(" || ")
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_parse");

    for groups in [1usize, 10, 100, 1000] {
        let input = or_chain(groups);
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(groups), &input, |b, input| {
            b.iter(|| filter::parse(black_box(Some(input.as_str()))))
        });
    }

    let structured = "Expression[type=EQ, left=Key[key=department], right=Value[value=FINANCE]], \
                      Expression[type=IN, left=Key[key=source], right=Value[value=[a.txt, b.txt]]]";
    group.bench_function("structured", |b| {
        b.iter(|| filter::parse(black_box(Some(structured))))
    });

    group.finish();
}

fn bench_evaluate(c: &mut Criterion) {
    let mut meta = Metadata::new();
    meta.insert("department".into(), json!("FINANCE"));
    meta.insert("source".into(), json!("file-999.txt"));
    meta.insert("page".into(), json!(12));

    let mut group = c.benchmark_group("filter_evaluate");
    for groups in [1usize, 100, 1000] {
        let ParseResult::Valid(parsed) = filter::parse(Some(&or_chain(groups))) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::from_parameter(groups), &parsed, |b, parsed| {
            b.iter(|| filter::evaluate(black_box(&meta), parsed))
        });
    }
    group.finish();
}

fn bench_builder(c: &mut Criterion) {
    let scope = CallerScope::new("FINANCE").with_workspace("ws-1");
    let files: Vec<String> = (0..20).map(|i| format!("report-{i}.pdf")).collect();

    c.bench_function("filter_builder_file_scope", |b| {
        b.iter(|| {
            FilterBuilder::for_scope(black_box(&scope))
                .or_any_of("source", files.iter().cloned())
                .or_any_of("filename", files.iter().cloned())
                .build()
        })
    });
}

criterion_group!(benches, bench_parse, bench_evaluate, bench_builder);
criterion_main!(benches);
