use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde_json::json;
use serde_pickle::{SerOptions, Value};

use satyamatrix_core::{JobId, QueueName};
use satyamatrix_infra::jobs::{
    fields, HandlerRegistry, InMemoryQueueStore, JobRecord, PayloadDecoder, Worker, WorkerConfig,
};

fn envelope(argument: &str) -> Vec<u8> {
    let value = Value::Tuple(vec![
        Value::Tuple(vec![Value::String(argument.to_string())]),
        Value::Dict(BTreeMap::new()),
        Value::String("app.orchestrator.process_submission".to_string()),
    ]);
    serde_pickle::value_to_vec(&value, SerOptions::new()).unwrap()
}

fn zlib(raw: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw).unwrap();
    encoder.finish().unwrap()
}

fn record(id: &str) -> JobRecord {
    JobRecord::new(JobId::new(id).unwrap())
}

/// One record per strategy, plus the worst case where every strategy runs.
fn bench_decode_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_strategy");
    let decoder = PayloadDecoder::new();

    let args = serde_pickle::value_to_vec(
        &Value::List(vec![Value::String("sub-42".to_string())]),
        SerOptions::new(),
    )
    .unwrap();

    let cases = [
        ("structured_data", record("j").with_field(fields::DATA, envelope("sub-42"))),
        ("structured_data_zlib", record("j").with_field(fields::DATA, zlib(&envelope("sub-42")))),
        ("legacy_args", record("j").with_field(fields::ARGS, args)),
        (
            "description",
            record("j").with_field(fields::DESCRIPTION, "app.orchestrator.process_submission('sub-42')"),
        ),
        (
            "all_strategies_fall_through",
            record("j")
                .with_field(fields::DATA, b"garbage".to_vec())
                .with_field(fields::ARGS, b"garbage".to_vec())
                .with_field(fields::DESCRIPTION, "nothing to see"),
        ),
    ];

    for (name, record) in &cases {
        group.bench_with_input(BenchmarkId::from_parameter(name), record, |b, record| {
            b.iter(|| {
                let _ = black_box(decoder.decode(black_box(record)));
            });
        });
    }

    group.finish();
}

fn bench_description_length(c: &mut Criterion) {
    let mut group = c.benchmark_group("description_length");
    let decoder = PayloadDecoder::new();

    for len in [8usize, 64, 512, 4096].iter() {
        group.throughput(Throughput::Bytes(*len as u64));
        let description = format!("process_submission('{}')", "x".repeat(*len));
        let record = record("j").with_field(fields::DESCRIPTION, description);
        group.bench_with_input(BenchmarkId::new("call_expr", len), &record, |b, record| {
            b.iter(|| black_box(decoder.decode(record).unwrap()));
        });
    }

    group.finish();
}

/// Full cycle against the in-memory store: pop, decode, dispatch, record.
fn bench_worker_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_cycle");
    let lane = QueueName::new("default").unwrap();
    let store = InMemoryQueueStore::arc();
    let mut registry = HandlerRegistry::new();
    registry.register_fn("process_submission", |arg| Ok(json!({ "submission": arg })));
    let worker = Worker::new(Arc::clone(&store), registry, WorkerConfig::default());

    let mut n = 0u64;
    group.bench_function("process_one", |b| {
        b.iter(|| {
            n += 1;
            store.enqueue(
                &lane,
                record(&format!("job-{n}")).with_field(fields::DATA, envelope("sub-42")),
            );
            black_box(worker.run_cycle().unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_decode_strategies,
    bench_description_length,
    bench_worker_cycle
);
criterion_main!(benches);
