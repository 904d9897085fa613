use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ipfold::{BuildPipeline, DataValue, MergeStrategy, Tree, TreeOptions};
use std::hint::black_box;

fn options() -> TreeOptions {
    TreeOptions {
        include_reserved_networks: true,
        build_epoch: Some(0),
        ..TreeOptions::default()
    }
}

fn host(i: usize) -> String {
    format!("20.{}.{}.{}", i / 65536 % 256, i / 256 % 256, i % 256)
}

// Insert + serialize with shared vs. unique records
fn bench_build_and_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_and_write");

    let shared: Vec<DataValue> = (0..10u32)
        .map(|i| {
            [
                ("category", DataValue::from(format!("category_{}", i))),
                ("risk", DataValue::Uint16(i as u16 * 10)),
                ("active", DataValue::from(i % 2 == 0)),
            ]
            .into_iter()
            .collect()
        })
        .collect();

    for count in [1_000usize, 10_000, 50_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("shared_records", count), &count, |b, &count| {
            b.iter(|| {
                let mut tree = Tree::new(options());
                for i in 0..count {
                    tree.insert(black_box(&host(i)), shared[i % 10].clone(), MergeStrategy::TopLevelMerge)
                        .unwrap();
                }
                black_box(tree.to_bytes().unwrap());
            });
        });

        group.bench_with_input(BenchmarkId::new("unique_records", count), &count, |b, &count| {
            b.iter(|| {
                let mut tree = Tree::new(options());
                for i in 0..count {
                    let record: DataValue = [("id", DataValue::Uint32(i as u32))].into_iter().collect();
                    tree.insert(black_box(&host(i)), record, MergeStrategy::TopLevelMerge)
                        .unwrap();
                }
                black_box(tree.to_bytes().unwrap());
            });
        });
    }

    group.finish();
}

// Wide networks inserted over many existing hosts
fn bench_subtree_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("subtree_merge");

    for count in [1_000usize, 10_000] {
        let mut base = Tree::new(options());
        for i in 0..count {
            let record: DataValue = [("id", DataValue::Uint32(i as u32))].into_iter().collect();
            base.insert(&host(i), record, MergeStrategy::TopLevelMerge)
                .unwrap();
        }
        let bytes = base.to_bytes().unwrap();
        let overlay: DataValue = [("country", DataValue::from("DE"))].into_iter().collect();

        group.bench_with_input(BenchmarkId::new("load_and_overlay", count), &count, |b, _| {
            b.iter(|| {
                let mut tree = Tree::from_bytes(black_box(&bytes), options()).unwrap();
                tree.insert("20.0.0.0/8", overlay.clone(), MergeStrategy::TopLevelMerge)
                    .unwrap();
                black_box(tree.node_count());
            });
        });
    }

    group.finish();
}

fn bench_ndjson_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("ndjson_pipeline");
    let count = 10_000usize;
    let input: String = (0..count)
        .map(|i| {
            format!(
                "{{\"ip\": \"{}\", \"name\": \"Room {}\", \"floor\": \"{}\"}}\n",
                host(i),
                i,
                i % 5
            )
        })
        .collect();

    group.throughput(Throughput::Elements(count as u64));
    group.bench_function("geo_profile", |b| {
        b.iter(|| {
            let mut pipeline = BuildPipeline::new(Tree::new(options()));
            pipeline.process_reader(black_box(input.as_bytes())).unwrap();
            black_box(pipeline.into_tree().to_bytes().unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_build_and_write,
    bench_subtree_merge,
    bench_ndjson_pipeline
);
criterion_main!(benches);
