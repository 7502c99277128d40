//! Benchmark for protection planning and node-group selection

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use node_protection_operator::domain::InstanceRef;
use node_protection_operator::protection::{plan, GroupClassification, ReadStatus};
use node_protection_operator::selection::NodeGroupSelector;

fn snapshot(groups: usize, per_group: usize, protected_every: usize) -> Vec<GroupClassification> {
    (0..groups)
        .map(|g| {
            let name = format!("nodegroup-{}-ondemand", g % 10);
            let mut protected = Vec::new();
            let mut unprotected = Vec::new();
            for i in 0..per_group {
                let instance = InstanceRef::new(format!("i-{:08x}", g * per_group + i), &name);
                if protected_every > 0 && i % protected_every == 0 {
                    protected.push(instance);
                } else {
                    unprotected.push(instance);
                }
            }
            GroupClassification {
                node_group: name,
                backing_group_id: Some(format!("asg-{}", g)),
                protected,
                unprotected,
                status: ReadStatus::Ok,
                message: None,
            }
        })
        .collect()
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("protection_plan");

    for instances in [10usize, 100, 1000] {
        let zero = snapshot(4, instances / 4, 0);
        let many = snapshot(4, instances / 4, 3);
        group.throughput(Throughput::Elements(instances as u64));

        group.bench_with_input(BenchmarkId::new("zero_protected", instances), &zero, |b, s| {
            b.iter(|| plan(black_box(s)));
        });
        group.bench_with_input(BenchmarkId::new("many_protected", instances), &many, |b, s| {
            b.iter(|| plan(black_box(s)));
        });
    }

    group.finish();
}

fn bench_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_group_selection");
    let selector = NodeGroupSelector::default();
    let names: Vec<String> = (0..200)
        .map(|i| match i % 3 {
            0 => format!("nodegroup-{}-spot", i % 10),
            1 => format!("workergroup-{}", i),
            _ => format!("batch-{}", i),
        })
        .collect();

    group.throughput(Throughput::Elements(names.len() as u64));
    group.bench_function("numbered_tier", |b| {
        b.iter(|| selector.select(black_box(&names)));
    });

    group.finish();
}

criterion_group!(benches, bench_plan, bench_select);
criterion_main!(benches);
