use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use we3graph_core::{apply, ApplyContext, Command, EntityId, GraphStore, Mutation, Point3};

fn build_log(vertices: u64) -> Vec<Command> {
    let mut log = Vec::new();
    for seq in 1..=vertices {
        log.push(
            Mutation::InsertVertex {
                id: EntityId::new(1, seq),
                position: Point3::new(seq as f64, 0.0, 0.0),
            }
            .encode(),
        );
    }
    for seq in 2..=vertices {
        log.push(
            Mutation::InsertEdge {
                id: EntityId::new(1, vertices + seq),
                start: EntityId::new(1, seq - 1),
                end: EntityId::new(1, seq),
            }
            .encode(),
        );
    }
    log
}

fn bench_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("Replay");
    let log = build_log(1_000);
    group.throughput(Throughput::Elements(log.len() as u64));

    group.bench_function("replay_1000_vertex_chain", |b| {
        let ctx = ApplyContext::default();
        b.iter(|| {
            let mut store = GraphStore::new();
            for command in &log {
                apply(&mut store, black_box(command), &ctx).unwrap();
            }
            black_box(store.edge_count());
        })
    });

    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("Lookup");
    group.throughput(Throughput::Elements(1));

    let mut store = GraphStore::new();
    let ctx = ApplyContext::default();
    for command in build_log(10_000) {
        apply(&mut store, &command, &ctx).unwrap();
    }

    group.bench_function("find_vertex", |b| {
        let mut seq = 0;
        b.iter(|| {
            seq = seq % 10_000 + 1;
            black_box(store.vertex(EntityId::new(1, seq)));
        })
    });

    group.bench_function("decode_move_vertex", |b| {
        let cmd = Command::new(
            we3graph_core::CommandKind::MoveVertex,
            ["1-42", "1.25", "-7.5", "3"],
        );
        b.iter(|| black_box(cmd.decode().unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_replay, bench_lookup);
criterion_main!(benches);
