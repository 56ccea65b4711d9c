use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use we3graph_core::{EntityId, Mutation, Point3};
use we3graph_sync::protocol::{PostCommandRequest, RequestEnvelope, ServiceRequest};
use we3graph_sync::{CommandLog, MemoryLogStore};

fn bench_append_insert(c: &mut Criterion) {
    let log = CommandLog::open(Arc::new(MemoryLogStore::new())).unwrap();
    let client = log.register_client(1, 1, "bench").unwrap();
    let mut seq = 0u64;

    c.bench_function("log_append_insert", |b| {
        b.iter(|| {
            seq += 1;
            let command = Mutation::InsertVertex {
                id: EntityId::new(client, seq),
                position: Point3::new(seq as f64, 0.0, 0.0),
            }
            .encode();
            black_box(log.append(1, client, None, &command).unwrap());
        })
    });
}

fn bench_append_compacted_move(c: &mut Criterion) {
    let log = CommandLog::open(Arc::new(MemoryLogStore::new())).unwrap();
    let client = log.register_client(1, 1, "bench").unwrap();
    let vertex = EntityId::new(client, 1);
    let insert = Mutation::InsertVertex {
        id: vertex,
        position: Point3::default(),
    }
    .encode();
    log.append(1, client, None, &insert).unwrap();
    let mut x = 0.0;

    // Every append supersedes the previous move
    c.bench_function("log_append_compacted_move", |b| {
        b.iter(|| {
            x += 1.0;
            let command = Mutation::MoveVertex {
                vertex,
                position: Point3::new(x, x, x),
            }
            .encode();
            black_box(log.append(1, client, None, &command).unwrap());
        })
    });
}

fn bench_read_page(c: &mut Criterion) {
    let log = CommandLog::open(Arc::new(MemoryLogStore::new())).unwrap();
    let client = log.register_client(1, 1, "bench").unwrap();
    for seq in 1..=1_000 {
        let command = Mutation::InsertVertex {
            id: EntityId::new(client, seq),
            position: Point3::new(seq as f64, 0.0, 0.0),
        }
        .encode();
        log.append(1, client, None, &command).unwrap();
    }

    c.bench_function("log_read_page_100", |b| {
        b.iter(|| black_box(log.read(1, black_box(500), 100, false).unwrap()))
    });
}

fn post_request() -> ServiceRequest {
    ServiceRequest::PostCommand(PostCommandRequest {
        user_id: 1,
        who_token: "user-1".into(),
        graph_id: 1,
        client_id: 7,
        graph_access_token: "b0d2c1c4-5f5e-4c4e-9d57-3f1f0c6c2a11".into(),
        command_name: "MoveVertex".into(),
        param1: "42".into(),
        param2: "1.5".into(),
        param3: "-2".into(),
        param4: "0.25".into(),
        param5: String::new(),
        client_sequence: Some(12),
    })
}

fn bench_envelope_encode(c: &mut Criterion) {
    let request = post_request();

    c.bench_function("envelope_encode_post", |b| {
        b.iter(|| {
            let envelope = black_box(&request).to_envelope(1).unwrap();
            black_box(envelope.encode().unwrap());
        })
    });
}

fn bench_envelope_decode(c: &mut Criterion) {
    let text = post_request().to_envelope(1).unwrap().encode().unwrap();

    c.bench_function("envelope_decode_post", |b| {
        b.iter(|| {
            let envelope = RequestEnvelope::decode(black_box(&text)).unwrap();
            black_box(ServiceRequest::from_envelope(&envelope).unwrap());
        })
    });
}

criterion_group!(
    benches,
    bench_append_insert,
    bench_append_compacted_move,
    bench_read_page,
    bench_envelope_encode,
    bench_envelope_decode,
);
criterion_main!(benches);
