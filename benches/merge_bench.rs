use criterion::{Criterion, criterion_group, criterion_main};
use hashpatch::{MemoryStore, Patch, SparseUpdate, hash};
use serde_json::json;
use tokio::runtime::Runtime;

#[derive(Default, SparseUpdate)]
struct OrderUpdate {
    price: Option<i64>,
    qty: Option<u32>,
    note: Option<String>,
}

fn patch_benchmark(c: &mut Criterion) {
    let update = OrderUpdate {
        price: Some(12),
        note: Some("partial fill".into()),
        ..Default::default()
    };

    c.bench_function("sparse/to_patch", |b| {
        b.iter(|| update.to_patch().expect("patch"));
    });
}

fn merge_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().expect("create tokio runtime");
    let store = MemoryStore::new();

    rt.block_on(store.insert_raw(
        "bench",
        "existing",
        json!({ "price": 10, "qty": 5, "note": "open" }).to_string(),
    ));

    let update = Patch::from_value(json!({ "price": 11 })).expect("patch");

    c.bench_function("memory/merge_update", |b| {
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            let update = update.clone();
            async move {
                let mut conn = store.connection();
                hash::merge_update(&mut conn, Some(&update), "bench", "existing")
                    .await
                    .expect("merge");
            }
        });
    });

    c.bench_function("memory/get", |b| {
        b.to_async(&rt).iter(|| {
            let store = store.clone();
            async move {
                let mut conn = store.connection();
                let value: serde_json::Value = hash::get(&mut conn, "bench", "existing")
                    .await
                    .expect("get");
                value
            }
        });
    });
}

criterion_group!(benches, patch_benchmark, merge_benchmark);
criterion_main!(benches);
