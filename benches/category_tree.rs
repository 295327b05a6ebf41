use criterion::{criterion_group, criterion_main, Criterion};
use time::OffsetDateTime;

use ordo::category::{Category, NewCategory};
use ordo::service::tree::build_tree;

/// Balanced tree with `fanout` children per node, `depth` levels deep.
fn categories(fanout: usize, depth: usize) -> Vec<Category> {
    let mut res = Vec::new();
    let mut level = vec![None];
    for _ in 0..depth {
        let mut next = Vec::new();
        for parent in &level {
            for _ in 0..fanout {
                let id = format!("c{}", res.len());
                let mut data = NewCategory::new(id.clone());
                data.parent = parent.clone();
                res.push(Category::from_new(
                    id.clone(),
                    data,
                    OffsetDateTime::UNIX_EPOCH,
                ));
                next.push(Some(id));
            }
        }
        level = next;
    }
    res
}

fn benchmarks(c: &mut Criterion) {
    let small = categories(4, 3);
    let large = categories(8, 4);
    c.bench_function("category tree 84 nodes", |b| {
        b.iter(|| build_tree(&small, None))
    });
    c.bench_function("category tree 4680 nodes", |b| {
        b.iter(|| build_tree(&large, None))
    });
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
