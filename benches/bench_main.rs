use criterion::criterion_main;

mod benchmarks;

criterion_main!(benchmarks::region_push_relabel::region_push_relabel);
