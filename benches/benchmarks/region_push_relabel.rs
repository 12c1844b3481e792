use criterion::{BatchSize, BenchmarkId, Criterion, SamplingMode, Throughput, criterion_group};
use toolbox_rs::arc_template::ArcTemplate;
use toolbox_rs::regular_graph::{RegularGraph, SolverConfig};

/// Builds an `n x n x n` 6-connected grid with unit capacities everywhere
/// and a single source/sink pair at opposite corners — `compute_maxflow`
/// is the thing being timed, so graph construction happens outside
/// `iter_batched`'s measured closure via the `routine` input.
fn build_cube(n: usize) -> RegularGraph<i32, i64> {
    let template = ArcTemplate::six_connected_3d();
    let config = SolverConfig {
        thread_count: 4,
        ..Default::default()
    };
    let mut graph: RegularGraph<i32, i64> =
        RegularGraph::new(vec![n, n, n], vec![2, 2, 2], template, config)
            .expect("n must be a multiple of 2 on every axis");

    graph.add_terminal_weights(&[0, 0, 0], 0, 1_000_000, 0).unwrap();
    graph
        .add_terminal_weights(&[n - 1, n - 1, n - 1], 0, 0, 1_000_000)
        .unwrap();
    for x in 0..n {
        for y in 0..n {
            for z in 0..n {
                if x + 1 < n {
                    graph.add_edge(&[x, y, z], 0, &[x + 1, y, z], 0, 1, 1).unwrap();
                }
                if y + 1 < n {
                    graph.add_edge(&[x, y, z], 0, &[x, y + 1, z], 0, 1, 1).unwrap();
                }
                if z + 1 < n {
                    graph.add_edge(&[x, y, z], 0, &[x, y, z + 1], 0, 1, 1).unwrap();
                }
            }
        }
    }
    graph
}

fn bench_compute_maxflow(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_maxflow on a 6-connected cube");
    group.sampling_mode(SamplingMode::Flat);
    for n in [4usize, 8, 16] {
        group.throughput(Throughput::Elements((n * n * n) as u64));
        group.bench_function(BenchmarkId::new("compute_maxflow", n), |b| {
            b.iter_batched(
                || build_cube(n),
                |mut graph| graph.compute_maxflow().unwrap(),
                BatchSize::LargeInput,
            )
        });
    }
}

criterion_group!(region_push_relabel, bench_compute_maxflow);
