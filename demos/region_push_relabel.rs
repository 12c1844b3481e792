//! Reproduces `examples/original_source/Example.cpp`: a 6x6-padded,
//! 4-connected, 2-thread max-flow on the 4x4 unit square of spec.md S1.

#[cfg(unix)]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

use std::time::Instant;

use clap::Parser;
use toolbox_rs::arc_template::ArcTemplate;
use toolbox_rs::regular_graph::{RegularGraph, Segment, SolverConfig};

#[derive(Parser, Debug)]
#[clap(name = "region_push_relabel", about = "4-connected unit-square max-flow demo")]
struct Args {
    /// Worker threads for the region scheduler.
    #[clap(short, long, default_value_t = 2)]
    threads: usize,

    /// Discharges between global relabels, in units of block_count.
    #[clap(short, long, default_value_t = 1)]
    global_update_frequency: usize,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    // Even though the graph we care about is 4x4, we allocate 6x6 nodes so
    // the grid dimensions divide the block dimensions evenly (Example.cpp's
    // own comment on why it pads).
    let template = ArcTemplate::four_connected_2d();
    let config = SolverConfig {
        thread_count: args.threads,
        global_update_frequency: args.global_update_frequency,
        ..Default::default()
    };
    let mut graph: RegularGraph<i16, i64> =
        RegularGraph::new(vec![6, 6], vec![3, 3], template, config)
            .expect("6x6 grid with 3x3 blocks is a valid layout");

    graph
        .add_terminal_weights(&[0, 0], 0, 100, 0)
        .expect("node (0,0) is connected to the source");
    graph
        .add_terminal_weights(&[3, 3], 0, 0, 100)
        .expect("node (3,3) is connected to the sink");

    let edges: &[([usize; 2], [usize; 2], i16)] = &[
        ([0, 0], [0, 1], 5),
        ([0, 0], [1, 0], 5),
        ([0, 1], [0, 2], 1),
        ([0, 1], [1, 1], 5),
        ([0, 2], [0, 3], 5),
        ([0, 2], [1, 2], 5),
        ([0, 3], [1, 3], 5),
        ([1, 0], [1, 1], 5),
        ([1, 0], [2, 0], 5),
        ([1, 1], [1, 2], 2),
        ([1, 1], [2, 1], 5),
        ([1, 2], [1, 3], 5),
        ([1, 2], [2, 2], 5),
        ([1, 3], [2, 3], 5),
        ([2, 0], [3, 0], 5),
        ([2, 1], [3, 1], 5),
        ([2, 2], [2, 3], 5),
        ([2, 2], [3, 2], 5),
        ([2, 3], [3, 3], 5),
        ([3, 0], [3, 1], 5),
        ([3, 1], [3, 2], 3),
        ([3, 2], [3, 3], 5),
    ];
    for &(u, v, cap) in edges {
        graph
            .add_edge(&u, 0, &v, 0, cap, 0)
            .expect("edge endpoints are 4-connected neighbors");
    }

    let start = Instant::now();
    graph.compute_maxflow().expect("compute_maxflow");
    println!("Flow = {} (computed in {:?})", graph.get_flow().unwrap(), start.elapsed());

    for i in 0..4usize {
        for j in 0..4usize {
            let segment = graph.get_segment(&[i, j], 0).unwrap();
            let label = match segment {
                Segment::S => "S",
                Segment::T => "T",
            };
            println!("Segment of node ({i}, {j}) = {label}");
        }
    }
}
