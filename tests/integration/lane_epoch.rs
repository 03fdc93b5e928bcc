use blockgraph::program::scan;
use blockgraph::storage::flat::write_flat;
use blockgraph::storage::{
    build_index, partition, Graph, GraphOptions, LaneCursor, LaneState, PrefetchMode, Prefetcher,
};
use blockgraph::types::{GraphError, NodeId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::thread;
use tempfile::{tempdir, TempDir};

const MODES: [PrefetchMode; 3] = [PrefetchMode::PerLane, PrefetchMode::Shared, PrefetchMode::Off];

fn random_lists(n: usize, max_degree: usize, seed: u64) -> Vec<Vec<NodeId>> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let degree = rng.gen_range(0..=max_degree);
            (0..degree).map(|_| rng.gen_range(0..n as NodeId)).collect()
        })
        .collect()
}

/// Writes the same graph in all three layouts.
fn all_formats(lists: &[Vec<NodeId>], budget: usize) -> (TempDir, Vec<PathBuf>) {
    let dir = tempdir().unwrap();
    let flat = dir.path().join("g.badj");
    let indexed = dir.path().join("g.idx");
    let sharded = dir.path().join("g.shards");
    write_flat(&flat, lists).unwrap();
    build_index(&flat, &indexed, budget).unwrap();
    partition(&flat, &sharded, budget).unwrap();
    (dir, vec![flat, indexed, sharded])
}

/// One epoch over every lane; returns visited ids and the degree sum.
fn epoch(graph: &Graph, cursors: &mut [LaneCursor<'_>]) -> (Vec<NodeId>, u64) {
    let prefetcher = Prefetcher::new(graph, graph.prefetch_mode());
    let mut ids = Vec::new();
    let mut degree_sum = 0;
    thread::scope(|s| {
        let feeds = prefetcher.start(s);
        for (cursor, mut feed) in cursors.iter_mut().zip(feeds) {
            let stats = cursor
                .run_epoch(&mut feed, |id, record| {
                    ids.push(id);
                    assert_eq!(record.degree() as usize, record.neighbors().count());
                })
                .unwrap();
            degree_sum += stats.edges;
            assert_eq!(cursor.state(), LaneState::EpochDone);
            assert!(feed.in_flight().is_none());
        }
    });
    (ids, degree_sum)
}

fn open(path: &Path, lanes: usize, budget: usize, mode: PrefetchMode) -> Graph {
    let options = GraphOptions::default()
        .lanes(lanes)
        .block_bytes(budget)
        .prefetch(mode);
    Graph::open(path, options).unwrap()
}

#[test]
fn every_node_visited_once_per_epoch() {
    let lists = random_lists(300, 7, 7);
    let m: usize = lists.iter().map(Vec::len).sum();
    let (_dir, paths) = all_formats(&lists, 96);
    for path in &paths {
        for mode in MODES {
            for lanes in [1, 3, 4] {
                let graph = open(path, lanes, 96, mode);
                let mut cursors = LaneCursor::for_graph(&graph).unwrap();
                for _ in 0..3 {
                    let (mut ids, degree_sum) = epoch(&graph, &mut cursors);
                    ids.sort_unstable();
                    let expected: Vec<NodeId> = (0..300).collect();
                    assert_eq!(ids, expected, "{} {mode:?} lanes={lanes}", path.display());
                    assert_eq!(degree_sum, m as u64);
                }
            }
        }
    }
}

#[test]
fn lanes_own_strided_blocks() {
    let lists = random_lists(64, 3, 11);
    let (_dir, paths) = all_formats(&lists, 40);
    let graph = open(&paths[1], 3, 40, PrefetchMode::PerLane);
    for block_no in 1..=graph.block_count() {
        assert_eq!(graph.lane_of(block_no), ((block_no - 1) % 3) as usize);
    }
    let mut cursors = LaneCursor::for_graph(&graph).unwrap();
    let prefetcher = Prefetcher::new(&graph, PrefetchMode::PerLane);
    thread::scope(|s| {
        let feeds = prefetcher.start(s);
        for (cursor, mut feed) in cursors.iter_mut().zip(feeds) {
            let lane = cursor.lane();
            let mut visited_blocks = Vec::new();
            cursor.begin_epoch(&mut feed).unwrap();
            loop {
                visited_blocks.push(cursor.block_no());
                while cursor.next_node().unwrap().is_some() {}
                if !cursor.advance(&mut feed).unwrap() {
                    break;
                }
            }
            let expected: Vec<u64> = (1..=graph.block_count())
                .filter(|b| graph.lane_of(*b) == lane)
                .collect();
            assert_eq!(visited_blocks, expected);
        }
    });
}

#[test]
fn scan_degree_sum_matches_header_in_every_mode() {
    let lists = random_lists(500, 12, 3);
    let (_dir, paths) = all_formats(&lists, 256);
    for path in &paths {
        for mode in MODES {
            let graph = open(path, 4, 256, mode);
            let report = scan(&graph).unwrap();
            assert_eq!(report.visited, 500);
            assert_eq!(report.degree_sum, graph.m());
            assert_eq!(report.blocks, graph.block_count());
        }
    }
}

#[test]
fn more_lanes_than_blocks_is_rejected() {
    let lists = random_lists(10, 2, 5);
    let (_dir, paths) = all_formats(&lists, 1024);
    for path in &paths {
        let err = Graph::open(path, GraphOptions::default().lanes(2).block_bytes(1024)).unwrap_err();
        assert!(matches!(
            err,
            GraphError::LaneCountMismatch { blocks: 1, lanes: 2 }
        ));
    }
}
