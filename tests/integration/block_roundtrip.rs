#![allow(clippy::needless_range_loop)]

use blockgraph::storage::flat::{write_flat, FlatReader};
use blockgraph::storage::{
    build_index, partition, BlockFeed, Graph, GraphFormat, GraphOptions, LaneCursor,
};
use blockgraph::types::NodeId;
use proptest::prelude::*;
use std::path::Path;
use tempfile::tempdir;

/// Traverses every lane with direct loads and returns the records ordered by id.
fn traverse(path: &Path, options: GraphOptions) -> Vec<(NodeId, Vec<NodeId>)> {
    let graph = Graph::open(path, options).unwrap();
    let mut records = Vec::new();
    for lane in 0..graph.lanes() {
        let mut cursor = LaneCursor::new(&graph, lane).unwrap();
        let mut feed = BlockFeed::direct(&graph, lane);
        cursor
            .run_epoch(&mut feed, |id, record| records.push((id, record.to_vec())))
            .unwrap();
    }
    records.sort_by_key(|(id, _)| *id);
    records
}

fn flat_records(path: &Path) -> Vec<(NodeId, Vec<NodeId>)> {
    let mut reader = FlatReader::open(path).unwrap();
    let mut records = Vec::new();
    while let Some(record) = reader.next_node().unwrap() {
        records.push(record);
    }
    records
}

fn adjacency() -> impl Strategy<Value = Vec<Vec<NodeId>>> {
    (1usize..40).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(0..n as NodeId, 0..6), n)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn indexed_and_sharded_traversal_matches_flat(
        lists in adjacency(),
        budget in 28usize..96,
        lanes in 1usize..3,
    ) {
        let dir = tempdir().unwrap();
        let flat = dir.path().join("g.badj");
        let indexed = dir.path().join("g.idx");
        let sharded = dir.path().join("g.shards");
        write_flat(&flat, &lists).unwrap();
        let summary = build_index(&flat, &indexed, budget).unwrap();
        partition(&flat, &sharded, budget).unwrap();
        prop_assume!(summary.blocks as usize >= lanes);

        let expected = flat_records(&flat);
        prop_assert_eq!(expected.len(), lists.len());
        let options = GraphOptions::default().lanes(lanes).block_bytes(budget);
        prop_assert_eq!(&traverse(&flat, options.clone()), &expected);
        prop_assert_eq!(&traverse(&indexed, options.clone()), &expected);
        prop_assert_eq!(&traverse(&sharded, options), &expected);
    }

    #[test]
    fn first_nodes_cover_every_id(lists in adjacency(), budget in 28usize..96) {
        let dir = tempdir().unwrap();
        let flat = dir.path().join("g.badj");
        let indexed = dir.path().join("g.idx");
        write_flat(&flat, &lists).unwrap();
        build_index(&flat, &indexed, budget).unwrap();
        let graph = Graph::open(&indexed, GraphOptions::default().lanes(1)).unwrap();
        prop_assert_eq!(graph.format(), GraphFormat::IndexedSingleFile);

        let firsts: Vec<NodeId> = graph.index().first_nodes().collect();
        prop_assert_eq!(firsts[0], 0);
        for pair in firsts.windows(2) {
            prop_assert!(pair[0] < pair[1]);
        }
        let mut next = 0u64;
        for block_no in 1..=graph.block_count() {
            let (first, end) = graph.block_span(block_no).unwrap();
            prop_assert_eq!(first, next);
            prop_assert!(end > first);
            prop_assert!(graph.index().get(block_no).unwrap().len <= budget as u64);
            next = end;
        }
        prop_assert_eq!(next, lists.len() as u64);
    }
}

#[test]
fn short_last_block_is_kept() {
    let dir = tempdir().unwrap();
    let flat = dir.path().join("g.badj");
    let indexed = dir.path().join("g.idx");
    let sharded = dir.path().join("g.shards");
    // Five 8-byte records cut at 16 bytes: blocks of 2, 2 and 1 records.
    write_flat(&flat, &[vec![1], vec![2], vec![3], vec![4], vec![0]]).unwrap();
    assert_eq!(build_index(&flat, &indexed, 16).unwrap().blocks, 3);
    assert_eq!(partition(&flat, &sharded, 16).unwrap().blocks, 3);

    for path in [&indexed, &sharded] {
        let graph = Graph::open(path, GraphOptions::default().lanes(1)).unwrap();
        let firsts: Vec<NodeId> = graph.index().first_nodes().collect();
        assert_eq!(firsts, vec![0, 2, 4]);
        assert_eq!(graph.index().get(3).unwrap().len, 8);
        assert_eq!(graph.block_span(3).unwrap(), (4, 5));
        let report = graph.verify().unwrap();
        assert_eq!(report.nodes_seen, 5);
        assert_eq!(report.edges_seen, 5);
    }
    assert_eq!(
        traverse(&sharded, GraphOptions::default().lanes(3)),
        flat_records(&flat)
    );
}

#[test]
fn sharded_layout_has_summary_and_block_files() {
    let dir = tempdir().unwrap();
    let flat = dir.path().join("g.badj");
    let sharded = dir.path().join("g.shards");
    write_flat(&flat, &[vec![1, 2], vec![], vec![0]]).unwrap();
    let summary = partition(&flat, &sharded, 12).unwrap();
    assert_eq!(summary.format, GraphFormat::IndexedSharded);
    assert_eq!(summary.blocks, 2);
    assert!(sharded.join("0").is_file());
    assert_eq!(std::fs::metadata(sharded.join("1")).unwrap().len(), 12);
    assert_eq!(std::fs::metadata(sharded.join("2")).unwrap().len(), 12);
    assert!(!sharded.join("3").exists());
}
