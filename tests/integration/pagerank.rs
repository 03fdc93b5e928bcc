use blockgraph::program::{pagerank, quiet, IterationStats, PageRankOptions, Precision, Progress};
use blockgraph::storage::flat::write_flat;
use blockgraph::storage::{build_index, Graph, GraphOptions, PrefetchMode};
use blockgraph::types::{GraphError, NodeId};
use proptest::prelude::*;
use tempfile::tempdir;

#[test]
fn star_after_one_iteration() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("star.badj");
    write_flat(&path, &[vec![1, 2], vec![], vec![]]).unwrap();
    // Node 0 fills the first 12-byte block alone.
    let graph = Graph::open(&path, GraphOptions::default().lanes(2).block_bytes(12)).unwrap();
    assert_eq!(graph.block_count(), 2);

    let opts = PageRankOptions::default().alpha(0.85).max_iterations(1);
    let run = pagerank::<f64>(&graph, &opts, &mut quiet).unwrap();
    let y = run.ranks.to_vec();
    let expected = [0.2389, 0.3806, 0.3806];
    for (got, want) in y.iter().zip(expected) {
        assert!((got - want).abs() < 1e-4, "{y:?}");
    }
    assert!((y.iter().sum::<f64>() - 1.0).abs() < 1e-12);
}

#[test]
fn f32_and_f64_agree() {
    let dir = tempdir().unwrap();
    let flat = dir.path().join("g.badj");
    let indexed = dir.path().join("g.idx");
    write_flat(&flat, &[vec![1, 2, 3], vec![2], vec![0], vec![0, 2], vec![]]).unwrap();
    build_index(&flat, &indexed, 16).unwrap();
    let graph = Graph::open(&indexed, GraphOptions::default().lanes(2)).unwrap();
    let opts = PageRankOptions::default().tolerance(1e-5);
    let single = pagerank::<f32>(&graph, &opts, &mut quiet).unwrap();
    let double = pagerank::<f64>(&graph, &opts, &mut quiet).unwrap();
    assert!(double.report.converged);
    assert_eq!(single.report.precision, Precision::F32);
    assert_eq!(double.report.precision, Precision::F64);
    for (a, b) in single.ranks.to_vec().into_iter().zip(double.ranks.to_vec()) {
        assert!((f64::from(a) - b).abs() < 1e-3);
    }
}

#[test]
fn observer_sees_every_iteration() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cycle.badj");
    write_flat(&path, &[vec![1], vec![2], vec![0, 1]]).unwrap();
    let graph = Graph::open(&path, GraphOptions::default().lanes(1)).unwrap();
    let mut seen: Vec<IterationStats> = Vec::new();
    let opts = PageRankOptions::default().max_iterations(4).tolerance(0.0);
    let run = pagerank::<f64>(&graph, &opts, &mut |stats: &IterationStats| seen.push(*stats)).unwrap();
    assert_eq!(seen.len(), 4);
    assert_eq!(run.report.residuals.len(), 4);
    for (i, stats) in seen.iter().enumerate() {
        assert_eq!(stats.iteration, i + 1);
        assert_eq!(stats.nodes, 3);
        assert_eq!(stats.edges, 4);
        match stats.progress {
            Progress::Residual(r) => assert_eq!(r, run.report.residuals[i]),
            other => panic!("unexpected progress {other:?}"),
        }
    }
}

#[test]
fn converges_on_a_symmetric_pair() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pair.badj");
    write_flat(&path, &[vec![1], vec![0]]).unwrap();
    let graph = Graph::open(&path, GraphOptions::default().lanes(1)).unwrap();
    let run = pagerank::<f64>(&graph, &PageRankOptions::default(), &mut quiet).unwrap();
    assert!(run.report.converged);
    assert_eq!(run.report.iterations, 1);
    for r in run.ranks.to_vec() {
        assert!((r - 0.5).abs() < 1e-12);
    }
}

#[test]
fn invalid_parameters_are_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("g.badj");
    write_flat(&path, &[vec![0u32]]).unwrap();
    let graph = Graph::open(&path, GraphOptions::default().lanes(1)).unwrap();
    for opts in [
        PageRankOptions::default().alpha(-0.1),
        PageRankOptions::default().alpha(1.01),
        PageRankOptions::default().tolerance(-1.0),
    ] {
        let err = pagerank::<f32>(&graph, &opts, &mut quiet).unwrap_err();
        assert!(matches!(err, GraphError::InvalidArgument(_)));
    }
}

fn adjacency() -> impl Strategy<Value = Vec<Vec<NodeId>>> {
    (2usize..48).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(0..n as NodeId, 0..5), n)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn rank_mass_is_conserved(
        lists in adjacency(),
        iterations in 1usize..6,
        alpha in 0.0f64..=1.0,
        shared in any::<bool>(),
    ) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.badj");
        write_flat(&path, &lists).unwrap();
        let mode = if shared { PrefetchMode::Shared } else { PrefetchMode::PerLane };
        let graph = Graph::open(&path, GraphOptions::default().lanes(1).prefetch(mode)).unwrap();
        let opts = PageRankOptions::default()
            .alpha(alpha)
            .max_iterations(iterations)
            .tolerance(0.0);
        let run = pagerank::<f64>(&graph, &opts, &mut quiet).unwrap();
        let ranks = run.ranks.to_vec();
        prop_assert_eq!(ranks.len(), lists.len());
        prop_assert!((ranks.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        prop_assert!(ranks.iter().all(|r| *r >= 0.0));
    }
}
