use blockgraph::program::{components, pagerank, quiet, ComponentsOptions, PageRankOptions};
use blockgraph::storage::flat::write_flat;
use blockgraph::storage::vector::read_vector;
use blockgraph::storage::{Graph, GraphOptions, NumericVector, VectorBacking, VectorOptions};
use blockgraph::types::NodeId;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::Path;
use tempfile::tempdir;

fn write_random(path: &Path, n: usize, seed: u64) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let lists: Vec<Vec<NodeId>> = (0..n)
        .map(|_| {
            let degree = rng.gen_range(0..6);
            (0..degree).map(|_| rng.gen_range(0..n as NodeId)).collect()
        })
        .collect();
    write_flat(path, &lists).unwrap();
}

fn scratch_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

#[test]
fn mapped_pagerank_matches_in_memory() {
    let dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let path = dir.path().join("g.badj");
    write_random(&path, 200, 1);
    let graph = Graph::open(&path, GraphOptions::default().lanes(3).block_bytes(128)).unwrap();

    let memory = pagerank::<f64>(&graph, &PageRankOptions::default(), &mut quiet).unwrap();
    let mapped_opts = PageRankOptions::default().vectors(
        VectorOptions::default()
            .out_of_core_threshold(0)
            .scratch_dir(scratch.path()),
    );
    let mapped = pagerank::<f64>(&graph, &mapped_opts, &mut quiet).unwrap();
    assert_eq!(memory.report.backing, VectorBacking::Memory);
    assert_eq!(mapped.report.backing, VectorBacking::Mapped);
    assert_eq!(mapped.ranks.backing(), VectorBacking::Mapped);
    assert_eq!(memory.report.iterations, mapped.report.iterations);
    for (a, b) in memory.ranks.to_vec().into_iter().zip(mapped.ranks.to_vec()) {
        assert!((a - b).abs() < 1e-9);
    }

    // The final vector is still alive; the scratch vector was released.
    assert_eq!(scratch_entries(scratch.path()), 1);
    drop(mapped);
    assert_eq!(scratch_entries(scratch.path()), 0);
}

#[test]
fn mapped_components_match_in_memory() {
    let dir = tempdir().unwrap();
    let scratch = tempdir().unwrap();
    let path = dir.path().join("g.badj");
    write_random(&path, 150, 2);
    let graph = Graph::open(&path, GraphOptions::default().lanes(2).block_bytes(64)).unwrap();

    let memory = components(&graph, &ComponentsOptions::default(), &mut quiet).unwrap();
    let mapped_opts = ComponentsOptions::default().vectors(
        VectorOptions::default()
            .out_of_core_threshold(10)
            .scratch_dir(scratch.path()),
    );
    let mapped = components(&graph, &mapped_opts, &mut quiet).unwrap();
    assert_eq!(mapped.report.backing, VectorBacking::Mapped);
    assert_eq!(memory.labels.to_vec(), mapped.labels.to_vec());
    assert_eq!(memory.report.components, mapped.report.components);
}

#[test]
fn threshold_is_exclusive() {
    let scratch = tempdir().unwrap();
    let opts = VectorOptions::default()
        .out_of_core_threshold(8)
        .scratch_dir(scratch.path());
    let at = NumericVector::<u32>::new(8, &opts).unwrap();
    let above = NumericVector::<u32>::new(9, &opts).unwrap();
    let empty = NumericVector::<u32>::new(0, &VectorOptions::default().out_of_core_threshold(0)).unwrap();
    assert_eq!(at.backing(), VectorBacking::Memory);
    assert_eq!(above.backing(), VectorBacking::Mapped);
    assert_eq!(empty.backing(), VectorBacking::Memory);
    assert!(empty.is_empty());
}

#[test]
fn persisted_vectors_read_back_from_both_backings() {
    let dir = tempdir().unwrap();
    let graph_path = dir.path().join("g.badj");
    write_random(&graph_path, 64, 3);
    let graph = Graph::open(&graph_path, GraphOptions::default().lanes(1)).unwrap();

    for threshold in [0, u64::MAX] {
        let opts = PageRankOptions::default().vectors(
            VectorOptions::default()
                .out_of_core_threshold(threshold)
                .scratch_dir(dir.path()),
        );
        let run = pagerank::<f32>(&graph, &opts, &mut quiet).unwrap();
        let expected = run.ranks.to_vec();
        let out = dir.path().join(format!("ranks-{threshold}.bin"));
        run.ranks.persist(&out).unwrap();
        assert_eq!(std::fs::metadata(&out).unwrap().len(), 64 * 4);
        assert_eq!(read_vector::<f32>(&out).unwrap(), expected);
    }
}
