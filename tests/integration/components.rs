use blockgraph::program::{components, quiet, ComponentsOptions, IterationStats, Progress};
use blockgraph::storage::flat::write_flat;
use blockgraph::storage::{partition, Graph, GraphOptions};
use blockgraph::types::NodeId;
use proptest::prelude::*;
use tempfile::tempdir;

fn symmetrize(lists: &[Vec<NodeId>]) -> Vec<Vec<NodeId>> {
    let mut out = lists.to_vec();
    for (src, list) in lists.iter().enumerate() {
        for &dst in list {
            out[dst as usize].push(src as NodeId);
        }
    }
    out
}

fn union_find_labels(lists: &[Vec<NodeId>]) -> Vec<u32> {
    fn root(parent: &mut [usize], mut x: usize) -> usize {
        while parent[x] != x {
            parent[x] = parent[parent[x]];
            x = parent[x];
        }
        x
    }
    let mut parent: Vec<usize> = (0..lists.len()).collect();
    for (src, list) in lists.iter().enumerate() {
        for &dst in list {
            let a = root(&mut parent, src);
            let b = root(&mut parent, dst as usize);
            let (lo, hi) = (a.min(b), a.max(b));
            parent[hi] = lo;
        }
    }
    (0..lists.len())
        .map(|i| root(&mut parent, i) as u32)
        .collect()
}

#[test]
fn directed_cycle_reaches_a_single_label() {
    let cycle = vec![vec![1], vec![2], vec![3], vec![0]];
    for lists in [cycle.clone(), symmetrize(&cycle)] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cycle.badj");
        write_flat(&path, &lists).unwrap();
        let graph = Graph::open(&path, GraphOptions::default().lanes(2).block_bytes(16)).unwrap();
        let mut seen = Vec::new();
        let run = components(&graph, &ComponentsOptions::default(), &mut |stats: &IterationStats| {
            seen.push(stats.progress)
        })
        .unwrap();
        assert!(matches!(seen[0], Progress::Propagations(p) if p > 0));
        assert_eq!(seen.last(), Some(&Progress::Propagations(0)));
        assert!(run.report.iterations >= 2);
        assert!(run.report.converged);
        assert_eq!(run.labels.to_vec(), vec![0, 0, 0, 0]);
        assert_eq!(run.report.components, 1);
    }
}

#[test]
fn first_epoch_lowers_both_endpoints() {
    let forward = vec![vec![1], vec![2], vec![3], vec![0]];
    let backward = vec![vec![3], vec![0], vec![1], vec![2]];
    for lists in [forward, backward] {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cycle.badj");
        write_flat(&path, &lists).unwrap();
        let graph = Graph::open(&path, GraphOptions::default().lanes(1)).unwrap();
        let opts = ComponentsOptions::default().max_iterations(1);
        let run = components(&graph, &opts, &mut quiet).unwrap();
        // Ids are visited in order; the closing edge back to 0 lowers nothing.
        assert_eq!(run.report.propagations, vec![3]);
        assert!(!run.report.converged);
        assert_eq!(run.labels.to_vec(), vec![0, 0, 0, 0]);
    }
}

#[test]
fn sharded_graph_with_isolated_nodes() {
    let dir = tempdir().unwrap();
    let flat = dir.path().join("g.badj");
    let sharded = dir.path().join("g.shards");
    // {0, 3}, {1}, {2, 4, 5}, {6}
    write_flat(
        &flat,
        &[vec![3], vec![], vec![5], vec![], vec![5], vec![2], vec![]],
    )
    .unwrap();
    partition(&flat, &sharded, 16).unwrap();
    let graph = Graph::open(&sharded, GraphOptions::default().lanes(3)).unwrap();
    let run = components(&graph, &ComponentsOptions::default(), &mut quiet).unwrap();
    assert_eq!(run.labels.to_vec(), vec![0, 1, 2, 0, 2, 2, 6]);
    assert_eq!(run.report.components, 4);
}

#[test]
fn fixpoint_is_stable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("g.badj");
    let lists = vec![vec![4], vec![0], vec![], vec![2], vec![]];
    write_flat(&path, &lists).unwrap();
    let graph = Graph::open(&path, GraphOptions::default().lanes(2).block_bytes(8)).unwrap();
    let first = components(&graph, &ComponentsOptions::default(), &mut quiet).unwrap();
    assert!(first.report.converged);
    let again = components(
        &graph,
        &ComponentsOptions::default().max_iterations(first.report.iterations + 3),
        &mut quiet,
    )
    .unwrap();
    assert_eq!(first.labels.to_vec(), again.labels.to_vec());
    assert_eq!(again.report.iterations, first.report.iterations);
    assert_eq!(*again.report.propagations.last().unwrap(), 0);
}

fn adjacency() -> impl Strategy<Value = Vec<Vec<NodeId>>> {
    (1usize..40).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(0..n as NodeId, 0..3), n)
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn labels_match_weak_components(lists in adjacency(), lanes in 1usize..3) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("g.badj");
        write_flat(&path, &lists).unwrap();
        let options = GraphOptions::default().lanes(lanes).block_bytes(16);
        let graph = match Graph::open(&path, options) {
            Ok(graph) => graph,
            Err(_) => return Ok(()),
        };
        let opts = ComponentsOptions::default().max_iterations(lists.len() + 2);
        let run = components(&graph, &opts, &mut quiet).unwrap();
        prop_assert!(run.report.converged);
        prop_assert_eq!(run.labels.to_vec(), union_find_labels(&lists));
    }
}
