#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use blockgraph::storage::flat::write_flat;
use blockgraph::storage::vector::read_vector;
use serde_json::Value;
use tempfile::TempDir;

fn setup_graph() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("star.badj");
    write_flat(&path, &[vec![1, 2], vec![], vec![]]).expect("write flat graph");
    (dir, path)
}

/// The binary with an isolated config file and default logging.
fn cli(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("blockgraph");
    cmd.env("BLOCKGRAPH_CONFIG", dir.join("cli.toml"))
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let output = cmd.output().expect("run blockgraph");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("valid json")
}

#[test]
fn index_and_partition_write_summaries() {
    let (dir, graph) = setup_graph();
    let indexed = dir.path().join("star.idx");
    let sharded = dir.path().join("star.shards");

    let json = stdout_json(
        cli(dir.path())
            .args(["--format", "json", "--block-bytes", "12", "index"])
            .arg(&graph)
            .arg(&indexed),
    );
    assert_eq!(json["format"], "indexed_single_file");
    assert_eq!(json["blocks"], 2);
    assert_eq!(json["n"], 3);

    let json = stdout_json(
        cli(dir.path())
            .args(["--format", "json", "--block-bytes", "12", "partition"])
            .arg(&graph)
            .arg(&sharded),
    );
    assert_eq!(json["format"], "indexed_sharded");
    assert!(sharded.join("0").is_file());
    assert!(sharded.join("2").is_file());
}

#[test]
fn pagerank_prints_progress_to_stderr() {
    let (dir, graph) = setup_graph();
    let ranks = dir.path().join("ranks.bin");
    let output = cli(dir.path())
        .args(["--lanes", "1", "pagerank"])
        .arg(&graph)
        .arg("3")
        .arg(&ranks)
        .args(["--precision", "f64"])
        .output()
        .expect("run blockgraph");
    assert!(output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    let lines: Vec<&str> = stderr.lines().collect();
    assert_eq!(lines[0], "Nodes: 3");
    assert_eq!(lines[1], "Edges: 2");
    assert!(lines[2].starts_with("1: "));
    assert_eq!(lines.len(), 5);
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("iterations=3"));

    let y = read_vector::<f64>(&ranks).unwrap();
    assert_eq!(y.len(), 3);
    assert!((y.iter().sum::<f64>() - 1.0).abs() < 1e-9);
}

#[test]
fn components_writes_labels() {
    let dir = TempDir::new().unwrap();
    let graph = dir.path().join("pairs.badj");
    write_flat(&graph, &[vec![1], vec![], vec![3], vec![]]).unwrap();
    let labels = dir.path().join("labels.bin");
    let json = stdout_json(
        cli(dir.path())
            .args(["--format", "json", "--lanes", "2", "--block-bytes", "8", "components"])
            .arg(&graph)
            .arg("10")
            .arg(&labels),
    );
    assert_eq!(json["converged"], true);
    assert_eq!(json["components"], 2);
    assert_eq!(read_vector::<u32>(&labels).unwrap(), vec![0, 0, 2, 2]);
}

#[test]
fn scan_and_inspect_report_layout() {
    let (dir, graph) = setup_graph();
    let json = stdout_json(
        cli(dir.path())
            .args(["--format", "json", "--lanes", "2", "--block-bytes", "12", "scan"])
            .arg(&graph),
    );
    assert_eq!(json["visited"], 3);
    assert_eq!(json["degree_sum"], 2);

    let json = stdout_json(
        cli(dir.path())
            .args(["--format", "json", "--lanes", "2", "--block-bytes", "12", "inspect", "--verify"])
            .arg(&graph),
    );
    assert_eq!(json["format"], "flat");
    assert_eq!(json["blocks"].as_array().unwrap().len(), 2);
    assert_eq!(json["blocks"][1]["first_node"], 1);
    assert_eq!(json["verify"]["edges_seen"], 2);
}

#[test]
fn config_file_supplies_defaults() {
    let (dir, graph) = setup_graph();
    fs::write(
        dir.path().join("cli.toml"),
        "[graph]\nlanes = 2\nblock_bytes = 12\n\n[vectors]\nout_of_core_threshold = 0\nscratch_dir = \".\"\n",
    )
    .unwrap();
    let json = stdout_json(
        cli(dir.path())
            .current_dir(dir.path())
            .args(["--format", "json", "pagerank"])
            .arg(&graph)
            .arg("2"),
    );
    assert_eq!(json["backing"], "mapped");
    assert_eq!(json["iterations"], 2);

    // Flags win over the file.
    let output = cli(dir.path())
        .args(["--lanes", "4", "scan"])
        .arg(&graph)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error:"), "{stderr}");
}

#[test]
fn failures_exit_with_one() {
    let (dir, graph) = setup_graph();
    let missing = dir.path().join("absent.badj");
    let output = cli(dir.path()).arg("scan").arg(&missing).output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).starts_with("error: "));

    let output = cli(dir.path())
        .args(["--lanes", "1", "pagerank"])
        .arg(&graph)
        .args(["5", "--alpha", "2.0"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));

    let output = cli(dir.path())
        .arg("index")
        .arg(&graph)
        .arg(&graph)
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("overwrite"));

    let before = fs::read(&graph).unwrap();
    let output = cli(dir.path())
        .current_dir(dir.path())
        .args(["index", "star.badj", "./star.badj"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(fs::read(&graph).unwrap(), before);
}
