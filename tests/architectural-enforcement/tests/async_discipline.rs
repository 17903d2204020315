//! Async discipline scans over the production sources

use architectural_enforcement::{production_sources, report, rust_sources, scan, workspace_root};

#[test]
fn test_sources_are_found() {
    let files = production_sources();
    assert!(
        files.iter().any(|p| p.ends_with("ingest/core/src/lib.rs")),
        "production roots not found under {}",
        workspace_root().display()
    );
}

#[test]
fn test_no_blocking_sleep() {
    let violations = scan(&production_sources(), &["std::thread::sleep", "thread::sleep("]);
    assert!(
        violations.is_empty(),
        "Blocking sleep in production code; use tokio::time:\n{}",
        report(&violations)
    );
}

#[test]
fn test_no_blocking_io_outside_config() {
    let files: Vec<_> = production_sources()
        .into_iter()
        .filter(|path| !path.ends_with("config.rs"))
        .collect();
    let violations = scan(&files, &["std::fs::", "std::io::stdin", "std::io::stdout", "println!("]);
    assert!(
        violations.is_empty(),
        "Blocking I/O in async code; use tokio::fs / tokio::io:\n{}",
        report(&violations)
    );
}

#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(&production_sources(), &[".unwrap()", ".expect("]);
    assert!(
        violations.is_empty(),
        "unwrap/expect in production code; propagate errors instead:\n{}",
        report(&violations)
    );
}

#[test]
fn test_decoder_is_runtime_free() {
    let decoder = rust_sources(&workspace_root().join("ingest/core/src/decoder"));
    assert!(!decoder.is_empty());
    let violations = scan(&decoder, &["tokio::", "reqwest::", ".await"]);
    assert!(
        violations.is_empty(),
        "Decoder must stay synchronous:\n{}",
        report(&violations)
    );
}
