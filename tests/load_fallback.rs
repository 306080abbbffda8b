//! Integration tests for bundle loading against scratch bundle roots.
//!
//! No real engine bundle is required: these exercise the fallback chain,
//! the error taxonomy, and the single-flight guarantees with artifacts
//! that are missing or fail to compile.

use std::path::Path;
use std::sync::Arc;

use codemesh_host::config::LoaderConfig;
use codemesh_host::environment::Environment;
use codemesh_host::wasm::cell::LoadState;
use codemesh_host::wasm::error::WasmError;
use codemesh_host::WasmRunner;

fn scratch_config(root: &Path) -> LoaderConfig {
    LoaderConfig {
        bundle_root: root.to_path_buf(),
        ..LoaderConfig::default()
    }
}

fn write_garbage(root: &Path, target_dir: &str) {
    let dir = root.join(target_dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("code_mesh.wasm"), b"not a wasm component").unwrap();
}

#[tokio::test]
async fn service_missing_artifact_reports_build_hint() {
    let root = tempfile::TempDir::new().unwrap();
    let runner =
        WasmRunner::with_environment(scratch_config(root.path()), Environment::Service).unwrap();

    let err = runner.load().await.unwrap_err();
    match err {
        WasmError::ArtifactNotFound { path } => {
            assert!(
                path.ends_with("service/code_mesh.wasm"),
                "unexpected path: {}",
                path.display()
            );
        }
        other => panic!("expected ArtifactNotFound, got: {other}"),
    }
    assert!(runner.load().await.unwrap_err().to_string().contains("Build the service bundle"));
    assert_eq!(runner.state(), LoadState::Failed);
}

#[tokio::test]
async fn interactive_chain_exhausts_in_declared_order() {
    let root = tempfile::TempDir::new().unwrap();
    write_garbage(root.path(), "interactive");
    write_garbage(root.path(), "portable");
    let runner =
        WasmRunner::with_environment(scratch_config(root.path()), Environment::Interactive)
            .unwrap();

    let err = runner.load().await.unwrap_err();
    match &err {
        WasmError::LoadExhausted { attempts } => {
            let targets: Vec<String> = attempts.iter().map(|a| a.target.to_string()).collect();
            assert_eq!(targets, ["interactive", "portable"]);
            assert!(attempts.iter().all(|a| !a.reason.is_empty()));
        }
        other => panic!("expected LoadExhausted, got: {other}"),
    }
    // Exhaustion reports every attempt, not just the last cause.
    let msg = err.to_string();
    assert!(msg.contains("interactive:"), "missing first attempt: {msg}");
    assert!(msg.contains("portable:"), "missing fallback attempt: {msg}");
}

#[tokio::test]
async fn interactive_missing_artifacts_also_exhaust() {
    // No pre-check outside the service chain: missing files fail per
    // target and the chain runs to exhaustion.
    let root = tempfile::TempDir::new().unwrap();
    let runner =
        WasmRunner::with_environment(scratch_config(root.path()), Environment::Interactive)
            .unwrap();

    match runner.load().await.unwrap_err() {
        WasmError::LoadExhausted { attempts } => assert_eq!(attempts.len(), 2),
        other => panic!("expected LoadExhausted, got: {other}"),
    }
}

#[tokio::test]
async fn worker_chain_is_a_single_attempt() {
    let root = tempfile::TempDir::new().unwrap();
    write_garbage(root.path(), "interactive");
    let runner =
        WasmRunner::with_environment(scratch_config(root.path()), Environment::Worker).unwrap();

    match runner.load().await.unwrap_err() {
        WasmError::LoadExhausted { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].target.to_string(), "interactive");
        }
        other => panic!("expected LoadExhausted, got: {other}"),
    }
}

#[tokio::test]
async fn unsupported_environment_fails_before_any_attempt() {
    let root = tempfile::TempDir::new().unwrap();
    let runner =
        WasmRunner::with_environment(scratch_config(root.path()), Environment::Unsupported)
            .unwrap();

    match runner.load().await.unwrap_err() {
        WasmError::UnsupportedEnvironment(environment) => {
            assert_eq!(environment, Environment::Unsupported)
        }
        other => panic!("expected UnsupportedEnvironment, got: {other}"),
    }
}

#[tokio::test]
async fn create_worker_outside_interactive_never_imports() {
    let root = tempfile::TempDir::new().unwrap();
    // A perfectly importable-looking (if broken) artifact is present; the
    // capability check must reject before touching it.
    write_garbage(root.path(), "interactive");
    let runner =
        WasmRunner::with_environment(scratch_config(root.path()), Environment::Service).unwrap();

    let err = runner.create_worker("mesh-worker.wasm").await.unwrap_err();
    assert!(matches!(err, WasmError::CapabilityUnavailable { .. }));
    assert_eq!(runner.state(), LoadState::Unloaded);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_loads_share_one_failure() {
    let root = tempfile::TempDir::new().unwrap();
    let runner = Arc::new(
        WasmRunner::with_environment(scratch_config(root.path()), Environment::Interactive)
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..4 {
        let runner = runner.clone();
        handles.push(tokio::spawn(async move {
            runner.load().await.map(|_| ()).unwrap_err().to_string()
        }));
    }

    let mut messages = Vec::new();
    for handle in handles {
        messages.push(handle.await.unwrap());
    }
    // Every caller observed the same exhaustion result.
    assert!(messages.iter().all(|m| m == &messages[0]));
    assert!(messages[0].contains("all bundle targets failed"));
    assert_eq!(runner.state(), LoadState::Failed);
}

#[tokio::test]
async fn failed_load_reattempts_on_next_call() {
    let root = tempfile::TempDir::new().unwrap();
    let runner =
        WasmRunner::with_environment(scratch_config(root.path()), Environment::Service).unwrap();

    // First attempt: no artifact at all.
    assert!(matches!(
        runner.load().await.unwrap_err(),
        WasmError::ArtifactNotFound { .. }
    ));
    assert_eq!(runner.state(), LoadState::Failed);
    assert!(runner.last_error().is_some());

    // The artifact appears (still broken): the next call re-runs the
    // chain instead of replaying the cached failure.
    write_garbage(root.path(), "service");
    assert!(matches!(
        runner.load().await.unwrap_err(),
        WasmError::LoadExhausted { .. }
    ));
    assert_eq!(runner.state(), LoadState::Failed);
}
