//! Environment-specific module loading with fallback chains.
//!
//! The loader resolves its environment, chain, and pre-check behavior once
//! at construction. `load()` walks the chain in declared order; loader
//! state only settles once the whole chain has.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{info, warn};

use crate::config::LoaderConfig;
use crate::environment::Environment;

use super::artifacts::{self, Target};
use super::cell::{LoadCell, LoadState};
use super::error::{LoadAttempt, WasmError};
use super::module::{ModuleHandle, WasmEngine};

pub struct ModuleLoader {
    environment: Environment,
    chain: &'static [Target],
    verify_before_import: bool,
    config: LoaderConfig,
    engine: Arc<WasmEngine>,
    cell: LoadCell<Arc<ModuleHandle>>,
}

impl ModuleLoader {
    pub fn new(engine: Arc<WasmEngine>, environment: Environment, config: LoaderConfig) -> Self {
        Self {
            environment,
            chain: artifacts::chain_for(environment),
            verify_before_import: artifacts::verify_before_import(environment),
            config,
            engine,
            cell: LoadCell::new(),
        }
    }

    pub fn state(&self) -> LoadState {
        self.cell.state()
    }

    pub fn last_error(&self) -> Option<WasmError> {
        self.cell.last_error()
    }

    /// Load the module, joining an in-flight load or returning the cached
    /// handle. A failed attempt is re-run on the next call.
    pub async fn load(&self) -> Result<Arc<ModuleHandle>, WasmError> {
        let environment = self.environment;
        let chain = self.chain;
        let verify = self.verify_before_import;
        let config = self.config.clone();
        let engine = Arc::clone(&self.engine);
        self.cell
            .get_or_load(move || load_chain(engine, environment, chain, verify, config).boxed())
            .await
    }
}

/// Walk the fallback chain: each target is attempted exactly once, in
/// declared order, and a failed attempt leaves nothing behind.
async fn load_chain(
    engine: Arc<WasmEngine>,
    environment: Environment,
    chain: &'static [Target],
    verify: bool,
    config: LoaderConfig,
) -> Result<Arc<ModuleHandle>, WasmError> {
    if !environment.wasm_supported() {
        return Err(WasmError::UnsupportedEnvironment(environment));
    }

    let mut attempts = Vec::new();
    for &target in chain {
        let path = artifacts::module_path(&config.bundle_root, target);

        if verify && !path.exists() {
            return Err(WasmError::ArtifactNotFound { path });
        }

        let attempt_engine = Arc::clone(&engine);
        let attempt_config = config.clone();
        let attempt_path = path.clone();
        let result = tokio::task::spawn_blocking(move || {
            attempt_engine.instantiate(&attempt_path, target, &attempt_config)
        })
        .await
        .map_err(|e| WasmError::ImportFailed {
            target,
            reason: format!("task panicked: {e}"),
        })
        .and_then(|r| r);

        match result {
            Ok(handle) => {
                info!(%target, path = %path.display(), "loaded engine bundle");
                return Ok(Arc::new(handle));
            }
            Err(err) => {
                warn!(%target, path = %path.display(), error = %err, "bundle load attempt failed");
                let reason = match err {
                    WasmError::ImportFailed { reason, .. } => reason,
                    other => other.to_string(),
                };
                attempts.push(LoadAttempt { target, reason });
            }
        }
    }

    Err(WasmError::LoadExhausted { attempts })
}
