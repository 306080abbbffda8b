//! WASM engine and the loaded module's export surface.
//!
//! The engine bundle is compiled and instantiated once per load; the
//! resulting `ModuleHandle` owns the store exclusively and serializes
//! export calls on it. Calls bridge async → sync wasmtime via
//! `spawn_blocking`, and `post_return` runs after every call because the
//! store is reused.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use wasmtime::component::{Component, Instance, Linker, ResourceTable, Val};
use wasmtime::{Engine, Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::{WasiCtx, WasiCtxBuilder, WasiCtxView, WasiView};

use crate::config::LoaderConfig;

use super::artifacts::Target;
use super::error::WasmError;

/// Platform report from the engine's `get-platform-info` export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
    pub runtime: String,
    #[serde(default)]
    pub persistent_storage: bool,
}

/// Feature probe from the engine's `check-feature-support` export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSupport {
    #[serde(default)]
    pub threads: bool,
    #[serde(default)]
    pub simd: bool,
    #[serde(default)]
    pub bulk_memory: bool,
    #[serde(default)]
    pub reference_types: bool,
}

/// Store data for the engine instance — WASI context plus memory limits.
struct HostState {
    ctx: WasiCtx,
    table: ResourceTable,
    limits: StoreLimits,
}

impl WasiView for HostState {
    fn ctx(&mut self) -> WasiCtxView<'_> {
        WasiCtxView {
            ctx: &mut self.ctx,
            table: &mut self.table,
        }
    }
}

impl HostState {
    fn new(max_memory_mb: u32) -> Self {
        Self {
            ctx: WasiCtxBuilder::new().build(),
            table: ResourceTable::new(),
            limits: StoreLimitsBuilder::new()
                .memory_size(max_memory_mb as usize * 1024 * 1024)
                .build(),
        }
    }
}

/// The wasmtime engine, shared by every load attempt.
pub struct WasmEngine {
    engine: Engine,
}

impl WasmEngine {
    /// Create an engine with the component model enabled.
    pub fn new() -> Result<Self, WasmError> {
        let mut config = wasmtime::Config::new();
        config.wasm_component_model(true);
        let engine =
            Engine::new(&config).map_err(|e| WasmError::EngineCreation(e.to_string()))?;
        Ok(Self { engine })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Compile, link, instantiate, and run one-time init for one bundle
    /// artifact. Any failure maps to `ImportFailed` for the target.
    pub(crate) fn instantiate(
        &self,
        path: &Path,
        target: Target,
        config: &LoaderConfig,
    ) -> Result<ModuleHandle, WasmError> {
        let import_failed = |stage: &str, reason: String| WasmError::ImportFailed {
            target,
            reason: format!("{stage}: {reason}"),
        };

        let component = Component::from_file(&self.engine, path)
            .map_err(|e| import_failed("compile", e.to_string()))?;

        let mut store = Store::new(&self.engine, HostState::new(config.max_memory_mb));
        store.limiter(|state| &mut state.limits);

        let mut linker = Linker::new(&self.engine);
        wasmtime_wasi::p2::add_to_linker_sync(&mut linker)
            .map_err(|e| import_failed("wasi link", e.to_string()))?;

        let instance = linker
            .instantiate(&mut store, &component)
            .map_err(|e| import_failed("instantiate", e.to_string()))?;

        let mut state = ModuleState { store, instance };
        state
            .call("init", vec![], 0)
            .map_err(|e| import_failed("init", e.to_string()))?;

        Ok(ModuleHandle {
            target,
            shared: SharedState {
                inner: Arc::new(Mutex::new(state)),
                perf_monitoring: config.enable_performance_monitoring,
            },
        })
    }
}

struct ModuleState {
    store: Store<HostState>,
    instance: Instance,
}

impl ModuleState {
    /// Look up an export and call it. `results` entries are placeholders
    /// overwritten by wasmtime.
    fn call(
        &mut self,
        export: &str,
        params: Vec<Val>,
        result_count: usize,
    ) -> Result<Vec<Val>, WasmError> {
        let func = self
            .instance
            .get_func(&mut self.store, export)
            .ok_or_else(|| WasmError::MissingExport(export.to_string()))?;

        let mut results = vec![Val::Bool(false); result_count];
        func.call(&mut self.store, &params, &mut results)
            .map_err(|e| WasmError::Call {
                export: export.to_string(),
                reason: e.to_string(),
            })?;

        // The store is reused; post-return must run before the next call.
        func.post_return(&mut self.store).map_err(|e| WasmError::Call {
            export: export.to_string(),
            reason: format!("post-return: {e}"),
        })?;

        Ok(results)
    }

    /// Call an export that may legitimately be absent. Returns whether it
    /// ran.
    fn call_optional(&mut self, export: &str) -> Result<bool, WasmError> {
        if self.instance.get_func(&mut self.store, export).is_none() {
            return Ok(false);
        }
        self.call(export, vec![], 0)?;
        Ok(true)
    }
}

/// Call plumbing shared between the module handle and the instance
/// handles it mints. The store lock serializes concurrent callers.
#[derive(Clone)]
struct SharedState {
    inner: Arc<Mutex<ModuleState>>,
    perf_monitoring: bool,
}

impl SharedState {
    /// Run one export call on a blocking thread.
    async fn call(
        &self,
        export: &'static str,
        params: Vec<Val>,
        result_count: usize,
    ) -> Result<Vec<Val>, WasmError> {
        let inner = Arc::clone(&self.inner);
        let started = Instant::now();
        let results = tokio::task::spawn_blocking(move || {
            let mut state = inner.blocking_lock();
            state.call(export, params, result_count)
        })
        .await
        .map_err(|e| WasmError::Call {
            export: export.to_string(),
            reason: format!("task panicked: {e}"),
        })??;

        if self.perf_monitoring {
            debug!(export, elapsed_us = started.elapsed().as_micros() as u64, "module call");
        }
        Ok(results)
    }

    async fn call_optional(&self, export: &'static str) -> Result<bool, WasmError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut state = inner.blocking_lock();
            state.call_optional(export)
        })
        .await
        .map_err(|e| WasmError::Call {
            export: export.to_string(),
            reason: format!("task panicked: {e}"),
        })?
    }
}

/// Handle to the loaded engine module. One per process once loaded; shared
/// by `Arc`, never rebuilt.
pub struct ModuleHandle {
    target: Target,
    shared: SharedState,
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl ModuleHandle {
    /// Which bundle target this module was loaded from.
    pub fn target(&self) -> Target {
        self.target
    }

    pub async fn list_providers(&self) -> Result<Vec<String>, WasmError> {
        let results = self.shared.call("list-providers", vec![], 1).await?;
        string_list("list-providers", &results[0])
    }

    pub async fn list_models(&self, provider: &str) -> Result<Vec<String>, WasmError> {
        let results = self
            .shared
            .call("list-models", vec![Val::String(provider.into())], 1)
            .await?;
        string_list("list-models", &results[0])
    }

    pub async fn platform_info(&self) -> Result<PlatformInfo, WasmError> {
        let results = self.shared.call("get-platform-info", vec![], 1).await?;
        decode_json("get-platform-info", &results[0])
    }

    pub async fn feature_support(&self) -> Result<FeatureSupport, WasmError> {
        let results = self.shared.call("check-feature-support", vec![], 1).await?;
        decode_json("check-feature-support", &results[0])
    }

    /// Ask the engine for a default-configured instance.
    pub async fn create_instance(&self) -> Result<InstanceHandle, WasmError> {
        let results = self.shared.call("create-instance", vec![], 1).await?;
        Ok(InstanceHandle {
            id: id_result("create-instance", &results[0])?,
            shared: self.shared.clone(),
        })
    }

    /// Ask the engine for an instance configured from translated fields.
    pub async fn create_instance_with_config(
        &self,
        config_json: String,
    ) -> Result<InstanceHandle, WasmError> {
        let results = self
            .shared
            .call(
                "create-instance-with-config",
                vec![Val::String(config_json.into())],
                1,
            )
            .await?;
        Ok(InstanceHandle {
            id: id_result("create-instance-with-config", &results[0])?,
            shared: self.shared.clone(),
        })
    }

    /// Hand a worker script to the engine's worker facility. Lifecycle
    /// stays with the engine.
    pub async fn create_worker(&self, script: &str) -> Result<WorkerHandle, WasmError> {
        let results = self
            .shared
            .call("create-worker", vec![Val::String(script.into())], 1)
            .await?;
        Ok(WorkerHandle {
            id: id_result("create-worker", &results[0])?,
            script: script.to_string(),
        })
    }

    /// Best-effort memory pass. A missing `optimize-memory` export is not
    /// an error; returns whether the export ran.
    pub async fn optimize_memory(&self) -> Result<bool, WasmError> {
        self.shared.call_optional("optimize-memory").await
    }
}

/// An engine instance, addressed by the id the engine minted for it.
#[derive(Clone)]
pub struct InstanceHandle {
    id: u32,
    shared: SharedState,
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl InstanceHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// One-time instance setup inside the engine.
    pub async fn initialize(&self) -> Result<(), WasmError> {
        self.shared
            .call("instance-initialize", vec![Val::U32(self.id)], 0)
            .await?;
        Ok(())
    }

    pub async fn session_id(&self) -> Result<String, WasmError> {
        let results = self
            .shared
            .call("instance-session-id", vec![Val::U32(self.id)], 1)
            .await?;
        string_result("instance-session-id", &results[0])
    }

    /// Memory accounting snapshot, as the engine reports it.
    pub async fn memory_usage(&self) -> Result<serde_json::Value, WasmError> {
        let results = self
            .shared
            .call("instance-memory-usage", vec![Val::U32(self.id)], 1)
            .await?;
        decode_json("instance-memory-usage", &results[0])
    }
}

/// Handle to a worker the engine spawned.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    id: u32,
    script: String,
}

impl WorkerHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn script(&self) -> &str {
        &self.script
    }
}

fn string_result(export: &str, val: &Val) -> Result<String, WasmError> {
    match val {
        Val::String(s) => Ok(s.to_string()),
        other => Err(WasmError::Decode {
            export: export.to_string(),
            reason: format!("expected string, got {other:?}"),
        }),
    }
}

fn string_list(export: &str, val: &Val) -> Result<Vec<String>, WasmError> {
    match val {
        Val::List(items) => items.iter().map(|v| string_result(export, v)).collect(),
        other => Err(WasmError::Decode {
            export: export.to_string(),
            reason: format!("expected list, got {other:?}"),
        }),
    }
}

fn id_result(export: &str, val: &Val) -> Result<u32, WasmError> {
    match val {
        Val::U32(id) => Ok(*id),
        other => Err(WasmError::Decode {
            export: export.to_string(),
            reason: format!("expected u32 handle, got {other:?}"),
        }),
    }
}

fn decode_json<T: serde::de::DeserializeOwned>(export: &str, val: &Val) -> Result<T, WasmError> {
    let raw = string_result(export, val)?;
    serde_json::from_str(&raw).map_err(|e| WasmError::Decode {
        export: export.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_creation() {
        assert!(WasmEngine::new().is_ok());
    }

    #[test]
    fn instantiate_garbage_is_import_failed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("code_mesh.wasm");
        std::fs::write(&path, b"not a wasm component").unwrap();

        let engine = WasmEngine::new().unwrap();
        let err = engine
            .instantiate(&path, Target::Portable, &LoaderConfig::default())
            .unwrap_err();
        match err {
            WasmError::ImportFailed { target, reason } => {
                assert_eq!(target, Target::Portable);
                assert!(reason.starts_with("compile:"), "unexpected reason: {reason}");
            }
            other => panic!("expected ImportFailed, got: {other}"),
        }
    }

    #[test]
    fn instantiate_missing_file_is_import_failed() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = WasmEngine::new().unwrap();
        let err = engine
            .instantiate(
                &dir.path().join("missing.wasm"),
                Target::Interactive,
                &LoaderConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, WasmError::ImportFailed { .. }));
    }

    #[test]
    fn string_result_decodes() {
        let val = Val::String("anthropic".into());
        assert_eq!(string_result("x", &val).unwrap(), "anthropic");
    }

    #[test]
    fn string_result_rejects_other_types() {
        let err = string_result("list-providers", &Val::U32(3)).unwrap_err();
        match err {
            WasmError::Decode { export, reason } => {
                assert_eq!(export, "list-providers");
                assert!(reason.contains("expected string"));
            }
            other => panic!("expected Decode, got: {other}"),
        }
    }

    #[test]
    fn string_list_decodes() {
        let val = Val::List(vec![
            Val::String("anthropic".into()),
            Val::String("openai".into()),
        ]);
        assert_eq!(
            string_list("list-providers", &val).unwrap(),
            vec!["anthropic".to_string(), "openai".to_string()]
        );
    }

    #[test]
    fn string_list_rejects_mixed_items() {
        let val = Val::List(vec![Val::String("anthropic".into()), Val::U32(1)]);
        assert!(string_list("list-providers", &val).is_err());
    }

    #[test]
    fn id_result_decodes() {
        assert_eq!(id_result("create-instance", &Val::U32(17)).unwrap(), 17);
        assert!(id_result("create-instance", &Val::Bool(true)).is_err());
    }

    #[test]
    fn decode_json_platform_info() {
        let raw = r#"{"os":"linux","arch":"x86_64","runtime":"wasmtime"}"#;
        let val = Val::String(raw.into());
        let info: PlatformInfo = decode_json("get-platform-info", &val).unwrap();
        assert_eq!(info.os, "linux");
        assert_eq!(info.arch, "x86_64");
        assert!(!info.persistent_storage); // defaulted
    }

    #[test]
    fn decode_json_rejects_bad_payload() {
        let val = Val::String("{not json".into());
        let err = decode_json::<FeatureSupport>("check-feature-support", &val).unwrap_err();
        assert!(matches!(err, WasmError::Decode { .. }));
    }

    #[test]
    fn feature_support_fields_default() {
        let features: FeatureSupport = serde_json::from_str(r#"{"threads":true}"#).unwrap();
        assert!(features.threads);
        assert!(!features.simd);
        assert!(!features.bulk_memory);
        assert!(!features.reference_types);
    }
}
