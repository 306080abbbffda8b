//! WasmRunner — the public facade over the loaded engine.
//!
//! Every query ensures the module is loaded (implicit load) and delegates
//! to an engine export. Nothing is cached here; each call re-queries the
//! module.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::{self, LoaderConfig};
use crate::environment::Environment;

use super::cell::LoadState;
use super::error::WasmError;
use super::loader::ModuleLoader;
use super::module::{
    FeatureSupport, InstanceHandle, ModuleHandle, PlatformInfo, WasmEngine, WorkerHandle,
};

pub struct WasmRunner {
    environment: Environment,
    config: LoaderConfig,
    loader: ModuleLoader,
}

impl WasmRunner {
    /// Create a runner for the detected environment.
    pub fn new(config: LoaderConfig) -> Result<Self, WasmError> {
        Self::with_environment(config, Environment::detect())
    }

    /// Create a runner with a pinned environment (embedders and tests).
    pub fn with_environment(
        config: LoaderConfig,
        environment: Environment,
    ) -> Result<Self, WasmError> {
        let engine = Arc::new(WasmEngine::new()?);
        let loader = ModuleLoader::new(engine, environment, config.clone());
        Ok(Self {
            environment,
            config,
            loader,
        })
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn state(&self) -> LoadState {
        self.loader.state()
    }

    pub fn last_error(&self) -> Option<WasmError> {
        self.loader.last_error()
    }

    /// Load the engine module. Idempotent: concurrent calls collapse onto
    /// one load, later calls return the cached handle.
    pub async fn load(&self) -> Result<Arc<ModuleHandle>, WasmError> {
        self.loader.load().await
    }

    /// Providers the engine knows about.
    pub async fn providers(&self) -> Result<Vec<String>, WasmError> {
        let module = self.load().await?;
        module.list_providers().await
    }

    /// Models a provider offers.
    pub async fn models(&self, provider: &str) -> Result<Vec<String>, WasmError> {
        let module = self.load().await?;
        module.list_models(provider).await
    }

    pub async fn platform_info(&self) -> Result<PlatformInfo, WasmError> {
        let module = self.load().await?;
        module.platform_info().await
    }

    pub async fn feature_support(&self) -> Result<FeatureSupport, WasmError> {
        let module = self.load().await?;
        module.feature_support().await
    }

    /// Create an engine instance.
    ///
    /// With options, only allow-listed fields are forwarded (see
    /// [`config::INSTANCE_CONFIG_FIELDS`]); an empty object behaves exactly
    /// like no options at all.
    pub async fn create_instance(
        &self,
        options: Option<&Value>,
    ) -> Result<InstanceHandle, WasmError> {
        let module = self.load().await?;
        match instance_config_json(options) {
            Some(json) => module.create_instance_with_config(json).await,
            None => module.create_instance().await,
        }
    }

    /// Hand a worker script to the engine. Interactive environments only;
    /// no load is attempted when the capability is missing.
    pub async fn create_worker(&self, script: &str) -> Result<WorkerHandle, WasmError> {
        if self.environment != Environment::Interactive {
            return Err(WasmError::CapabilityUnavailable {
                capability: "worker creation",
                environment: self.environment,
            });
        }
        let module = self.load().await?;
        module.create_worker(script).await
    }

    /// Best-effort performance pass: interactive environments with a
    /// loaded module only. Failures are logged, never surfaced.
    pub async fn optimize_performance(&self) {
        if self.environment != Environment::Interactive || self.state() != LoadState::Loaded {
            return;
        }
        let Ok(module) = self.load().await else {
            return;
        };
        match module.optimize_memory().await {
            Ok(ran) => debug!(ran, "memory optimization pass"),
            Err(err) => debug!(error = %err, "memory optimization failed"),
        }
    }
}

/// Serialized engine config for the configured-instance export, or `None`
/// when no recognized field is present.
fn instance_config_json(options: Option<&Value>) -> Option<String> {
    let translated = config::translate_instance_config(options?);
    if translated.is_empty() {
        return None;
    }
    Some(Value::Object(translated).to_string())
}
