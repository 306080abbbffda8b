//! Error types for the WASM host.
//!
//! Every failure condition is distinct and named so callers can branch on
//! cause. The type is `Clone`: one load failure fans out to every
//! single-flight waiter.

use std::path::PathBuf;

use thiserror::Error;

use crate::environment::Environment;

use super::artifacts::Target;

/// One failed attempt in a fallback chain.
#[derive(Debug, Clone)]
pub struct LoadAttempt {
    pub target: Target,
    pub reason: String,
}

#[derive(Debug, Clone, Error)]
pub enum WasmError {
    #[error("engine creation failed: {0}")]
    EngineCreation(String),

    #[error("no WASM loader for {0} environment")]
    UnsupportedEnvironment(Environment),

    #[error("module artifact not found at {}. Build the service bundle first.", path.display())]
    ArtifactNotFound { path: PathBuf },

    #[error("failed to load {target} bundle: {reason}")]
    ImportFailed { target: Target, reason: String },

    #[error("all bundle targets failed: {}", format_attempts(attempts))]
    LoadExhausted { attempts: Vec<LoadAttempt> },

    #[error("{capability} not available in {environment} environment")]
    CapabilityUnavailable {
        capability: &'static str,
        environment: Environment,
    },

    #[error("export '{0}' not found in module")]
    MissingExport(String),

    #[error("call to '{export}' failed: {reason}")]
    Call { export: String, reason: String },

    #[error("bad value from '{export}': {reason}")]
    Decode { export: String, reason: String },
}

fn format_attempts(attempts: &[LoadAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.target, a.reason))
        .collect::<Vec<_>>()
        .join("; ")
}
