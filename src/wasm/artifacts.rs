//! Bundle artifact layout — targets, paths, and per-environment chains.
//!
//! Bundles live under `<bundle-root>/<target>/code_mesh.wasm`. Each
//! environment resolves to an ordered chain of targets tried in sequence,
//! fixed at loader construction.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::environment::Environment;

/// File name of the engine module inside each target directory.
pub const MODULE_FILE: &str = "code_mesh.wasm";

/// A build flavor of the engine bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Optimized build for interactive sessions.
    Interactive,
    /// Generic portable build, the fallback flavor.
    Portable,
    /// Build for headless services.
    Service,
}

impl Target {
    /// Directory name under the bundle root.
    pub fn dir(&self) -> &'static str {
        match self {
            Target::Interactive => "interactive",
            Target::Portable => "portable",
            Target::Service => "service",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// Path of a target's module artifact.
pub fn module_path(bundle_root: &Path, target: Target) -> PathBuf {
    bundle_root.join(target.dir()).join(MODULE_FILE)
}

/// Ordered fallback chain for an environment.
///
/// Interactive falls back to the portable build; worker and service get a
/// single attempt.
pub fn chain_for(environment: Environment) -> &'static [Target] {
    match environment {
        Environment::Interactive => &[Target::Interactive, Target::Portable],
        Environment::Worker => &[Target::Interactive],
        Environment::Service => &[Target::Service],
        Environment::Unsupported => &[],
    }
}

/// Whether the artifact must exist on disk before an import is attempted.
///
/// Only the service chain pre-checks, so a missing build surfaces as a
/// build hint instead of a compile error.
pub fn verify_before_import(environment: Environment) -> bool {
    matches!(environment, Environment::Service)
}
