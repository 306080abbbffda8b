//! Execution environment detection.
//!
//! The environment is derived once from ambient process state and is
//! immutable for the process lifetime. Capability queries are pure
//! functions of the result — no I/O, no load triggered.

use std::fmt;
use std::io::IsTerminal;

/// Env var marking a process as a spawned Code Mesh worker.
pub const WORKER_MARKER: &str = "CODEMESH_WORKER";

/// Where this host process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Interactive session — stdout is attached to a terminal.
    Interactive,
    /// Headless service — no controlling terminal.
    Service,
    /// Spawned worker process (`WORKER_MARKER` set by the spawning host).
    Worker,
    /// No loader exists for this build of the host.
    Unsupported,
}

impl Environment {
    /// Detect the current environment from ambient process state.
    ///
    /// The worker marker wins over the terminal probe: a worker spawned
    /// from an interactive session still inherits the parent's tty.
    pub fn detect() -> Self {
        if cfg!(target_arch = "wasm32") {
            return Environment::Unsupported;
        }
        if std::env::var_os(WORKER_MARKER).is_some() {
            return Environment::Worker;
        }
        if std::io::stdout().is_terminal() {
            Environment::Interactive
        } else {
            Environment::Service
        }
    }

    /// Whether a WASM engine can be hosted here.
    pub fn wasm_supported(&self) -> bool {
        !matches!(self, Environment::Unsupported)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Interactive => "interactive",
            Environment::Service => "service",
            Environment::Worker => "worker",
            Environment::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}
