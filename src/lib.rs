//! codemesh-host — host runtime for the Code Mesh engine.
//!
//! The engine ships as prebuilt WebAssembly component bundles; this crate
//! detects the execution environment, loads the matching bundle exactly
//! once (single-flight), and exposes a thin typed facade over its exports.

pub mod config;
pub mod environment;
pub mod wasm;

pub use environment::Environment;
pub use wasm::runner::WasmRunner;
