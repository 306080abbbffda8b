//! Single-flight load cell — the module-loading state machine.
//!
//! `Unloaded → Loading → {Loaded | Failed}`. Concurrent callers collapse
//! onto one in-flight load and all observe the same result. `Failed` holds
//! the error for inspection; the next `get_or_load` starts a fresh attempt
//! (no automatic retry).

use std::sync::Mutex;

use futures::future::{BoxFuture, FutureExt, Shared};

use super::error::WasmError;

/// Observable snapshot of the cell's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

type SharedLoad<T> = Shared<BoxFuture<'static, Result<T, WasmError>>>;

enum CellState<T> {
    Unloaded,
    Loading(SharedLoad<T>),
    Loaded(T),
    Failed(WasmError),
}

/// Memoized, single-flight async cell.
///
/// The shared future guarded by the state machine replaces the usual
/// "is it loading" flag plus cached-reference pair, so there is no gap
/// between the two checks.
pub struct LoadCell<T> {
    state: Mutex<CellState<T>>,
}

impl<T: Clone + Send + 'static> LoadCell<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CellState::Unloaded),
        }
    }

    pub fn state(&self) -> LoadState {
        match &*self.state.lock().unwrap() {
            CellState::Unloaded => LoadState::Unloaded,
            CellState::Loading(_) => LoadState::Loading,
            CellState::Loaded(_) => LoadState::Loaded,
            CellState::Failed(_) => LoadState::Failed,
        }
    }

    /// Last load error, if the cell is in the failed state.
    pub fn last_error(&self) -> Option<WasmError> {
        match &*self.state.lock().unwrap() {
            CellState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Return the loaded value, joining or starting a load as needed.
    ///
    /// `load` runs at most once per attempt regardless of caller count:
    /// the first caller to observe `Unloaded` (or `Failed`) installs the
    /// shared future, every concurrent caller awaits a clone of it, and
    /// all of them receive the same value or the same error.
    pub async fn get_or_load<F>(&self, load: F) -> Result<T, WasmError>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T, WasmError>>,
    {
        let pending = {
            let mut state = self.state.lock().unwrap();
            match &*state {
                CellState::Loaded(value) => return Ok(value.clone()),
                CellState::Loading(shared) => shared.clone(),
                CellState::Unloaded | CellState::Failed(_) => {
                    let shared = load().shared();
                    *state = CellState::Loading(shared.clone());
                    shared
                }
            }
        };

        let result = pending.clone().await;

        // Settle only if a newer attempt hasn't replaced this one.
        let mut state = self.state.lock().unwrap();
        if let CellState::Loading(current) = &*state {
            if current.ptr_eq(&pending) {
                *state = match &result {
                    Ok(value) => CellState::Loaded(value.clone()),
                    Err(err) => CellState::Failed(err.clone()),
                };
            }
        }
        result
    }
}

impl<T: Clone + Send + 'static> Default for LoadCell<T> {
    fn default() -> Self {
        Self::new()
    }
}
