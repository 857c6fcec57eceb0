//! Cross-thread transfer of a freshly built impulse response.
//!
//! The writer (background) side takes the lock blocking; the audio side only
//! ever calls `try_lock`, so it never waits on the writer.

use parking_lot::{Mutex, MutexGuard};

use crate::Convolution;

#[derive(Debug, Default)]
pub struct IrHandoff {
    staged: Mutex<Vec<f32>>,
}

/// Exclusive access to the staging slot, held by the background side while
/// it publishes a new IR.
pub struct StagedIr<'a> {
    guard: MutexGuard<'a, Vec<f32>>,
}

impl IrHandoff {
    pub fn new(ir_len: usize) -> Self {
        Self {
            staged: Mutex::new(vec![0.; ir_len]),
        }
    }

    /// Blocks until the slot is free. Never call this from the audio thread.
    pub fn lock(&self) -> StagedIr<'_> {
        StagedIr {
            guard: self.staged.lock(),
        }
    }

    /// Loads the staged IR into every engine inside one critical section, so
    /// all channels switch together. Returns `false` without touching the
    /// engines when the slot is busy; the caller retries on a later callback.
    pub fn try_transfer<C: Convolution>(&self, engines: &mut [C]) -> bool {
        match self.staged.try_lock() {
            Some(staged) => {
                for engine in engines.iter_mut() {
                    engine.update(&staged);
                }
                true
            }
            None => false,
        }
    }
}

impl StagedIr<'_> {
    pub fn set_new_ir(&mut self, ir: &[f32]) {
        self.guard.clear();
        self.guard.extend_from_slice(ir);
    }

    pub fn ir(&self) -> &[f32] {
        &self.guard
    }
}
