//! The process-wide evaluation context, built lazily and swapped out on reset.
//!
//! Two locks are involved. The init lock serializes building and resetting the
//! context. The execution lock (the [`Mutex`] around the context itself) is held
//! for the whole of an engine call. Callers that find a live context never touch
//! the init lock.

use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;

use crate::engine::EvaluationContext;
use crate::error::EngineError;
use crate::prelude::*;

/// Builds a fresh context. Called at most once per reset.
pub type Factory = Box<dyn Fn() -> Result<EvaluationContext, EngineError> + Send + Sync>;

/// A shared, lockable handle to the live context.
pub type SharedContext = Arc<Mutex<EvaluationContext>>;

pub struct ContextPool {
    slot: ArcSwapOption<Mutex<EvaluationContext>>,
    init: Mutex<()>,
    factory: Factory,
}

impl std::fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("built", &self.is_built())
            .finish_non_exhaustive()
    }
}

impl ContextPool {
    pub fn new(factory: impl Fn() -> Result<EvaluationContext, EngineError> + Send + Sync + 'static) -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            init: Mutex::new(()),
            factory: Box::new(factory),
        }
    }

    /// Returns the live context, building it first if there is none.
    pub fn get(&self) -> Result<SharedContext, EngineError> {
        if let Some(cx) = self.slot.load_full() {
            return Ok(cx);
        }

        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);

        // Someone else may have finished building while we waited.
        if let Some(cx) = self.slot.load_full() {
            return Ok(cx);
        }

        let cx = Arc::new(Mutex::new((self.factory)()?));
        self.slot.store(Some(Arc::clone(&cx)));
        Ok(cx)
    }

    pub fn is_built(&self) -> bool {
        self.slot.load().is_some()
    }

    /// Drops the live context; the next call builds a new one.
    ///
    /// Waits for any in-flight call to finish before disposing the old context.
    pub fn reset(&self) {
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(old) = self.slot.swap(None) else {
            debug!("Reset requested, but no context was built.");
            return;
        };

        info!("Resetting evaluation context.");
        old.lock().unwrap_or_else(PoisonError::into_inner).dispose();
    }

    /// Clears cached translations on the live context. Never builds one.
    pub fn reset_translations(&self) {
        if let Some(cx) = self.slot.load_full() {
            cx.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .reset_translations();
        }
    }

    /// Runs `f` with the execution lock held.
    ///
    /// If the context was reset while this call waited for the lock, it retries
    /// against the replacement.
    pub fn protect<T>(&self, f: impl FnOnce(&mut EvaluationContext) -> T) -> Result<T, EngineError> {
        loop {
            let shared = self.get()?;
            let mut cx = shared.lock().unwrap_or_else(PoisonError::into_inner);

            if cx.is_disposed() {
                debug!("Context was disposed while waiting for it, retrying.");
                continue;
            }

            cx.collect_if_idle();
            return Ok(f(&mut cx));
        }
    }
}
