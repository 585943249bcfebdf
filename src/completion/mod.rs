//! Completion store adapters.
//!
//! A completion store persists which tours a user has finished. The engine
//! reads it once at startup and writes one key at a time afterwards; writes
//! are fire-and-forget, so implementations only need to report failures.

mod file;

pub use file::JsonFileCompletionStore;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Persisted `tour id -> completed` mapping.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Store name (for logging)
    fn name(&self) -> &str;

    /// Read the whole mapping.
    async fn hydrate(&self) -> Result<HashMap<String, bool>>;

    /// Write a single tour's flag.
    async fn set_completed(&self, tour_id: &str, completed: bool) -> Result<()>;

    async fn mark_completed(&self, tour_id: &str) -> Result<()> {
        self.set_completed(tour_id, true).await
    }
}

/// Process-local store, used by tests and the demo.
#[derive(Debug, Default)]
pub struct MemoryCompletionStore {
    tours: Mutex<HashMap<String, bool>>,
    writes: Mutex<Vec<(String, bool)>>,
    fail_writes: AtomicBool,
}

impl MemoryCompletionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with the given tours already completed.
    pub fn with_completed<I, S>(tours: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        store
            .tours
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(tours.into_iter().map(|t| (t.into(), true)));
        store
    }

    /// Make every subsequent write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every write attempted, in order, including failed ones.
    pub fn writes(&self) -> Vec<(String, bool)> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get(&self, tour_id: &str) -> Option<bool> {
        self.tours
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tour_id)
            .copied()
    }
}

#[async_trait]
impl CompletionStore for MemoryCompletionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn hydrate(&self) -> Result<HashMap<String, bool>> {
        Ok(self
            .tours
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn set_completed(&self, tour_id: &str, completed: bool) -> Result<()> {
        self.writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((tour_id.to_string(), completed));

        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store is rejecting writes");
        }

        self.tours
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tour_id.to_string(), completed);
        Ok(())
    }
}
