//! Thread-safe handle to a crafting manager.
//!
//! Requests, deliveries, and cancellations may come from threads other than
//! the one driving the tick. Every operation takes the lock for its whole
//! duration, so calls never interleave with an update pass.

use std::sync::Arc;

use autocraft_common::TaskId;
use parking_lot::{Mutex, MutexGuard};

use crate::config::ManagerConfig;
use crate::events::CraftingEvent;
use crate::inventory::ItemNetwork;
use crate::manager::{CraftingManager, TickSummary};
use crate::signature::{ComparisonFlags, ItemSignature};

/// Cloneable, lockable crafting manager.
#[derive(Debug, Clone, Default)]
pub struct SharedCraftingManager {
    inner: Arc<Mutex<CraftingManager>>,
}

impl SharedCraftingManager {
    /// Creates a shared manager.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        Self::from_manager(CraftingManager::new(config))
    }

    /// Wraps an existing manager.
    #[must_use]
    pub fn from_manager(manager: CraftingManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    /// Locks the manager for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, CraftingManager> {
        self.inner.lock()
    }

    /// See [`CraftingManager::schedule`].
    pub fn schedule(
        &self,
        signature: &ItemSignature,
        quantity: u32,
        flags: ComparisonFlags,
        network: &dyn ItemNetwork,
    ) -> Option<TaskId> {
        self.inner.lock().schedule(signature, quantity, flags, network)
    }

    /// See [`CraftingManager::track`].
    pub fn track(&self, signature: &ItemSignature, size: u32) -> u32 {
        self.inner.lock().track(signature, size)
    }

    /// See [`CraftingManager::cancel`].
    pub fn cancel(&self, id: TaskId, network: &mut dyn ItemNetwork) -> bool {
        self.inner.lock().cancel(id, network)
    }

    /// See [`CraftingManager::update`].
    pub fn update(&self, network: &mut dyn ItemNetwork) -> TickSummary {
        self.inner.lock().update(network)
    }

    /// Number of active tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.inner.lock().tasks().len()
    }

    /// Drains pending events.
    pub fn drain_events(&self) -> Vec<CraftingEvent> {
        self.inner.lock().drain_events()
    }
}
