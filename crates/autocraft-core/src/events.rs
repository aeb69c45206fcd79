//! Crafting events published by the manager.

use autocraft_common::{PatternId, TaskId};
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::signature::{ItemSignature, ItemStack};
use crate::task::FailureReason;

/// Events emitted as tasks move through their lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CraftingEvent {
    /// A new task entered the task list
    TaskScheduled {
        /// Task ID
        task_id: TaskId,
        /// Item being produced
        target: ItemSignature,
        /// Requested quantity
        quantity: u32,
        /// Pattern bound to the task
        pattern_id: PatternId,
        /// Task that requested it as an ingredient
        parent: Option<TaskId>,
    },
    /// A task produced its outputs
    TaskCompleted {
        /// Task ID
        task_id: TaskId,
        /// Everything the task produced
        outputs: Vec<ItemStack>,
    },
    /// A task was cancelled
    TaskCancelled {
        /// Task ID
        task_id: TaskId,
    },
    /// A task gave up
    TaskFailed {
        /// Task ID
        task_id: TaskId,
        /// Why
        reason: FailureReason,
    },
    /// A task has made no progress for a while
    TaskStalled {
        /// Task ID
        task_id: TaskId,
        /// Ticks without progress
        idle_ticks: u32,
    },
    /// The pattern registry was rebuilt
    PatternsRebuilt {
        /// Patterns now registered
        registered: usize,
        /// Active tasks bound to patterns that are gone
        orphaned_tasks: usize,
    },
    /// Storage refused items produced by a task
    OutputOverflow {
        /// Task that produced the items
        task_id: TaskId,
        /// Units that did not fit
        rejected: ItemStack,
    },
}

/// Event bus for broadcasting crafting events to the embedder.
#[derive(Debug)]
pub struct EventBus {
    /// Sender for broadcasting events
    sender: Sender<CraftingEvent>,
    /// Receiver for collecting events
    receiver: Receiver<CraftingEvent>,
    /// Channel capacity
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    /// Creates a new event bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            capacity: capacity.max(1),
        }
    }

    /// Publishes an event to the bus.
    pub fn publish(&self, event: CraftingEvent) {
        // Non-blocking send - if full, event is dropped
        let _ = self.sender.try_send(event);
    }

    /// Drains all pending events.
    pub fn drain(&self) -> Vec<CraftingEvent> {
        self.receiver.try_iter().collect()
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Returns the channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
