//! Crafting tasks.
//!
//! A task produces a requested quantity of one item through a bound pattern.
//! It moves through these states, one [`CraftingTask::step`] per tick:
//!
//! ```text
//! Created -> Scheduled -> Gathering -> Crafting -> Completed
//!                             |
//!                             +-> Cancelled | Failed
//! ```
//!
//! While gathering, a task pulls ingredients from the network and receives
//! tracked deliveries. Missing ingredients are reported back to the manager,
//! which may schedule sub-tasks for them.

use std::sync::Arc;

use autocraft_common::TaskId;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::inventory::ItemNetwork;
use crate::pattern::Pattern;
use crate::signature::{ComparisonFlags, ItemSignature, ItemStack};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Built but not yet in the manager's task list
    Created,
    /// In the task list, not stepped yet
    Scheduled,
    /// Waiting for ingredients
    Gathering,
    /// Every ingredient gathered; counting down the craft time
    Crafting {
        /// Ticks left before the outputs appear
        ticks_left: u32,
    },
    /// Outputs produced
    Completed,
    /// Removed on request
    Cancelled,
    /// Gave up
    Failed,
}

impl TaskState {
    /// Checks whether the task has finished, one way or another.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Short lowercase name for logs and reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Scheduled => "scheduled",
            Self::Gathering => "gathering",
            Self::Crafting { .. } => "crafting",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Why a task failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The bound pattern has no output matching the task target
    NoMatchingOutput,
    /// No progress for the configured number of ticks
    Stalled {
        /// Ticks without progress
        idle_ticks: u32,
    },
    /// The bound pattern disappeared in a registry rebuild
    PatternRemoved,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoMatchingOutput => write!(f, "pattern does not produce the target"),
            Self::Stalled { idle_ticks } => write!(f, "no progress for {idle_ticks} ticks"),
            Self::PatternRemoved => write!(f, "pattern removed by rebuild"),
        }
    }
}

/// Gathering progress for one pattern input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSlot {
    /// Ingredient
    pub signature: ItemSignature,
    /// Units needed for every craft of the task
    pub needed: u32,
    /// Exact stacks gathered so far. Under loose input flags these may
    /// differ from `signature`.
    pub held: Vec<ItemStack>,
    /// Live sub-task producing this ingredient, if any
    pub subtask: Option<TaskId>,
}

impl InputSlot {
    /// Units gathered so far.
    #[must_use]
    pub fn gathered(&self) -> u32 {
        self.held
            .iter()
            .fold(0u32, |sum, s| sum.saturating_add(s.quantity))
    }

    /// Units still missing.
    #[must_use]
    pub fn missing(&self) -> u32 {
        self.needed.saturating_sub(self.gathered())
    }

    fn hold(&mut self, signature: &ItemSignature, quantity: u32) {
        if quantity == 0 {
            return;
        }
        match self.held.iter_mut().find(|s| &s.signature == signature) {
            Some(stack) => stack.quantity = stack.quantity.saturating_add(quantity),
            None => self.held.push(signature.stack(quantity)),
        }
    }
}

/// Serializable progress of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    /// Lifecycle state
    pub state: TaskState,
    /// Per-input progress, in pattern input order
    pub slots: Vec<InputSlot>,
    /// Consecutive ticks without progress
    pub idle_ticks: u32,
}

/// Ingredient the task could not find, for which no sub-task is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskRequest {
    /// Input slot index
    pub slot: usize,
    /// Ingredient to produce
    pub signature: ItemSignature,
    /// Units missing
    pub quantity: u32,
}

/// Result of one tick step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Still gathering; lists ingredients that need a sub-task
    Waiting {
        /// Missing ingredients without a live sub-task
        requests: Vec<SubtaskRequest>,
    },
    /// Counting down the craft time
    Crafting,
    /// Finished; these stacks were produced
    Completed {
        /// Produced outputs, scaled by the number of crafts
        outputs: Vec<ItemStack>,
    },
    /// Cannot ever finish
    Failed(FailureReason),
}

/// A request to produce `quantity` units of `target` through `pattern`.
#[derive(Debug, Clone)]
pub struct CraftingTask {
    id: TaskId,
    target: ItemSignature,
    flags: ComparisonFlags,
    quantity: u32,
    pattern: Arc<Pattern>,
    /// Target units per craft
    per_craft: u32,
    /// Number of pattern executions needed
    crafts: u32,
    state: TaskState,
    slots: Vec<InputSlot>,
    /// Task that spawned this one for an ingredient
    parent: Option<TaskId>,
    idle_ticks: u32,
    stall_reported: bool,
}

impl CraftingTask {
    pub(crate) fn new(
        id: TaskId,
        target: ItemSignature,
        flags: ComparisonFlags,
        pattern: Arc<Pattern>,
        quantity: u32,
    ) -> Self {
        let per_craft = pattern.output_quantity_of(&target, flags);
        let crafts = if per_craft == 0 {
            0
        } else {
            quantity.div_ceil(per_craft)
        };
        let slots = pattern
            .inputs
            .iter()
            .map(|input| InputSlot {
                signature: input.signature.clone(),
                needed: input.quantity.saturating_mul(crafts),
                held: Vec::new(),
                subtask: None,
            })
            .collect();

        Self {
            id,
            target,
            flags,
            quantity,
            pattern,
            per_craft,
            crafts,
            state: TaskState::Created,
            slots,
            parent: None,
            idle_ticks: 0,
            stall_reported: false,
        }
    }

    /// Rebuilds a task from saved progress against a (possibly changed)
    /// pattern.
    ///
    /// Held stacks are redistributed over the pattern inputs under the
    /// pattern's input flags. Stacks with no matching slot, or above what a
    /// slot needs, are returned exactly as they were gathered so the caller
    /// can put them back into storage. A saved craft only resumes when the
    /// restored slots are fully gathered; otherwise it goes back to
    /// gathering.
    pub(crate) fn restore(
        id: TaskId,
        target: ItemSignature,
        flags: ComparisonFlags,
        pattern: Arc<Pattern>,
        quantity: u32,
        parent: Option<TaskId>,
        progress: TaskProgress,
    ) -> (Self, Vec<ItemStack>) {
        let mut task = Self::new(id, target, flags, pattern, quantity);
        task.parent = parent;
        task.idle_ticks = progress.idle_ticks;
        let input_flags = task.pattern.input_flags;
        let mut leftovers = Vec::new();
        for saved in progress.slots {
            if let Some(subtask) = saved.subtask {
                if let Some(slot) = task
                    .slots
                    .iter_mut()
                    .find(|s| s.signature == saved.signature && s.subtask.is_none())
                {
                    slot.subtask = Some(subtask);
                }
            }

            for stack in saved.held {
                let mut remaining = stack.quantity;
                for slot in &mut task.slots {
                    if remaining == 0 {
                        break;
                    }
                    if slot.missing() > 0 && slot.signature.matches(&stack.signature, input_flags)
                    {
                        let taken = remaining.min(slot.missing());
                        slot.hold(&stack.signature, taken);
                        remaining -= taken;
                    }
                }
                if remaining > 0 {
                    leftovers.push(stack.signature.stack(remaining));
                }
            }
        }

        task.state = match progress.state {
            TaskState::Created => TaskState::Scheduled,
            // Crafting never starts from inputs that are not all there.
            TaskState::Crafting { .. } if !task.is_gathered() => TaskState::Gathering,
            state => state,
        };
        (task, leftovers)
    }

    /// Task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Item this task produces.
    #[must_use]
    pub const fn target(&self) -> &ItemSignature {
        &self.target
    }

    /// Flags the target was requested with.
    #[must_use]
    pub const fn flags(&self) -> ComparisonFlags {
        self.flags
    }

    /// Requested quantity.
    #[must_use]
    pub const fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Bound pattern.
    #[must_use]
    pub fn pattern(&self) -> &Arc<Pattern> {
        &self.pattern
    }

    /// Number of pattern executions this task performs.
    #[must_use]
    pub const fn crafts(&self) -> u32 {
        self.crafts
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    /// Per-input progress.
    #[must_use]
    pub fn slots(&self) -> &[InputSlot] {
        &self.slots
    }

    /// Task that spawned this one, if it is a sub-task.
    #[must_use]
    pub const fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    /// Consecutive ticks without progress.
    #[must_use]
    pub const fn idle_ticks(&self) -> u32 {
        self.idle_ticks
    }

    /// Checks whether the target matches `signature` under `flags`.
    #[must_use]
    pub fn targets(&self, signature: &ItemSignature, flags: ComparisonFlags) -> bool {
        self.target.matches(signature, flags)
    }

    /// Checks whether every ingredient has been gathered.
    #[must_use]
    pub fn is_gathered(&self) -> bool {
        self.slots.iter().all(|s| s.missing() == 0)
    }

    /// Snapshot of the mutable progress.
    #[must_use]
    pub fn progress(&self) -> TaskProgress {
        TaskProgress {
            state: self.state,
            slots: self.slots.clone(),
            idle_ticks: self.idle_ticks,
        }
    }

    /// Sub-tasks currently linked to input slots.
    pub fn subtasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.slots.iter().filter_map(|s| s.subtask)
    }

    pub(crate) fn set_parent(&mut self, parent: TaskId) {
        self.parent = Some(parent);
    }

    pub(crate) fn mark_scheduled(&mut self) {
        if self.state == TaskState::Created {
            self.state = TaskState::Scheduled;
        }
    }

    pub(crate) fn mark_cancelled(&mut self) {
        self.state = TaskState::Cancelled;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.state = TaskState::Failed;
    }

    pub(crate) fn link_subtask(&mut self, slot: usize, subtask: TaskId) {
        if let Some(slot) = self.slots.get_mut(slot) {
            slot.subtask = Some(subtask);
        }
    }

    /// Drops links to sub-tasks that are no longer running.
    pub(crate) fn prune_subtasks(&mut self, is_live: impl Fn(TaskId) -> bool) {
        for slot in &mut self.slots {
            if slot.subtask.is_some_and(|id| !is_live(id)) {
                slot.subtask = None;
            }
        }
    }

    /// Whether the stall diagnostic already fired for the current stall.
    pub(crate) const fn stall_reported(&self) -> bool {
        self.stall_reported
    }

    pub(crate) fn set_stall_reported(&mut self) {
        self.stall_reported = true;
    }

    /// Offers freshly available units. Returns how many were taken.
    pub(crate) fn offer(&mut self, signature: &ItemSignature, amount: u32) -> u32 {
        if !matches!(
            self.state,
            TaskState::Created | TaskState::Scheduled | TaskState::Gathering
        ) {
            return 0;
        }

        let flags = self.pattern.input_flags;
        let mut remaining = amount;
        for slot in &mut self.slots {
            if remaining == 0 {
                break;
            }
            if slot.missing() > 0 && slot.signature.matches(signature, flags) {
                let taken = remaining.min(slot.missing());
                slot.hold(signature, taken);
                remaining -= taken;
            }
        }

        let taken = amount - remaining;
        if taken > 0 {
            self.note_progress();
        }
        taken
    }

    /// Takes every gathered ingredient out of the task, for returning to
    /// storage on cancel or failure. Stacks come back exactly as gathered.
    pub(crate) fn take_gathered(&mut self) -> Vec<ItemStack> {
        self.slots
            .iter_mut()
            .flat_map(|s| std::mem::take(&mut s.held))
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Advances the task by one tick.
    pub(crate) fn step(&mut self, network: &mut dyn ItemNetwork) -> StepOutcome {
        match self.state {
            TaskState::Created | TaskState::Scheduled => {
                self.state = TaskState::Gathering;
                self.gather(network)
            },
            TaskState::Gathering => self.gather(network),
            TaskState::Crafting { ticks_left } => {
                self.note_progress();
                if ticks_left <= 1 {
                    self.finish()
                } else {
                    self.state = TaskState::Crafting {
                        ticks_left: ticks_left - 1,
                    };
                    StepOutcome::Crafting
                }
            },
            // Terminal tasks are inert.
            TaskState::Completed | TaskState::Cancelled | TaskState::Failed => {
                StepOutcome::Waiting {
                    requests: Vec::new(),
                }
            },
        }
    }

    fn gather(&mut self, network: &mut dyn ItemNetwork) -> StepOutcome {
        if self.per_craft == 0 {
            self.state = TaskState::Failed;
            return StepOutcome::Failed(FailureReason::NoMatchingOutput);
        }

        let flags = self.pattern.input_flags;
        let mut progressed = false;
        for slot in &mut self.slots {
            let missing = slot.missing();
            if missing == 0 {
                continue;
            }
            for stack in network.extract(&slot.signature, missing, flags) {
                if !stack.is_empty() {
                    slot.hold(&stack.signature, stack.quantity);
                    progressed = true;
                }
            }
        }

        if self.is_gathered() {
            self.note_progress();
            if self.pattern.craft_time == 0 {
                return self.finish();
            }
            self.state = TaskState::Crafting {
                ticks_left: self.pattern.craft_time,
            };
            return StepOutcome::Crafting;
        }

        let waiting_upstream = self.slots.iter().any(|s| s.subtask.is_some());
        if progressed || waiting_upstream {
            self.note_progress();
        } else {
            self.idle_ticks = self.idle_ticks.saturating_add(1);
        }

        let requests = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.missing() > 0 && s.subtask.is_none())
            .map(|(slot, s)| SubtaskRequest {
                slot,
                signature: s.signature.clone(),
                quantity: s.missing(),
            })
            .collect();
        StepOutcome::Waiting { requests }
    }

    fn finish(&mut self) -> StepOutcome {
        for slot in &mut self.slots {
            slot.held.clear();
            slot.subtask = None;
        }
        self.state = TaskState::Completed;
        trace!("{} completed {} crafts of {}", self.id, self.crafts, self.pattern.id);

        let outputs = self
            .pattern
            .outputs
            .iter()
            .map(|o| o.signature.stack(o.quantity.saturating_mul(self.crafts)))
            .filter(|s| !s.is_empty())
            .collect();
        StepOutcome::Completed { outputs }
    }

    fn note_progress(&mut self) {
        self.idle_ticks = 0;
        self.stall_reported = false;
    }
}
