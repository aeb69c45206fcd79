//! Crafting manager.
//!
//! Owns the pattern registry and the ordered list of active tasks. The host
//! calls [`CraftingManager::update`] once per tick; requests, deliveries, and
//! cancellations may arrive between ticks.

use std::sync::Arc;

use autocraft_common::TaskId;
use tracing::{debug, info, warn};

use crate::config::{ManagerConfig, RebuildPolicy};
use crate::events::{CraftingEvent, EventBus};
use crate::inventory::ItemNetwork;
use crate::pattern::Pattern;
use crate::registry::{self, PatternRegistry, RebuildReport};
use crate::selector;
use crate::signature::{ComparisonFlags, ItemSignature, ItemStack};
use crate::source::PatternSource;
use crate::task::{CraftingTask, FailureReason, StepOutcome, SubtaskRequest};

/// What happened during one [`CraftingManager::update`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tick counter after the pass
    pub tick: u64,
    /// Tasks stepped
    pub advanced: usize,
    /// Tasks that completed
    pub completed: usize,
    /// Tasks that failed
    pub failed: usize,
    /// Sub-tasks created for missing ingredients
    pub spawned: usize,
}

/// Autocrafting manager.
#[derive(Debug)]
pub struct CraftingManager {
    config: ManagerConfig,
    registry: PatternRegistry,
    /// Active tasks in scheduling order
    tasks: Vec<CraftingTask>,
    next_task_id: TaskId,
    events: EventBus,
    tick: u64,
}

impl Default for CraftingManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

impl CraftingManager {
    /// Creates a manager with an empty registry and task list.
    #[must_use]
    pub fn new(config: ManagerConfig) -> Self {
        let events = EventBus::new(config.event_capacity);
        Self {
            config,
            registry: PatternRegistry::new(),
            tasks: Vec::new(),
            next_task_id: TaskId::FIRST,
            events,
            tick: 0,
        }
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Event bus the manager publishes to.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Drains pending events.
    pub fn drain_events(&self) -> Vec<CraftingEvent> {
        self.events.drain()
    }

    /// Number of completed update passes.
    #[must_use]
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    // === Patterns ===

    /// Pattern registry.
    #[must_use]
    pub fn registry(&self) -> &PatternRegistry {
        &self.registry
    }

    /// All registered patterns.
    #[must_use]
    pub fn patterns(&self) -> &[Arc<Pattern>] {
        self.registry.patterns()
    }

    /// Rebuilds the pattern registry from `sources`.
    ///
    /// Active tasks keep their bound pattern. Tasks whose pattern ID is gone
    /// afterwards are orphans; with [`RebuildPolicy::CancelOrphaned`] they
    /// fail and their gathered ingredients go back into `network`.
    pub fn rebuild(
        &mut self,
        sources: &[&dyn PatternSource],
        network: &mut dyn ItemNetwork,
    ) -> RebuildReport {
        let report = self.registry.rebuild(sources);

        let orphans: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| !self.registry.contains(t.pattern().id))
            .map(CraftingTask::id)
            .collect();

        if !orphans.is_empty() {
            match self.config.rebuild_policy {
                RebuildPolicy::KeepBound => {
                    warn!(
                        "{} active tasks are bound to patterns that no longer exist",
                        orphans.len()
                    );
                },
                RebuildPolicy::CancelOrphaned => {
                    for id in &orphans {
                        if let Some(index) = self.index_of(*id) {
                            self.fail_task(index, FailureReason::PatternRemoved, network);
                        }
                    }
                    self.tasks.retain(|t| !t.state().is_terminal());
                },
            }
        }

        self.events.publish(CraftingEvent::PatternsRebuilt {
            registered: report.registered,
            orphaned_tasks: orphans.len(),
        });
        report
    }

    /// Every pattern producing `signature` under `flags`.
    #[must_use]
    pub fn get_patterns(
        &self,
        signature: &ItemSignature,
        flags: ComparisonFlags,
    ) -> Vec<&Arc<Pattern>> {
        self.registry.get_patterns(signature, flags)
    }

    /// Selects one pattern for `signature`, preferring the scarcest output.
    #[must_use]
    pub fn get_pattern(
        &self,
        signature: &ItemSignature,
        flags: ComparisonFlags,
        network: &dyn ItemNetwork,
    ) -> Option<Arc<Pattern>> {
        selector::get_pattern(&self.registry, signature, flags, network)
    }

    /// Checks whether a pattern produces `signature` under the default flags.
    #[must_use]
    pub fn has_pattern(&self, signature: &ItemSignature) -> bool {
        registry::has_pattern(&self.registry, signature)
    }

    // === Tasks ===

    /// Active tasks in processing order.
    #[must_use]
    pub fn tasks(&self) -> &[CraftingTask] {
        &self.tasks
    }

    /// Looks up an active task.
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<&CraftingTask> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    /// Checks whether a task is in the active list.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.index_of(id).is_some()
    }

    /// Builds a task for `quantity` units of `target` through `pattern`.
    ///
    /// The task is not added to the active list.
    pub fn create(
        &mut self,
        target: ItemSignature,
        pattern: Arc<Pattern>,
        quantity: u32,
    ) -> CraftingTask {
        self.create_with_flags(target, pattern, quantity, ComparisonFlags::DEFAULT)
    }

    /// Builds a task targeting the primary output of `pattern`.
    pub fn create_for_pattern(
        &mut self,
        pattern: Arc<Pattern>,
        quantity: u32,
    ) -> Option<CraftingTask> {
        let target = pattern.primary_output()?.signature.clone();
        Some(self.create(target, pattern, quantity))
    }

    fn create_with_flags(
        &mut self,
        target: ItemSignature,
        pattern: Arc<Pattern>,
        quantity: u32,
        flags: ComparisonFlags,
    ) -> CraftingTask {
        let id = self.next_task_id;
        self.next_task_id = id.next();
        CraftingTask::new(id, target, flags, pattern, quantity)
    }

    /// Appends a task to the active list. No deduplication happens here.
    pub fn add(&mut self, mut task: CraftingTask) -> TaskId {
        task.mark_scheduled();
        let id = task.id();
        if id >= self.next_task_id {
            self.next_task_id = id.next();
        }

        info!(
            "Scheduled {}: {}x {} via {}",
            id,
            task.quantity(),
            task.target(),
            task.pattern().id
        );
        self.events.publish(CraftingEvent::TaskScheduled {
            task_id: id,
            target: task.target().clone(),
            quantity: task.quantity(),
            pattern_id: task.pattern().id,
            parent: task.parent(),
        });
        self.tasks.push(task);
        id
    }

    /// Requests `quantity` units of `signature`.
    ///
    /// Returns an existing active task whose target matches under `flags`
    /// when there is one. Otherwise selects a pattern and schedules a new
    /// task. Returns `None` when no pattern produces the item or the task
    /// limit is reached.
    pub fn schedule(
        &mut self,
        signature: &ItemSignature,
        quantity: u32,
        flags: ComparisonFlags,
        network: &dyn ItemNetwork,
    ) -> Option<TaskId> {
        self.schedule_inner(signature, quantity, flags, None, network)
            .map(|(id, _)| id)
    }

    /// Returns the task ID and whether it was newly created.
    fn schedule_inner(
        &mut self,
        signature: &ItemSignature,
        quantity: u32,
        flags: ComparisonFlags,
        parent: Option<TaskId>,
        network: &dyn ItemNetwork,
    ) -> Option<(TaskId, bool)> {
        if let Some(existing) = self
            .tasks
            .iter()
            .find(|t| !t.state().is_terminal() && t.targets(signature, flags))
        {
            debug!("Reusing {} for {}", existing.id(), signature);
            return Some((existing.id(), false));
        }

        if let Some(limit) = self.config.max_active_tasks {
            if self.tasks.len() >= limit {
                debug!("Task limit {} reached, not scheduling {}", limit, signature);
                return None;
            }
        }

        let pattern = selector::get_pattern(&self.registry, signature, flags, network)?;
        let mut task = self.create_with_flags(signature.clone(), pattern, quantity, flags);
        if let Some(parent) = parent {
            task.set_parent(parent);
        }
        Some((self.add(task), true))
    }

    /// Offers `size` newly available units of `signature` to active tasks in
    /// list order. Returns the units no task needed.
    pub fn track(&mut self, signature: &ItemSignature, size: u32) -> u32 {
        let mut remaining = size;
        for task in &mut self.tasks {
            if remaining == 0 {
                break;
            }
            remaining -= task.offer(signature, remaining);
        }
        if remaining < size {
            debug!("Tracked {}x {} into tasks", size - remaining, signature);
        }
        remaining
    }

    /// Removes a task immediately, along with the sub-tasks it spawned.
    ///
    /// Gathered ingredients are inserted back into `network`. Returns false
    /// if the task is not active.
    pub fn cancel(&mut self, id: TaskId, network: &mut dyn ItemNetwork) -> bool {
        if !self.contains(id) {
            return false;
        }

        let mut doomed = vec![id];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let current = doomed[cursor];
            doomed.extend(
                self.tasks
                    .iter()
                    .filter(|t| t.parent() == Some(current) && !doomed.contains(&t.id()))
                    .map(CraftingTask::id)
                    .collect::<Vec<_>>(),
            );
            cursor += 1;
        }

        for task_id in &doomed {
            if let Some(index) = self.index_of(*task_id) {
                let task = &mut self.tasks[index];
                task.mark_cancelled();
                let returned = task.take_gathered();
                self.return_items(*task_id, returned, network);
                info!("Cancelled {}", task_id);
                self.events
                    .publish(CraftingEvent::TaskCancelled { task_id: *task_id });
            }
        }
        self.tasks.retain(|t| !t.state().is_terminal());
        true
    }

    /// Advances every active task by one step, in list order, and removes
    /// tasks that finished.
    pub fn update(&mut self, network: &mut dyn ItemNetwork) -> TickSummary {
        self.tick += 1;
        let mut summary = TickSummary {
            tick: self.tick,
            ..TickSummary::default()
        };

        // Sub-tasks scheduled during the pass are appended and stepped in the
        // same pass.
        let mut index = 0;
        while index < self.tasks.len() {
            if self.tasks[index].state().is_terminal() {
                index += 1;
                continue;
            }

            let dead: Vec<TaskId> = self.tasks[index]
                .subtasks()
                .filter(|id| !self.is_active(*id))
                .collect();
            if !dead.is_empty() {
                self.tasks[index].prune_subtasks(|id| !dead.contains(&id));
            }

            let outcome = self.tasks[index].step(network);
            summary.advanced += 1;

            match outcome {
                StepOutcome::Waiting { requests } => {
                    if self.config.spawn_subtasks {
                        summary.spawned += self.request_subtasks(index, requests, network);
                    }
                    if self.check_stall(index, network) {
                        summary.failed += 1;
                    }
                },
                StepOutcome::Crafting => {},
                StepOutcome::Completed { outputs } => {
                    summary.completed += 1;
                    self.complete_task(index, outputs, network);
                },
                StepOutcome::Failed(reason) => {
                    summary.failed += 1;
                    self.fail_task(index, reason, network);
                },
            }
            index += 1;
        }

        self.tasks.retain(|t| !t.state().is_terminal());
        summary
    }

    fn request_subtasks(
        &mut self,
        index: usize,
        requests: Vec<SubtaskRequest>,
        network: &dyn ItemNetwork,
    ) -> usize {
        let parent = self.tasks[index].id();
        let flags = self.tasks[index].pattern().input_flags;
        let mut spawned = 0;

        for request in requests {
            let scheduled = self.schedule_inner(
                &request.signature,
                request.quantity,
                flags,
                Some(parent),
                network,
            );
            let Some((child, created)) = scheduled else {
                continue;
            };
            // Waiting on yourself or an ancestor never finishes.
            if self.is_self_or_ancestor(child, parent) {
                continue;
            }
            if created {
                spawned += 1;
            }
            self.tasks[index].link_subtask(request.slot, child);
        }
        spawned
    }

    /// Returns true if the task failed.
    fn check_stall(&mut self, index: usize, network: &mut dyn ItemNetwork) -> bool {
        let task = &self.tasks[index];
        let idle_ticks = task.idle_ticks();
        if idle_ticks == 0 {
            return false;
        }

        if let Some(limit) = self.config.stall_failure_ticks {
            if idle_ticks >= limit {
                self.fail_task(index, FailureReason::Stalled { idle_ticks }, network);
                return true;
            }
        }

        if let Some(limit) = self.config.stall_warning_ticks {
            if idle_ticks >= limit && !task.stall_reported() {
                let missing: Vec<String> = task
                    .slots()
                    .iter()
                    .filter(|s| s.missing() > 0)
                    .map(|s| format!("{}x {}", s.missing(), s.signature))
                    .collect();
                warn!(
                    "{} stalled for {} ticks, missing: {}",
                    task.id(),
                    idle_ticks,
                    missing.join(", ")
                );
                let task_id = task.id();
                self.tasks[index].set_stall_reported();
                self.events.publish(CraftingEvent::TaskStalled {
                    task_id,
                    idle_ticks,
                });
            }
        }
        false
    }

    fn complete_task(
        &mut self,
        index: usize,
        outputs: Vec<ItemStack>,
        network: &mut dyn ItemNetwork,
    ) {
        let task_id = self.tasks[index].id();
        info!("Completed {}", task_id);
        self.events.publish(CraftingEvent::TaskCompleted {
            task_id,
            outputs: outputs.clone(),
        });

        // Waiting tasks get first claim on what was just produced.
        for output in outputs {
            let leftover = self.track(&output.signature, output.quantity);
            if leftover > 0 {
                self.return_items(task_id, vec![output.signature.stack(leftover)], network);
            }
        }
    }

    fn fail_task(&mut self, index: usize, reason: FailureReason, network: &mut dyn ItemNetwork) {
        let task = &mut self.tasks[index];
        let task_id = task.id();
        task.mark_failed();
        let returned = task.take_gathered();
        warn!("{} failed: {}", task_id, reason);
        self.return_items(task_id, returned, network);
        self.events
            .publish(CraftingEvent::TaskFailed { task_id, reason });
    }

    fn return_items(
        &self,
        task_id: TaskId,
        stacks: Vec<ItemStack>,
        network: &mut dyn ItemNetwork,
    ) {
        for stack in stacks {
            let rejected = network.insert(&stack);
            if rejected > 0 {
                warn!(
                    "Storage refused {}x {} from {}",
                    rejected, stack.signature, task_id
                );
                self.events.publish(CraftingEvent::OutputOverflow {
                    task_id,
                    rejected: stack.signature.stack(rejected),
                });
            }
        }
    }

    fn index_of(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id() == id)
    }

    fn is_active(&self, id: TaskId) -> bool {
        self.task(id).is_some_and(|t| !t.state().is_terminal())
    }

    fn is_self_or_ancestor(&self, candidate: TaskId, of: TaskId) -> bool {
        let mut current = Some(of);
        let mut hops = 0;
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            hops += 1;
            if hops > self.tasks.len() {
                break;
            }
            current = self.task(id).and_then(CraftingTask::parent);
        }
        false
    }

    // === Persistence hooks ===

    pub(crate) const fn next_task_id(&self) -> TaskId {
        self.next_task_id
    }

    /// Replaces the task list wholesale. Returns the previous tasks.
    pub(crate) fn replace_tasks(
        &mut self,
        tasks: Vec<CraftingTask>,
        next_task_id: TaskId,
    ) -> Vec<CraftingTask> {
        let highest = tasks.iter().map(|t| t.id().next()).max();
        self.next_task_id = highest.map_or(next_task_id, |h| h.max(next_task_id));
        std::mem::replace(&mut self.tasks, tasks)
    }
}
