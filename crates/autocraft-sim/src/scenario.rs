//! Scenario files for the headless driver.
//!
//! A scenario lists patterns, starting stock, and timed requests and
//! deliveries. Running it ticks a manager against an in-memory network.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use autocraft_common::TaskId;
use autocraft_core::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

fn default_ticks() -> u64 {
    100
}

fn default_flags() -> ComparisonFlags {
    ComparisonFlags::DEFAULT
}

fn first_tick() -> u64 {
    1
}

/// A crafting request issued at a given tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Tick the request is issued before
    #[serde(default = "first_tick")]
    pub tick: u64,
    /// Requested item
    pub item: ItemSignature,
    /// Requested quantity
    pub quantity: u32,
    /// Matching flags for deduplication and selection
    #[serde(default = "default_flags")]
    pub flags: ComparisonFlags,
}

/// Items handed to the manager at a given tick, outside of storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Tick the delivery happens before
    #[serde(default = "first_tick")]
    pub tick: u64,
    /// Delivered items
    pub stack: ItemStack,
}

/// A cancellation issued at a given tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cancellation {
    /// Tick the cancellation happens before
    pub tick: u64,
    /// Task to cancel
    pub task: TaskId,
}

/// Scenario file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Number of ticks to run
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    /// Extra pattern directory, relative to the scenario file
    #[serde(default)]
    pub pattern_dir: Option<PathBuf>,
    /// Manager configuration
    #[serde(default)]
    pub config: ManagerConfig,
    /// Storage capacity in distinct stacks
    #[serde(default)]
    pub storage_slots: Option<u32>,
    /// Inline patterns
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    /// Starting storage contents
    #[serde(default)]
    pub stock: Vec<ItemStack>,
    /// Timed requests
    #[serde(default)]
    pub requests: Vec<Request>,
    /// Timed deliveries
    #[serde(default)]
    pub deliveries: Vec<Delivery>,
    /// Timed cancellations
    #[serde(default)]
    pub cancellations: Vec<Cancellation>,
}

/// Outcome of a scenario run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    /// Ticks executed
    pub ticks: u64,
    /// Tasks scheduled, including sub-tasks
    pub scheduled: usize,
    /// Tasks completed
    pub completed: usize,
    /// Tasks failed
    pub failed: usize,
    /// Tasks cancelled
    pub cancelled: usize,
    /// Stall warnings
    pub stalls: usize,
    /// Requests no pattern could serve
    pub unserved_requests: usize,
    /// Delivered units no task needed
    pub unused_delivery: u64,
    /// Tasks still active at the end
    pub active_tasks: usize,
    /// Final storage contents
    pub stock: Vec<ItemStack>,
}

impl Scenario {
    /// Parses a scenario from TOML.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("invalid scenario")
    }

    /// Reads a scenario file. A relative `pattern_dir` is resolved against
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario {}", path.display()))?;
        let mut scenario = Self::from_toml(&content)?;

        if let (Some(dir), Some(base)) = (scenario.pattern_dir.as_mut(), path.parent()) {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        Ok(scenario)
    }

    /// Builds the manager and storage the scenario starts from.
    pub fn prepare(&self) -> Result<(CraftingManager, NetworkStorage)> {
        self.config
            .validate()
            .context("invalid manager configuration")?;

        let mut manager = CraftingManager::new(self.config.clone());
        let mut network = NetworkStorage::new(self.storage_slots.unwrap_or(u32::MAX));
        for stack in &self.stock {
            network
                .add(&stack.signature, stack.quantity)
                .with_context(|| format!("cannot stock {}", stack.signature))?;
        }

        let inline = StaticPatterns::new("scenario", self.patterns.clone());
        let report = match &self.pattern_dir {
            Some(dir) => {
                let directory = PatternDirectory::new(dir.clone());
                manager.rebuild(&[&inline, &directory], &mut network)
            },
            None => manager.rebuild(&[&inline], &mut network),
        };
        if report.rejected > 0 {
            warn!("{} patterns were rejected", report.rejected);
        }
        Ok((manager, network))
    }

    /// Runs every tick and reports the outcome.
    pub fn run(&self) -> Result<(RunReport, CraftingManager)> {
        let (mut manager, mut network) = self.prepare()?;
        let mut report = RunReport::default();

        for tick in 1..=self.ticks {
            for request in self.requests.iter().filter(|r| r.tick == tick) {
                let scheduled =
                    manager.schedule(&request.item, request.quantity, request.flags, &network);
                match scheduled {
                    Some(id) => debug!("Tick {}: request {} -> {}", tick, request.item, id),
                    None => {
                        warn!("Tick {}: nothing can craft {}", tick, request.item);
                        report.unserved_requests += 1;
                    },
                }
            }
            for delivery in self.deliveries.iter().filter(|d| d.tick == tick) {
                let unused = manager.track(&delivery.stack.signature, delivery.stack.quantity);
                report.unused_delivery += u64::from(unused);
            }
            for cancellation in self.cancellations.iter().filter(|c| c.tick == tick) {
                if !manager.cancel(cancellation.task, &mut network) {
                    warn!("Tick {}: {} is not active", tick, cancellation.task);
                }
            }

            manager.update(&mut network);
            for event in manager.drain_events() {
                match event {
                    CraftingEvent::TaskScheduled { .. } => report.scheduled += 1,
                    CraftingEvent::TaskCompleted { .. } => report.completed += 1,
                    CraftingEvent::TaskFailed { .. } => report.failed += 1,
                    CraftingEvent::TaskCancelled { .. } => report.cancelled += 1,
                    CraftingEvent::TaskStalled { .. } => report.stalls += 1,
                    _ => {},
                }
            }
            report.ticks = tick;
        }

        report.active_tasks = manager.tasks().len();
        report.stock = network.iter().cloned().collect();
        info!(
            "Ran {} ticks: {} completed, {} failed, {} still active",
            report.ticks, report.completed, report.failed, report.active_tasks
        );
        Ok((report, manager))
    }
}
