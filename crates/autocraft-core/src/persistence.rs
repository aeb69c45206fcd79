//! Task persistence.
//!
//! Active tasks are saved as [`TaskRecord`]s that reference their pattern by
//! ID. On load, each record is rebound to the pattern with that ID in the
//! current registry. Two forms are supported:
//! - a JSON document, read record by record so one bad entry does not sink
//!   the rest
//! - a compact binary form: magic bytes followed by bincode. This form is
//!   all or nothing: a body that fails to decode rejects the whole snapshot
//!   and the active tasks stay as they were

use std::fs;
use std::path::Path;

use ahash::AHashSet;
use autocraft_common::{
    AutocraftError, AutocraftResult, MagicBytes, PatternId, SchemaVersion, TaskId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::manager::CraftingManager;
use crate::signature::{ComparisonFlags, ItemSignature, ItemStack};
use crate::task::{CraftingTask, TaskProgress};

/// Errors that can occur while saving or loading tasks.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Missing magic bytes or malformed document
    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    /// Snapshot written by an incompatible version
    #[error("Incompatible snapshot version: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build writes
        expected: SchemaVersion,
        /// Version found in the data
        found: SchemaVersion,
    },
}

/// Result type for persistence operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

impl From<PersistenceError> for AutocraftError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::VersionMismatch { expected, found } => Self::VersionMismatch {
                expected: expected.to_string(),
                actual: found.to_string(),
            },
            other => Self::Serialization(other.to_string()),
        }
    }
}

/// Saved form of one active task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Task ID
    pub id: TaskId,
    /// ID of the bound pattern
    pub pattern_id: PatternId,
    /// Item being produced
    pub target: ItemSignature,
    /// Flags the target was requested with
    pub flags: ComparisonFlags,
    /// Requested quantity
    pub quantity: u32,
    /// Task that spawned this one
    pub parent: Option<TaskId>,
    /// Mutable progress
    pub progress: TaskProgress,
}

impl TaskRecord {
    /// Captures a task.
    #[must_use]
    pub fn from_task(task: &CraftingTask) -> Self {
        Self {
            id: task.id(),
            pattern_id: task.pattern().id,
            target: task.target().clone(),
            flags: task.flags(),
            quantity: task.quantity(),
            parent: task.parent(),
            progress: task.progress(),
        }
    }
}

/// Every active task of a manager, in processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerSnapshot {
    /// Schema version
    pub version: SchemaVersion,
    /// Next task ID to hand out
    pub next_task_id: TaskId,
    /// Task records
    pub tasks: Vec<TaskRecord>,
}

impl ManagerSnapshot {
    /// Serializes to the binary form.
    pub fn to_bytes(&self) -> PersistenceResult<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(MagicBytes::SNAPSHOT.as_bytes());

        let data =
            bincode::serialize(self).map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        buffer.extend(data);

        Ok(buffer)
    }

    /// Deserializes from the binary form.
    ///
    /// Any decoding failure is an error for the whole snapshot; individual
    /// records cannot be skipped.
    pub fn from_bytes(bytes: &[u8]) -> PersistenceResult<Self> {
        if !MagicBytes::SNAPSHOT.matches(bytes) {
            return Err(PersistenceError::InvalidFormat(
                "missing snapshot magic bytes".to_string(),
            ));
        }

        let snapshot: Self = bincode::deserialize(&bytes[4..])
            .map_err(|e| PersistenceError::Serialization(e.to_string()))?;
        check_version(snapshot.version)?;
        Ok(snapshot)
    }
}

fn check_version(found: SchemaVersion) -> PersistenceResult<()> {
    if SchemaVersion::MANAGER_SNAPSHOT.can_read(&found) {
        Ok(())
    } else {
        Err(PersistenceError::VersionMismatch {
            expected: SchemaVersion::MANAGER_SNAPSHOT,
            found,
        })
    }
}

/// Outcome of restoring tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Tasks restored into the active list
    pub restored: usize,
    /// Records whose pattern ID is not registered
    pub dropped_unknown_pattern: usize,
    /// Records that could not be decoded, or repeated a task ID
    pub dropped_corrupt: usize,
    /// Gathered ingredients no restored task holds anymore. The caller should
    /// put these back into storage.
    pub returned_items: Vec<ItemStack>,
}

impl LoadReport {
    /// Total records that were not restored.
    #[must_use]
    pub const fn dropped(&self) -> usize {
        self.dropped_unknown_pattern + self.dropped_corrupt
    }
}

impl CraftingManager {
    /// Captures every active task.
    #[must_use]
    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            version: SchemaVersion::MANAGER_SNAPSHOT,
            next_task_id: self.next_task_id(),
            tasks: self.tasks().iter().map(TaskRecord::from_task).collect(),
        }
    }

    /// Replaces the active task list with the tasks in `snapshot`.
    ///
    /// Records referencing unknown patterns are dropped. Ingredients held by
    /// the discarded tasks, or by dropped records, are listed in the report.
    pub fn restore(&mut self, snapshot: ManagerSnapshot) -> LoadReport {
        let mut report = LoadReport::default();
        self.restore_records(snapshot.next_task_id, snapshot.tasks, &mut report);
        report
    }

    fn restore_records(
        &mut self,
        next_task_id: TaskId,
        records: Vec<TaskRecord>,
        report: &mut LoadReport,
    ) {
        let mut seen = AHashSet::new();
        let mut bound = Vec::with_capacity(records.len());
        for record in records {
            if !record.id.is_valid() || !seen.insert(record.id) {
                warn!("Dropping task record with invalid or repeated ID {}", record.id);
                report.dropped_corrupt += 1;
                continue;
            }
            match self.registry().get(record.pattern_id) {
                Some(pattern) => bound.push((record, pattern.clone())),
                None => {
                    warn!(
                        "Dropping {}: {} is not registered",
                        record.id, record.pattern_id
                    );
                    report.dropped_unknown_pattern += 1;
                    report.returned_items.extend(
                        record
                            .progress
                            .slots
                            .iter()
                            .flat_map(|s| s.held.iter().cloned())
                            .filter(|s| !s.is_empty()),
                    );
                },
            }
        }

        let live: AHashSet<TaskId> = bound.iter().map(|(r, _)| r.id).collect();
        let mut tasks = Vec::with_capacity(bound.len());
        for (record, pattern) in bound {
            let parent = record.parent.filter(|p| live.contains(p));
            let (task, leftovers) = CraftingTask::restore(
                record.id,
                record.target,
                record.flags,
                pattern,
                record.quantity,
                parent,
                record.progress,
            );
            report.returned_items.extend(leftovers);
            tasks.push(task);
        }
        report.restored = tasks.len();

        for mut old in self.replace_tasks(tasks, next_task_id) {
            report.returned_items.extend(old.take_gathered());
        }
        info!(
            "Restored {} tasks ({} dropped)",
            report.restored,
            report.dropped()
        );
    }

    /// Writes every active task as a JSON document.
    pub fn write_document(&self) -> PersistenceResult<Value> {
        Ok(serde_json::to_value(self.snapshot())?)
    }

    /// Restores tasks from a JSON document written by
    /// [`write_document`](Self::write_document).
    ///
    /// Records are decoded one at a time; a record that fails to decode is
    /// dropped and counted. A document without a readable header is an error
    /// and leaves the active tasks untouched.
    pub fn read_document(&mut self, document: &Value) -> PersistenceResult<LoadReport> {
        let header = document
            .as_object()
            .ok_or_else(|| PersistenceError::InvalidFormat("expected an object".to_string()))?;

        let version = header
            .get("version")
            .cloned()
            .ok_or_else(|| PersistenceError::InvalidFormat("missing version".to_string()))?;
        check_version(serde_json::from_value(version)?)?;

        let next_task_id = match header.get("next_task_id") {
            Some(value) => serde_json::from_value(value.clone())?,
            None => TaskId::FIRST,
        };

        let entries: &[Value] = match header.get("tasks") {
            Some(Value::Array(entries)) => entries.as_slice(),
            Some(_) => {
                return Err(PersistenceError::InvalidFormat(
                    "tasks must be an array".to_string(),
                ))
            },
            None => &[],
        };

        let mut report = LoadReport::default();
        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            match serde_json::from_value::<TaskRecord>(entry.clone()) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!("Dropping unreadable task record {}: {}", index, e);
                    report.dropped_corrupt += 1;
                },
            }
        }

        self.restore_records(next_task_id, records, &mut report);
        Ok(report)
    }

    /// Saves active tasks to a file. `.json` files get the document form,
    /// anything else the binary form.
    pub fn save_to_file(&self, path: &Path) -> AutocraftResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes = if is_json(path) {
            let document = self.write_document()?;
            serde_json::to_vec_pretty(&document)
                .map_err(|e| AutocraftError::Serialization(e.to_string()))?
        } else {
            self.snapshot().to_bytes()?
        };
        fs::write(path, bytes)?;

        debug!("Saved {} tasks to {}", self.tasks().len(), path.display());
        Ok(())
    }

    /// Loads active tasks from a file written by
    /// [`save_to_file`](Self::save_to_file).
    pub fn load_from_file(&mut self, path: &Path) -> AutocraftResult<LoadReport> {
        let bytes = fs::read(path)?;
        let report = if is_json(path) {
            let document: Value = serde_json::from_slice(&bytes)
                .map_err(|e| AutocraftError::Serialization(e.to_string()))?;
            self.read_document(&document)?
        } else {
            let snapshot = ManagerSnapshot::from_bytes(&bytes)?;
            self.restore(snapshot)
        };
        Ok(report)
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::NetworkStorage;
    use crate::pattern::Pattern;
    use crate::source::StaticPatterns;
    use crate::task::TaskState;
    use serde_json::json;
    use tempfile::TempDir;

    fn planks() -> Pattern {
        Pattern::builder(PatternId::new(1), "Planks")
            .input(ItemSignature::of(1), 1)
            .output(ItemSignature::of(2), 4)
            .build()
            .expect("valid pattern")
    }

    fn manager() -> CraftingManager {
        let mut manager = CraftingManager::default();
        let mut network = NetworkStorage::default();
        manager.rebuild(
            &[&StaticPatterns::new("test", vec![planks()])],
            &mut network,
        );
        manager
    }

    fn with_task(quantity: u32, logs: u32) -> CraftingManager {
        let mut manager = manager();
        let network = NetworkStorage::default();
        manager
            .schedule(&ItemSignature::of(2), quantity, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        manager.track(&ItemSignature::of(1), logs);
        manager
    }

    #[test]
    fn test_bytes_roundtrip() {
        let source = with_task(8, 1);
        let bytes = source.snapshot().to_bytes().expect("serialize");
        assert_eq!(&bytes[..4], b"ACSN");

        let mut target = manager();
        let report = target.restore(ManagerSnapshot::from_bytes(&bytes).expect("deserialize"));
        assert_eq!(report.restored, 1);
        assert!(report.returned_items.is_empty());
        assert_eq!(target.tasks()[0].slots()[0].gathered(), 1);
        assert_eq!(target.tasks()[0].state(), TaskState::Scheduled);
    }

    #[test]
    fn test_from_bytes_rejects_bad_magic() {
        let result = ManagerSnapshot::from_bytes(b"NOPE1234");
        assert!(matches!(result, Err(PersistenceError::InvalidFormat(_))));
    }

    #[test]
    fn test_from_bytes_rejects_future_major() {
        let mut snapshot = with_task(4, 0).snapshot();
        snapshot.version = SchemaVersion::new(2, 0, 0);
        let bytes = snapshot.to_bytes().expect("serialize");
        assert!(matches!(
            ManagerSnapshot::from_bytes(&bytes),
            Err(PersistenceError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_corrupt_bytes_reject_whole_snapshot() {
        let bytes = with_task(8, 1).snapshot().to_bytes().expect("serialize");
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            ManagerSnapshot::from_bytes(truncated),
            Err(PersistenceError::Serialization(_))
        ));

        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("tasks.bin");
        std::fs::write(&path, truncated).expect("write");

        let mut target = with_task(4, 0);
        assert!(target.load_from_file(&path).is_err());
        assert_eq!(target.tasks().len(), 1);
        assert_eq!(target.tasks()[0].quantity(), 4);
    }

    fn smelting(input: u32) -> Pattern {
        Pattern::builder(PatternId::new(1), "Ingot")
            .input(ItemSignature::of(input), 1)
            .output(ItemSignature::of(6), 1)
            .craft_time(3)
            .build()
            .expect("valid pattern")
    }

    fn manager_with(pattern: Pattern) -> CraftingManager {
        let mut manager = CraftingManager::default();
        let mut network = NetworkStorage::default();
        manager.rebuild(&[&StaticPatterns::new("test", vec![pattern])], &mut network);
        manager
    }

    fn mid_craft_bytes() -> Vec<u8> {
        let mut source = manager_with(smelting(1));
        let mut network = NetworkStorage::default();
        network.add(&ItemSignature::of(1), 1).expect("add");
        source
            .schedule(&ItemSignature::of(6), 1, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        source.update(&mut network);
        assert_eq!(
            source.tasks()[0].state(),
            TaskState::Crafting { ticks_left: 3 }
        );
        source.snapshot().to_bytes().expect("serialize")
    }

    #[test]
    fn test_mid_craft_record_resumes() {
        let mut target = manager_with(smelting(1));
        let snapshot = ManagerSnapshot::from_bytes(&mid_craft_bytes()).expect("deserialize");
        let report = target.restore(snapshot);
        assert_eq!(report.restored, 1);
        assert!(report.returned_items.is_empty());

        let mut network = NetworkStorage::default();
        for _ in 0..3 {
            target.update(&mut network);
        }
        assert!(target.tasks().is_empty());
        assert_eq!(network.count(&ItemSignature::of(6)), 1);
    }

    #[test]
    fn test_mid_craft_record_against_redefined_pattern() {
        // Pattern 1 now smelts coal instead of logs
        let mut target = manager_with(smelting(4));
        let snapshot = ManagerSnapshot::from_bytes(&mid_craft_bytes()).expect("deserialize");
        let report = target.restore(snapshot);

        assert_eq!(report.restored, 1);
        assert_eq!(report.returned_items, vec![ItemStack::of(1, 1)]);
        assert_eq!(target.tasks()[0].state(), TaskState::Gathering);

        let mut network = NetworkStorage::default();
        for _ in 0..5 {
            target.update(&mut network);
        }
        assert_eq!(target.tasks().len(), 1);
        assert_eq!(network.count(&ItemSignature::of(6)), 0);
    }

    #[test]
    fn test_document_drops_corrupt_records() {
        let source = with_task(8, 1);
        let mut document = source.write_document().expect("document");
        if let Some(Value::Array(tasks)) = document.get_mut("tasks") {
            tasks.push(json!({ "id": 99, "pattern_id": "not a number" }));
        }

        let mut target = manager();
        let report = target.read_document(&document).expect("read");
        assert_eq!(report.restored, 1);
        assert_eq!(report.dropped_corrupt, 1);
    }

    #[test]
    fn test_unknown_pattern_returns_items() {
        let source = with_task(8, 2);
        let document = source.write_document().expect("document");

        let mut empty = CraftingManager::default();
        let report = empty.read_document(&document).expect("read");
        assert_eq!(report.restored, 0);
        assert_eq!(report.dropped_unknown_pattern, 1);
        assert_eq!(report.returned_items, vec![ItemStack::of(1, 2)]);
    }

    #[test]
    fn test_restored_ids_do_not_collide() {
        let source = with_task(4, 0);
        let mut target = manager();
        target.restore(source.snapshot());

        let pattern = target.patterns()[0].clone();
        let fresh = target.create(ItemSignature::of(2), pattern, 1);
        assert!(fresh.id() > source.tasks()[0].id());
    }

    #[test]
    fn test_document_without_header_is_error() {
        let mut target = with_task(4, 0);
        assert!(target.read_document(&json!([1, 2, 3])).is_err());
        assert!(target.read_document(&json!({ "tasks": [] })).is_err());
        // Untouched
        assert_eq!(target.tasks().len(), 1);
    }

    #[test]
    fn test_file_roundtrip_both_forms() {
        let dir = TempDir::new().expect("tempdir");
        let source = with_task(8, 1);

        for name in ["tasks.json", "tasks.bin"] {
            let path = dir.path().join("saves").join(name);
            source.save_to_file(&path).expect("save");

            let mut target = manager();
            let report = target.load_from_file(&path).expect("load");
            assert_eq!(report.restored, 1);
            assert_eq!(target.snapshot(), source.snapshot());
        }
    }
}
