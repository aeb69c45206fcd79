//! Pattern sources.
//!
//! A [`PatternSource`] supplies the raw pattern list consumed by
//! [`PatternRegistry::rebuild`](crate::registry::PatternRegistry::rebuild).
//! Sources are asked again on every rebuild.

use std::fs;
use std::path::{Path, PathBuf};

use autocraft_common::SchemaVersion;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pattern::Pattern;

/// Errors that can occur while reading pattern sources.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Failed to read a file or directory
    #[error("Failed to read pattern source: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse pattern TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failed to parse RON
    #[error("Failed to parse pattern RON: {0}")]
    Ron(#[from] ron::error::SpannedError),

    /// File written for an incompatible pattern schema
    #[error("Unsupported pattern file version {found} (reader is {expected})")]
    UnsupportedVersion {
        /// Version this build reads
        expected: SchemaVersion,
        /// Version declared by the file
        found: SchemaVersion,
    },
}

/// Result type for pattern source operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Anything that can provide crafting patterns.
pub trait PatternSource {
    /// Human readable name used in logs.
    fn name(&self) -> &str;

    /// Produces the current pattern list.
    fn load_patterns(&self) -> SourceResult<Vec<Pattern>>;
}

/// A fixed in-memory pattern list.
#[derive(Debug, Clone, Default)]
pub struct StaticPatterns {
    name: String,
    patterns: Vec<Pattern>,
}

impl StaticPatterns {
    /// Creates a named static source.
    #[must_use]
    pub fn new(name: impl Into<String>, patterns: Vec<Pattern>) -> Self {
        Self {
            name: name.into(),
            patterns,
        }
    }

    /// Adds a pattern.
    pub fn push(&mut self, pattern: Pattern) {
        self.patterns.push(pattern);
    }

    /// Removes every pattern with the given ID. Returns whether any existed.
    pub fn remove(&mut self, id: autocraft_common::PatternId) -> bool {
        let before = self.patterns.len();
        self.patterns.retain(|p| p.id != id);
        self.patterns.len() != before
    }
}

impl PatternSource for StaticPatterns {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_patterns(&self) -> SourceResult<Vec<Pattern>> {
        Ok(self.patterns.clone())
    }
}

fn pattern_file_version() -> SchemaVersion {
    SchemaVersion::PATTERN_FILE
}

/// On-disk pattern file layout (`[[patterns]]` entries).
///
/// Files may declare a schema `version`; one without it is read as the
/// current version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternFile {
    /// Schema version the file was written for
    #[serde(default = "pattern_file_version")]
    pub version: SchemaVersion,
    /// Patterns defined in the file
    #[serde(default)]
    pub patterns: Vec<Pattern>,
}

impl Default for PatternFile {
    fn default() -> Self {
        Self {
            version: SchemaVersion::PATTERN_FILE,
            patterns: Vec::new(),
        }
    }
}

impl PatternFile {
    /// Parses a pattern file from TOML text.
    pub fn from_toml(content: &str) -> SourceResult<Self> {
        toml::from_str::<Self>(content)?.checked()
    }

    /// Parses a pattern file from RON text.
    pub fn from_ron(content: &str) -> SourceResult<Self> {
        ron::from_str::<Self>(content)?.checked()
    }

    fn checked(self) -> SourceResult<Self> {
        if SchemaVersion::PATTERN_FILE.can_read(&self.version) {
            Ok(self)
        } else {
            Err(SourceError::UnsupportedVersion {
                expected: SchemaVersion::PATTERN_FILE,
                found: self.version,
            })
        }
    }

    /// Reads a pattern file, choosing the format by extension.
    pub fn read(path: &Path) -> SourceResult<Self> {
        let content = fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "ron") {
            Self::from_ron(&content)
        } else {
            Self::from_toml(&content)
        }
    }
}

/// Statistics from the last directory scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    /// Files parsed successfully
    pub files_loaded: usize,
    /// Files skipped because they failed to parse
    pub files_failed: usize,
    /// Patterns read across all files
    pub patterns_loaded: usize,
}

/// Loads every `*.toml` and `*.ron` pattern file in a directory.
#[derive(Debug)]
pub struct PatternDirectory {
    path: PathBuf,
    name: String,
    stats: parking_lot::Mutex<SourceStats>,
}

impl PatternDirectory {
    /// Creates a source for the given directory.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.display().to_string();
        Self {
            path,
            name,
            stats: parking_lot::Mutex::new(SourceStats::default()),
        }
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Statistics from the most recent load.
    #[must_use]
    pub fn stats(&self) -> SourceStats {
        *self.stats.lock()
    }

    fn pattern_files(&self) -> SourceResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.path)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext == "toml" || ext == "ron")
            })
            .collect();
        // Directory order is platform dependent; registration order must not be.
        files.sort();
        Ok(files)
    }
}

impl PatternSource for PatternDirectory {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_patterns(&self) -> SourceResult<Vec<Pattern>> {
        let mut stats = SourceStats::default();
        let mut patterns = Vec::new();

        if !self.path.exists() {
            warn!("Pattern directory does not exist: {:?}", self.path);
            *self.stats.lock() = stats;
            return Ok(patterns);
        }

        for path in self.pattern_files()? {
            match PatternFile::read(&path) {
                Ok(file) => {
                    debug!("Loaded {} patterns from {:?}", file.patterns.len(), path);
                    stats.files_loaded += 1;
                    stats.patterns_loaded += file.patterns.len();
                    patterns.extend(file.patterns);
                },
                Err(e) => {
                    warn!("Failed to load pattern file {:?}: {}", path, e);
                    stats.files_failed += 1;
                },
            }
        }

        info!(
            "Read {} patterns from {} files in {:?}",
            stats.patterns_loaded, stats.files_loaded, self.path
        );
        *self.stats.lock() = stats;
        Ok(patterns)
    }
}
