//! Pattern registry.
//!
//! Indexes the patterns from every [`PatternSource`] by output item type and
//! by [`PatternId`]. A rebuild swaps the whole set at once; tasks holding an
//! `Arc<Pattern>` from the previous set are unaffected.

use std::sync::Arc;

use ahash::AHashMap;
use autocraft_common::{ItemTypeId, PatternDefinitionError, PatternId};
use tracing::{debug, info, warn};

use crate::pattern::Pattern;
use crate::signature::{ComparisonFlags, ItemSignature};
use crate::source::PatternSource;

/// Summary of one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Patterns registered
    pub registered: usize,
    /// Patterns rejected by validation or as duplicates
    pub rejected: usize,
    /// Sources that failed to load entirely
    pub failed_sources: usize,
}

/// Registry for all crafting patterns.
#[derive(Debug, Default)]
pub struct PatternRegistry {
    /// Patterns in registration order
    patterns: Vec<Arc<Pattern>>,
    /// Output item type -> indices into `patterns`
    by_output: AHashMap<ItemTypeId, Vec<usize>>,
    /// Pattern ID -> index into `patterns`
    by_id: AHashMap<PatternId, usize>,
}

impl PatternRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Discards every pattern and reloads from `sources`, in order.
    ///
    /// A source that fails to load contributes nothing; the others are still
    /// registered.
    pub fn rebuild(&mut self, sources: &[&dyn PatternSource]) -> RebuildReport {
        self.clear();
        let mut report = RebuildReport::default();

        for source in sources {
            let patterns = match source.load_patterns() {
                Ok(patterns) => patterns,
                Err(e) => {
                    warn!("Pattern source '{}' failed: {}", source.name(), e);
                    report.failed_sources += 1;
                    continue;
                },
            };

            for pattern in patterns {
                match self.register(pattern) {
                    Ok(()) => report.registered += 1,
                    Err(e) => {
                        warn!("Rejected pattern from '{}': {}", source.name(), e);
                        report.rejected += 1;
                    },
                }
            }
        }

        info!(
            "Rebuilt pattern registry: {} patterns ({} rejected)",
            report.registered, report.rejected
        );
        report
    }

    /// Registers a single pattern after validation.
    ///
    /// The first pattern registered under an ID wins.
    pub fn register(&mut self, pattern: Pattern) -> Result<(), PatternDefinitionError> {
        pattern.validate()?;
        if self.by_id.contains_key(&pattern.id) {
            return Err(PatternDefinitionError::Duplicate(pattern.id));
        }

        let index = self.patterns.len();
        self.by_id.insert(pattern.id, index);
        for output in &pattern.outputs {
            let slots = self.by_output.entry(output.signature.item).or_default();
            // A pattern listing the same item twice is indexed once.
            if slots.last() != Some(&index) {
                slots.push(index);
            }
        }
        debug!(
            "Registered {} '{}' ({} inputs -> {} outputs)",
            pattern.id,
            pattern.name,
            pattern.inputs.len(),
            pattern.outputs.len()
        );
        self.patterns.push(Arc::new(pattern));
        Ok(())
    }

    /// Removes every pattern.
    pub fn clear(&mut self) {
        self.patterns.clear();
        self.by_output.clear();
        self.by_id.clear();
    }

    /// Every pattern with an output matching `signature` under `flags`, in
    /// registration order. Empty when nothing matches.
    #[must_use]
    pub fn get_patterns(
        &self,
        signature: &ItemSignature,
        flags: ComparisonFlags,
    ) -> Vec<&Arc<Pattern>> {
        self.by_output
            .get(&signature.item)
            .map(|indices| {
                indices
                    .iter()
                    .map(|&i| &self.patterns[i])
                    .filter(|p| p.produces(signature, flags))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Looks up a pattern by its stable ID.
    #[must_use]
    pub fn get(&self, id: PatternId) -> Option<&Arc<Pattern>> {
        self.by_id.get(&id).map(|&i| &self.patterns[i])
    }

    /// Registration position of a pattern, used as the selection tie-break.
    #[must_use]
    pub fn position(&self, id: PatternId) -> Option<usize> {
        self.by_id.get(&id).copied()
    }

    /// Checks if a pattern ID is registered.
    #[must_use]
    pub fn contains(&self, id: PatternId) -> bool {
        self.by_id.contains_key(&id)
    }

    /// All patterns in registration order.
    #[must_use]
    pub fn patterns(&self) -> &[Arc<Pattern>] {
        &self.patterns
    }

    /// Returns the number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Checks if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Checks whether any pattern produces `signature` under the default flags.
#[must_use]
pub fn has_pattern(registry: &PatternRegistry, signature: &ItemSignature) -> bool {
    !registry
        .get_patterns(signature, ComparisonFlags::DEFAULT)
        .is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SourceError, SourceResult, StaticPatterns};

    fn pattern(id: u32, output: ItemSignature) -> Pattern {
        Pattern::builder(PatternId::new(id), format!("p{id}"))
            .input(ItemSignature::of(1), 1)
            .output(output, 1)
            .build()
            .expect("valid pattern")
    }

    struct BrokenSource;

    impl PatternSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn load_patterns(&self) -> SourceResult<Vec<Pattern>> {
            Err(SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "gone",
            )))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = PatternRegistry::new();
        registry
            .register(pattern(1, ItemSignature::of(10)))
            .expect("register");
        registry
            .register(pattern(2, ItemSignature::of(10).with_variant(1)))
            .expect("register");

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(PatternId::new(2)));
        assert_eq!(registry.position(PatternId::new(2)), Some(1));

        let exact = registry.get_patterns(&ItemSignature::of(10), ComparisonFlags::DEFAULT);
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].id, PatternId::new(1));

        let loose = registry.get_patterns(&ItemSignature::of(10), ComparisonFlags::NONE);
        let ids: Vec<_> = loose.iter().map(|p| p.id.raw()).collect();
        assert_eq!(ids, vec![1, 2]);

        assert!(registry
            .get_patterns(&ItemSignature::of(99), ComparisonFlags::NONE)
            .is_empty());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = PatternRegistry::new();
        registry
            .register(pattern(1, ItemSignature::of(10)))
            .expect("register");
        let result = registry.register(pattern(1, ItemSignature::of(11)));
        assert_eq!(
            result,
            Err(PatternDefinitionError::Duplicate(PatternId::new(1)))
        );
        assert!(!has_pattern(&registry, &ItemSignature::of(11)));
    }

    #[test]
    fn test_rebuild_replaces_set() {
        let mut registry = PatternRegistry::new();
        let first = StaticPatterns::new("a", vec![pattern(1, ItemSignature::of(10))]);
        registry.rebuild(&[&first]);
        assert!(has_pattern(&registry, &ItemSignature::of(10)));

        let held = Arc::clone(registry.get(PatternId::new(1)).expect("bound"));

        let second = StaticPatterns::new("b", vec![pattern(2, ItemSignature::of(20))]);
        let report = registry.rebuild(&[&second]);

        assert_eq!(report.registered, 1);
        assert!(!has_pattern(&registry, &ItemSignature::of(10)));
        assert!(has_pattern(&registry, &ItemSignature::of(20)));
        // Previously handed out patterns stay valid
        assert_eq!(held.id, PatternId::new(1));
    }

    #[test]
    fn test_rebuild_survives_failing_source() {
        let mut registry = PatternRegistry::new();
        let good = StaticPatterns::new("good", vec![pattern(1, ItemSignature::of(10))]);
        let report = registry.rebuild(&[&BrokenSource, &good]);

        assert_eq!(report.failed_sources, 1);
        assert_eq!(report.registered, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rebuild_counts_rejections() {
        let mut invalid = pattern(3, ItemSignature::of(30));
        invalid.outputs.clear();
        let source = StaticPatterns::new(
            "mixed",
            vec![
                pattern(1, ItemSignature::of(10)),
                pattern(1, ItemSignature::of(11)),
                invalid,
            ],
        );

        let mut registry = PatternRegistry::new();
        let report = registry.rebuild(&[&source]);
        assert_eq!(report.registered, 1);
        assert_eq!(report.rejected, 2);
    }
}
