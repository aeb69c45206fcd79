//! # Autocraft Core
//!
//! Autocrafting engine for item networks.
//!
//! This crate provides:
//! - Item signatures and comparison flags
//! - Crafting patterns and pattern sources (static, TOML/RON directories)
//! - Pattern registry indexed by output item
//! - Pattern selection by output scarcity
//! - Crafting tasks with sub-task requests for missing ingredients
//! - Crafting manager driving tasks once per tick
//! - Task persistence (JSON document and binary snapshot)
//! - Event bus for task lifecycle events

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod events;
pub mod inventory;
pub mod manager;
pub mod pattern;
pub mod persistence;
pub mod registry;
pub mod selector;
pub mod shared;
pub mod signature;
pub mod source;
pub mod task;

mod e2e_tests;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::*;
    pub use crate::events::*;
    pub use crate::inventory::*;
    pub use crate::manager::*;
    pub use crate::pattern::*;
    pub use crate::persistence::*;
    pub use crate::registry::*;
    pub use crate::selector::*;
    pub use crate::shared::*;
    pub use crate::signature::*;
    pub use crate::source::*;
    pub use crate::task::*;
    pub use autocraft_common::prelude::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prelude_covers_manager_workflow() {
        let mut manager = CraftingManager::default();
        let mut network = NetworkStorage::default();
        let pattern = Pattern::builder(PatternId::new(1), "Torch")
            .input(ItemSignature::of(1), 1)
            .input(ItemSignature::of(2), 1)
            .output(ItemSignature::of(3), 4)
            .build()
            .expect("valid pattern");
        manager.rebuild(&[&StaticPatterns::new("test", vec![pattern])], &mut network);

        assert!(manager.has_pattern(&ItemSignature::of(3)));
        assert!(!manager.has_pattern(&ItemSignature::of(1)));

        network.add(&ItemSignature::of(1), 2).expect("add");
        network.add(&ItemSignature::of(2), 2).expect("add");
        let id = manager
            .schedule(&ItemSignature::of(3), 8, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        assert!(id.is_valid());

        let summary = manager.update(&mut network);
        assert_eq!(summary.completed, 1);
        assert_eq!(network.count(&ItemSignature::of(3)), 8);
    }
}
