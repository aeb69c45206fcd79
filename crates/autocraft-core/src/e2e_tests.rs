//! End-to-end tests for the crafting manager.
//!
//! These drive a manager against an in-memory network the way a host would:
//! rebuild patterns, issue requests, deliver items, and tick.

#![cfg(test)]

use std::sync::Arc;

use crate::prelude::*;

fn pattern(id: u32, inputs: &[(u32, u32)], outputs: &[(ItemSignature, u32)]) -> Pattern {
    let mut builder = Pattern::builder(PatternId::new(id), format!("pattern {id}"));
    for (item, quantity) in inputs {
        builder = builder.input(ItemSignature::of(*item), *quantity);
    }
    for (signature, quantity) in outputs {
        builder = builder.output(signature.clone(), *quantity);
    }
    builder.build().expect("valid pattern")
}

fn setup(patterns: Vec<Pattern>) -> (CraftingManager, NetworkStorage) {
    let mut manager = CraftingManager::default();
    let mut network = NetworkStorage::default();
    let report = manager.rebuild(&[&StaticPatterns::new("test", patterns)], &mut network);
    assert_eq!(report.rejected, 0);
    manager.drain_events();
    (manager, network)
}

/// Request handling and task lifecycle
mod lifecycle_tests {
    use super::*;

    #[test]
    fn e2e_repeated_request_returns_same_task() {
        let (mut manager, network) =
            setup(vec![pattern(1, &[(1, 1)], &[(ItemSignature::of(2), 4)])]);

        let first = manager.schedule(&ItemSignature::of(2), 4, ComparisonFlags::DEFAULT, &network);
        let second = manager.schedule(&ItemSignature::of(2), 4, ComparisonFlags::DEFAULT, &network);

        assert!(first.is_some());
        assert_eq!(first, second, "Matching active task should be reused");
        assert_eq!(manager.tasks().len(), 1);
    }

    #[test]
    fn e2e_cancel_removes_task_immediately() {
        let (mut manager, mut network) =
            setup(vec![pattern(1, &[(1, 1)], &[(ItemSignature::of(2), 4)])]);

        let id = manager
            .schedule(&ItemSignature::of(2), 4, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        assert!(manager.cancel(id, &mut network));
        assert!(manager.task(id).is_none(), "Cancelled task should be gone");

        // Later deliveries go nowhere
        assert_eq!(manager.track(&ItemSignature::of(1), 1), 1);
    }

    #[test]
    fn e2e_tracked_delivery_completes_next_update() {
        let (mut manager, mut network) =
            setup(vec![pattern(1, &[(5, 5)], &[(ItemSignature::of(6), 1)])]);

        let id = manager
            .schedule(&ItemSignature::of(6), 1, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        assert_eq!(manager.track(&ItemSignature::of(5), 5), 0);

        let summary = manager.update(&mut network);
        assert_eq!(summary.completed, 1);
        assert!(manager.task(id).is_none());
        assert_eq!(network.count(&ItemSignature::of(6)), 1);
        assert!(manager
            .drain_events()
            .iter()
            .any(|e| matches!(e, CraftingEvent::TaskCompleted { task_id, .. } if *task_id == id)));
    }

    #[test]
    fn e2e_tasks_run_in_scheduling_order() {
        let (mut manager, mut network) = setup(vec![
            pattern(1, &[(1, 1)], &[(ItemSignature::of(10), 1)]),
            pattern(2, &[(1, 1)], &[(ItemSignature::of(11), 1)]),
        ]);

        let first = manager
            .schedule(&ItemSignature::of(10), 1, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        let second = manager
            .schedule(&ItemSignature::of(11), 1, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        assert_eq!(manager.tasks()[0].id(), first);
        assert_eq!(manager.tasks()[1].id(), second);

        // One shared ingredient: the earlier task gets it
        network.add(&ItemSignature::of(1), 1).expect("add");
        manager.update(&mut network);

        assert!(manager.task(first).is_none());
        assert!(manager.task(second).is_some());
        assert_eq!(network.count(&ItemSignature::of(10)), 1);
        assert_eq!(network.count(&ItemSignature::of(11)), 0);
    }

    #[test]
    fn e2e_track_fills_tasks_in_order() {
        let (mut manager, network) = setup(vec![
            pattern(1, &[(1, 2)], &[(ItemSignature::of(10), 1)]),
            pattern(2, &[(1, 2)], &[(ItemSignature::of(11), 1)]),
        ]);
        let first = manager
            .schedule(&ItemSignature::of(10), 1, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        let second = manager
            .schedule(&ItemSignature::of(11), 1, ComparisonFlags::DEFAULT, &network)
            .expect("task");

        assert_eq!(manager.track(&ItemSignature::of(1), 3), 0);
        assert!(manager.task(first).is_some_and(CraftingTask::is_gathered));
        assert_eq!(manager.task(second).map(|t| t.slots()[0].gathered()), Some(1));
    }

    #[test]
    fn e2e_overflow_is_reported() {
        let mut manager = CraftingManager::default();
        // Room for one distinct stack
        let mut network = NetworkStorage::new(1);
        let saw = pattern(
            1,
            &[(1, 1)],
            &[(ItemSignature::of(2), 4), (ItemSignature::of(3), 1)],
        );
        manager.rebuild(&[&StaticPatterns::new("test", vec![saw])], &mut network);

        network.add(&ItemSignature::of(1), 1).expect("add");
        let id = manager
            .schedule(&ItemSignature::of(2), 4, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        manager.update(&mut network);

        assert_eq!(network.count(&ItemSignature::of(2)), 4);
        assert!(manager.drain_events().contains(&CraftingEvent::OutputOverflow {
            task_id: id,
            rejected: ItemStack::of(3, 1),
        }));
    }
}

/// Pattern selection against storage contents
mod selection_tests {
    use super::*;

    #[test]
    fn e2e_scarcer_variant_is_selected() {
        let plain = ItemSignature::of(42);
        let tinted =
            ItemSignature::of(42).with_metadata(Metadata::new().with("tint", MetaValue::Int(3)));
        let (manager, mut network) = setup(vec![
            pattern(1, &[(1, 1)], &[(plain.clone(), 1)]),
            pattern(2, &[(1, 1)], &[(tinted, 1)]),
        ]);
        network.add(&plain, 10).expect("add");

        let chosen = manager
            .get_pattern(&ItemSignature::of(42), ComparisonFlags::NONE, &network)
            .expect("pattern");
        assert_eq!(chosen.id, PatternId::new(2));
    }

    #[test]
    fn e2e_equal_stock_prefers_first_registered() {
        let (manager, network) = setup(vec![
            pattern(5, &[(1, 1)], &[(ItemSignature::of(42).with_variant(1), 1)]),
            pattern(4, &[(1, 1)], &[(ItemSignature::of(42).with_variant(2), 1)]),
        ]);

        let chosen = manager
            .get_pattern(&ItemSignature::of(42), ComparisonFlags::NONE, &network)
            .expect("pattern");
        assert_eq!(chosen.id, PatternId::new(5));
        assert_eq!(
            manager
                .get_patterns(&ItemSignature::of(42), ComparisonFlags::NONE)
                .len(),
            2
        );
    }

    #[test]
    fn e2e_scheduled_task_uses_selected_pattern() {
        let plain = ItemSignature::of(42);
        let tinted = ItemSignature::of(42).with_variant(7);
        let (mut manager, mut network) = setup(vec![
            pattern(1, &[(1, 1)], &[(plain.clone(), 1)]),
            pattern(2, &[(1, 1)], &[(tinted, 1)]),
        ]);
        network.add(&plain, 10).expect("add");

        let id = manager
            .schedule(&ItemSignature::of(42), 1, ComparisonFlags::NONE, &network)
            .expect("task");
        assert_eq!(
            manager.task(id).map(|t| t.pattern().id),
            Some(PatternId::new(2))
        );
    }
}

/// Sub-task chains
mod chain_tests {
    use super::*;

    #[test]
    fn e2e_three_level_chain_with_craft_time() {
        // ore -> ingot (2 ticks) -> plate -> gear
        let ingot = Pattern::builder(PatternId::new(1), "Ingot")
            .input(ItemSignature::of(1), 1)
            .output(ItemSignature::of(2), 1)
            .craft_time(2)
            .build()
            .expect("valid pattern");
        let plate = pattern(2, &[(2, 2)], &[(ItemSignature::of(3), 1)]);
        let gear = pattern(3, &[(3, 1)], &[(ItemSignature::of(4), 1)]);
        let (mut manager, mut network) = setup(vec![ingot, plate, gear]);
        network.add(&ItemSignature::of(1), 2).expect("add");

        let root = manager
            .schedule(&ItemSignature::of(4), 1, ComparisonFlags::DEFAULT, &network)
            .expect("task");

        let mut ticks = 0;
        while manager.task(root).is_some() {
            manager.update(&mut network);
            ticks += 1;
            assert!(ticks < 20, "Chain should finish");
        }

        assert!(manager.tasks().is_empty());
        assert_eq!(network.count(&ItemSignature::of(4)), 1);
        assert_eq!(network.count(&ItemSignature::of(1)), 0);
        assert_eq!(network.count(&ItemSignature::of(2)), 0);
        assert_eq!(network.count(&ItemSignature::of(3)), 0);

        let scheduled: Vec<_> = manager
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                CraftingEvent::TaskScheduled { parent, .. } => Some(parent),
                _ => None,
            })
            .collect();
        assert_eq!(scheduled.len(), 3);
        assert_eq!(scheduled[0], None);
        assert!(scheduled[1..].iter().all(Option::is_some));
    }

    #[test]
    fn e2e_subtasks_disabled_waits_for_deliveries() {
        let config = ManagerConfig {
            spawn_subtasks: false,
            ..ManagerConfig::default()
        };
        let mut manager = CraftingManager::new(config);
        let mut network = NetworkStorage::default();
        let patterns = vec![
            pattern(1, &[(1, 1)], &[(ItemSignature::of(2), 1)]),
            pattern(2, &[(2, 1)], &[(ItemSignature::of(3), 1)]),
        ];
        manager.rebuild(&[&StaticPatterns::new("test", patterns)], &mut network);

        manager.schedule(&ItemSignature::of(3), 1, ComparisonFlags::DEFAULT, &network);
        manager.update(&mut network);
        assert_eq!(manager.tasks().len(), 1);

        manager.track(&ItemSignature::of(2), 1);
        assert_eq!(manager.update(&mut network).completed, 1);
    }
}

/// Saving and loading
mod persistence_tests {
    use super::*;

    #[test]
    fn e2e_document_roundtrip_drops_unknown_patterns() {
        let planks = pattern(1, &[(1, 1)], &[(ItemSignature::of(2), 4)]);
        let glass = pattern(2, &[(5, 1)], &[(ItemSignature::of(6), 1)]);
        let (mut source, network) = setup(vec![planks.clone(), glass]);

        let kept = source
            .schedule(&ItemSignature::of(2), 8, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        source
            .schedule(&ItemSignature::of(6), 2, ComparisonFlags::DEFAULT, &network)
            .expect("task");
        source.track(&ItemSignature::of(1), 1);
        source.track(&ItemSignature::of(5), 1);

        let document = source.write_document().expect("document");

        let (mut target, _) = setup(vec![planks]);
        let report = target.read_document(&document).expect("read");

        assert_eq!(report.restored, 1);
        assert_eq!(report.dropped_unknown_pattern, 1);
        assert_eq!(report.returned_items, vec![ItemStack::of(5, 1)]);
        assert_eq!(target.tasks().len(), 1);
        assert_eq!(target.tasks()[0].id(), kept);
        assert_eq!(target.tasks()[0].slots()[0].gathered(), 1);
    }

    #[test]
    fn e2e_restored_task_finishes() {
        let planks = pattern(1, &[(1, 1)], &[(ItemSignature::of(2), 4)]);
        let (mut source, network) = setup(vec![planks.clone()]);
        source.schedule(&ItemSignature::of(2), 4, ComparisonFlags::DEFAULT, &network);

        let bytes = source.snapshot().to_bytes().expect("serialize");

        let (mut target, mut network) = setup(vec![planks]);
        target.restore(ManagerSnapshot::from_bytes(&bytes).expect("deserialize"));
        network.add(&ItemSignature::of(1), 1).expect("add");

        assert_eq!(target.update(&mut network).completed, 1);
        assert_eq!(network.count(&ItemSignature::of(2)), 4);
    }

    #[test]
    fn e2e_restore_rebinds_to_current_definition() {
        let old = pattern(1, &[(1, 1)], &[(ItemSignature::of(2), 4)]);
        let (mut source, network) = setup(vec![old]);
        source.schedule(&ItemSignature::of(2), 8, ComparisonFlags::DEFAULT, &network);

        // Same ID now yields 8 per craft
        let new = pattern(1, &[(1, 1)], &[(ItemSignature::of(2), 8)]);
        let (mut target, _) = setup(vec![new]);
        target.restore(source.snapshot());

        let task = &target.tasks()[0];
        assert_eq!(task.crafts(), 1);
        assert!(Arc::ptr_eq(task.pattern(), &target.patterns()[0]));
    }
}
