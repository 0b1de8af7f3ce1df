//! Scene Propagation Tests
//!
//! Attribute range unions at turn-around points, merge idempotence,
//! the propagate-flag frontier and pruning of stale attribute scenes.

use boxfish_core::*;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

fn setup_catalog() -> Arc<Catalog> {
    let mut run = Run::new("run0");
    run.add_table(
        Table::new(
            "ranks",
            "run0",
            SubDomainKind::Rank,
            "rank",
            vec![0, 1, 2],
            vec![
                ("A".to_string(), Column::Float(vec![0.5, 1.5, 2.5])),
                ("B".to_string(), Column::Int(vec![7, 8, 9])),
            ],
        )
        .unwrap(),
    )
    .unwrap();

    let mut catalog = Catalog::new();
    catalog.add_run(run);
    Arc::new(catalog)
}

fn attrs(names: &[&str]) -> AttributeSet {
    names.iter().copied().collect()
}

fn request_on(tree: &mut ConsumerTree, node: NodeId, attribute: &str) {
    let index = tree.catalog().find_index("run0", "ranks", attribute).unwrap();
    tree.add_request(node, "req").unwrap();
    tree.set_request_indices(node, "req", vec![index]).unwrap();
}

/// Root that stops attribute propagation, with three plots requesting "A"
fn setup_three_plots() -> (ConsumerTree, NodeId, Vec<NodeId>) {
    let mut tree = ConsumerTree::new(setup_catalog(), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    tree.set_propagate(root, SceneKind::Attribute, false).unwrap();
    let plots: Vec<NodeId> = (0..3)
        .map(|i| tree.add_child(root, &format!("plot{}", i), "plot").unwrap())
        .collect();
    for plot in &plots {
        request_on(&mut tree, *plot, "A");
    }
    (tree, root, plots)
}

#[test]
fn test_turn_around_unions_subtree_ranges() {
    let (mut tree, root, plots) = setup_three_plots();
    tree.set_request_range(plots[0], "req", Some(Range::new(0.0, 10.0))).unwrap();
    tree.set_request_range(plots[1], "req", Some(Range::new(5.0, 20.0))).unwrap();
    tree.set_request_range(plots[2], "req", Some(Range::new(-5.0, 3.0))).unwrap();

    let total = Some(Range::new(-5.0, 20.0));
    assert_eq!(tree.union_ranges(root, &attrs(&["A"])).unwrap(), total);
    assert_eq!(tree.node(root).unwrap().attribute_scene(&attrs(&["A"])).unwrap().total_range, total);
    for plot in &plots {
        let scene = tree.request(*plot, "req").unwrap().scene();
        assert_eq!(scene.total_range, total);
    }
    // local ranges stay with their requests
    assert_eq!(
        tree.request(plots[1], "req").unwrap().scene().local_range,
        Some(Range::new(5.0, 20.0))
    );
}

#[test]
fn test_merging_same_scene_does_not_signal() {
    let (mut tree, _, plots) = setup_three_plots();
    tree.set_request_range(plots[0], "req", Some(Range::new(0.0, 10.0))).unwrap();
    tree.set_request_range(plots[1], "req", Some(Range::new(-1.0, 1.0))).unwrap();
    tree.drain_events();

    let current = tree.request(plots[0], "req").unwrap().scene().clone();
    tree.set_request_color_map(plots[0], "req", &current.color_map, current.use_total_range)
        .unwrap();

    let changed: Vec<_> = tree
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ConsumerEvent::AttributeSceneChanged { .. }))
        .collect();
    assert!(changed.is_empty(), "unexpected changes: {:?}", changed);
}

#[test]
fn test_color_map_change_reaches_related_requests() {
    let (mut tree, _, plots) = setup_three_plots();
    tree.drain_events();

    tree.set_request_color_map(plots[2], "req", "inferno", true).unwrap();

    for plot in &plots {
        let scene = tree.request(*plot, "req").unwrap().scene();
        assert_eq!(scene.color_map, "inferno");
        assert!(scene.use_total_range);
    }
    let changed = tree
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ConsumerEvent::AttributeSceneChanged { .. }))
        .count();
    assert_eq!(changed, 2, "the publishing request already holds the scene");
}

#[test]
fn test_apply_flag_blocks_attribute_scene() {
    let (mut tree, _, plots) = setup_three_plots();
    tree.set_apply(plots[1], SceneKind::Attribute, false).unwrap();

    tree.set_request_color_map(plots[0], "req", "magma", false).unwrap();

    assert_eq!(tree.request(plots[1], "req").unwrap().scene().color_map, "viridis");
    assert_eq!(tree.request(plots[2], "req").unwrap().scene().color_map, "magma");
    // stored even when not applied
    assert!(tree.node(plots[1]).unwrap().attribute_scene(&attrs(&["A"])).is_some());
}

#[test]
fn test_unused_attribute_scenes_are_pruned() {
    let mut tree = ConsumerTree::new(setup_catalog(), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let plot = tree.add_child(root, "plot", "plot").unwrap();
    request_on(&mut tree, plot, "A");

    tree.refresh_request_range(plot, "req").unwrap();
    assert!(tree.node(root).unwrap().attribute_scene(&attrs(&["A"])).is_some());

    let index = tree.catalog().find_index("run0", "ranks", "B").unwrap();
    tree.set_request_indices(plot, "req", vec![index]).unwrap();
    let range = tree.refresh_request_range(plot, "req").unwrap();
    assert_eq!(range, Some(Range::new(7.0, 9.0)));

    for node in [root, plot] {
        let keys: Vec<AttributeSet> = tree.node(node).unwrap().attribute_scene_keys().cloned().collect();
        assert_eq!(keys, vec![attrs(&["B"])]);
    }
}

#[test]
fn test_module_scene_stored_everywhere_applied_by_type() {
    let mut tree = ConsumerTree::new(setup_catalog(), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let torus = tree.add_child(root, "torus", "3d").unwrap();
    let other = tree.add_child(root, "other torus", "3d").unwrap();
    tree.set_apply(other, SceneKind::Module, false).unwrap();

    let scene = ModuleScene::new("3d", json!({"rotation": [0, 45, 0]}));
    tree.publish_module_scene(torus, scene.clone()).unwrap();

    assert_eq!(tree.node(other).unwrap().module_scene("3d"), Some(&scene));
    assert_eq!(
        tree.drain_events(),
        vec![ConsumerEvent::ModuleSceneReceived {
            node: torus,
            module: "3d".to_string()
        }]
    );
}

#[test]
fn test_reparent_under_propagating_parent_forces_flags() {
    let mut tree = ConsumerTree::new(setup_catalog(), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let loose = tree.add_root("loose", "filter");
    tree.set_propagate(loose, SceneKind::Highlight, false).unwrap();

    tree.reparent(loose, Some(root)).unwrap();
    assert!(tree.node(loose).unwrap().scene_flags(SceneKind::Highlight).propagate);
}

#[derive(Debug, Clone)]
enum FlagOp {
    Set(usize, bool),
    Reparent(usize, usize),
}

fn flag_ops() -> impl Strategy<Value = Vec<FlagOp>> {
    prop::collection::vec(
        prop_oneof![
            (0usize..8, any::<bool>()).prop_map(|(n, v)| FlagOp::Set(n, v)),
            (0usize..8, 0usize..8).prop_map(|(n, p)| FlagOp::Reparent(n, p)),
        ],
        0..40,
    )
}

proptest! {
    #[test]
    fn prop_propagation_frontier_is_monotone(
        parents in prop::collection::vec(0usize..8, 7),
        ops in flag_ops(),
    ) {
        let mut tree = ConsumerTree::new(setup_catalog(), EngineConfig::default()).unwrap();
        let mut nodes = vec![tree.add_root("n0", "filter")];
        for (i, parent) in parents.iter().enumerate() {
            let parent = nodes[parent % nodes.len()];
            nodes.push(tree.add_child(parent, &format!("n{}", i + 1), "plot").unwrap());
        }

        for op in ops {
            // rejected operations must leave the invariant intact too
            let _ = match op {
                FlagOp::Set(n, v) => tree.set_propagate(nodes[n], SceneKind::Attribute, v),
                FlagOp::Reparent(n, p) => tree.reparent(nodes[n], Some(nodes[p])),
            };

            for node in &nodes {
                let node = tree.node(*node).unwrap();
                if let Some(parent) = node.parent() {
                    let parent_flag = tree.node(parent).unwrap().scene_flags(SceneKind::Attribute).propagate;
                    prop_assert!(!parent_flag || node.scene_flags(SceneKind::Attribute).propagate);
                }
            }
        }
    }
}
