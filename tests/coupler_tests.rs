//! Coupler Chain Tests
//!
//! Filters installed on consumer nodes reach every request below them,
//! root first, and follow the tree as it changes.

use boxfish_core::*;
use proptest::prelude::*;
use std::sync::Arc;

fn setup_catalog(ids: Vec<Id>) -> Arc<Catalog> {
    let values = ids.iter().map(|id| id * 10).collect();
    let mut run = Run::new("run0");
    run.add_table(
        Table::new(
            "nodes",
            "run0",
            SubDomainKind::Node,
            "nodeid",
            ids,
            vec![("x".to_string(), Column::Int(values))],
        )
        .unwrap(),
    )
    .unwrap();

    let mut catalog = Catalog::new();
    catalog.add_run(run);
    Arc::new(catalog)
}

fn add_request(tree: &mut ConsumerTree, node: NodeId) {
    let index = tree.catalog().find_index("run0", "nodes", "x").unwrap();
    tree.add_request(node, "req").unwrap();
    tree.set_request_indices(node, "req", vec![index]).unwrap();
}

fn filtered_ids(tree: &ConsumerTree, node: NodeId) -> Vec<Id> {
    tree.rows(node, "req").unwrap().unwrap()[0].ids.clone()
}

#[test]
fn test_root_filter_reaches_child_request() {
    let mut tree = ConsumerTree::new(setup_catalog(vec![1, 2, 3]), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let child = tree.add_child(root, "plot", "plot").unwrap();
    add_request(&mut tree, child);

    tree.set_filter(root, Some(Filter::exclude([2]))).unwrap();

    let chain = tree.chain(child, "req").unwrap();
    let root_filter = tree.node(root).unwrap().filter().unwrap();
    assert_eq!(chain.len(), 1);
    assert!(Arc::ptr_eq(&chain.filters()[0], root_filter));
    assert_eq!(filtered_ids(&tree, child), vec![1, 3]);
}

#[test]
fn test_filter_change_notifies_request_owner() {
    let mut tree = ConsumerTree::new(setup_catalog(vec![1, 2, 3]), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let child = tree.add_child(root, "plot", "plot").unwrap();
    add_request(&mut tree, child);
    tree.drain_events();

    tree.set_filter(root, Some(Filter::keep([3]))).unwrap();
    assert_eq!(
        tree.drain_events(),
        vec![ConsumerEvent::CouplerChanged {
            node: child,
            request: "req".to_string()
        }]
    );

    tree.set_filter(root, None).unwrap();
    assert_eq!(filtered_ids(&tree, child), vec![1, 2, 3]);
}

#[test]
fn test_ancestor_filter_applies_before_own_filter() {
    let mut tree = ConsumerTree::new(setup_catalog(vec![1, 2, 3, 4]), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let child = tree.add_child(root, "plot", "plot").unwrap();
    add_request(&mut tree, child);

    tree.set_filter(child, Some(Filter::custom("first two", |_, ids| ids.iter().take(2).copied().collect())))
        .unwrap();
    tree.set_filter(root, Some(Filter::exclude([1]))).unwrap();

    // root drops 1, then the child keeps the first two of what is left
    assert_eq!(filtered_ids(&tree, child), vec![2, 3]);
}

#[test]
fn test_remove_request_tears_down_chain() {
    let mut tree = ConsumerTree::new(setup_catalog(vec![1, 2, 3]), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let child = tree.add_child(root, "plot", "plot").unwrap();
    add_request(&mut tree, child);
    assert_eq!(tree.couplers().len(), 2);
    assert_eq!(tree.node(root).unwrap().couplers().len(), 1);
    tree.drain_events();

    tree.remove_request(child, "req").unwrap();

    assert!(tree.couplers().is_empty());
    assert!(tree.node(root).unwrap().couplers().is_empty());
    assert!(tree.request(child, "req").unwrap_err().is_not_found());
    let deleted = tree
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, ConsumerEvent::CouplerDeleted { .. }))
        .count();
    assert_eq!(deleted, 2);
}

#[test]
fn test_remove_node_drops_subtree_couplers() {
    let mut tree = ConsumerTree::new(setup_catalog(vec![1, 2, 3]), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let mid = tree.add_child(root, "mid", "filter").unwrap();
    let leaf = tree.add_child(mid, "plot", "plot").unwrap();
    add_request(&mut tree, leaf);
    add_request(&mut tree, root);
    assert_eq!(tree.couplers().len(), 4);

    tree.remove_node(mid).unwrap();

    assert_eq!(tree.len(), 1);
    assert!(tree.node(leaf).is_err());
    assert!(tree.node(root).unwrap().children().is_empty());
    assert_eq!(tree.couplers().len(), 1);
    assert_eq!(tree.node(root).unwrap().couplers().len(), 1);
}

#[test]
fn test_reparent_rebuilds_chain() {
    let mut tree = ConsumerTree::new(setup_catalog(vec![1, 2, 3]), EngineConfig::default()).unwrap();
    let left = tree.add_root("left", "filter");
    let right = tree.add_root("right", "filter");
    let plot = tree.add_child(left, "plot", "plot").unwrap();
    add_request(&mut tree, plot);
    tree.set_filter(left, Some(Filter::exclude([1]))).unwrap();
    tree.set_filter(right, Some(Filter::exclude([3]))).unwrap();
    assert_eq!(filtered_ids(&tree, plot), vec![2, 3]);

    tree.reparent(plot, Some(right)).unwrap();

    assert_eq!(filtered_ids(&tree, plot), vec![1, 2]);
    assert!(tree.node(left).unwrap().couplers().is_empty());
    assert_eq!(tree.node(right).unwrap().couplers().len(), 1);

    tree.reparent(plot, None).unwrap();
    assert!(tree.chain(plot, "req").unwrap().is_empty());
    assert_eq!(tree.couplers().len(), 1);
}

#[test]
fn test_rewiring_reuses_coupler_slots() {
    let mut tree = ConsumerTree::new(setup_catalog(vec![1, 2, 3]), EngineConfig::default()).unwrap();
    let left = tree.add_root("left", "filter");
    let right = tree.add_root("right", "filter");
    let plot = tree.add_child(left, "plot", "plot").unwrap();
    add_request(&mut tree, plot);
    tree.set_filter(right, Some(Filter::exclude([2]))).unwrap();
    let allocated = tree.couplers().capacity();

    for i in 0..100 {
        let parent = if i % 2 == 0 { right } else { left };
        tree.reparent(plot, Some(parent)).unwrap();
        add_request(&mut tree, plot);
    }

    assert_eq!(tree.couplers().len(), 2);
    assert_eq!(tree.couplers().capacity(), allocated);
    assert_eq!(filtered_ids(&tree, plot), vec![1, 2, 3]);
}

#[test]
fn test_removed_node_slots_are_reused() {
    let mut tree = ConsumerTree::new(setup_catalog(vec![1, 2, 3]), EngineConfig::default()).unwrap();
    let root = tree.add_root("root", "filter");
    let mid = tree.add_child(root, "mid", "filter").unwrap();
    tree.add_child(mid, "plot", "plot").unwrap();
    assert_eq!(tree.len(), 3);

    tree.remove_node(mid).unwrap();
    assert_eq!(tree.len(), 1);

    let again = tree.add_child(root, "mid", "filter").unwrap();
    let leaf = tree.add_child(again, "plot", "plot").unwrap();
    add_request(&mut tree, leaf);
    tree.set_filter(root, Some(Filter::exclude([3]))).unwrap();

    assert_eq!(tree.len(), 3);
    assert!(again.0 < 3 && leaf.0 < 3);
    assert_eq!(tree.node(root).unwrap().children(), &[again]);
    assert_eq!(filtered_ids(&tree, leaf), vec![1, 2]);
}

proptest! {
    #[test]
    fn prop_chain_is_present_filters_root_first(
        levels in prop::collection::vec(
            prop::option::of(prop::collection::hash_set(0i64..10, 0..4)),
            1..6,
        )
    ) {
        let mut tree = ConsumerTree::new(setup_catalog((0..10).collect()), EngineConfig::default()).unwrap();
        let mut nodes = vec![tree.add_root("n0", "filter")];
        for i in 1..levels.len() {
            let parent = nodes[i - 1];
            nodes.push(tree.add_child(parent, &format!("n{}", i), "filter").unwrap());
        }
        let leaf = *nodes.last().unwrap();
        add_request(&mut tree, leaf);

        for (node, excluded) in nodes.iter().zip(&levels) {
            let filter = excluded.clone().map(Filter::Exclude);
            tree.set_filter(*node, filter).unwrap();
        }

        let expected: Vec<Arc<Filter>> = nodes
            .iter()
            .filter_map(|n| tree.node(*n).unwrap().filter().cloned())
            .collect();
        let chain = tree.chain(leaf, "req").unwrap();
        prop_assert!(chain.same_as(&ModifierChain::from_iter(expected)));

        let mut remaining: Vec<Id> = (0..10).collect();
        for excluded in levels.iter().flatten() {
            remaining.retain(|id| !excluded.contains(id));
        }
        prop_assert_eq!(filtered_ids(&tree, leaf), remaining);
    }
}
