use boxfish_core::*;
use std::sync::Arc;

fn main() {
    println!("Boxfish: first run\n");

    let config = EngineConfig::default();
    init_tracing(&config.logging).unwrap();

    // Step 1: a run with three nodes and two links between them
    let mut run = Run::new("torus");
    run.add_table(
        Table::new(
            "nodes",
            "torus",
            SubDomainKind::Node,
            "nodeid",
            vec![1, 2, 3],
            vec![("flops".to_string(), Column::Float(vec![1.5, 2.0, 0.5]))],
        )
        .unwrap(),
    )
    .unwrap();
    run.add_table(
        Table::new(
            "links",
            "torus",
            SubDomainKind::Link,
            "linkid",
            vec![10, 11],
            vec![("bytes".to_string(), Column::Int(vec![4096, 1024]))],
        )
        .unwrap(),
    )
    .unwrap();
    run.add_projection(Projection::general(GeneralProjection::new(
        SubDomainKind::Link,
        SubDomainKind::Node,
        vec![(10, 1), (10, 2), (11, 2), (11, 3)],
    )));

    let mut catalog = Catalog::new();
    catalog.add_run(run);
    let catalog = Arc::new(catalog);
    println!("Loaded run 'torus' with tables nodes and links\n");

    // Step 2: a filter node with a plot below it
    let mut tree = ConsumerTree::new(catalog.clone(), config).unwrap();
    let root = tree.add_root("filter", "filter");
    let plot = tree.add_child(root, "link plot", "plot").unwrap();
    tree.add_request(plot, "traffic").unwrap();
    let bytes = catalog.find_index("torus", "links", "bytes").unwrap();
    tree.set_request_indices(plot, "traffic", vec![bytes]).unwrap();

    // Step 3: link traffic summed onto the nodes
    let nodes = catalog.run("torus").unwrap().table("nodes").unwrap().clone();
    let result = tree.aggregate_domain(plot, "traffic", &nodes).unwrap().unwrap();
    println!("Bytes per node:");
    for (id, value) in result.ids.iter().zip(&result.values) {
        println!("   node {}: {}", id, value);
    }

    // Step 4: the root filter drops link 11
    tree.set_filter(root, Some(Filter::exclude([11]))).unwrap();
    let result = tree.aggregate_domain(plot, "traffic", &nodes).unwrap().unwrap();
    println!("\nBytes per node without link 11:");
    for (id, value) in result.ids.iter().zip(&result.values) {
        println!("   node {}: {}", id, value);
    }

    // Step 5: share the data range with the rest of the tree
    let range = tree.refresh_request_range(plot, "traffic").unwrap();
    println!("\nColor range for bytes: {:?}", range);

    println!("\nEvents: {:?}", tree.drain_events());
}
