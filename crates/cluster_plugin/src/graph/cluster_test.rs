use super::*;
use crate::constants::INVALID_INDEX;
use crate::error::CorruptionError;
use crate::graph::builder::GraphBuilder;
use crate::graph::edge::Edge as RawEdge;

use rustc_hash::FxHashMap;

fn compiled_square() -> Arc<Cluster> {
  // 4-cycle over points 10, 11, 12, 13 with one diagonal
  let builder = GraphBuilder::new(14);
  builder.insert(
    &[
      RawEdge::new(10, 11),
      RawEdge::new(11, 12),
      RawEdge::new(12, 13),
      RawEdge::new(13, 10),
      RawEdge::new(10, 12),
    ],
    0,
  );
  Arc::new(builder.compile(true).unwrap())
}

#[test]
fn lookup_roundtrips_points() {
  let cluster = compiled_square();
  assert_eq!(cluster.node_count(), 4);
  for point in [10u32, 11, 12, 13] {
    let node = cluster.node_of_point(point).unwrap();
    assert_eq!(cluster.point_of_node(node), Some(point));
  }
  assert_eq!(cluster.node_of_point(9), None);
}

#[test]
fn other_node_crosses_each_edge() {
  let cluster = compiled_square();
  for (index, edge) in cluster.edges().iter().enumerate() {
    let from_start = cluster.other_node(index as u32, edge.start).unwrap();
    let from_end = cluster.other_node(index as u32, edge.end).unwrap();
    assert_eq!(cluster.node_of_point(from_start.point_index), Some(edge.end));
    assert_eq!(cluster.node_of_point(from_end.point_index), Some(edge.start));
  }
  assert!(cluster.other_node(0, 99).is_none());
}

#[test]
fn integrity_passes_for_compiled_cluster() {
  let cluster = compiled_square();
  assert!(cluster.check_integrity().is_ok());
}

#[test]
fn integrity_catches_dangling_edge_endpoint() {
  let nodes = vec![Node::new(0, true)];
  let edges = vec![ClusterEdge::new(0, 5, INVALID_INDEX, true)];
  let mut lookup = FxHashMap::default();
  lookup.insert(0u32, 0u32);

  let cluster = Cluster::new(nodes, edges, lookup);
  assert!(matches!(
    cluster.check_integrity(),
    Err(CorruptionError::EdgeNodeOutOfBounds { edge: 0, node: 5, .. })
  ));
}

#[test]
fn integrity_catches_bad_adjacency_link() {
  let mut node = Node::new(0, true);
  node.adjacency.push(AdjacencyLink::new(0, 9));
  let mut lookup = FxHashMap::default();
  lookup.insert(0u32, 0u32);

  let cluster = Cluster::new(vec![node], Vec::new(), lookup);
  assert!(matches!(
    cluster.check_integrity(),
    Err(CorruptionError::AdjacencyOutOfBounds { node: 0, edge: 9, .. })
  ));
}

#[test]
fn integrity_catches_lookup_mismatch() {
  let nodes = vec![Node::new(3, true)];
  let mut lookup = FxHashMap::default();
  lookup.insert(7u32, 0u32);

  let cluster = Cluster::new(nodes, Vec::new(), lookup);
  assert!(matches!(
    cluster.check_integrity(),
    Err(CorruptionError::LookupMismatch { point: 7, node: 0, .. })
  ));
}

#[test]
fn working_copy_leaves_source_untouched() {
  let cluster = compiled_square();
  let copy = WorkingCopy::new(Arc::clone(&cluster), CopyScope::Full);

  assert!(copy.invalidate_edge(0));
  assert!(copy.invalidate_node(0));

  assert!(!copy.is_edge_valid(0));
  assert!(!copy.is_node_valid(0));
  assert!(cluster.edges()[0].is_valid());
  assert!(cluster.nodes()[0].is_valid());
}

#[test]
fn working_copy_invalidation_flips_once() {
  let cluster = compiled_square();
  let copy = WorkingCopy::new(cluster, CopyScope::Full);

  assert!(copy.invalidate_edge(2));
  assert!(!copy.invalidate_edge(2));
  assert!(!copy.invalidate_edge(99));
}

#[test]
fn working_copy_scope_gates_mutation() {
  let cluster = compiled_square();
  let edges_only = WorkingCopy::new(Arc::clone(&cluster), CopyScope::Edges);
  assert!(edges_only.invalidate_edge(0));
  assert!(!edges_only.invalidate_node(0));
  assert!(edges_only.is_node_valid(0));

  let nodes_only = WorkingCopy::new(cluster, CopyScope::Nodes);
  assert!(nodes_only.invalidate_node(0));
  assert!(!nodes_only.invalidate_edge(0));
  assert!(nodes_only.is_edge_valid(0));
}

#[test]
fn repeated_invalidation_does_not_change_compaction() {
  let cluster = compiled_square();
  let copy = WorkingCopy::new(cluster, CopyScope::Edges);

  copy.invalidate_edge(1);
  let once = copy.valid_edges();
  copy.invalidate_edge(1);
  copy.invalidate_edge(1);
  let many = copy.valid_edges();

  assert_eq!(once, many);
  assert_eq!(once.len(), 4);
}

#[test]
fn cut_copy_rebuilds_into_smaller_cluster() {
  let cluster = compiled_square();
  let copy = WorkingCopy::new(cluster, CopyScope::Full);

  // Cut point 13 out of the square; the triangle 10-11-12 remains.
  let node_13 = copy.cluster().node_of_point(13).unwrap();
  copy.invalidate_node(node_13);

  let survivors = copy.valid_edges();
  assert_eq!(survivors.len(), 3);

  let rebuilt = GraphBuilder::new(14);
  rebuilt.insert(&survivors, 0);
  let consolidated = rebuilt.compile(true).unwrap();
  assert_eq!(consolidated.node_count(), 3);
  assert_eq!(consolidated.edge_count(), 3);
  assert_eq!(consolidated.node_of_point(13), None);
  assert!(consolidated.check_integrity().is_ok());
}

#[test]
fn valid_nodes_reports_point_indices() {
  let cluster = compiled_square();
  let copy = WorkingCopy::new(cluster, CopyScope::Nodes);
  let node_11 = copy.cluster().node_of_point(11).unwrap();
  copy.invalidate_node(node_11);

  assert_eq!(copy.valid_nodes(), vec![10, 12, 13]);
}
