use super::*;
use std::thread;

fn triangle_with_pendant() -> GraphBuilder {
  // 0-1-2 triangle plus a pendant edge 2-3
  let builder = GraphBuilder::new(4);
  builder.insert(
    &[
      Edge::new(0, 1),
      Edge::new(1, 2),
      Edge::new(2, 0),
      Edge::new(2, 3),
    ],
    0,
  );
  builder
}

#[test]
fn insert_collapses_reversed_pairs() {
  let builder = GraphBuilder::new(8);
  let stats = builder.insert(&[Edge::new(2, 5), Edge::new(5, 2)], 0);
  assert_eq!(stats.added, 1);
  assert_eq!(stats.duplicates, 1);
  assert_eq!(builder.edge_count(), 1);
  assert!(builder.contains(2, 5));
  assert!(builder.contains(5, 2));
}

#[test]
fn insert_rejects_loops_and_unknown_points() {
  let builder = GraphBuilder::new(4);
  let stats = builder.insert(&[Edge::new(1, 1), Edge::new(0, 4), Edge::new(9, 2)], 0);
  assert_eq!(stats.added, 0);
  assert_eq!(stats.rejected, 3);
  assert_eq!(builder.edge_count(), 0);
}

#[test]
fn insert_totals_accumulate_and_drain() {
  let builder = GraphBuilder::new(8);
  builder.insert(&[Edge::new(0, 1), Edge::new(1, 0), Edge::new(3, 3)], 0);
  builder.insert(&[Edge::new(1, 2)], 1);

  let totals = builder.insert_totals();
  assert_eq!(
    totals,
    InsertStats {
      added: 2,
      duplicates: 1,
      rejected: 1,
    }
  );
  assert_eq!(builder.take_insert_totals(), totals);
  assert_eq!(builder.insert_totals(), InsertStats::default());
}

#[test]
fn first_insert_wins_attributes_and_source() {
  let builder = GraphBuilder::new(8);
  builder.insert(&[Edge::with_point_index(1, 6, 7)], 1);
  builder.insert(&[Edge::with_point_index(6, 1, 9)], 2);

  assert_eq!(builder.edge_source(1, 6), Some(1));
  let cluster = builder.compile(true).unwrap();
  assert_eq!(cluster.edge_count(), 1);
  assert_eq!(cluster.edges()[0].point_index, 7);
}

#[test]
fn concurrent_inserts_keep_each_pair_once() {
  let num_points = 30u32;
  let builder = GraphBuilder::new(num_points as usize);

  // Every (i, j) pair, i < j. Each worker inserts the full set starting
  // at a different offset and half of them reversed.
  let mut pairs = Vec::new();
  for i in 0..num_points {
    for j in (i + 1)..num_points {
      pairs.push((i, j));
    }
  }
  let unique = pairs.len();

  let totals: Vec<InsertStats> = thread::scope(|scope| {
    let mut workers = Vec::new();
    for worker in 0..8usize {
      let pairs = &pairs;
      let builder = &builder;
      workers.push(scope.spawn(move || {
        let mut stats = InsertStats::default();
        for &(a, b) in pairs.iter() {
          let (a, b) = if worker % 2 == 0 { (a, b) } else { (b, a) };
          stats.absorb(builder.insert(&[Edge::new(a, b)], worker as u32));
        }
        stats
      }));
    }
    workers.into_iter().map(|w| w.join().unwrap()).collect()
  });

  let mut combined = InsertStats::default();
  for stats in totals {
    combined.absorb(stats);
  }
  assert_eq!(builder.edge_count(), unique);
  assert_eq!(combined.added, unique);
  assert_eq!(combined.duplicates, unique * 7);
  assert_eq!(combined.rejected, 0);
}

#[test]
fn compile_collapses_scenario_to_three_edges() {
  let builder = GraphBuilder::new(3);
  builder.insert(
    &[
      Edge::new(0, 1),
      Edge::new(1, 2),
      Edge::new(2, 0),
      Edge::new(1, 0),
    ],
    0,
  );

  let cluster = builder.compile(true).unwrap();
  assert_eq!(cluster.node_count(), 3);
  assert_eq!(cluster.edge_count(), 3);

  let points: Vec<u32> = cluster.nodes().iter().map(|n| n.point_index).collect();
  assert_eq!(points, vec![0, 1, 2]);
}

#[test]
fn compile_is_deterministic_across_insert_orders() {
  let forward = GraphBuilder::new(16);
  let backward = GraphBuilder::new(16);
  let mut edges = Vec::new();
  for i in 0..15u32 {
    edges.push(Edge::new(i, i + 1));
    edges.push(Edge::new(i, (i + 3) % 16));
  }
  forward.insert(&edges, 0);
  let reversed: Vec<Edge> = edges
    .iter()
    .rev()
    .map(|e| Edge::new(e.end, e.start))
    .collect();
  backward.insert(&reversed, 0);

  let a = forward.compile(true).unwrap();
  let b = backward.compile(true).unwrap();

  assert_eq!(a.node_count(), b.node_count());
  assert_eq!(a.edge_count(), b.edge_count());
  for (na, nb) in a.nodes().iter().zip(b.nodes()) {
    assert_eq!(na.point_index, nb.point_index);
    assert_eq!(na.adjacency, nb.adjacency);
  }
  for (ea, eb) in a.edges().iter().zip(b.edges()) {
    assert_eq!((ea.start, ea.end), (eb.start, eb.end));
  }
}

#[test]
fn adjacency_pairs_neighbor_with_edge() {
  let builder = triangle_with_pendant();
  let cluster = builder.compile(true).unwrap();

  let node_2 = cluster.node_of_point(2).unwrap();
  let mut neighbors: Vec<u32> = cluster
    .neighbors(node_2)
    .map(|(neighbor, edge)| {
      // Each link's edge really connects the two nodes it claims to.
      let via = cluster.edge(edge).unwrap();
      assert_eq!(via.other_node(node_2), Some(neighbor));
      cluster.point_of_node(neighbor).unwrap()
    })
    .collect();
  neighbors.sort_unstable();
  assert_eq!(neighbors, vec![0, 1, 3]);
}

#[test]
fn invalidation_flips_exactly_once() {
  let builder = triangle_with_pendant();

  assert!(builder.invalidate_edge(0, 1));
  assert!(!builder.invalidate_edge(1, 0));
  assert!(!builder.is_edge_valid(0, 1));

  assert!(builder.invalidate_node(3));
  assert!(!builder.invalidate_node(3));
  assert!(!builder.is_node_valid(3));

  assert!(!builder.invalidate_edge(0, 3));
  assert!(!builder.invalidate_node(42));
}

#[test]
fn compile_prunes_flagged_and_orphaned() {
  let builder = triangle_with_pendant();
  builder.invalidate_node(3);

  let cluster = builder.compile(true).unwrap();
  // Node 3 and its pendant edge are gone, the triangle survives.
  assert_eq!(cluster.node_count(), 3);
  assert_eq!(cluster.edge_count(), 3);
  assert_eq!(cluster.node_of_point(3), None);
}

#[test]
fn compile_without_prune_keeps_flags() {
  let builder = triangle_with_pendant();
  builder.invalidate_node(3);
  builder.invalidate_edge(0, 1);

  let cluster = builder.compile(false).unwrap();
  assert_eq!(cluster.node_count(), 4);
  assert_eq!(cluster.edge_count(), 4);

  let node_3 = cluster.node_of_point(3).unwrap();
  assert!(!cluster.node(node_3).unwrap().is_valid());

  let live: Vec<(u32, u32)> = cluster
    .valid_edges()
    .iter()
    .map(|e| (e.start.min(e.end), e.start.max(e.end)))
    .collect();
  // (0,1) flagged out, (2,3) dead through node 3.
  assert_eq!(live, vec![(0, 2), (1, 2)]);
}

#[test]
fn compile_empty_leaves_builder_untouched() {
  let builder = GraphBuilder::new(4);
  builder.insert(&[Edge::new(0, 1), Edge::new(1, 2)], 0);
  builder.invalidate_edge(0, 1);
  builder.invalidate_edge(1, 2);

  assert!(matches!(builder.compile(true), Err(CompileError::Empty)));
  // Failure has no side effects: the set is intact and compilable again.
  assert_eq!(builder.edge_count(), 2);
  assert!(builder.contains(0, 1));
  assert!(matches!(builder.compile(true), Err(CompileError::Empty)));
  assert!(builder.compile(false).is_err());
}

#[test]
fn compile_twice_yields_identical_clusters() {
  let builder = triangle_with_pendant();
  builder.invalidate_edge(2, 3);

  let a = builder.compile(true).unwrap();
  let b = builder.compile(true).unwrap();
  assert_eq!(a.node_count(), b.node_count());
  for (na, nb) in a.nodes().iter().zip(b.nodes()) {
    assert_eq!(na.point_index, nb.point_index);
    assert_eq!(na.adjacency, nb.adjacency);
  }
}
