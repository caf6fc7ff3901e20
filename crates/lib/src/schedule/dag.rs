//! Weighted constraint graph for install scheduling.
//!
//! Nodes are scheduled items, identified by their index in declaration order.
//! An edge `u -> v` with weight `w` (0 or 1) states `p(v) >= p(u) + w`, where
//! `p` is the position (step index) of a node. Every node also belongs to a
//! lane (its manager); all nodes sharing a position must share a lane.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

/// One ordering constraint and why it exists.
#[derive(Debug, Clone)]
pub(crate) struct Constraint {
  pub from: usize,
  pub to: usize,
  pub weight: u8,
  pub reason: String,
}

pub(crate) struct ConstraintGraph<L> {
  lanes: Vec<L>,
  constraints: Vec<Constraint>,
}

impl<L: Ord + Clone> ConstraintGraph<L> {
  /// One node per lane entry.
  pub fn new(lanes: Vec<L>) -> Self {
    Self {
      lanes,
      constraints: Vec::new(),
    }
  }

  pub fn constrain(&mut self, from: usize, to: usize, weight: u8, reason: impl Into<String>) {
    self.constraints.push(Constraint {
      from,
      to,
      weight,
      reason: reason.into(),
    });
  }

  /// Nodes of the first strongly connected component containing a strict edge.
  pub fn contradiction(&self) -> Option<Vec<usize>> {
    let all: BTreeSet<usize> = (0..self.lanes.len()).collect();
    positive_components(&self.constraints, &all).into_iter().next()
  }

  /// Shrink a contradictory node set until removing any node resolves it.
  pub fn irreducible_subset(&self, nodes: &[usize]) -> Vec<usize> {
    let mut set: BTreeSet<usize> = nodes.iter().copied().collect();
    for &node in nodes {
      set.remove(&node);
      if positive_components(&self.constraints, &set).is_empty() {
        set.insert(node);
      }
    }
    set.into_iter().collect()
  }

  /// Constraints with both ends in `nodes`.
  pub fn constraints_among(&self, nodes: &[usize]) -> Vec<&Constraint> {
    self
      .constraints
      .iter()
      .filter(|c| nodes.contains(&c.from) && nodes.contains(&c.to))
      .collect()
  }

  /// Partition nodes into lane-homogeneous layers in position order.
  ///
  /// Returns the nodes of a contradiction if the constraints are infeasible.
  pub fn layers(&self) -> Result<Vec<Vec<usize>>, Vec<usize>> {
    if let Some(nodes) = self.contradiction() {
      return Err(nodes);
    }

    // Zero-weight cycles collapse into one component; they only ever join nodes of one lane.
    let mut graph: DiGraph<usize, u8> = DiGraph::new();
    let indices: Vec<NodeIndex> = (0..self.lanes.len()).map(|i| graph.add_node(i)).collect();
    for c in &self.constraints {
      graph.add_edge(indices[c.from], indices[c.to], c.weight);
    }

    let components = tarjan_scc(&graph);
    let mut component_of = vec![0usize; self.lanes.len()];
    for (ci, members) in components.iter().enumerate() {
      for idx in members {
        component_of[graph[*idx]] = ci;
      }
    }

    let mut condensed: DiGraph<usize, u8> = DiGraph::new();
    let comp_nodes: Vec<NodeIndex> = (0..components.len()).map(|ci| condensed.add_node(ci)).collect();
    for c in &self.constraints {
      let (a, b) = (component_of[c.from], component_of[c.to]);
      if a != b {
        condensed.add_edge(comp_nodes[a], comp_nodes[b], c.weight);
      }
    }

    let lane_of = |ci: usize| &self.lanes[graph[components[ci][0]]];

    loop {
      let positions = longest_paths(&condensed).map_err(|ci| {
        components[ci].iter().map(|idx| graph[*idx]).collect::<Vec<_>>()
      })?;

      let mut by_position: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
      for (ci, &p) in positions.iter().enumerate() {
        by_position.entry(p).or_default().push(ci);
      }

      let mixed = by_position.values().find_map(|comps| {
        let lanes: BTreeSet<&L> = comps.iter().map(|&ci| lane_of(ci)).collect();
        if lanes.len() > 1 {
          lanes.first().map(|first| ((*first).clone(), comps.clone()))
        } else {
          None
        }
      });

      let Some((first, comps)) = mixed else {
        return Ok(
          by_position
            .into_values()
            .map(|comps| {
              let mut nodes: Vec<usize> = comps
                .iter()
                .flat_map(|&ci| components[ci].iter().map(|idx| graph[*idx]))
                .collect();
              nodes.sort_unstable();
              nodes
            })
            .collect(),
        );
      };

      // The first lane keeps the position, everything else moves behind it.
      let (leading, trailing): (Vec<usize>, Vec<usize>) = comps.iter().partition(|&&ci| *lane_of(ci) == first);
      for &a in &leading {
        for &b in &trailing {
          condensed.add_edge(comp_nodes[a], comp_nodes[b], 1);
        }
      }
    }
  }

  pub fn lane(&self, node: usize) -> &L {
    &self.lanes[node]
  }
}

/// Longest weighted path to every node of a DAG; `Err` carries a node on a cycle.
fn longest_paths(graph: &DiGraph<usize, u8>) -> Result<Vec<usize>, usize> {
  let order = toposort(graph, None).map_err(|cycle| graph[cycle.node_id()])?;
  let mut positions = vec![0usize; graph.node_count()];
  for node in order {
    let base = positions[node.index()];
    for edge in graph.edges(node) {
      let target = edge.target().index();
      positions[target] = positions[target].max(base + *edge.weight() as usize);
    }
  }
  Ok(positions)
}

/// Node sets of the components of the subgraph on `nodes` that contain a strict edge.
fn positive_components(constraints: &[Constraint], nodes: &BTreeSet<usize>) -> Vec<Vec<usize>> {
  let mut graph: DiGraph<usize, u8> = DiGraph::new();
  let index: BTreeMap<usize, NodeIndex> = nodes.iter().map(|&n| (n, graph.add_node(n))).collect();

  let inside: Vec<&Constraint> = constraints
    .iter()
    .filter(|c| nodes.contains(&c.from) && nodes.contains(&c.to))
    .collect();
  for c in &inside {
    graph.add_edge(index[&c.from], index[&c.to], c.weight);
  }

  let mut found: Vec<Vec<usize>> = tarjan_scc(&graph)
    .into_iter()
    .map(|members| {
      let mut nodes: Vec<usize> = members.into_iter().map(|idx| graph[idx]).collect();
      nodes.sort_unstable();
      nodes
    })
    .filter(|members| {
      inside
        .iter()
        .any(|c| c.weight > 0 && members.contains(&c.from) && members.contains(&c.to))
    })
    .collect();
  found.sort();
  found
}
