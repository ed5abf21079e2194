//! Constraint graph, islands and conflict-free batching.
//!
//! Nodes are bodies that merge subgraphs (dynamic, not rays). Every
//! constraint contributes one edge per merging endpoint, so a constraint
//! against static geometry hangs off a single node and never links two
//! islands together.
//!
//! Batches are built greedily: walk the unassigned constraints in input
//! order, admit each one whose merging endpoints are unused in the current
//! batch, and carry the rest into the next batch.

use std::collections::{HashMap, HashSet};

use crate::object::ObjectId;

/// The two endpoints of one constraint, as the graph sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintLink {
    /// First body.
    pub a: ObjectId,
    /// Second body.
    pub b: ObjectId,
    /// Whether `a` merges subgraphs.
    pub a_merges: bool,
    /// Whether `b` merges subgraphs.
    pub b_merges: bool,
}

impl ConstraintLink {
    /// Merging endpoints, without duplicates.
    pub fn merging(&self) -> impl Iterator<Item = ObjectId> {
        let a = self.a_merges.then_some(self.a);
        let b = (self.b_merges && !(self.a_merges && self.a == self.b)).then_some(self.b);
        a.into_iter().chain(b)
    }
}

/// A body in the constraint graph.
#[derive(Debug, Clone, Default)]
pub struct GraphNode {
    body: ObjectId,
    edges: Vec<usize>,
}

impl GraphNode {
    /// Body this node stands for.
    pub fn body(&self) -> ObjectId {
        self.body
    }

    /// Indices of edges touching this node.
    pub fn edges(&self) -> &[usize] {
        &self.edges
    }
}

/// One constraint as seen from one of its merging endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphEdge {
    /// Index of the constraint in the build input.
    pub constraint: usize,
    /// Node this edge hangs off.
    pub node: usize,
    /// Node at the other end, if that endpoint also merges.
    pub other: Option<usize>,
}

/// Per-tick graph over bodies linked by constraints.
#[derive(Debug, Default)]
pub struct ConstraintGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    lookup: HashMap<ObjectId, usize>,
    links: Vec<ConstraintLink>,
    parent: Vec<usize>,
    /// Cleared nodes kept for their edge-list capacity.
    recycle_bin: Vec<GraphNode>,
}

impl ConstraintGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops this tick's graph, keeping allocations for the next one.
    pub fn clear(&mut self) {
        self.recycle_bin.extend(self.nodes.drain(..).map(|mut node| {
            node.edges.clear();
            node
        }));
        self.edges.clear();
        self.lookup.clear();
        self.links.clear();
        self.parent.clear();
    }

    /// Rebuilds the graph for `links`, indexed by constraint position.
    pub fn build(&mut self, links: &[ConstraintLink]) {
        self.clear();
        self.links.extend_from_slice(links);

        for (constraint, link) in links.iter().enumerate() {
            let a = link.a_merges.then(|| self.node_for(link.a));
            let b = link.b_merges.then(|| self.node_for(link.b));
            let (a, b) = if a.is_some() && a == b { (a, None) } else { (a, b) };
            if let Some(node) = a {
                self.push_edge(constraint, node, b);
            }
            if let Some(node) = b {
                self.push_edge(constraint, node, a);
            }
            if let (Some(a), Some(b)) = (a, b) {
                self.union(a, b);
            }
        }

        tracing::trace!(
            nodes = self.nodes.len(),
            edges = self.edges.len(),
            "constraint graph built"
        );
    }

    fn node_for(&mut self, body: ObjectId) -> usize {
        if let Some(&index) = self.lookup.get(&body) {
            return index;
        }
        let mut node = self.recycle_bin.pop().unwrap_or_default();
        node.body = body;
        let index = self.nodes.len();
        self.nodes.push(node);
        self.parent.push(index);
        self.lookup.insert(body, index);
        index
    }

    fn push_edge(&mut self, constraint: usize, node: usize, other: Option<usize>) {
        let index = self.edges.len();
        self.edges.push(GraphEdge {
            constraint,
            node,
            other,
        });
        self.nodes[node].edges.push(index);
    }

    fn find(&mut self, mut node: usize) -> usize {
        while self.parent[node] != node {
            self.parent[node] = self.parent[self.parent[node]];
            node = self.parent[node];
        }
        node
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Lower index wins so island ids follow first appearance.
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }

    /// Nodes of the last build, one per merging body.
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    /// Edges of the last build, one per merging endpoint of each constraint.
    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    /// Node for `body`, if it merges and has a constraint this tick.
    pub fn node(&self, body: ObjectId) -> Option<&GraphNode> {
        self.lookup.get(&body).map(|&i| &self.nodes[i])
    }

    /// Number of constraints touching `body`.
    pub fn degree(&self, body: ObjectId) -> usize {
        self.node(body).map_or(0, |n| n.edges.len())
    }

    /// Highest node degree.
    pub fn max_degree(&self) -> usize {
        self.nodes.iter().map(|n| n.edges.len()).max().unwrap_or(0)
    }

    /// Nodes cached for reuse.
    pub fn recycled(&self) -> usize {
        self.recycle_bin.len()
    }

    /// Connected groups of merging bodies, in order of first appearance.
    pub fn islands(&mut self) -> Vec<Vec<ObjectId>> {
        let mut slot: HashMap<usize, usize> = HashMap::new();
        let mut islands: Vec<Vec<ObjectId>> = Vec::new();
        for i in 0..self.nodes.len() {
            let root = self.find(i);
            let next = islands.len();
            let island = *slot.entry(root).or_insert(next);
            if island == islands.len() {
                islands.push(Vec::new());
            }
            islands[island].push(self.nodes[i].body);
        }
        islands
    }

    /// Conflict-free batches of constraint indices.
    pub fn batches(&self) -> Vec<Vec<usize>> {
        batch_constraints(&self.links)
    }
}

/// Splits constraints into batches in which no merging body appears twice.
///
/// Input order is priority: the earliest unassigned constraint always wins
/// a slot in the batch under construction. Every index appears in exactly
/// one batch.
pub fn batch_constraints(links: &[ConstraintLink]) -> Vec<Vec<usize>> {
    let mut batches = Vec::new();
    let mut remaining: Vec<usize> = (0..links.len()).collect();
    let mut leftover = Vec::new();
    let mut used: HashSet<ObjectId> = HashSet::new();

    while !remaining.is_empty() {
        used.clear();
        let mut batch = Vec::new();
        for &index in &remaining {
            let link = &links[index];
            if link.merging().any(|body| used.contains(&body)) {
                leftover.push(index);
                continue;
            }
            for body in link.merging() {
                used.insert(body);
            }
            batch.push(index);
        }
        batches.push(batch);
        std::mem::swap(&mut remaining, &mut leftover);
        leftover.clear();
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(i: u32) -> ObjectId {
        ObjectId::from_raw(i, 0)
    }

    fn link(a: u32, b: u32) -> ConstraintLink {
        ConstraintLink {
            a: id(a),
            b: id(b),
            a_merges: true,
            b_merges: true,
        }
    }

    fn ground(a: u32) -> ConstraintLink {
        ConstraintLink {
            a: id(100),
            b: id(a),
            a_merges: false,
            b_merges: true,
        }
    }

    #[test]
    fn test_chain_alternates() {
        // 0-1, 1-2, 2-3: the middle link conflicts with both neighbours.
        let links = [link(0, 1), link(1, 2), link(2, 3)];
        assert_eq!(batch_constraints(&links), vec![vec![0, 2], vec![1]]);
    }

    #[test]
    fn test_static_endpoint_never_blocks() {
        let links = [ground(0), ground(1), ground(2)];
        assert_eq!(batch_constraints(&links), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_star_needs_degree_batches() {
        let links = [link(0, 1), link(0, 2), link(0, 3), ground(0)];
        let batches = batch_constraints(&links);
        assert_eq!(batches.len(), 4);
        assert_eq!(batches[0], vec![0]);
    }

    #[test]
    fn test_empty_input() {
        assert!(batch_constraints(&[]).is_empty());
    }

    #[test]
    fn test_graph_edges_per_merging_endpoint() {
        let mut g = ConstraintGraph::new();
        g.build(&[link(0, 1), ground(1), ConstraintLink {
            a: id(5),
            b: id(6),
            a_merges: false,
            b_merges: false,
        }]);
        assert_eq!(g.nodes().len(), 2);
        assert_eq!(g.edges().len(), 3);
        assert_eq!(g.degree(id(1)), 2);
        assert_eq!(g.degree(id(5)), 0);
        assert_eq!(g.max_degree(), 2);
    }

    #[test]
    fn test_islands_split_at_static() {
        let mut g = ConstraintGraph::new();
        // 0-1 and 2-3 only meet through the static body 100.
        g.build(&[link(0, 1), ground(1), ground(2), link(2, 3)]);
        let islands = g.islands();
        assert_eq!(islands, vec![vec![id(0), id(1)], vec![id(2), id(3)]]);
    }

    #[test]
    fn test_clear_recycles_nodes() {
        let mut g = ConstraintGraph::new();
        g.build(&[link(0, 1), link(1, 2)]);
        g.clear();
        assert_eq!(g.recycled(), 3);
        g.build(&[link(7, 8)]);
        assert_eq!(g.recycled(), 1);
        assert_eq!(g.node(id(7)).map(GraphNode::body), Some(id(7)));
        assert!(g.node(id(0)).is_none());
    }
}
