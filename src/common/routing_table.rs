//! Simplified Kademlia routing table

use std::slice::Iter;

use crate::common::{Id, Node, KEY_SIZE};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table
///
/// One [KBucket] per distance class, indexed by [Id::distance] from this node's [Id].
pub struct RoutingTable {
    id: Id,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        let buckets = (0..KEY_SIZE).map(|_| KBucket::new(id)).collect();

        RoutingTable { id, buckets }
    }

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the bucket holding nodes at a given distance class.
    pub fn bucket(&self, index: u8) -> &KBucket {
        &self.buckets[index as usize]
    }

    // === Public Methods ===

    /// Index of the bucket a node (or key) belongs to.
    pub fn bucket_index(&self, id: &Id) -> u8 {
        self.id.distance(id)
    }

    /// Attempts to add a node to this routing table, and return `true` if it did.
    pub fn add(&mut self, node: Node) -> bool {
        if node.id == self.id {
            // Do not add self to the routing_table
            return false;
        }

        let index = self.bucket_index(node.id());

        self.buckets[index as usize].add(node)
    }

    /// Return up to `n` nodes, starting with the bucket `key` falls into, then
    /// widening to the neighbouring buckets one shell at a time.
    ///
    /// Each shell is sorted by distance to this node before being appended, and the
    /// result is truncated to the first `n` nodes collected.
    pub fn closest(&self, key: &Id, n: usize) -> Vec<Node> {
        let d = self.bucket_index(key) as usize;

        let mut nodes: Vec<Node> = self.buckets[d]
            .iter()
            .take(MAX_BUCKET_SIZE_K)
            .cloned()
            .collect();

        let mut i = 1;

        while nodes.len() < n {
            // Bucket 0 is only ever read as the key bucket itself.
            let has_lower = d > i;
            let has_upper = d + i < KEY_SIZE;

            if !has_lower && !has_upper {
                break;
            }

            let mut shell = Vec::new();

            if has_lower {
                shell.extend(self.buckets[d - i].iter().take(MAX_BUCKET_SIZE_K).cloned());
            }

            if has_upper {
                shell.extend(
                    self.buckets[d + i]
                        .iter()
                        .take(MAX_BUCKET_SIZE_K)
                        .cloned(),
                );
            }

            shell.sort_by(|a, b| self.id.order_by_distance(a.id(), b.id()));
            nodes.extend(shell);

            i += 1;
        }

        nodes.truncate(n);
        nodes
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|bucket| bucket.is_empty())
    }

    /// Return the number of nodes in this routing table.
    pub fn size(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.len()).sum()
    }

    /// Returns an iterator over the nodes in this routing table, closest buckets first.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.buckets.iter().flat_map(|bucket| bucket.iter())
    }

    /// Turn this routing table to a list of bootstrapping nodes.
    pub fn to_bootstrap(&self) -> Vec<String> {
        self.nodes().map(|n| n.address()).collect()
    }

    /// Returns `true` if a node with this id is in the table.
    pub fn contains(&self, node_id: &Id) -> bool {
        self.buckets[self.bucket_index(node_id) as usize].contains(node_id)
    }
}

/// A list of at most [MAX_BUCKET_SIZE_K] nodes, kept sorted by ascending
/// distance to an origin [Id].
///
/// Once full, a node is only accepted if it is strictly closer to the origin than
/// the furthest entry, which is then dropped. Incumbents are never evicted for
/// being unresponsive.
#[derive(Debug, Clone)]
pub struct KBucket {
    origin: Id,
    nodes: Vec<Node>,
}

impl KBucket {
    pub fn new(origin: Id) -> Self {
        KBucket {
            origin,
            nodes: Vec::new(),
        }
    }

    // === Getters ===

    pub fn origin(&self) -> &Id {
        &self.origin
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    // === Public Methods ===

    /// Insert a node at its sorted position, returns `false` if it was a duplicate
    /// or fell beyond the capacity.
    pub fn add(&mut self, incoming: Node) -> bool {
        if self.contains(incoming.id()) {
            return false;
        }

        let distance = self.origin.distance(incoming.id());

        let position = self
            .nodes
            .iter()
            .position(|node| distance < self.origin.distance(node.id()))
            .unwrap_or(self.nodes.len());

        if position >= MAX_BUCKET_SIZE_K {
            return false;
        }

        self.nodes.insert(position, incoming);
        self.nodes.truncate(MAX_BUCKET_SIZE_K);

        true
    }

    pub fn contains(&self, id: &Id) -> bool {
        self.iter().any(|node| node.id() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> Iter<'_, Node> {
        self.nodes.iter()
    }
}
