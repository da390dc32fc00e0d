//! Manage iterative lookups and their rounds of FIND_NODE requests.

use std::collections::HashSet;

use flume::Sender;
use tracing::{debug, trace};

use crate::common::{Id, KBucket, Node};

/// Number of candidates queried in parallel in each round.
pub const ALPHA: usize = 3;

/// An iterative process of sending FIND_NODE for the target to the closest
/// candidates that weren't queried yet, [ALPHA] at a time, merging the nodes
/// they return into the candidates, and repeating until every candidate was queried.
///
/// A round only ends once every request of its batch resolved, by reply or
/// timeout, and rounds never overlap.
#[derive(Debug)]
pub(crate) struct Lookup {
    target: Id,
    /// Closest nodes known so far, ordered by distance to this node.
    candidates: KBucket,
    /// Nodes already sent a FIND_NODE, marked when sending.
    queried: HashSet<Id>,
    /// Requests of the current round that haven't resolved yet.
    outstanding: usize,
    /// Nodes returned during the current round.
    found: Vec<Node>,
    round: usize,
    max_rounds: usize,
    /// Add the result to the routing table when done.
    populate: bool,
    senders: Vec<Sender<Vec<Node>>>,
}

impl Lookup {
    /// Start from the closest nodes in the routing table, `local_id` being this node.
    pub fn new(local_id: Id, target: Id, seed: Vec<Node>, max_rounds: usize) -> Self {
        trace!(?target, seed = seed.len(), "New lookup");

        let mut candidates = KBucket::new(local_id);

        for node in seed {
            if node.id != local_id {
                candidates.add(node);
            }
        }

        Self {
            target,
            candidates,
            queried: HashSet::new(),
            outstanding: 0,
            found: Vec::new(),
            round: 0,
            max_rounds,
            populate: false,
            senders: Vec::new(),
        }
    }

    // === Getters ===

    /// Closest nodes found so far.
    pub fn closest(&self) -> &[Node] {
        self.candidates.nodes()
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn populate(&self) -> bool {
        self.populate
    }

    // === Public Methods ===

    pub fn add_sender(&mut self, sender: Option<Sender<Vec<Node>>>) {
        if let Some(sender) = sender {
            self.senders.push(sender);
        }
    }

    pub fn set_populate(&mut self) {
        self.populate = true;
    }

    /// Start the next round: pick up to [ALPHA] candidates that weren't queried yet
    /// and mark them as queried.
    ///
    /// An empty batch means the lookup is done, either because no unqueried
    /// candidate is left or because it ran out of rounds.
    pub fn next_batch(&mut self) -> Vec<Node> {
        if self.round >= self.max_rounds {
            debug!(target = ?self.target, rounds = self.round, "Lookup ran out of rounds");
            return Vec::new();
        }

        let batch: Vec<Node> = self
            .candidates
            .iter()
            .filter(|node| !self.queried.contains(node.id()))
            .take(ALPHA)
            .cloned()
            .collect();

        if batch.is_empty() {
            return batch;
        }

        for node in &batch {
            self.queried.insert(node.id);
        }

        self.outstanding = batch.len();
        self.round += 1;

        batch
    }

    /// Record one resolved request of the current round, with the nodes it
    /// returned or `None` if it failed or timed out.
    ///
    /// Returns `true` once every request of the round has resolved.
    pub fn resolve(&mut self, nodes: Option<&[Node]>) -> bool {
        if self.outstanding == 0 {
            return false;
        }

        if let Some(nodes) = nodes {
            self.found.extend_from_slice(nodes);
        }

        self.outstanding -= 1;

        self.outstanding == 0
    }

    /// Merge the nodes found in the finished round into the candidates, closest
    /// to this node first, and return how many were added.
    pub fn merge(&mut self) -> usize {
        let local_id = *self.candidates.origin();

        let mut found = std::mem::take(&mut self.found);
        found.sort_by(|a, b| local_id.order_by_distance(a.id(), b.id()));

        let added = found
            .into_iter()
            .filter(|node| node.id != local_id)
            .filter(|node| self.candidates.add(node.clone()))
            .count();

        trace!(target = ?self.target, round = self.round, added, "Lookup round done");

        added
    }

    /// Finish the lookup, sending the closest nodes to everyone waiting for them.
    pub fn finish(self) -> Vec<Node> {
        let closest = self.candidates.nodes().to_vec();

        debug!(
            target = ?self.target,
            rounds = self.round,
            queried = self.queried.len(),
            closest = closest.len(),
            "Done lookup"
        );

        for sender in &self.senders {
            let _ = sender.send(closest.clone());
        }

        closest
    }
}

#[cfg(test)]
mod test {
    use crate::common::{ID_SIZE, MAX_BUCKET_SIZE_K};

    use super::*;

    fn node_with_bits(bits: &[usize]) -> Node {
        let mut bytes = [0_u8; ID_SIZE];
        for bit in bits {
            bytes[ID_SIZE - 1 - bit / 8] |= 1 << (bit % 8);
        }
        Node::new(Id(bytes), "127.0.0.1", 1)
    }

    fn zero() -> Id {
        Id([0; ID_SIZE])
    }

    #[test]
    fn empty_lookup_is_done() {
        let mut lookup = Lookup::new(zero(), Id::random(), vec![], 32);

        assert!(lookup.next_batch().is_empty());
        assert_eq!(lookup.round(), 0);
    }

    #[test]
    fn seed_excludes_self() {
        let local = node_with_bits(&[]);
        let lookup = Lookup::new(zero(), Id::random(), vec![local, node_with_bits(&[1])], 32);

        assert_eq!(lookup.closest().len(), 1);
    }

    #[test]
    fn batches_are_alpha_sized_and_marked_queried() {
        let seed: Vec<Node> = (10..15).map(|bit| node_with_bits(&[bit])).collect();
        let mut lookup = Lookup::new(zero(), Id::random(), seed.clone(), 32);

        let first = lookup.next_batch();
        assert_eq!(first.len(), ALPHA);
        assert_eq!(first, seed[..3].to_vec());

        for _ in 0..ALPHA {
            lookup.resolve(None);
        }
        lookup.merge();

        let second = lookup.next_batch();
        assert_eq!(second, seed[3..].to_vec());
        assert_eq!(lookup.round(), 2);
    }

    #[test]
    fn round_waits_for_every_request() {
        let seed: Vec<Node> = (10..13).map(|bit| node_with_bits(&[bit])).collect();
        let mut lookup = Lookup::new(zero(), Id::random(), seed, 32);

        lookup.next_batch();

        let returned = [node_with_bits(&[2])];

        assert!(!lookup.resolve(Some(&returned)));
        assert!(!lookup.resolve(None));
        assert!(lookup.resolve(Some(&[])));

        // Resolving more than the batch doesn't start another round.
        assert!(!lookup.resolve(None));

        assert_eq!(lookup.merge(), 1);
        assert_eq!(lookup.closest()[0].id, returned[0].id);
    }

    #[test]
    fn merge_filters_self_and_duplicates() {
        let seed = vec![node_with_bits(&[10])];
        let mut lookup = Lookup::new(zero(), Id::random(), seed.clone(), 32);

        lookup.next_batch();
        lookup.resolve(Some(&[
            node_with_bits(&[]),
            seed[0].clone(),
            node_with_bits(&[20]),
            node_with_bits(&[20]),
        ]));

        assert_eq!(lookup.merge(), 1);
        assert_eq!(lookup.closest().len(), 2);
    }

    #[test]
    fn terminates_when_everything_was_queried() {
        let seed = vec![node_with_bits(&[10])];
        let mut lookup = Lookup::new(zero(), Id::random(), seed, 32);

        let mut rounds = 0;
        let mut discovered = 1;

        loop {
            let batch = lookup.next_batch();
            if batch.is_empty() {
                break;
            }
            rounds += 1;

            for _ in &batch {
                // Each queried node knows one new node, until 10 are known.
                let nodes = if discovered < 10 {
                    discovered += 1;
                    vec![node_with_bits(&[10 + discovered])]
                } else {
                    vec![]
                };

                lookup.resolve(Some(&nodes));
            }
            lookup.merge();
        }

        assert_eq!(lookup.closest().len(), 10);
        assert_eq!(lookup.round(), rounds);
        assert_eq!(lookup.queried.len(), 10);
    }

    #[test]
    fn candidates_are_bounded() {
        let seed = vec![node_with_bits(&[200])];
        let mut lookup = Lookup::new(zero(), Id::random(), seed, 32);

        lookup.next_batch();
        let many: Vec<Node> = (0..100).map(|_| Node::random()).collect();
        lookup.resolve(Some(&many));
        lookup.merge();

        assert_eq!(lookup.closest().len(), MAX_BUCKET_SIZE_K);
    }

    #[test]
    fn max_rounds() {
        let seed: Vec<Node> = (10..20).map(|bit| node_with_bits(&[bit])).collect();
        let mut lookup = Lookup::new(zero(), Id::random(), seed, 2);

        for _ in 0..2 {
            let batch = lookup.next_batch();
            assert!(!batch.is_empty());
            for _ in &batch {
                lookup.resolve(None);
            }
            lookup.merge();
        }

        assert!(lookup.next_batch().is_empty());
    }

    #[test]
    fn finish_notifies_senders() {
        let (tx, rx) = flume::unbounded();

        let mut lookup = Lookup::new(zero(), Id::random(), vec![node_with_bits(&[5])], 32);
        lookup.add_sender(Some(tx.clone()));
        lookup.add_sender(Some(tx));
        lookup.add_sender(None);

        let closest = lookup.finish();

        assert_eq!(closest.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), closest);
        assert_eq!(rx.try_recv().unwrap(), closest);
        assert!(rx.try_recv().is_err());
    }
}
