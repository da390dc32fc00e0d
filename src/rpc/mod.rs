//! Kademlia node core: routing table, socket and lookups driven by a single threaded tick loop.

pub(crate) mod config;
mod handle_request;
mod info;
mod lookup;
pub(crate) mod socket;

use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use flume::Sender;
use tracing::{debug, error, info};

use crate::common::{
    FindNodeRequestArguments, Id, Message, MessageType, Node, RoutingTable, MAX_BUCKET_SIZE_K,
};

use lookup::Lookup;
use socket::{Incoming, RpcSocket};

pub use config::Config;
pub use info::Info;
pub use lookup::ALPHA;
pub use socket::{RequestTimeout, SendMessageError, MAX_THREAD_BLOCK_DURATION};

/// Default request timeout before abandoning an inflight request to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(3000);

/// Default time between pinging the bootstrap nodes and the self-lookup.
pub const DEFAULT_BOOTSTRAP_DELAY: Duration = Duration::from_millis(3000);

/// Default interval between self-lookups refreshing the routing table.
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Default maximum number of rounds of a single lookup.
pub const DEFAULT_MAX_LOOKUP_ROUNDS: usize = 32;

/// Resolve a `host:port` given to this node, hostnames included.
///
/// This may block on dns, so addresses learned from other nodes never go through it.
pub(crate) fn resolve_address(address: &str) -> Option<SocketAddr> {
    address.to_socket_addrs().ok()?.next()
}

/// What to do once a request is answered, times out, or fails to send.
#[derive(Debug)]
pub enum OnComplete {
    /// A PING, the responder is sent back if it answered with a PONG.
    Ping(Option<Sender<Option<Node>>>),
    /// A FIND_NODE sent by the lookup for this target.
    Lookup(Id),
}

#[derive(Debug)]
/// A Kademlia node, owning its [Id], [RoutingTable], socket and active lookups.
///
/// Nothing happens unless [Rpc::tick] is called in a loop, see [crate::Dht]
/// for a node running on its own thread.
pub struct Rpc {
    socket: RpcSocket,
    routing_table: RoutingTable,
    /// Active lookups by target.
    lookups: HashMap<Id, Lookup>,

    started_at: Instant,
    /// Last time we started a self-lookup, `None` until the bootstrap lookup.
    last_refresh: Option<Instant>,
    bootstrapped: bool,
    bootstrap_waiters: Vec<Sender<bool>>,

    // Options
    bootstrap: Vec<String>,
    bootstrap_delay: Duration,
    refresh_interval: Duration,
    max_lookup_rounds: usize,
}

impl Rpc {
    /// Bind the socket and ping the bootstrap nodes.
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let id = config.id.unwrap_or_else(Id::random);

        let socket = RpcSocket::new(&config, id)?;

        info!(%id, address = %socket.local_addr(), "Kademlia node listening");

        let mut rpc = Rpc {
            socket,
            routing_table: RoutingTable::new(id),
            lookups: HashMap::new(),

            started_at: Instant::now(),
            last_refresh: None,
            bootstrapped: false,
            bootstrap_waiters: Vec::new(),

            bootstrap: config.bootstrap,
            bootstrap_delay: config.bootstrap_delay,
            refresh_interval: config.refresh_interval,
            max_lookup_rounds: config.max_lookup_rounds,
        };

        for address in rpc.bootstrap.clone() {
            match resolve_address(&address) {
                Some(resolved) => rpc.ping(&resolved.to_string(), None),
                None => debug!(%address, "Could not resolve bootstrap node"),
            }
        }

        Ok(rpc)
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        self.routing_table.id()
    }

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    /// This node as advertised to others.
    pub fn node(&self) -> &Node {
        self.socket.node()
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.routing_table
    }

    /// Returns `true` once the bootstrap self-lookup is done.
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    /// Number of lookups still running.
    pub fn active_lookups(&self) -> usize {
        self.lookups.len()
    }

    /// Number of requests waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.socket.pending()
    }

    /// Returns a thread safe and lightweight summary of this node's state.
    pub fn info(&self) -> Info {
        Info::from(self)
    }

    // === Public Methods ===

    /// Resolve timed out requests, run the routing table maintenance, and handle
    /// at most one incoming message.
    ///
    /// Blocks for up to [MAX_THREAD_BLOCK_DURATION] if there is nothing to read.
    pub fn tick(&mut self) {
        for on_complete in self.socket.expired() {
            self.complete(on_complete, None);
        }

        self.maintain_routing_table();

        match self.socket.recv_from() {
            Some(Incoming::Message(message, from)) => self.handle_request(from, message),
            Some(Incoming::Reply(message, from, on_complete)) => {
                self.complete(on_complete, Some((message, from)))
            }
            None => {}
        }
    }

    /// Send a PING to `address` (`host:port`), the responder is added to the
    /// routing table and sent to `sender` if it answers with a PONG.
    pub fn ping(&mut self, address: &str, sender: Option<Sender<Option<Node>>>) {
        self.socket.request(
            address,
            MessageType::Ping,
            RequestTimeout::Default,
            Some(OnComplete::Ping(sender)),
        );
    }

    /// Start an iterative lookup for the closest nodes to `target`.
    ///
    /// If a lookup for the same target is still running, the sender is added to it
    /// instead of starting another one, and all of them get the same result.
    pub fn find_node(&mut self, target: Id, sender: Option<Sender<Vec<Node>>>) {
        if let Some(lookup) = self.lookups.get_mut(&target) {
            lookup.add_sender(sender);
            return;
        }

        let mut lookup = Lookup::new(
            *self.id(),
            target,
            self.routing_table.closest(&target, MAX_BUCKET_SIZE_K),
            self.max_lookup_rounds,
        );
        lookup.add_sender(sender);

        self.lookups.insert(target, lookup);

        self.next_round(target);
    }

    /// Send `true` to the sender once the bootstrap self-lookup is done and the
    /// routing table isn't empty, or `false` if it is.
    pub fn bootstrapped(&mut self, sender: Sender<bool>) {
        if self.bootstrapped {
            let _ = sender.send(!self.routing_table.is_empty());
        } else {
            self.bootstrap_waiters.push(sender);
        }
    }

    // === Private Methods ===

    /// Resolve a request with its reply, or `None` if it timed out or failed to send.
    fn complete(&mut self, on_complete: OnComplete, reply: Option<(Message, SocketAddr)>) {
        match on_complete {
            OnComplete::Ping(sender) => {
                let responder = reply.and_then(|(message, from)| match message.message_type {
                    MessageType::Pong => Some(message.sender.with_observed_ip(from)),
                    _ => None,
                });

                if let Some(node) = &responder {
                    self.routing_table.add(node.clone());
                }

                if let Some(sender) = sender {
                    let _ = sender.send(responder);
                }
            }
            OnComplete::Lookup(target) => {
                let Some(lookup) = self.lookups.get_mut(&target) else {
                    return;
                };

                let nodes = reply.as_ref().and_then(|(message, _)| message.closer_nodes());

                if lookup.resolve(nodes) {
                    lookup.merge();
                    self.next_round(target);
                }
            }
        }
    }

    /// Send the next batch of FIND_NODE requests for a lookup, or finish it if
    /// there is no one left to query.
    fn next_round(&mut self, target: Id) {
        let Some(lookup) = self.lookups.get_mut(&target) else {
            return;
        };

        let batch = lookup.next_batch();

        if batch.is_empty() {
            if let Some(lookup) = self.lookups.remove(&target) {
                self.finish(lookup);
            }
            return;
        }

        for node in batch {
            self.socket.request(
                &node.address(),
                MessageType::FindNode(FindNodeRequestArguments { target }),
                RequestTimeout::Default,
                Some(OnComplete::Lookup(target)),
            );
        }
    }

    fn finish(&mut self, lookup: Lookup) {
        if lookup.populate() {
            for node in lookup.closest() {
                self.routing_table.add(node.clone());
            }

            if !self.bootstrapped {
                self.bootstrap_done(lookup.round());
            }
        }

        lookup.finish();
    }

    /// Run the bootstrap self-lookup once the delay passed, then refresh periodically.
    fn maintain_routing_table(&mut self) {
        let due = match self.last_refresh {
            None => self.started_at.elapsed() >= self.bootstrap_delay,
            Some(last_refresh) => last_refresh.elapsed() >= self.refresh_interval,
        };

        if due {
            self.last_refresh = Some(Instant::now());
            self.populate();
        }
    }

    /// Look up our own id and add every node found to the routing table.
    fn populate(&mut self) {
        let id = *self.id();

        debug!(%id, table_size = self.routing_table.size(), "Populating the routing table");

        self.find_node(id, None);

        // The lookup may already be done if there was no one to ask.
        if let Some(lookup) = self.lookups.get_mut(&id) {
            lookup.set_populate();
        } else if !self.bootstrapped {
            self.bootstrap_done(0);
        }
    }

    /// Mark the bootstrap self-lookup as done and notify whoever is waiting for it.
    fn bootstrap_done(&mut self, rounds: usize) {
        self.bootstrapped = true;

        let table_size = self.routing_table.size();

        for sender in self.bootstrap_waiters.drain(..) {
            let _ = sender.send(table_size > 0);
        }

        if table_size == 0 {
            if self.bootstrap.is_empty() {
                debug!("First node in the network, routing table is empty");
            } else {
                error!("Could not bootstrap the routing table");
            }
        } else {
            info!(table_size, rounds, "Populated the routing table");
        }
    }
}
