//! Dht node.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    thread,
    time::Duration,
};

use flume::{Receiver, Sender, TryRecvError};
use tracing::debug;

use crate::{
    common::{Id, Node},
    rpc::{resolve_address, Config, Info, Rpc},
};

#[derive(Debug, Clone)]
/// Kademlia node, running its [Rpc] on its own thread.
///
/// Every clone talks to the same node, which shuts down once all of them are dropped.
pub struct Dht(pub(crate) Sender<ActorMessage>);

#[derive(Debug, Default, Clone)]
/// A builder for the [Dht] node.
pub struct DhtBuilder(Config);

impl DhtBuilder {
    /// Set this node's Id instead of a random one.
    pub fn id(mut self, id: Id) -> Self {
        self.0.id = Some(id);

        self
    }

    /// Set bootstrapping nodes (`host:port`).
    pub fn bootstrap<T: ToString>(mut self, bootstrap: &[T]) -> Self {
        self.0.bootstrap = bootstrap.iter().map(|s| s.to_string()).collect();

        self
    }

    /// Add more bootstrap nodes to the list.
    pub fn extra_bootstrap<T: ToString>(mut self, extra_bootstrap: &[T]) -> Self {
        self.0
            .bootstrap
            .extend(extra_bootstrap.iter().map(|s| s.to_string()));

        self
    }

    /// Set an explicit port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.0.port = Some(port);

        self
    }

    /// Set the address to bind the UDP socket to.
    pub fn bind_address(mut self, bind_address: IpAddr) -> Self {
        self.0.bind_address = Some(bind_address);

        self
    }

    /// Set the host other nodes should use to reach this node.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.0.host = Some(host.into());

        self
    }

    /// Set the default timeout of requests.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.0.request_timeout = request_timeout;

        self
    }

    /// Set the delay between pinging the bootstrap nodes and the self-lookup.
    pub fn bootstrap_delay(mut self, bootstrap_delay: Duration) -> Self {
        self.0.bootstrap_delay = bootstrap_delay;

        self
    }

    /// Set the interval between routing table refreshes.
    pub fn refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.0.refresh_interval = refresh_interval;

        self
    }

    /// Set the maximum number of rounds of a single lookup.
    pub fn max_lookup_rounds(mut self, max_lookup_rounds: usize) -> Self {
        self.0.max_lookup_rounds = max_lookup_rounds;

        self
    }

    /// Create a Dht node.
    pub fn build(self) -> Result<Dht, std::io::Error> {
        Dht::new(self.0)
    }
}

impl Dht {
    /// Create a new Dht node.
    ///
    /// Could return an error if it failed to bind to the specified
    /// port or other io errors while binding the udp socket.
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let (sender, receiver) = flume::unbounded();
        let (check_sender, check_receiver) = flume::bounded(1);

        thread::Builder::new()
            .name("kadlite-dht".to_string())
            .spawn(move || run(config, receiver, check_sender))?;

        match check_receiver.recv() {
            Ok(result) => result?,
            Err(_) => return Err(std::io::Error::other("Dht thread exited before starting")),
        };

        Ok(Dht(sender))
    }

    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    // === Getters ===

    /// Information and statistics about this [Dht] node.
    pub fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
            .send(ActorMessage::Info(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// Turn this node's routing table to a list of bootstraping nodes.
    pub fn to_bootstrap(&self) -> Result<Vec<String>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<String>>(1);

        self.0
            .send(ActorMessage::ToBootstrap(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop, and wait for the socket to close.
    pub fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv();
    }

    /// Wait until the bootstrap self-lookup is done.
    ///
    /// Returns true if the routing table isn't empty afterwards.
    pub fn bootstrapped(&self) -> Result<bool, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<bool>(1);

        self.0
            .send(ActorMessage::Bootstrapped(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    /// Send a PING to `address` (`host:port`).
    ///
    /// Hostnames are resolved on the calling thread.
    ///
    /// Returns the responding node, or `None` if it didn't answer in time or
    /// `address` doesn't resolve.
    pub fn ping(&self, address: &str) -> Result<Option<Node>, DhtWasShutdown> {
        let Some(address) = resolve_address(address) else {
            return Ok(None);
        };

        let (sender, receiver) = flume::bounded::<Option<Node>>(1);

        self.0
            .send(ActorMessage::Ping(address, sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }

    // === Find nodes ===

    /// Run an iterative lookup and return the closest nodes to `target` it found.
    pub fn find_node(&self, target: Id) -> Result<Vec<Node>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<Node>>(1);

        self.0
            .send(ActorMessage::FindNode(target, sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv().map_err(|_| DhtWasShutdown)
    }
}

fn run(config: Config, receiver: Receiver<ActorMessage>, check: Sender<std::io::Result<()>>) {
    let mut rpc = match Rpc::new(config) {
        Ok(rpc) => {
            let _ = check.send(Ok(()));
            rpc
        }
        Err(error) => {
            let _ = check.send(Err(error));
            return;
        }
    };

    let shutdown = loop {
        match receiver.try_recv() {
            Ok(actor_message) => match actor_message {
                ActorMessage::Shutdown(sender) => break Some(sender),
                ActorMessage::Info(sender) => {
                    let _ = sender.send(rpc.info());
                }
                ActorMessage::ToBootstrap(sender) => {
                    let _ = sender.send(rpc.routing_table().to_bootstrap());
                }
                ActorMessage::Bootstrapped(sender) => rpc.bootstrapped(sender),
                ActorMessage::Ping(address, sender) => {
                    rpc.ping(&address.to_string(), Some(sender))
                }
                ActorMessage::FindNode(target, sender) => rpc.find_node(target, Some(sender)),
            },
            Err(TryRecvError::Disconnected) => {
                // Node was dropped, kill this thread.
                debug!("kadlite::Dht's actor thread was shutdown after Drop.");
                break None;
            }
            Err(TryRecvError::Empty) => {}
        }

        rpc.tick();
    };

    // Close the socket before confirming the shutdown.
    drop(rpc);

    // Dropping queued messages drops their reply senders, so their callers
    // get `DhtWasShutdown` instead of waiting forever.
    drop(receiver.drain());
    drop(receiver);

    if let Some(sender) = shutdown {
        let _ = sender.send(());
    }
}

#[derive(Debug)]
pub(crate) enum ActorMessage {
    Info(Sender<Info>),
    ToBootstrap(Sender<Vec<String>>),
    Bootstrapped(Sender<bool>),
    Ping(SocketAddr, Sender<Option<Node>>),
    FindNode(Id, Sender<Vec<Node>>),
    Shutdown(Sender<()>),
}

/// Create a testnet of Dht nodes to run tests against instead of a real network.
#[derive(Debug)]
pub struct Testnet {
    pub bootstrap: Vec<String>,
    pub nodes: Vec<Dht>,
}

/// Testnet nodes don't need to wait long for each other on localhost.
const TESTNET_BOOTSTRAP_DELAY: Duration = Duration::from_millis(100);

impl Testnet {
    /// Start `count` nodes on localhost, all bootstrapping off the first one, and
    /// wait for all of them to finish their bootstrap self-lookup.
    pub fn new(count: usize) -> Result<Testnet, std::io::Error> {
        let mut nodes: Vec<Dht> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            let builder = Dht::builder()
                .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .bootstrap_delay(TESTNET_BOOTSTRAP_DELAY);

            if i == 0 {
                let node = builder.build()?;

                let info = node.info().map_err(std::io::Error::other)?;
                bootstrap.push(info.local_addr().to_string());

                nodes.push(node)
            } else {
                let node = builder.bootstrap(&bootstrap).build()?;
                nodes.push(node)
            }
        }

        for node in &nodes {
            node.bootstrapped().map_err(std::io::Error::other)?;
        }

        Ok(Self { bootstrap, nodes })
    }
}

#[derive(thiserror::Error, Debug)]
#[error("Dht node was shutdown")]
/// The [Dht] node's actor thread is gone, either after [Dht::shutdown] or a panic.
pub struct DhtWasShutdown;
