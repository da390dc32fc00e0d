//! Struct and implementation of the Node entry in the Kademlia routing table
use std::net::{IpAddr, SocketAddr};

use crate::common::Id;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Node entry in Kademlia routing table, and the `sender` of every message.
///
/// There is no connection behind a node, it is only an identity and where to
/// send datagrams to reach it.
pub struct Node {
    pub id: Id,
    pub host: String,
    pub port: u16,
}

impl Node {
    /// Creates a new Node from an id, host and port.
    pub fn new(id: Id, host: impl Into<String>, port: u16) -> Node {
        Node {
            id,
            host: host.into(),
            port,
        }
    }

    /// Creates a new Node from an id and a socket address.
    pub fn from_address(id: Id, address: SocketAddr) -> Node {
        Node::new(id, address.ip().to_string(), address.port())
    }

    /// Creates a node with a random Id for testing purposes.
    #[cfg(test)]
    pub fn random() -> Node {
        Node::new(Id::random(), "127.0.0.1", 1)
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// `host:port` string of this node.
    pub fn address(&self) -> String {
        match self.host.parse::<IpAddr>() {
            Ok(IpAddr::V6(ip)) => SocketAddr::from((ip, self.port)).to_string(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }

    /// Returns `true` if the advertised host can't be used to reach this node,
    /// because it is empty or an unspecified address like `0.0.0.0`.
    pub fn has_unspecified_host(&self) -> bool {
        if self.host.is_empty() {
            return true;
        }

        match self.host.parse::<IpAddr>() {
            Ok(ip) => ip.is_unspecified(),
            Err(_) => false,
        }
    }

    /// Replace an unusable advertised host with the ip a datagram was received from.
    pub fn with_observed_ip(mut self, from: SocketAddr) -> Node {
        if self.has_unspecified_host() {
            self.host = from.ip().to_string();
        }
        self
    }
}
