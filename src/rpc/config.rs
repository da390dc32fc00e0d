use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use crate::common::Id;

use super::{
    DEFAULT_BOOTSTRAP_DELAY, DEFAULT_MAX_LOOKUP_ROUNDS, DEFAULT_REFRESH_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT,
};

#[derive(Debug, Clone)]
/// Dht Configurations
pub struct Config {
    /// This node's Id.
    ///
    /// Defaults to None, where a random Id is generated.
    pub id: Option<Id>,
    /// Seed nodes (`host:port`) to ping on startup.
    ///
    /// Defaults to an empty list, making this node the first of its network.
    pub bootstrap: Vec<String>,
    /// Explicit port to listen on.
    ///
    /// Defaults to None, where an ephemeral port is used.
    pub port: Option<u16>,
    /// Address to bind the UDP socket to.
    ///
    /// Defaults to None, where all IPv4 interfaces (`0.0.0.0`) are used.
    pub bind_address: Option<IpAddr>,
    /// Ip other nodes should use to reach this node, sent in the `sender` of every message.
    ///
    /// Defaults to None, where the bound ip is advertised. Receivers replace
    /// an unspecified host like `0.0.0.0` with the ip they received the datagram from.
    pub host: Option<String>,
    /// Request timeout used when a call doesn't set its own.
    ///
    /// The longer this duration is, the longer lookups take until they are deemed "done".
    /// The shorter this duration is, the more replies from busy nodes we miss out on.
    ///
    /// Defaults to [DEFAULT_REQUEST_TIMEOUT]
    pub request_timeout: Duration,
    /// Time to wait after pinging the bootstrap nodes before running the
    /// self-lookup that populates the routing table.
    ///
    /// Defaults to [DEFAULT_BOOTSTRAP_DELAY]
    pub bootstrap_delay: Duration,
    /// Interval between self-lookups refreshing the routing table.
    ///
    /// Defaults to [DEFAULT_REFRESH_INTERVAL]
    pub refresh_interval: Duration,
    /// Upper bound on the rounds of a single lookup.
    ///
    /// Defaults to [DEFAULT_MAX_LOOKUP_ROUNDS]
    pub max_lookup_rounds: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            id: None,
            bootstrap: Vec::new(),
            port: None,
            bind_address: None,
            host: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            bootstrap_delay: DEFAULT_BOOTSTRAP_DELAY,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            max_lookup_rounds: DEFAULT_MAX_LOOKUP_ROUNDS,
        }
    }
}

impl Config {
    pub(crate) fn bind_address(&self) -> IpAddr {
        self.bind_address
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}
