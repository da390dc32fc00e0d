use std::net::SocketAddr;

use crate::common::Id;

use super::Rpc;

/// Information and statistics about this Kademlia node.
#[derive(Debug, Clone)]
pub struct Info {
    id: Id,
    local_addr: SocketAddr,
    routing_table_size: usize,
    active_lookups: usize,
    pending_calls: usize,
    bootstrapped: bool,
}

impl Info {
    /// This Node's [Id]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Local UDP socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of nodes in the routing table.
    pub fn routing_table_size(&self) -> usize {
        self.routing_table_size
    }

    /// Number of lookups still running.
    pub fn active_lookups(&self) -> usize {
        self.active_lookups
    }

    /// Number of requests waiting for a reply or a timeout.
    pub fn pending_calls(&self) -> usize {
        self.pending_calls
    }

    /// Returns `true` once the bootstrap self-lookup is done.
    pub fn bootstrapped(&self) -> bool {
        self.bootstrapped
    }
}

impl From<&Rpc> for Info {
    fn from(rpc: &Rpc) -> Self {
        Self {
            id: *rpc.id(),
            local_addr: rpc.local_addr(),
            routing_table_size: rpc.routing_table().size(),
            active_lookups: rpc.active_lookups(),
            pending_calls: rpc.pending_calls(),
            bootstrapped: rpc.is_bootstrapped(),
        }
    }
}
