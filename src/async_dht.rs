//! AsyncDht node.

use crate::{
    common::{Id, Node},
    dht::{ActorMessage, Dht, DhtWasShutdown},
    rpc::{resolve_address, Info},
};

impl Dht {
    /// Return an async version of the Dht client.
    pub fn as_async(self) -> AsyncDht {
        AsyncDht(self)
    }
}

#[derive(Debug, Clone)]
/// Async version of the Dht node.
pub struct AsyncDht(Dht);

impl AsyncDht {
    // === Getters ===

    /// Information and statistics about this [Dht] node.
    pub async fn info(&self) -> Result<Info, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Info>(1);

        self.0
             .0
            .send(ActorMessage::Info(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    /// Turn this node's routing table to a list of bootstraping nodes.
    pub async fn to_bootstrap(&self) -> Result<Vec<String>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<String>>(1);

        self.0
             .0
            .send(ActorMessage::ToBootstrap(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    // === Public Methods ===

    /// Shutdown the actor thread loop.
    pub async fn shutdown(&mut self) {
        let (sender, receiver) = flume::bounded::<()>(1);

        let _ = self.0 .0.send(ActorMessage::Shutdown(sender));
        let _ = receiver.recv_async().await;
    }

    /// Wait until the bootstrap self-lookup is done.
    ///
    /// Returns true if the routing table isn't empty afterwards.
    pub async fn bootstrapped(&self) -> Result<bool, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<bool>(1);

        self.0
             .0
            .send(ActorMessage::Bootstrapped(sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    /// Send a PING to `address` (`host:port`).
    ///
    /// Hostnames are resolved before awaiting, blocking the current task.
    pub async fn ping(&self, address: &str) -> Result<Option<Node>, DhtWasShutdown> {
        let Some(address) = resolve_address(address) else {
            return Ok(None);
        };

        let (sender, receiver) = flume::bounded::<Option<Node>>(1);

        self.0
             .0
            .send(ActorMessage::Ping(address, sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }

    // === Find nodes ===

    /// Run an iterative lookup and return the closest nodes to `target` it found.
    pub async fn find_node(&self, target: Id) -> Result<Vec<Node>, DhtWasShutdown> {
        let (sender, receiver) = flume::bounded::<Vec<Node>>(1);

        self.0
             .0
            .send(ActorMessage::FindNode(target, sender))
            .map_err(|_| DhtWasShutdown)?;

        receiver.recv_async().await.map_err(|_| DhtWasShutdown)
    }
}

#[cfg(test)]
mod test {
    use std::net::{IpAddr, Ipv4Addr};

    use crate::dht::Testnet;

    use super::*;

    #[test]
    fn shutdown() {
        async fn test() {
            let mut dht = Dht::builder()
                .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .build()
                .unwrap()
                .as_async();

            let a = dht.clone();

            dht.shutdown().await;

            let result = a.find_node(Id::random()).await;

            assert!(matches!(result, Err(DhtWasShutdown)))
        }
        futures::executor::block_on(test());
    }

    #[test]
    fn find_node() {
        async fn test() {
            let testnet = Testnet::new(5).unwrap();

            let a = Dht::builder()
                .bind_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .bootstrap(&testnet.bootstrap)
                .bootstrap_delay(std::time::Duration::from_millis(100))
                .build()
                .unwrap()
                .as_async();

            assert!(a.bootstrapped().await.unwrap());

            let info = a.info().await.unwrap();
            let nodes = a.find_node(Id::random()).await.unwrap();

            assert_eq!(nodes.len(), 5);
            assert!(nodes.iter().all(|node| node.id != *info.id()));
        }

        futures::executor::block_on(test());
    }
}
