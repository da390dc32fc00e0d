//! UDP socket layer managing incoming/outgoing requests and replies.

mod pending_calls;

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{debug, trace, warn};

use crate::common::{Id, Message, MessageType, Node};

use super::config::Config;
use super::OnComplete;
pub use pending_calls::{PendingCall, PendingCalls};

/// Largest UDP payload, a FIND_NODE_RESULT with K nodes takes more than 2KB.
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Random bytes in a generated message id.
const MESSAGE_ID_SIZE: usize = 32;

/// The maximum duration to backoff checking the [UdpSocket] buffer after it is empty.
/// Lower values increases CPU usage, but reduces latency, and drains the buffer faster,
/// reducing the risk of packet loss. It is also the resolution of request deadlines.
pub const MAX_THREAD_BLOCK_DURATION: Duration = Duration::from_millis(10);

/// How long a request waits for its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTimeout {
    /// Use the socket's configured request timeout.
    Default,
    /// Give up after this duration.
    After(Duration),
    /// Only resolve on reply.
    Never,
}

impl RequestTimeout {
    /// `0` is the default timeout, a negative value disables the timeout.
    pub fn from_millis(millis: i64) -> Self {
        match millis {
            0 => RequestTimeout::Default,
            m if m < 0 => RequestTimeout::Never,
            m => RequestTimeout::After(Duration::from_millis(m as u64)),
        }
    }
}

/// A datagram read off the socket.
#[derive(Debug)]
pub enum Incoming {
    /// A message that doesn't answer any pending call, usually a request.
    Message(Message, SocketAddr),
    /// The reply to a pending call, which has been removed.
    Reply(Message, SocketAddr, OnComplete),
}

/// A UdpSocket wrapper that formats and correlates DHT requests and replies.
#[derive(Debug)]
pub struct RpcSocket {
    socket: UdpSocket,
    local_addr: SocketAddr,
    /// This node, as written in the `sender` of every message.
    node: Node,
    request_timeout: Duration,
    pending_calls: PendingCalls,
    /// Calls that couldn't be sent, resolved by the next [Self::expired].
    failed: Vec<OnComplete>,
}

impl RpcSocket {
    pub(crate) fn new(config: &Config, id: Id) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind(SocketAddr::from((
            config.bind_address(),
            config.port.unwrap_or(0),
        )))?;

        let local_addr = socket.local_addr()?;

        socket.set_nonblocking(true)?;

        let host = config
            .host
            .clone()
            .unwrap_or_else(|| local_addr.ip().to_string());

        if host.parse::<IpAddr>().is_err() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("advertised host has to be an ip address, got {host:?}"),
            ));
        }

        Ok(Self {
            socket,
            local_addr,
            node: Node::new(id, host, local_addr.port()),
            request_timeout: config.request_timeout,
            pending_calls: PendingCalls::new(),
            failed: Vec::new(),
        })
    }

    // === Getters ===

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node as advertised to others.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Number of calls waiting for a reply.
    pub fn pending(&self) -> usize {
        self.pending_calls.len()
    }

    // === Public Methods ===

    /// Returns true if this message id is still waiting for a reply.
    #[cfg(test)]
    pub fn inflight(&self, id: &str) -> bool {
        self.pending_calls.contains(id)
    }

    /// Send a request to `to` (`host:port`) and return its message id.
    ///
    /// The reply, or its absence, is handed back with `on_complete` through
    /// [Self::recv_from] or [Self::expired].
    pub fn request(
        &mut self,
        to: &str,
        message_type: MessageType,
        timeout: RequestTimeout,
        on_complete: Option<OnComplete>,
    ) -> String {
        self.send(
            to,
            Message::new(self.node.clone(), message_type),
            timeout,
            on_complete,
        )
    }

    /// Reply to a request, reusing its message id.
    pub fn reply(&mut self, to: &str, id: Option<String>, message_type: MessageType) {
        let message = Message {
            id,
            sender: self.node.clone(),
            message_type,
        };

        self.send(to, message, RequestTimeout::Default, None);
    }

    /// Send a message, assigning it an id and this node as its sender.
    ///
    /// If `on_complete` is set, it is registered as a pending call, unless sending
    /// fails, in which case it resolves without a reply. Nothing is ever retried.
    pub fn send(
        &mut self,
        to: &str,
        mut message: Message,
        timeout: RequestTimeout,
        on_complete: Option<OnComplete>,
    ) -> String {
        let id = message.id.get_or_insert_with(message_id).clone();
        message.sender = self.node.clone();

        if let Err(error) = self.send_message(to, &message) {
            debug!(?error, cmd = %message.command(), to, "Error sending message");

            if let Some(on_complete) = on_complete {
                self.failed.push(on_complete);
            }

            return id;
        }

        if let Some(on_complete) = on_complete {
            let deadline = match timeout {
                RequestTimeout::Default => Some(Instant::now() + self.request_timeout),
                RequestTimeout::After(duration) => Some(Instant::now() + duration),
                RequestTimeout::Never => None,
            };

            let displaced = self.pending_calls.insert(
                id.clone(),
                PendingCall {
                    to: to.to_string(),
                    on_complete,
                    deadline,
                },
            );

            if let Some(call) = displaced {
                warn!(%id, to = %call.to, "Message id reused while still pending");
                self.failed.push(call.on_complete);
            }
        }

        id
    }

    /// Take every call that failed to send or passed its deadline.
    pub fn expired(&mut self) -> Vec<OnComplete> {
        let mut done: Vec<OnComplete> = self.failed.drain(..).collect();

        for (id, call) in self.pending_calls.expire(Instant::now()) {
            trace!(context = "socket_timeout", %id, to = %call.to, "Request timed out");
            done.push(call.on_complete);
        }

        done
    }

    /// Receives a single message on the socket.
    ///
    /// Replies to pending calls come back with their [OnComplete], anything else is
    /// left to the caller. Invalid datagrams are logged and dropped.
    pub fn recv_from(&mut self) -> Option<Incoming> {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        match self.socket.recv_from(&mut buf) {
            Ok((amt, from)) => {
                let bytes = &buf[..amt];

                match Message::from_bytes(bytes) {
                    Ok(message) => {
                        trace!(
                            context = "socket_message_receiving",
                            ?message,
                            ?from,
                            "Received message"
                        );
                        debug!(
                            cmd = %message.command(),
                            from = %message.sender.address(),
                            "->"
                        );

                        let call = message
                            .id
                            .as_deref()
                            .and_then(|id| self.pending_calls.remove(id));

                        return Some(match call {
                            Some(call) => Incoming::Reply(message, from, call.on_complete),
                            None => Incoming::Message(message, from),
                        });
                    }
                    Err(error) => {
                        debug!(
                            context = "socket_error",
                            ?error,
                            ?from,
                            message = ?String::from_utf8_lossy(bytes),
                            "Received invalid message."
                        );
                    }
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(MAX_THREAD_BLOCK_DURATION);
            }
            Err(e) => {
                trace!(
                    context = "socket_error",
                    ?e,
                    "recv_from failed unexpectedly"
                );
            }
        }

        None
    }

    // === Private Methods ===

    /// Send a raw dht message
    fn send_message(&mut self, to: &str, message: &Message) -> Result<(), SendMessageError> {
        // Never resolve names here, a dns lookup would block the whole node.
        let address: SocketAddr = to
            .parse()
            .map_err(|_| SendMessageError::InvalidAddress(to.to_string()))?;

        self.socket.send_to(&message.to_bytes()?, address)?;
        debug!(cmd = %message.command(), to, "<-");
        trace!(context = "socket_message_sending", message = ?message);
        Ok(())
    }
}

/// Random hex id for a message, 256 bits of entropy.
fn message_id() -> String {
    let bytes: [u8; MESSAGE_ID_SIZE] = rand::thread_rng().gen();
    hex::encode(bytes)
}

#[derive(thiserror::Error, Debug)]
/// Failure to put a message on the wire.
pub enum SendMessageError {
    /// Errors related to encoding DHT messages.
    #[error("Failed to encode message: {0}")]
    Encode(#[from] crate::Error),

    /// Messages are only sent to `ip:port` addresses.
    #[error("Not an ip socket address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),
}

#[cfg(test)]
mod test {
    use std::net::Ipv4Addr;
    use std::thread;

    use crate::common::{FindNodeRequestArguments, FindNodeResponseArguments};

    use super::*;

    fn socket() -> RpcSocket {
        RpcSocket::new(
            &Config {
                bind_address: Some(Ipv4Addr::LOCALHOST.into()),
                ..Default::default()
            },
            Id::random(),
        )
        .unwrap()
    }

    /// A plain udp socket standing in for a remote node.
    fn remote() -> (UdpSocket, String) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let address = socket.local_addr().unwrap().to_string();
        (socket, address)
    }

    fn read_message(socket: &UdpSocket) -> (Message, SocketAddr) {
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (amt, from) = socket.recv_from(&mut buf).unwrap();
        (Message::from_bytes(&buf[..amt]).unwrap(), from)
    }

    fn recv_until<T>(socket: &mut RpcSocket, mut f: impl FnMut(Incoming) -> Option<T>) -> T {
        let started = Instant::now();
        loop {
            assert!(started.elapsed() < Duration::from_secs(2), "timed out");
            if let Some(incoming) = socket.recv_from() {
                if let Some(result) = f(incoming) {
                    return result;
                }
            }
        }
    }

    #[test]
    fn message_ids() {
        let a = message_id();
        let b = message_id();

        assert_eq!(a.len(), MESSAGE_ID_SIZE * 2);
        assert_ne!(a, b);
    }

    #[test]
    fn request_timeout_from_millis() {
        assert_eq!(RequestTimeout::from_millis(0), RequestTimeout::Default);
        assert_eq!(RequestTimeout::from_millis(-1), RequestTimeout::Never);
        assert_eq!(
            RequestTimeout::from_millis(100),
            RequestTimeout::After(Duration::from_millis(100))
        );
    }

    #[test]
    fn request_assigns_id_and_sender() {
        let mut client = socket();
        let (remote, address) = remote();

        let id = client.request(&address, MessageType::Ping, RequestTimeout::Default, None);

        let (message, from) = read_message(&remote);

        assert_eq!(message.id, Some(id.clone()));
        assert_eq!(message.message_type, MessageType::Ping);
        assert_eq!(&message.sender, client.node());
        assert_eq!(from.port(), client.local_addr().port());

        // Fire and forget
        assert!(!client.inflight(&id));
    }

    #[test]
    fn send_keeps_given_id() {
        let mut client = socket();
        let (remote, address) = remote();

        let message = Message::new(Node::new(Id::random(), "nowhere", 1), MessageType::Pong)
            .with_id("m1");
        let id = client.send(&address, message, RequestTimeout::Default, None);

        let (message, _) = read_message(&remote);

        assert_eq!(id, "m1");
        assert_eq!(message.id.as_deref(), Some("m1"));
        assert_eq!(&message.sender, client.node());
    }

    #[test]
    fn reply_resolves_pending_call() {
        let mut client = socket();
        let (remote, address) = remote();
        let client_address = client.local_addr().to_string();

        let target = Id::random();
        let id = client.request(
            &address,
            MessageType::FindNode(FindNodeRequestArguments { target }),
            RequestTimeout::Default,
            Some(OnComplete::Lookup(target)),
        );
        assert!(client.inflight(&id));
        assert_eq!(client.pending(), 1);

        let server_thread = thread::spawn(move || {
            let (request, _) = read_message(&remote);

            let reply = Message::new(
                Node::new(Id::random(), "127.0.0.1", 1),
                MessageType::FindNodeResult(FindNodeResponseArguments { nodes: vec![] }),
            )
            .with_id(request.id.unwrap());

            remote
                .send_to(&reply.to_bytes().unwrap(), client_address)
                .unwrap();
        });

        let (reply, on_complete) = recv_until(&mut client, |incoming| match incoming {
            Incoming::Reply(message, _, on_complete) => Some((message, on_complete)),
            _ => None,
        });

        server_thread.join().unwrap();

        assert_eq!(reply.id, Some(id.clone()));
        assert!(matches!(on_complete, OnComplete::Lookup(t) if t == target));
        assert!(!client.inflight(&id));
        assert!(client.expired().is_empty());
    }

    #[test]
    fn unknown_id_is_a_plain_message() {
        let mut client = socket();
        let (remote, _) = remote();

        let message = Message::new(Node::new(Id::random(), "127.0.0.1", 1), MessageType::Pong)
            .with_id("unknown");
        remote
            .send_to(&message.to_bytes().unwrap(), client.local_addr())
            .unwrap();

        let received = recv_until(&mut client, |incoming| match incoming {
            Incoming::Message(message, _) => Some(message),
            _ => None,
        });

        assert_eq!(received.id.as_deref(), Some("unknown"));
    }

    #[test]
    fn invalid_datagrams_are_dropped() {
        let mut client = socket();
        let (remote, _) = remote();

        remote.send_to(b"not json", client.local_addr()).unwrap();

        let valid = Message::new(Node::new(Id::random(), "127.0.0.1", 1), MessageType::Ping);
        remote
            .send_to(&valid.to_bytes().unwrap(), client.local_addr())
            .unwrap();

        // The garbage is skipped and the next message still comes through.
        let received = recv_until(&mut client, |incoming| match incoming {
            Incoming::Message(message, _) => Some(message),
            _ => None,
        });

        assert_eq!(received.message_type, MessageType::Ping);
    }

    #[test]
    fn request_timeout() {
        let mut client = socket();
        let (remote, address) = remote();

        let started = Instant::now();
        let id = client.request(
            &address,
            MessageType::Ping,
            RequestTimeout::After(Duration::from_millis(100)),
            Some(OnComplete::Ping(None)),
        );

        let expired = loop {
            let expired = client.expired();
            if !expired.is_empty() {
                break expired;
            }
            assert!(started.elapsed() < Duration::from_secs(2));
            client.recv_from();
        };

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(expired.len(), 1);
        assert!(!client.inflight(&id));

        // A late reply is not matched to the expired call.
        let (request, _) = read_message(&remote);
        let late = Message::new(Node::new(Id::random(), "127.0.0.1", 1), MessageType::Pong)
            .with_id(request.id.unwrap());
        remote
            .send_to(&late.to_bytes().unwrap(), client.local_addr())
            .unwrap();

        let received = recv_until(&mut client, |incoming| match incoming {
            Incoming::Reply(..) => panic!("late reply resolved a call twice"),
            Incoming::Message(message, _) => Some(message),
        });

        assert_eq!(received.message_type, MessageType::Pong);
        assert!(client.expired().is_empty());
    }

    #[test]
    fn never_timeout_waits_for_reply() {
        let mut client = socket();
        let (_remote, address) = remote();

        let id = client.request(
            &address,
            MessageType::Ping,
            RequestTimeout::Never,
            Some(OnComplete::Ping(None)),
        );

        thread::sleep(Duration::from_millis(50));

        assert!(client.expired().is_empty());
        assert!(client.inflight(&id));
    }

    #[test]
    fn send_failure_resolves_without_reply() {
        let mut client = socket();

        let id = client.request(
            "not an address",
            MessageType::Ping,
            RequestTimeout::Default,
            Some(OnComplete::Ping(None)),
        );

        assert!(!client.inflight(&id));

        let expired = client.expired();
        assert_eq!(expired.len(), 1);
        assert!(matches!(expired[0], OnComplete::Ping(None)));
    }

    #[test]
    fn hostnames_are_not_resolved() {
        let mut client = socket();

        for to in ["localhost:6881", "node.example.com:6881"] {
            client.request(
                to,
                MessageType::Ping,
                RequestTimeout::Default,
                Some(OnComplete::Ping(None)),
            );
        }

        assert_eq!(client.pending(), 0);
        assert_eq!(client.expired().len(), 2);
    }
}
