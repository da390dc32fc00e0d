//! Serialize and deserialize DHT messages.

mod internal;

use std::fmt::{self, Display, Formatter};
use std::net::IpAddr;
use std::str::FromStr;

use crate::common::{Id, Node};
use crate::{Error, Result};

#[derive(Debug, PartialEq, Clone)]
pub struct Message {
    /// Correlates a reply with its request, `None` on fire-and-forget messages
    /// until the socket assigns one.
    pub id: Option<String>,

    /// The node that sent this message, as it sees itself.
    pub sender: Node,

    pub message_type: MessageType,
}

#[derive(Debug, PartialEq, Clone)]
pub enum MessageType {
    Ping,
    Pong,
    FindNode(FindNodeRequestArguments),
    FindNodeResult(FindNodeResponseArguments),
}

// === FIND_NODE ===
#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeRequestArguments {
    pub target: Id,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FindNodeResponseArguments {
    pub nodes: Vec<Node>,
}

/// The `cmd` of a message.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Command {
    Ping,
    Pong,
    FindNode,
    FindNodeResult,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Pong => "PONG",
            Command::FindNode => "FIND_NODE",
            Command::FindNodeResult => "FIND_NODE_RESULT",
        }
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MessageType {
    pub fn command(&self) -> Command {
        match self {
            MessageType::Ping => Command::Ping,
            MessageType::Pong => Command::Pong,
            MessageType::FindNode(_) => Command::FindNode,
            MessageType::FindNodeResult(_) => Command::FindNodeResult,
        }
    }
}

impl Message {
    /// Create a message without an id, the socket will assign one when sending requests.
    pub fn new(sender: Node, message_type: MessageType) -> Message {
        Message {
            id: None,
            sender,
            message_type,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Message {
        self.id = Some(id.into());
        self
    }

    pub fn command(&self) -> Command {
        self.message_type.command()
    }

    /// Nodes returned in a FIND_NODE_RESULT.
    pub fn closer_nodes(&self) -> Option<&[Node]> {
        match &self.message_type {
            MessageType::FindNodeResult(FindNodeResponseArguments { nodes }) => {
                Some(nodes.as_slice())
            }
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.clone().into_serde_message().to_bytes()?)
    }

    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Message> {
        Message::from_serde_message(internal::DHTMessage::from_bytes(bytes.as_ref())?)
    }

    fn into_serde_message(self) -> internal::DHTMessage {
        let (cmd, args, result) = match self.message_type {
            MessageType::Ping => (internal::DHTCommand::Ping, None, None),
            MessageType::Pong => (internal::DHTCommand::Pong, None, None),
            MessageType::FindNode(FindNodeRequestArguments { target }) => (
                internal::DHTCommand::FindNode,
                Some(vec![target.to_string()]),
                None,
            ),
            MessageType::FindNodeResult(FindNodeResponseArguments { nodes }) => (
                internal::DHTCommand::FindNodeResult,
                None,
                Some(nodes.into_iter().map(node_to_serde).collect()),
            ),
        };

        internal::DHTMessage {
            id: self.id,
            cmd,
            sender: node_to_serde(self.sender),
            args,
            result,
        }
    }

    fn from_serde_message(msg: internal::DHTMessage) -> Result<Message> {
        Ok(Message {
            id: msg.id,
            sender: node_from_serde(msg.sender)?,
            message_type: match msg.cmd {
                internal::DHTCommand::Ping => MessageType::Ping,
                internal::DHTCommand::Pong => MessageType::Pong,
                internal::DHTCommand::FindNode => {
                    let target = msg
                        .args
                        .as_ref()
                        .and_then(|args| args.first())
                        .ok_or(Error::MissingField("FIND_NODE target"))?;

                    MessageType::FindNode(FindNodeRequestArguments {
                        target: Id::from_str(target)?,
                    })
                }
                internal::DHTCommand::FindNodeResult => {
                    MessageType::FindNodeResult(FindNodeResponseArguments {
                        nodes: msg
                            .result
                            .unwrap_or_default()
                            .into_iter()
                            .map(node_from_serde)
                            .collect::<Result<Vec<_>>>()?,
                    })
                }
            },
        })
    }
}

fn node_to_serde(node: Node) -> internal::DHTNode {
    internal::DHTNode {
        node_id: node.id.to_string(),
        host: node.host,
        port: node.port,
    }
}

fn node_from_serde(node: internal::DHTNode) -> Result<Node> {
    // Empty hosts are replaced with the observed ip later, anything else has to
    // be sendable without a dns lookup.
    if !node.host.is_empty() && node.host.parse::<IpAddr>().is_err() {
        return Err(Error::InvalidHost(node.host));
    }

    Ok(Node {
        id: Id::from_str(&node.node_id)?,
        host: node.host,
        port: node.port,
    })
}
