use serde::{Deserialize, Serialize};

/// Wire representation of a message, one JSON object per datagram.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub cmd: DHTCommand,

    pub sender: DHTNode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<DHTNode>>,
}

impl DHTMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTMessage, serde_json::Error> {
        let obj = serde_json::from_slice(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DHTCommand {
    Ping,
    Pong,
    FindNode,
    FindNodeResult,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTNode {
    #[serde(rename = "nodeId")]
    pub node_id: String,
    pub host: String,
    pub port: u16,
}
