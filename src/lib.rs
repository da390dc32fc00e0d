#![doc = include_str!("../README.md")]
//! ## Feature flags
#![doc = document_features::document_features!()]
//!

// Public modules
mod common;
mod error;

#[cfg(feature = "async")]
pub mod async_dht;
mod dht;
pub mod rpc;

pub use crate::common::{
    messages, Command, FindNodeRequestArguments, FindNodeResponseArguments, Id, KBucket,
    Message, MessageType, Node, RoutingTable, ID_SIZE, KEY_SIZE, MAX_BUCKET_SIZE_K,
};
pub use dht::{Dht, DhtBuilder, DhtWasShutdown, Testnet};
pub use error::{Error, Result};

pub mod errors {
    //! Exported errors
    pub use super::dht::DhtWasShutdown;
    pub use super::error::Error;
    pub use super::rpc::SendMessageError;
}
