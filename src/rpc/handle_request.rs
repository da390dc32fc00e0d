use std::net::SocketAddr;

use tracing::trace;

use crate::common::{
    FindNodeRequestArguments, FindNodeResponseArguments, Message, MessageType, MAX_BUCKET_SIZE_K,
};

use super::Rpc;

impl Rpc {
    /// Handle a message that doesn't answer any of our pending calls.
    ///
    /// Each request is handled on its own, replies reuse the request's id and go
    /// to the address the sender advertised.
    pub(super) fn handle_request(&mut self, from: SocketAddr, message: Message) {
        let Message {
            id,
            sender,
            message_type,
        } = message;

        let sender = sender.with_observed_ip(from);

        match message_type {
            MessageType::Ping => {
                self.routing_table.add(sender.clone());

                self.socket.reply(&sender.address(), id, MessageType::Pong);
            }
            MessageType::FindNode(FindNodeRequestArguments { target }) => {
                let nodes = self.routing_table.closest(&target, MAX_BUCKET_SIZE_K);

                self.socket.reply(
                    &sender.address(),
                    id,
                    MessageType::FindNodeResult(FindNodeResponseArguments { nodes }),
                );
            }
            MessageType::Pong | MessageType::FindNodeResult(_) => {
                // Late reply to a call that already timed out, or to someone else.
                trace!(
                    context = "rpc_unsolicited_reply",
                    ?id,
                    cmd = %message_type.command(),
                    ?from,
                    "Dropping reply without a pending call"
                );
            }
        }
    }
}
