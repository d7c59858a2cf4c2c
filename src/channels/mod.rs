//! Chat transport abstraction.

pub mod cli;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::ChannelError;
use crate::pipeline::IncomingMessage;

pub use cli::CliChannel;

/// Inbound messages, in arrival order.
pub type MessageStream = Pin<Box<dyn Stream<Item = IncomingMessage> + Send>>;

/// A source of chat messages that can also reply.
#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Begin receiving. The stream ends when the transport closes.
    async fn start(&self) -> Result<MessageStream, ChannelError>;

    /// Reply in the chat `msg` came from.
    async fn respond(&self, msg: &IncomingMessage, reply: &str) -> Result<(), ChannelError>;
}
