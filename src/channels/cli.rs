//! CLI channel: stdin/stdout REPL for local runs.
//!
//! Every line is a message in chat 0 from user 0. Message ids count up
//! from 1 so each line gets its own ledger key.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, MessageStream};
use crate::error::ChannelError;
use crate::pipeline::IncomingMessage;

pub const CLI_CHAT_ID: i64 = 0;
pub const CLI_USER_ID: i64 = 0;

pub struct CliChannel {
    next_id: Arc<AtomicI64>,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn one input line into a message, or `None` for a blank line.
fn line_to_message(line: &str, next_id: &AtomicI64) -> Option<IncomingMessage> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let id = next_id.fetch_add(1, Ordering::SeqCst);
    Some(IncomingMessage::new(id, CLI_CHAT_ID, Some(CLI_USER_ID), line))
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let next_id = Arc::clone(&self.next_id);

        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            eprint!("> ");

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let Some(msg) = line_to_message(&line, &next_id) else {
                            eprint!("> ");
                            continue;
                        };
                        if tx.send(msg).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        break;
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn respond(&self, _msg: &IncomingMessage, reply: &str) -> Result<(), ChannelError> {
        println!("\n{reply}\n");
        eprint!("> ");
        Ok(())
    }
}
