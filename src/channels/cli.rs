//! Terminal channel for running an intake locally.
//!
//! Every line typed on stdin is one message from [`CLI_USER_ID`]; replies are
//! printed to stdout. EOF ends the stream.

use async_trait::async_trait;
use futures::stream;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Identity used for every message typed on the terminal.
pub const CLI_USER_ID: &str = "local-user";

const CHANNEL_NAME: &str = "cli";
const PROMPT: &str = "> ";

pub struct CliChannel;

/// A typed line as an inbound message; blank lines are not messages.
fn line_to_message(line: &str) -> Option<IncomingMessage> {
    let line = line.trim();
    (!line.is_empty()).then(|| IncomingMessage::new(CHANNEL_NAME, CLI_USER_ID, line))
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let lines = BufReader::new(tokio::io::stdin()).lines();
        eprint!("{PROMPT}");

        let stream = stream::unfold(lines, |mut lines| async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match line_to_message(&line) {
                        Some(msg) => return Some((msg, lines)),
                        None => eprint!("{PROMPT}"),
                    },
                    Ok(None) => return None,
                    Err(e) => {
                        tracing::error!(error = %e, "Error reading stdin");
                        return None;
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        _msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        println!("\n{}\n", response.content);
        eprint!("{PROMPT}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_line_becomes_local_user_message() {
        let msg = line_to_message("  I am 34  ").unwrap();
        assert_eq!(msg.channel, "cli");
        assert_eq!(msg.user_id, CLI_USER_ID);
        assert_eq!(msg.content, "I am 34");
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(line_to_message("").is_none());
        assert!(line_to_message("   \t").is_none());
    }

    #[tokio::test]
    async fn respond_never_fails() {
        let msg = IncomingMessage::new("cli", CLI_USER_ID, "hi");
        CliChannel
            .respond(&msg, OutgoingResponse::text("Q1"))
            .await
            .unwrap();
    }
}
