//! Channel manager — merges inbound streams and routes responses.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

/// Owns every configured channel.
pub struct ChannelManager {
    channels: Vec<Box<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    pub fn add(&mut self, channel: Box<dyn Channel>) {
        tracing::debug!(channel = channel.name(), "Channel registered");
        self.channels.push(channel);
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    fn get(&self, name: &str) -> Option<&dyn Channel> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Start every channel and merge their streams into one.
    pub async fn start_all(&self) -> Result<MessageStream, ChannelError> {
        let mut streams = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let stream = channel.start().await?;
            tracing::info!(channel = channel.name(), "Channel started");
            streams.push(stream);
        }
        Ok(Box::pin(stream::select_all(streams)))
    }

    /// Run every channel's health check, returning the first failure.
    pub async fn health_check_all(&self) -> Result<(), ChannelError> {
        for channel in &self.channels {
            channel.health_check().await?;
        }
        Ok(())
    }

    pub async fn shutdown_all(&self) {
        for channel in &self.channels {
            if let Err(e) = channel.shutdown().await {
                tracing::warn!(channel = channel.name(), error = %e, "Channel shutdown failed");
            }
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes a response to the channel the message arrived on.
#[async_trait]
impl Channel for ChannelManager {
    fn name(&self) -> &str {
        "manager"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        self.start_all().await
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        let channel = self
            .get(&msg.channel)
            .ok_or_else(|| ChannelError::UnknownChannel(msg.channel.clone()))?;
        channel.respond(msg, response).await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        self.health_check_all().await
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        self.shutdown_all().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Channel that yields a fixed set of messages and records responses.
    struct FixedChannel {
        name: &'static str,
        inbound: Vec<&'static str>,
        sent: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Channel for FixedChannel {
        fn name(&self) -> &str {
            self.name
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            let name = self.name;
            let messages: Vec<IncomingMessage> = self
                .inbound
                .iter()
                .map(|text| IncomingMessage::new(name, "u1", *text))
                .collect();
            Ok(Box::pin(stream::iter(messages)))
        }

        async fn respond(
            &self,
            _msg: &IncomingMessage,
            response: OutgoingResponse,
        ) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(response.content);
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_all_merges_streams() {
        let mut manager = ChannelManager::new();
        manager.add(Box::new(FixedChannel {
            name: "a",
            inbound: vec!["one", "two"],
            sent: Arc::default(),
        }));
        manager.add(Box::new(FixedChannel {
            name: "b",
            inbound: vec!["three"],
            sent: Arc::default(),
        }));

        let stream = manager.start_all().await.unwrap();
        let mut contents: Vec<String> = stream.map(|m| m.content).collect().await;
        contents.sort();
        assert_eq!(contents, vec!["one", "three", "two"]);
    }

    #[tokio::test]
    async fn respond_routes_by_channel_name() {
        let sent_a = Arc::new(Mutex::new(Vec::new()));
        let sent_b = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ChannelManager::new();
        manager.add(Box::new(FixedChannel {
            name: "a",
            inbound: vec![],
            sent: Arc::clone(&sent_a),
        }));
        manager.add(Box::new(FixedChannel {
            name: "b",
            inbound: vec![],
            sent: Arc::clone(&sent_b),
        }));

        let msg = IncomingMessage::new("b", "u1", "hi");
        manager
            .respond(&msg, OutgoingResponse::text("hello b"))
            .await
            .unwrap();

        assert!(sent_a.lock().unwrap().is_empty());
        assert_eq!(*sent_b.lock().unwrap(), vec!["hello b"]);
    }

    #[tokio::test]
    async fn respond_unknown_channel_errors() {
        let manager = ChannelManager::new();
        let msg = IncomingMessage::new("nowhere", "u1", "hi");
        let err = manager
            .respond(&msg, OutgoingResponse::text("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::UnknownChannel(ref n) if n == "nowhere"));
    }
}
