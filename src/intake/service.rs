//! Message loop — feeds channel traffic through the engine.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinSet;

use crate::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use crate::error::ChannelError;

use super::engine::IntakeEngine;

/// Sent when a reply could not be delivered.
pub const GENERIC_APOLOGY: &str = "Something went wrong. Please try again.";

/// Connects a channel to the intake engine.
pub struct IntakeService {
    engine: Arc<IntakeEngine>,
    channel: Arc<dyn Channel>,
}

impl IntakeService {
    pub fn new(engine: Arc<IntakeEngine>, channel: Arc<dyn Channel>) -> Self {
        Self { engine, channel }
    }

    pub fn engine(&self) -> &Arc<IntakeEngine> {
        &self.engine
    }

    /// Run until Ctrl+C or until every channel stream ends.
    pub async fn run(self: Arc<Self>, stream: MessageStream) {
        self.run_until(stream, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
            tracing::info!("Ctrl+C received, shutting down...");
        })
        .await
    }

    /// Run until `shutdown` resolves or the stream ends, then wait for
    /// messages already being handled.
    ///
    /// Each message is handled on its own task, so a slow plan for one user
    /// never holds up anyone else.
    pub async fn run_until<F>(self: Arc<Self>, mut stream: MessageStream, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut in_flight = JoinSet::new();
        tokio::pin!(shutdown);

        tracing::info!("Intake service ready and listening");

        loop {
            let message = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                msg = stream.next() => match msg {
                    Some(m) => m,
                    None => {
                        tracing::info!("All channel streams ended, shutting down...");
                        break;
                    }
                },
            };

            // Reap finished tasks so the set does not grow without bound.
            while let Some(result) = in_flight.try_join_next() {
                log_join_result(result);
            }

            let service = Arc::clone(&self);
            in_flight.spawn(async move { service.dispatch(message).await });
        }

        while let Some(result) = in_flight.join_next().await {
            log_join_result(result);
        }
    }

    /// Handle one inbound message end to end.
    ///
    /// Delivery failures are logged and answered with [`GENERIC_APOLOGY`];
    /// nothing propagates to the caller.
    pub async fn dispatch(&self, message: IncomingMessage) {
        if let Err(e) = self.handle_message(&message).await {
            tracing::error!(
                channel = %message.channel,
                user_id = %message.user_id,
                error = %e,
                "Error handling message"
            );
            if let Err(e) = self
                .channel
                .respond(&message, OutgoingResponse::text(GENERIC_APOLOGY))
                .await
            {
                tracing::warn!(user_id = %message.user_id, error = %e, "Could not send apology");
            }
        }
    }

    async fn handle_message(&self, message: &IncomingMessage) -> Result<(), ChannelError> {
        tracing::debug!(
            channel = %message.channel,
            user_id = %message.user_id,
            "Inbound message"
        );

        let action = self
            .engine
            .handle_inbound(&message.user_id, &message.content)
            .await;

        for text in action.messages() {
            self.channel
                .respond(message, OutgoingResponse::text(text))
                .await?;
        }
        Ok(())
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Message task failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::error::{DatabaseError, LlmError};
    use crate::intake::engine::ACKNOWLEDGMENT;
    use crate::intake::{
        ConversationStore, PlanSynthesizer, QuestionCatalog, TranscriptWriter,
    };
    use crate::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
    use crate::store::{TranscriptRecord, TranscriptStore};

    struct PlanLlm;

    #[async_trait]
    impl LlmProvider for PlanLlm {
        fn model_name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: "PLAN".into(),
                input_tokens: 0,
                output_tokens: 0,
                finish_reason: FinishReason::Stop,
            })
        }
    }

    struct NullStore;

    #[async_trait]
    impl TranscriptStore for NullStore {
        async fn append(&self, _record: &TranscriptRecord) -> Result<(), DatabaseError> {
            Ok(())
        }

        async fn list_transcripts(
            &self,
            _user_id: &str,
        ) -> Result<Vec<TranscriptRecord>, DatabaseError> {
            Ok(vec![])
        }
    }

    /// Records sends; optionally fails the first `fail_first` of them.
    struct RecordingChannel {
        sent: Mutex<Vec<(String, String)>>,
        fail_first: Mutex<usize>,
    }

    impl RecordingChannel {
        fn new(fail_first: usize) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail_first: Mutex::new(fail_first),
            }
        }

        fn sent_to(&self, user_id: &str) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| u == user_id)
                .map(|(_, text)| text.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "test"
        }

        async fn start(&self) -> Result<MessageStream, ChannelError> {
            Ok(Box::pin(stream::empty::<IncomingMessage>()))
        }

        async fn respond(
            &self,
            msg: &IncomingMessage,
            response: OutgoingResponse,
        ) -> Result<(), ChannelError> {
            {
                let mut remaining = self.fail_first.lock().unwrap();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ChannelError::SendFailed {
                        name: "test".into(),
                        reason: "network down".into(),
                    });
                }
            }
            self.sent
                .lock()
                .unwrap()
                .push((msg.user_id.clone(), response.content));
            Ok(())
        }
    }

    fn service(questions: &[&str], channel: Arc<RecordingChannel>) -> Arc<IntakeService> {
        let (writer, _worker) = TranscriptWriter::spawn(Arc::new(NullStore));
        let engine = IntakeEngine::new(
            QuestionCatalog::new(questions.iter().copied()),
            Arc::new(ConversationStore::new()),
            PlanSynthesizer::new(Arc::new(PlanLlm)),
            writer,
        );
        Arc::new(IntakeService::new(Arc::new(engine), channel))
    }

    #[tokio::test]
    async fn dispatch_sends_question_then_plan() {
        let channel = Arc::new(RecordingChannel::new(0));
        let service = service(&["Q1"], Arc::clone(&channel));

        service.dispatch(IncomingMessage::new("test", "u1", "hi")).await;
        service.dispatch(IncomingMessage::new("test", "u1", "A1")).await;

        assert_eq!(channel.sent_to("u1"), vec!["Q1", ACKNOWLEDGMENT, "PLAN"]);
    }

    #[tokio::test]
    async fn send_failure_triggers_apology() {
        let channel = Arc::new(RecordingChannel::new(1));
        let service = service(&["Q1", "Q2"], Arc::clone(&channel));

        service.dispatch(IncomingMessage::new("test", "u1", "hi")).await;
        assert_eq!(channel.sent_to("u1"), vec![GENERIC_APOLOGY]);

        // The question was still recorded; the next message is its answer.
        service.dispatch(IncomingMessage::new("test", "u1", "A1")).await;
        assert_eq!(channel.sent_to("u1"), vec![GENERIC_APOLOGY, "Q2"]);
    }

    #[tokio::test]
    async fn run_until_drains_stream_and_in_flight_work() {
        let channel = Arc::new(RecordingChannel::new(0));
        let service = service(&["Q1"], Arc::clone(&channel));

        let inbound: MessageStream = Box::pin(stream::iter(vec![
            IncomingMessage::new("test", "alice", "hi"),
            IncomingMessage::new("test", "bob", "hi"),
        ]));
        service
            .run_until(inbound, std::future::pending::<()>())
            .await;

        assert_eq!(channel.sent_to("alice"), vec!["Q1"]);
        assert_eq!(channel.sent_to("bob"), vec!["Q1"]);
    }

    #[tokio::test]
    async fn run_until_stops_on_shutdown() {
        let channel = Arc::new(RecordingChannel::new(0));
        let service = service(&["Q1"], Arc::clone(&channel));

        let inbound: MessageStream = Box::pin(stream::pending::<IncomingMessage>());
        service.run_until(inbound, async {}).await;

        assert!(channel.sent.lock().unwrap().is_empty());
    }
}
