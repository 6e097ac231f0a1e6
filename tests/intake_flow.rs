//! End-to-end intake tests.
//!
//! Each test drives the real service loop over a scripted channel, with a
//! stub LLM and an in-memory libSQL store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::time::timeout;

use intake_assist::channels::{Channel, IncomingMessage, MessageStream, OutgoingResponse};
use intake_assist::error::{ChannelError, LlmError};
use intake_assist::intake::{
    ACKNOWLEDGMENT, ConversationStore, FALLBACK_PLAN, IntakeEngine, IntakeService,
    PlanSynthesizer, QuestionCatalog, TranscriptWriter, WriterTotals,
};
use intake_assist::llm::{CompletionRequest, CompletionResponse, FinishReason, LlmProvider};
use intake_assist::store::{LibSqlBackend, MessageRole, TranscriptStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Stub LLM provider (no real API calls).
struct StubLlm {
    reply: Option<&'static str>,
    prompts: Mutex<Vec<String>>,
}

impl StubLlm {
    fn replying(reply: &'static str) -> Self {
        Self {
            reply: Some(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn unavailable() -> Self {
        Self {
            reply: None,
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmProvider for StubLlm {
    fn model_name(&self) -> &str {
        "stub"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        if let Some(message) = request.messages.last() {
            self.prompts.lock().unwrap().push(message.content.clone());
        }
        match self.reply {
            Some(content) => Ok(CompletionResponse {
                content: content.to_string(),
                input_tokens: 10,
                output_tokens: 5,
                finish_reason: FinishReason::Stop,
            }),
            None => Err(LlmError::AuthFailed {
                provider: "stub".into(),
            }),
        }
    }
}

/// Channel that replays a script, one message per step, and records replies.
///
/// Each message is released only after the previous one has been fully
/// answered, so turns arrive in order like a real chat.
struct ScriptedChannel {
    script: Vec<(&'static str, &'static str)>,
    sent: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedChannel {
    fn new(script: Vec<(&'static str, &'static str)>) -> Self {
        Self {
            script,
            sent: Arc::default(),
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
impl Channel for ScriptedChannel {
    fn name(&self) -> &str {
        "script"
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let sent = Arc::clone(&self.sent);
        let script = self.script.clone();
        let stream = stream::unfold((script.into_iter(), 0usize), move |(mut rest, idx)| {
            let sent = Arc::clone(&sent);
            async move {
                // Every message ends with exactly one non-acknowledgment reply
                // (a question or a plan); wait for all earlier ones.
                loop {
                    let answered = sent
                        .lock()
                        .unwrap()
                        .iter()
                        .filter(|(_, text)| text != ACKNOWLEDGMENT)
                        .count();
                    if answered >= idx {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                let (user, text) = rest.next()?;
                let msg = IncomingMessage::new("script", user, text);
                Some((msg, (rest, idx + 1)))
            }
        });
        Ok(Box::pin(stream))
    }

    async fn respond(
        &self,
        msg: &IncomingMessage,
        response: OutgoingResponse,
    ) -> Result<(), ChannelError> {
        self.sent
            .lock()
            .unwrap()
            .push((msg.user_id.clone(), response.content));
        Ok(())
    }
}

struct Bot {
    service: Arc<IntakeService>,
    worker: tokio::task::JoinHandle<WriterTotals>,
    store: Arc<LibSqlBackend>,
}

async fn bot(questions: &[&str], llm: Arc<StubLlm>, channel: Arc<ScriptedChannel>) -> Bot {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let (writer, worker) = TranscriptWriter::spawn(store.clone());
    let engine = IntakeEngine::new(
        QuestionCatalog::new(questions.iter().copied()),
        Arc::new(ConversationStore::new()),
        PlanSynthesizer::new(llm).with_max_tokens(150),
        writer,
    );
    Bot {
        service: Arc::new(IntakeService::new(Arc::new(engine), channel)),
        worker,
        store,
    }
}

/// Run the service over the channel's script, then flush transcripts.
async fn run_to_completion(bot: Bot, channel: &ScriptedChannel) -> Arc<LibSqlBackend> {
    let stream = channel.start().await.unwrap();
    timeout(
        TEST_TIMEOUT,
        Arc::clone(&bot.service).run_until(stream, std::future::pending::<()>()),
    )
    .await
    .expect("service did not drain in time");

    drop(bot.service);
    let totals = timeout(TEST_TIMEOUT, bot.worker)
        .await
        .expect("transcript worker did not stop")
        .unwrap();
    assert_eq!(totals.failed, 0);
    bot.store
}

#[tokio::test]
async fn two_questions_end_to_end() {
    let channel = Arc::new(ScriptedChannel::new(vec![
        ("u1", "hi"),
        ("u1", "A1"),
        ("u1", "A2"),
    ]));
    let llm = Arc::new(StubLlm::replying("PLAN"));
    let bot = bot(&["Q1", "Q2"], Arc::clone(&llm), Arc::clone(&channel)).await;

    let store = run_to_completion(bot, &channel).await;

    assert_eq!(channel.sent_to("u1"), vec!["Q1", "Q2", ACKNOWLEDGMENT, "PLAN"]);

    let transcripts = store.list_transcripts("u1").await.unwrap();
    assert_eq!(transcripts.len(), 1);
    let messages: Vec<(MessageRole, &str)> = transcripts[0]
        .messages
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        messages,
        vec![
            (MessageRole::Bot, "Q1"),
            (MessageRole::User, "A1"),
            (MessageRole::Bot, "Q2"),
            (MessageRole::User, "A2"),
            (MessageRole::Bot, "PLAN"),
        ]
    );

    let prompts = llm.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("bot step 0: Q1"));
    assert!(prompts[0].contains("user step 3: A2"));
}

#[tokio::test]
async fn llm_outage_sends_fallback_and_still_saves() {
    let channel = Arc::new(ScriptedChannel::new(vec![("u1", "hi"), ("u1", "A1")]));
    let bot = bot(&["Q1"], Arc::new(StubLlm::unavailable()), Arc::clone(&channel)).await;

    let store = run_to_completion(bot, &channel).await;

    assert_eq!(channel.sent_to("u1"), vec!["Q1", ACKNOWLEDGMENT, FALLBACK_PLAN]);
    let transcripts = store.list_transcripts("u1").await.unwrap();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(
        transcripts[0].messages.last().map(|m| m.content.as_str()),
        Some(FALLBACK_PLAN)
    );
}

#[tokio::test]
async fn interleaved_users_get_independent_intakes() {
    let channel = Arc::new(ScriptedChannel::new(vec![
        ("alice", "hi"),
        ("bob", "hello"),
        ("alice", "a1"),
        ("bob", "b1"),
    ]));
    let bot = bot(&["Q1"], Arc::new(StubLlm::replying("PLAN")), Arc::clone(&channel)).await;

    let store = run_to_completion(bot, &channel).await;

    for user in ["alice", "bob"] {
        assert_eq!(channel.sent_to(user), vec!["Q1", ACKNOWLEDGMENT, "PLAN"]);
        assert_eq!(store.list_transcripts(user).await.unwrap().len(), 1);
    }
    let alice = &store.list_transcripts("alice").await.unwrap()[0];
    assert_eq!(alice.messages[1].content, "a1");
}

#[tokio::test]
async fn returning_user_starts_a_second_transcript() {
    let channel = Arc::new(ScriptedChannel::new(vec![
        ("u1", "hi"),
        ("u1", "first"),
        ("u1", "back again"),
        ("u1", "second"),
    ]));
    let bot = bot(&["Q1"], Arc::new(StubLlm::replying("PLAN")), Arc::clone(&channel)).await;

    let store = run_to_completion(bot, &channel).await;

    assert_eq!(
        channel.sent_to("u1"),
        vec!["Q1", ACKNOWLEDGMENT, "PLAN", "Q1", ACKNOWLEDGMENT, "PLAN"]
    );
    let transcripts = store.list_transcripts("u1").await.unwrap();
    assert_eq!(transcripts.len(), 2);
    assert_eq!(transcripts[0].messages[1].content, "first");
    assert_eq!(transcripts[1].messages[1].content, "second");
}
