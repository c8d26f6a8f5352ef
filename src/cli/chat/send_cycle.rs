use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::conversation_state::{ConversationState, Message, Role};
use crate::provider_client::{AiProvider, ChatMessage, ChatOptions, ChatRole, ProviderError, Reply};

/// Turn recorded in place of a reply when the provider call fails.
pub const PROVIDER_FAILURE_NOTICE: &str = "Something went wrong. Ensure you are logged into your AI provider.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Blank or whitespace-only input.
    EmptyInput,
    /// A request is already in flight.
    Busy,
    /// A completion arrived with nothing in flight.
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    CapabilityUnavailable,
}

/// Result of the synchronous half of a send.
pub enum SendOutcome {
    Started(PendingRequest),
    Ignored(IgnoreReason),
    Refused(Refusal),
}

/// How a send settled, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendReport {
    Replied,
    Failed,
    Ignored(IgnoreReason),
    Refused(Refusal),
}

/// An assembled request that has not been dispatched yet.
///
/// Owns its provider handle so the caller can await it without holding a
/// borrow on the conversation.
pub struct PendingRequest {
    provider: Arc<dyn AiProvider>,
    payload: Vec<ChatMessage>,
    options: ChatOptions,
    timeout: Option<Duration>,
}

impl PendingRequest {
    pub fn payload(&self) -> &[ChatMessage] {
        &self.payload
    }

    pub async fn dispatch(self) -> Result<Reply, ProviderError> {
        let call = self.provider.chat(&self.payload, &self.options);
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .unwrap_or(Err(ProviderError::Timeout(limit))),
            None => call.await,
        }
    }
}

/// System prompt first, then the context turns verbatim.
pub fn assemble_payload(system_prompt: &str, context: &[Message]) -> Vec<ChatMessage> {
    let mut payload = Vec::with_capacity(context.len() + 1);
    payload.push(ChatMessage::new(ChatRole::System, system_prompt));
    payload.extend(context.iter().map(|message| {
        let role = match message.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        };
        ChatMessage::new(role, message.content.clone())
    }));
    payload
}

/// Drives the `Idle -> Sending -> Idle` cycle over a [`ConversationState`].
pub struct Conversation {
    state: ConversationState,
    provider: Option<Arc<dyn AiProvider>>,
    options: ChatOptions,
    timeout: Option<Duration>,
}

impl Conversation {
    pub fn new(state: ConversationState, provider: Option<Arc<dyn AiProvider>>) -> Self {
        Self {
            state,
            provider,
            options: ChatOptions::default(),
            timeout: None,
        }
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn set_provider(&mut self, provider: Arc<dyn AiProvider>) {
        self.provider = Some(provider);
    }

    pub fn provider_available(&self) -> bool {
        self.provider.is_some()
    }

    pub fn set_system_prompt(&mut self, text: &str) {
        self.state.set_system_prompt(text);
    }

    /// Drop all turns. Refused while a request is in flight.
    pub fn clear(&mut self) -> bool {
        if self.state.pending() {
            return false;
        }
        self.state.clear();
        true
    }

    /// Guard, record the user turn, and assemble the request.
    ///
    /// The user turn is in the log by the time this returns; nothing is
    /// recorded when the provider is missing or a guard fails.
    pub fn begin_send(&mut self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Ignored(IgnoreReason::EmptyInput);
        }
        if self.state.pending() {
            debug!("Send ignored, a request is already in flight");
            return SendOutcome::Ignored(IgnoreReason::Busy);
        }
        let Some(provider) = self.provider.clone() else {
            warn!("Send refused, no AI provider is available");
            return SendOutcome::Refused(Refusal::CapabilityUnavailable);
        };

        self.state.add_user_message(text);
        self.state.set_pending(true);

        let payload = assemble_payload(self.state.system_prompt(), &self.state.context_window());
        debug!("Assembled payload with {} message(s)", payload.len());

        SendOutcome::Started(PendingRequest {
            provider,
            payload,
            options: self.options.clone(),
            timeout: self.timeout,
        })
    }

    /// Merge a settled provider call back into the log and return to idle.
    pub fn complete(&mut self, result: Result<Reply, ProviderError>) -> SendReport {
        if !self.state.pending() {
            warn!("Completion received with no request in flight");
            return SendReport::Ignored(IgnoreReason::Idle);
        }

        let report = match result {
            Ok(reply) => {
                self.state.add_assistant_message(&reply.into_content());
                SendReport::Replied
            }
            Err(e) => {
                error!("AI provider call failed: {}", e);
                self.state.add_assistant_message(PROVIDER_FAILURE_NOTICE);
                SendReport::Failed
            }
        };

        self.state.trim_to_window();
        self.state.set_pending(false);
        info!("Send cycle settled: {:?}, {} message(s) in context", report, self.state.len());

        report
    }

    /// Run a full cycle: begin, await the provider, merge.
    pub async fn send(&mut self, text: &str) -> SendReport {
        match self.begin_send(text) {
            SendOutcome::Started(request) => {
                let result = request.dispatch().await;
                self.complete(result)
            }
            SendOutcome::Ignored(reason) => SendReport::Ignored(reason),
            SendOutcome::Refused(refusal) => SendReport::Refused(refusal),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::cli::chat::conversation_state::{DEFAULT_SYSTEM_PROMPT, WINDOW_LIMIT};

    /// Answers from a script and records every payload it receives.
    struct ScriptedProvider {
        replies: Mutex<VecDeque<Result<Reply, ProviderError>>>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedProvider {
        fn replying(replies: Vec<Result<Reply, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<ChatMessage>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AiProvider for ScriptedProvider {
        async fn chat(&self, history: &[ChatMessage], options: &ChatOptions) -> Result<Reply, ProviderError> {
            assert_eq!(options.model, crate::provider_client::DEFAULT_MODEL);
            self.calls.lock().unwrap().push(history.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Reply::Raw("ok".to_string())))
        }
    }

    struct SilentProvider;

    #[async_trait]
    impl AiProvider for SilentProvider {
        async fn chat(&self, _: &[ChatMessage], _: &ChatOptions) -> Result<Reply, ProviderError> {
            std::future::pending().await
        }
    }

    fn conversation_with(provider: Arc<ScriptedProvider>) -> Conversation {
        Conversation::new(ConversationState::new(), Some(provider))
    }

    fn history(conversation: &Conversation) -> Vec<Message> {
        conversation.state().get_messages().cloned().collect()
    }

    #[tokio::test]
    async fn hello_scenario() {
        let provider = ScriptedProvider::replying(vec![Ok(Reply::Structured {
            content: "Hi there!".to_string(),
        })]);
        let mut conversation = conversation_with(provider.clone());

        assert_eq!(conversation.send("Hello").await, SendReport::Replied);

        assert_eq!(
            provider.calls(),
            vec![vec![
                ChatMessage::new(ChatRole::System, DEFAULT_SYSTEM_PROMPT),
                ChatMessage::new(ChatRole::User, "Hello"),
            ]]
        );
        assert_eq!(history(&conversation), vec![Message::user("Hello"), Message::assistant("Hi there!")]);
        assert!(!conversation.state().pending());
    }

    #[tokio::test]
    async fn raw_reply_is_recorded_as_is() {
        let provider = ScriptedProvider::replying(vec![Ok(Reply::Raw("plain".to_string()))]);
        let mut conversation = conversation_with(provider);

        conversation.send("Hello").await;

        assert_eq!(history(&conversation).last(), Some(&Message::assistant("plain")));
    }

    #[tokio::test]
    async fn user_turn_is_visible_before_the_provider_answers() {
        let provider = ScriptedProvider::replying(vec![]);
        let mut conversation = conversation_with(provider.clone());

        let SendOutcome::Started(request) = conversation.begin_send("Hello") else {
            panic!("send should start");
        };

        assert_eq!(history(&conversation), vec![Message::user("Hello")]);
        assert!(conversation.state().pending());
        assert!(provider.calls().is_empty());

        let result = request.dispatch().await;
        assert_eq!(conversation.complete(result), SendReport::Replied);
        assert!(!conversation.state().pending());
    }

    #[tokio::test]
    async fn second_send_while_in_flight_is_ignored() {
        let provider = ScriptedProvider::replying(vec![]);
        let mut conversation = conversation_with(provider.clone());

        let SendOutcome::Started(request) = conversation.begin_send("first") else {
            panic!("send should start");
        };
        let revision = conversation.state().revision();

        assert!(matches!(
            conversation.begin_send("second"),
            SendOutcome::Ignored(IgnoreReason::Busy)
        ));
        assert_eq!(conversation.state().revision(), revision);
        assert_eq!(conversation.state().len(), 1);

        let result = request.dispatch().await;
        conversation.complete(result);

        assert_eq!(provider.calls().len(), 1);
        assert_eq!(conversation.state().len(), 2);
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let provider = ScriptedProvider::replying(vec![]);
        let mut conversation = conversation_with(provider.clone());

        assert_eq!(conversation.send("   \n\t").await, SendReport::Ignored(IgnoreReason::EmptyInput));
        assert!(conversation.state().is_empty());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn missing_provider_refuses_without_recording() {
        let mut conversation = Conversation::new(ConversationState::new(), None);

        assert_eq!(
            conversation.send("Hi").await,
            SendReport::Refused(Refusal::CapabilityUnavailable)
        );
        assert!(conversation.state().is_empty());
        assert!(!conversation.state().pending());
        assert_eq!(conversation.state().revision(), 0);
    }

    #[tokio::test]
    async fn provider_attached_later_is_used() {
        let mut conversation = Conversation::new(ConversationState::new(), None);
        assert!(!conversation.provider_available());

        conversation.set_provider(ScriptedProvider::replying(vec![]));

        assert!(conversation.provider_available());
        assert_eq!(conversation.send("Hi").await, SendReport::Replied);
    }

    #[tokio::test]
    async fn failure_records_one_notice_and_recovers() {
        let provider = ScriptedProvider::replying(vec![
            Err(ProviderError::Status {
                status: 401,
                body: "unauthorized".to_string(),
            }),
            Ok(Reply::Raw("back online".to_string())),
        ]);
        let mut conversation = conversation_with(provider.clone());

        assert_eq!(conversation.send("Hi").await, SendReport::Failed);
        assert_eq!(
            history(&conversation),
            vec![Message::user("Hi"), Message::assistant(PROVIDER_FAILURE_NOTICE)]
        );
        assert!(!conversation.state().pending());

        assert_eq!(conversation.send("again").await, SendReport::Replied);
        assert_eq!(conversation.state().len(), 4);
        assert_eq!(provider.calls().len(), 2);
    }

    #[tokio::test]
    async fn error_envelope_records_the_notice_not_the_body() {
        let body = json!({"error": {"message": "quota exceeded", "code": 429}});
        let provider = ScriptedProvider::replying(vec![Reply::from_value(body)]);
        let mut conversation = conversation_with(provider);

        assert_eq!(conversation.send("Hi").await, SendReport::Failed);

        let messages = history(&conversation);
        assert_eq!(messages, vec![Message::user("Hi"), Message::assistant(PROVIDER_FAILURE_NOTICE)]);
        assert!(!messages.iter().any(|m| m.content.contains("quota exceeded")));
        assert!(!conversation.state().pending());
    }

    #[tokio::test]
    async fn full_window_evicts_the_oldest_turn() {
        let provider = ScriptedProvider::replying(vec![Ok(Reply::Raw("reply 21".to_string()))]);
        let mut state = ConversationState::new();
        for i in 1..=WINDOW_LIMIT {
            state.add_user_message(&format!("message {}", i));
        }
        let mut conversation = Conversation::new(state, Some(provider.clone()));

        conversation.send("message 21").await;

        let messages = history(&conversation);
        assert_eq!(messages.len(), WINDOW_LIMIT);
        assert!(!messages.contains(&Message::user("message 1")));
        assert!(!messages.contains(&Message::user("message 2")));
        assert_eq!(messages[WINDOW_LIMIT - 2], Message::user("message 21"));
        assert_eq!(messages[WINDOW_LIMIT - 1], Message::assistant("reply 21"));

        let payload = &provider.calls()[0];
        assert_eq!(payload.len(), WINDOW_LIMIT + 1);
        assert_eq!(payload[0].role, ChatRole::System);
        assert_eq!(payload[1], ChatMessage::new(ChatRole::User, "message 2"));
        assert_eq!(payload[WINDOW_LIMIT], ChatMessage::new(ChatRole::User, "message 21"));
    }

    #[tokio::test]
    async fn window_holds_across_many_cycles() {
        let provider = ScriptedProvider::replying(vec![]);
        let mut conversation = conversation_with(provider.clone());

        for i in 0..40 {
            conversation.send(&format!("turn {}", i)).await;
            assert!(conversation.state().len() <= WINDOW_LIMIT);
        }

        for payload in provider.calls() {
            assert!(payload.len() <= WINDOW_LIMIT + 1);
        }
        assert_eq!(history(&conversation).last(), Some(&Message::assistant("ok")));
    }

    #[tokio::test]
    async fn system_prompt_applies_to_next_request_only() {
        let provider = ScriptedProvider::replying(vec![]);
        let mut conversation = conversation_with(provider.clone());

        conversation.send("one").await;
        let before = history(&conversation);

        conversation.set_system_prompt("You are a pirate captain.");
        assert_eq!(history(&conversation), before);

        conversation.send("two").await;

        let calls = provider.calls();
        assert_eq!(calls[0][0].content, DEFAULT_SYSTEM_PROMPT);
        assert_eq!(calls[1][0].content, "You are a pirate captain.");
        assert_eq!(&history(&conversation)[..2], &before[..]);
    }

    #[tokio::test]
    async fn timeout_counts_as_a_failed_call() {
        let mut conversation = Conversation::new(ConversationState::new(), Some(Arc::new(SilentProvider)))
            .with_timeout(Some(Duration::from_millis(20)));

        assert_eq!(conversation.send("Hi").await, SendReport::Failed);
        assert_eq!(
            history(&conversation).last(),
            Some(&Message::assistant(PROVIDER_FAILURE_NOTICE))
        );
        assert!(!conversation.state().pending());
    }

    #[test]
    fn stray_completion_is_ignored() {
        let mut conversation = Conversation::new(ConversationState::new(), None);

        let report = conversation.complete(Ok(Reply::Raw("late".to_string())));

        assert_eq!(report, SendReport::Ignored(IgnoreReason::Idle));
        assert!(conversation.state().is_empty());
    }

    #[test]
    fn clear_is_refused_while_in_flight() {
        let mut conversation = conversation_with(ScriptedProvider::replying(vec![]));
        let SendOutcome::Started(_request) = conversation.begin_send("Hello") else {
            panic!("send should start");
        };

        assert!(!conversation.clear());
        assert_eq!(conversation.state().len(), 1);
    }
}
