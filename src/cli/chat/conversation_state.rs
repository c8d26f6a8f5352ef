use std::collections::{VecDeque, vec_deque};

use tracing::debug;

/// Maximum number of turns kept in memory and sent as context.
pub const WINDOW_LIMIT: usize = 20;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, friendly AI assistant named Alex.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single turn. Identified by its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered turn log plus the persona and in-flight flag.
///
/// Every mutation bumps `revision`, which is what the renderer watches.
pub struct ConversationState {
    messages: VecDeque<Message>,
    system_prompt: String,
    pending: bool,
    revision: u64,
    appended_total: u64,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::with_system_prompt(DEFAULT_SYSTEM_PROMPT)
    }

    pub fn with_system_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: VecDeque::with_capacity(WINDOW_LIMIT + 1),
            system_prompt: system_prompt.into(),
            pending: false,
            revision: 0,
            appended_total: 0,
        }
    }

    pub fn add_user_message(&mut self, message: &str) {
        self.push(Message::user(message));
    }

    pub fn add_assistant_message(&mut self, message: &str) {
        self.push(Message::assistant(message));
    }

    fn push(&mut self, message: Message) {
        self.messages.push_back(message);
        self.appended_total += 1;
        self.revision += 1;
        self.trim_to_window();
    }

    /// Drop the oldest turns until at most `WINDOW_LIMIT` remain.
    pub fn trim_to_window(&mut self) {
        if self.messages.len() <= WINDOW_LIMIT {
            return;
        }

        let excess = self.messages.len() - WINDOW_LIMIT;
        self.messages.drain(..excess);
        self.revision += 1;
        debug!("Evicted {} oldest message(s) from the context window", excess);
    }

    /// The newest `WINDOW_LIMIT` turns, oldest first.
    pub fn context_window(&self) -> Vec<Message> {
        let skip = self.messages.len().saturating_sub(WINDOW_LIMIT);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn get_messages(&self) -> vec_deque::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Applies to the next outgoing request only; stored turns are untouched.
    pub fn set_system_prompt(&mut self, text: &str) {
        self.system_prompt = text.to_string();
        self.revision += 1;
    }

    pub fn pending(&self) -> bool {
        self.pending
    }

    pub fn set_pending(&mut self, pending: bool) {
        if self.pending != pending {
            self.pending = pending;
            self.revision += 1;
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Count of turns ever appended, including evicted ones.
    pub fn appended_total(&self) -> u64 {
        self.appended_total
    }

    /// Drop every turn. The persona is kept.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.revision += 1;
    }
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}
