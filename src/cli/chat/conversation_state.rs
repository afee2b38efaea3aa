use std::fmt;

pub const GREETING: &str = "Hello! I'm Smart Diamond, your AI assistant. How can I help you today?";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Where the conversation is within a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    /// A user message has been accepted and its reply is being produced.
    AwaitingResponse { prompt: String },
}

/// Append-only message history plus the current turn state.
///
/// A user message only enters the history together with its reply, so the
/// history never holds a question without an answer.
#[derive(Debug)]
pub struct ConversationState {
    messages: Vec<Message>,
    state: TurnState,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationState {
    pub fn new() -> Self {
        Self {
            messages: vec![Message::new(Role::Assistant, GREETING)],
            state: TurnState::Idle,
        }
    }

    pub fn begin_turn(&mut self, prompt: &str) {
        self.state = TurnState::AwaitingResponse {
            prompt: prompt.to_string(),
        };
    }

    /// Commit the pending user message and its reply, returning to idle.
    /// Without a pending turn this does nothing.
    pub fn complete_turn(&mut self, reply: &str) {
        let state = std::mem::replace(&mut self.state, TurnState::Idle);
        if let TurnState::AwaitingResponse { prompt } = state {
            self.messages.push(Message::new(Role::User, prompt));
            self.messages.push(Message::new(Role::Assistant, reply));
        }
    }

    pub fn get_messages(&self) -> &[Message] {
        &self.messages
    }

    #[cfg(test)]
    pub fn state(&self) -> &TurnState {
        &self.state
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.state == TurnState::Idle
    }

    /// Drop everything but the greeting.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
