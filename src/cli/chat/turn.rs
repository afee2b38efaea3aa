//! One conversational turn: gate, classify, dispatch, commit.

use std::io;

use futures::StreamExt;
use tracing::{debug, info, warn};

use super::calculator::{evaluate, format_number};
use super::classifier::{classify, is_farewell, QueryKind};
#[cfg(test)]
use super::conversation_state::TurnState;
use super::conversation_state::{ConversationState, Message};
use super::render::ResponseSink;
use crate::completion_client::{Completion, CompletionError};
use crate::search_client::{SearchError, WebSearch};

pub const FAREWELL: &str = "Thank you for chatting with me! 💎 Have a wonderful day!";
pub const MATH_FAILURE: &str = "❌ I couldn't calculate that. Please check your expression.";
pub const NO_RESULTS: &str = "❌ No relevant information found in recent search results.";
pub const SEARCH_KEY_MISSING: &str = "🔑 Please add your Serper API key \
    (set SERPER_API_KEY or run `/key serper`) to enable web search.";
pub const COMPLETION_KEY_MISSING: &str =
    "🔑 Please add your OpenAI API key (set OPENAI_API_KEY or run `/key openai`) to get started.";

/// Where a message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Farewell,
    Query(QueryKind),
}

pub fn route(text: &str) -> Route {
    if is_farewell(text) {
        Route::Farewell
    } else {
        Route::Query(classify(text))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// No completion key is configured; nothing was recorded.
    Rejected,
    Answered(Route),
}

pub struct Conversation {
    state: ConversationState,
    search: Box<dyn WebSearch>,
    completion: Box<dyn Completion>,
}

impl Conversation {
    pub fn new(search: Box<dyn WebSearch>, completion: Box<dyn Completion>) -> Self {
        Self {
            state: ConversationState::new(),
            search,
            completion,
        }
    }

    pub fn set_search(&mut self, search: Box<dyn WebSearch>) {
        self.search = search;
    }

    pub fn set_completion(&mut self, completion: Box<dyn Completion>) {
        self.completion = completion;
    }

    pub fn messages(&self) -> &[Message] {
        self.state.get_messages()
    }

    #[cfg(test)]
    pub fn state(&self) -> &TurnState {
        self.state.state()
    }

    pub fn reset(&mut self) {
        info!("Conversation reset");
        self.state.clear();
    }

    /// Run one turn to completion. Provider failures become the reply text;
    /// only errors writing to `sink` are returned, after the turn is recorded.
    pub async fn submit(
        &mut self,
        text: &str,
        sink: &mut dyn ResponseSink,
    ) -> io::Result<TurnOutcome> {
        if !self.completion.is_configured() {
            warn!("Ignoring message: no OpenAI API key configured");
            return Ok(TurnOutcome::Rejected);
        }

        self.state.begin_turn(text);
        let route = route(text);
        info!("Routing message as {:?}", route);

        let mut rendered = Ok(());
        let reply = match route {
            Route::Farewell => FAREWELL.to_string(),
            Route::Query(QueryKind::Math) => math_reply(text),
            Route::Query(QueryKind::Search) => self.search_reply(text).await,
            Route::Query(QueryKind::General) => {
                self.completion_reply(text, sink, &mut rendered).await
            }
        };

        self.state.complete_turn(&reply);
        rendered?;
        sink.finish(&reply)?;
        Ok(TurnOutcome::Answered(route))
    }

    async fn search_reply(&self, query: &str) -> String {
        match self.search.search(query).await {
            Ok(answer) => answer,
            Err(SearchError::MissingApiKey) => SEARCH_KEY_MISSING.to_string(),
            Err(SearchError::NoResults) => NO_RESULTS.to_string(),
            Err(SearchError::Transport(e)) => {
                warn!("Search failed: {}", e);
                format!("❌ Search error: {e}")
            }
        }
    }

    async fn completion_reply(
        &self,
        prompt: &str,
        sink: &mut dyn ResponseSink,
        rendered: &mut io::Result<()>,
    ) -> String {
        let mut fragments = match self.completion.complete(prompt).await {
            Ok(fragments) => fragments,
            Err(CompletionError::MissingApiKey) => return COMPLETION_KEY_MISSING.to_string(),
        };

        let mut reply = String::new();
        let mut count = 0usize;
        while let Some(fragment) = fragments.next().await {
            reply.push_str(&fragment);
            count += 1;
            if rendered.is_ok() {
                *rendered = sink.partial(&reply);
            }
        }
        debug!("Completion finished after {} fragments", count);
        reply
    }
}

fn math_reply(text: &str) -> String {
    match evaluate(text) {
        Ok(value) => format!("**Calculation Result:** {}", format_number(value)),
        Err(e) => {
            debug!("Could not evaluate expression: {}", e);
            MATH_FAILURE.to_string()
        }
    }
}
