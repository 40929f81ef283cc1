//! Graph state and its reducer.
//!
//! One state type flows through the whole graph. Nodes never mutate state
//! directly; they return a [`ChatPatch`] and the executor merges it through
//! [`GraphState::apply`]: the message channel **appends**, scalar channels
//! **replace**, plus two typed message operations (substituting the last
//! user message, and idempotent context-message injection).

use std::fmt::Debug;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::message::{ChatMessage, MessageContent, Role};

/// In-state id of the instruction system message.
pub const SYS_INSTRUCTION_ID: &str = "sys_instruction";
/// In-state id of the injected retrieval-context system message.
pub const SYS_CONTEXT_ID: &str = "sys_context";

/// Which sub-graph a turn runs through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Chat,
    DeepSearch,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Mode::Chat),
            "deep_search" => Ok(Mode::DeepSearch),
            other => Err(format!("unknown mode: {other}")),
        }
    }
}

/// A retrieved snippet paired with where it came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub source: String,
    pub snippet: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i64>,
}

/// Snippets accumulated under one query key (insertion order preserved;
/// summary citation numbering depends on it).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceGroup {
    pub key: String,
    pub items: Vec<String>,
}

/// State with typed channels and a declared reducer per channel.
pub trait GraphState:
    Clone + Debug + Default + Send + Sync + Serialize + DeserializeOwned + 'static
{
    type Patch: Debug + Default + Send + Sync + 'static;

    /// Merges one node's output into the state.
    fn apply(&mut self, patch: Self::Patch);

    /// Structured message count; recorded on every checkpoint and used by
    /// the sibling-anchor search.
    fn message_count(&self) -> usize;
}

/// The conversation graph state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatState {
    pub messages: Vec<ChatMessage>,
    pub mode: Mode,
    /// The current user question (deep-search channels key off it).
    pub question: String,
    pub search_queries: Vec<String>,
    pub references: Vec<ReferenceGroup>,
    pub planning_rounds: u32,
    pub knowledge_base_ids: Vec<i64>,
    pub history_context: String,
    pub kb_context: String,
}

/// One node's output: appended messages plus scalar replacements.
#[derive(Clone, Debug, Default)]
pub struct ChatPatch {
    /// Appended to the message channel.
    pub messages: Vec<ChatMessage>,
    /// Substitutes the content of the last user message (rewrite node).
    pub rewritten_question: Option<String>,
    /// Upserts the `sys_context` system message right after the instruction
    /// system message; an empty string removes nothing and inserts nothing.
    pub sys_context: Option<String>,
    pub mode: Option<Mode>,
    pub question: Option<String>,
    pub search_queries: Option<Vec<String>>,
    pub references: Option<Vec<ReferenceGroup>>,
    pub planning_rounds: Option<u32>,
    pub knowledge_base_ids: Option<Vec<i64>>,
    pub history_context: Option<String>,
    pub kb_context: Option<String>,
}

impl ChatState {
    /// Text of the most recent user message, if any.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(ChatMessage::text)
    }

    /// The most recent assistant message carrying content.
    pub fn last_assistant(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.text().is_empty())
    }

    /// The question to answer: the explicit channel, else the last user
    /// message.
    pub fn effective_question(&self) -> String {
        if !self.question.is_empty() {
            return self.question.clone();
        }
        self.last_user_text().unwrap_or_default()
    }

    /// Appends `items` under `key`, extending an existing group.
    pub fn merged_references(&self, key: &str, items: Vec<String>) -> Vec<ReferenceGroup> {
        let mut out = self.references.clone();
        if let Some(group) = out.iter_mut().find(|g| g.key == key) {
            group.items.extend(items);
        } else {
            out.push(ReferenceGroup {
                key: key.to_string(),
                items,
            });
        }
        out
    }

    fn substitute_last_user(&mut self, text: String) {
        if let Some(m) = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.role == Role::User)
        {
            m.content = MessageContent::Text(text);
        }
    }

    fn upsert_sys_context(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        if let Some(existing) = self
            .messages
            .iter_mut()
            .find(|m| m.id.as_deref() == Some(SYS_CONTEXT_ID))
        {
            existing.content = MessageContent::Text(text);
            return;
        }
        let message = ChatMessage::system(text).with_id(SYS_CONTEXT_ID);
        // Right after the instruction system message; else at the front.
        let at = self
            .messages
            .iter()
            .position(|m| m.id.as_deref() == Some(SYS_INSTRUCTION_ID))
            .map(|i| i + 1)
            .unwrap_or(0);
        self.messages.insert(at, message);
    }
}

impl GraphState for ChatState {
    type Patch = ChatPatch;

    fn apply(&mut self, patch: ChatPatch) {
        if let Some(text) = patch.rewritten_question {
            self.substitute_last_user(text);
        }
        if let Some(text) = patch.sys_context {
            self.upsert_sys_context(text);
        }
        self.messages.extend(patch.messages);
        if let Some(v) = patch.mode {
            self.mode = v;
        }
        if let Some(v) = patch.question {
            self.question = v;
        }
        if let Some(v) = patch.search_queries {
            self.search_queries = v;
        }
        if let Some(v) = patch.references {
            self.references = v;
        }
        if let Some(v) = patch.planning_rounds {
            self.planning_rounds = v;
        }
        if let Some(v) = patch.knowledge_base_ids {
            self.knowledge_base_ids = v;
        }
        if let Some(v) = patch.history_context {
            self.history_context = v;
        }
        if let Some(v) = patch.kb_context {
            self.kb_context = v;
        }
    }

    fn message_count(&self) -> usize {
        self.messages.len()
    }
}
