//! # Weft
//!
//! A streaming conversation orchestrator: for each user turn, a typed
//! state graph routes the conversation through its nodes, tokens stream
//! out over a long-lived response, and an append-only checkpoint chain
//! makes every turn branchable ("regenerate").
//!
//! ## Main modules
//!
//! - [`graph`]: [`StateGraph`], [`CompiledGraph`], [`Node`] — build and run
//!   state graphs with conditional edges and per-step checkpointing.
//! - [`state`]: [`ChatState`] and its reducer ([`ChatPatch`]); the message
//!   channel appends, scalar channels replace.
//! - [`nodes`]: the node catalogue — chat (`rewrite`, `context_retrieval`,
//!   `chatbot`, `tools`) and deep search (`kb_precheck`, `planning`,
//!   `search`, `summary`).
//! - [`llm`]: [`ChatModel`] over OpenAI-compatible, Gemini, and the
//!   responses-style bridge; [`MockChat`] for tests.
//! - [`retrieval`]: embeddings, cosine search, BM25, and RRF hybrid
//!   fusion.
//! - [`store`]: pooled SQLite persistence — conversations and the message
//!   tree, the checkpoint chain, vector rows.
//! - [`session`]: the bearer-token gate and the atomic two-key session
//!   layout.
//! - [`orchestrator`]: graph wiring plus the per-turn service feeding the
//!   wire protocol in the `stream-event` crate.
//!
//! Key types are re-exported at the crate root:
//! `use weft::{ChatState, Orchestrator, StateGraph};`

pub mod error;
pub mod graph;
pub mod llm;
pub mod message;
pub mod nodes;
pub mod orchestrator;
pub mod retrieval;
pub mod session;
pub mod state;
pub mod store;
pub mod stream;
pub mod tasks;
pub mod tools;
pub mod websearch;

pub use error::OrchestratorError;
pub use graph::{CompilationError, CompiledGraph, ExecContext, Node, RunConfig, StateGraph, END, START};
pub use llm::{ChatModel, Gemini, LlmReply, LlmUsage, MockChat, OpenAiCompatible, ProviderError, ResponsesBridge};
pub use message::{extract_text, ChatMessage, MessageContent, Role, ToolCall};
pub use orchestrator::{build_graph, Orchestrator, TurnRequest, OUTPUT_NODES};
pub use retrieval::{Embedder, HashEmbedder, HybridMode, OpenAiEmbedder, RetrievalError, Retriever};
pub use session::{MemorySessionStore, RedisSessionStore, SessionError, SessionGate, SessionStore, SessionUser};
pub use state::{ChatPatch, ChatState, GraphState, Mode, Reference, ReferenceGroup};
pub use store::checkpoint::{CheckpointError, Checkpointer, MemorySaver, SqlCheckpointStore};
pub use store::conversation::{linearize, ConversationStore, MessageRow, NewMessage};
pub use store::embedding::EmbeddingStore;
pub use store::{connect, StoreError};
pub use stream::{EventSender, ExecEvent};
pub use tasks::TaskRunner;
pub use tools::{Tool, ToolRegistry, ToolSpec};
pub use websearch::{MockSearch, SearchClient, SearchError, SearchHit, TavilySearch};
