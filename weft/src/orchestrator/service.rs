//! One turn, end to end.
//!
//! Ordering contract per turn: every checkpoint `put` happens inside the
//! graph run, the assistant message persists afterwards (bound to the
//! terminal checkpoint), and `done` is emitted last. Partial tokens
//! already delivered stay with the client on failure; the terminal
//! record is then `error` instead of `done`.

use std::sync::Arc;

use sqlx::SqlitePool;
use stream_event::TransportEvent;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use env_config::Settings;

use crate::error::OrchestratorError;
use crate::graph::{CompiledGraph, RunConfig};
use crate::llm::ChatModel;
use crate::message::{extract_text, ChatMessage, Role};
use crate::orchestrator::{build_graph, OUTPUT_NODES};
use crate::retrieval::{Embedder, Retriever};
use crate::session::SessionUser;
use crate::state::{ChatPatch, ChatState, Mode};
use crate::store::checkpoint::{Checkpointer, SqlCheckpointStore};
use crate::store::conversation::{ConversationStore, MessageRow, NewMessage};
use crate::store::embedding::EmbeddingStore;
use crate::stream::{EventSender, ExecEvent, EVENT_QUEUE_CAPACITY};
use crate::tasks::TaskRunner;
use crate::tools::ToolRegistry;
use crate::websearch::SearchClient;

const TITLE_SYSTEM: &str =
    "请为以下对话生成一个简短的标题，不超过20个字。直接输出标题本身，不要任何解释或标点。";
const TITLE_MAX_CHARS: usize = 20;
const FALLBACK_REPLY: &str = "未能生成回复";

/// One `/chat/stream` request after decoding.
#[derive(Clone, Debug)]
pub struct TurnRequest {
    pub conversation_id: i64,
    pub content: String,
    pub model_code: Option<String>,
    pub parent_message_id: Option<i64>,
    pub regenerate: bool,
    pub mode: Mode,
    pub knowledge_base_ids: Vec<i64>,
}

/// The orchestration core behind the stream endpoint.
pub struct Orchestrator {
    conversations: ConversationStore,
    checkpoints: Arc<dyn Checkpointer<ChatState>>,
    embeddings: EmbeddingStore,
    graph: Arc<CompiledGraph<ChatState>>,
    model: Arc<dyn ChatModel>,
    embedder: Arc<dyn Embedder>,
    tasks: Arc<TaskRunner>,
}

/// Everything resolved before the graph starts.
struct PreparedTurn {
    run: RunConfig,
    patch: ChatPatch,
    /// Parent for the assistant row (the turn's user message).
    user_message_id: Option<i64>,
    /// Set only when this turn persisted a fresh user message; regenerate
    /// reuses the existing one and must not re-embed it.
    new_user_message: Option<(i64, String)>,
    needs_title: Option<String>,
    model_code: Option<String>,
}

impl Orchestrator {
    pub fn new(
        pool: SqlitePool,
        model: Arc<dyn ChatModel>,
        embedder: Arc<dyn Embedder>,
        registry: Arc<ToolRegistry>,
        search: Arc<dyn SearchClient>,
        settings: &Settings,
    ) -> Result<Self, OrchestratorError> {
        let conversations = ConversationStore::new(pool.clone());
        let embeddings = EmbeddingStore::new(pool.clone());
        let checkpoints: Arc<dyn Checkpointer<ChatState>> =
            Arc::new(SqlCheckpointStore::<ChatState>::new(pool));
        let retriever = Arc::new(Retriever::new(embedder.clone(), embeddings.clone()));
        let graph = build_graph(
            model.clone(),
            retriever,
            registry,
            search,
            checkpoints.clone(),
            settings,
        )
        .map_err(|e| OrchestratorError::Internal(format!("graph wiring: {e}")))?;
        Ok(Self {
            conversations,
            checkpoints,
            embeddings,
            graph: Arc::new(graph),
            model,
            embedder,
            tasks: Arc::new(TaskRunner::new()),
        })
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    pub fn checkpoints(&self) -> &Arc<dyn Checkpointer<ChatState>> {
        &self.checkpoints
    }

    /// Runs one turn; the returned stream yields wire events ending in
    /// exactly one `done` or `error`.
    pub async fn stream_turn(
        &self,
        user: &SessionUser,
        request: TurnRequest,
    ) -> Result<ReceiverStream<TransportEvent>, OrchestratorError> {
        let prepared = self.prepare(user, &request).await?;
        let (out_tx, out_rx) = mpsc::channel::<TransportEvent>(EVENT_QUEUE_CAPACITY);
        let (events, events_rx) = EventSender::channel(EVENT_QUEUE_CAPACITY);

        let graph = self.graph.clone();
        let conversations = self.conversations.clone();
        let embeddings = self.embeddings.clone();
        let embedder = self.embedder.clone();
        let model = self.model.clone();
        let tasks = self.tasks.clone();
        let user_id = user.id;
        tokio::spawn(async move {
            let conversation_id = request.conversation_id;
            let run_cfg = prepared.run.clone();
            let patch = prepared.patch;
            let run_graph = graph.clone();
            let run = tokio::spawn(async move {
                run_graph.run(&run_cfg, patch, events).await
            });

            forward_events(events_rx, conversation_id, &out_tx).await;

            let outcome = match run.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    warn!(conversation_id, "turn failed: {e}");
                    let _ = out_tx
                        .send(TransportEvent::Error {
                            message: e.to_string(),
                            code: e.code().to_string(),
                        })
                        .await;
                    return;
                }
                Err(e) => {
                    let _ = out_tx
                        .send(TransportEvent::Error {
                            message: format!("graph task: {e}"),
                            code: "SYS-500".to_string(),
                        })
                        .await;
                    return;
                }
            };

            let reply_text = outcome
                .state
                .last_assistant()
                .map(ChatMessage::text)
                .unwrap_or_else(|| FALLBACK_REPLY.to_string());
            let token_count = reply_text.chars().count() as i64;

            let assistant = conversations
                .persist_message(NewMessage {
                    conversation_id,
                    parent_id: prepared.user_message_id,
                    checkpoint_id: outcome.checkpoint_id,
                    role: "assistant".into(),
                    content: reply_text.clone(),
                    content_type: "TEXT".into(),
                    model_code: prepared.model_code.clone(),
                    token_count,
                })
                .await;
            let assistant = match assistant {
                Ok(row) => row,
                Err(e) => {
                    let e = OrchestratorError::from(e);
                    let _ = out_tx
                        .send(TransportEvent::Error {
                            message: e.to_string(),
                            code: e.code().to_string(),
                        })
                        .await;
                    return;
                }
            };

            let title = match prepared.needs_title {
                Some(first_content) => {
                    let title =
                        generate_title(model.as_ref(), &first_content, &reply_text).await;
                    if let Err(e) = conversations.set_title(conversation_id, &title).await {
                        warn!(conversation_id, "title persist failed: {e}");
                    }
                    Some(title)
                }
                None => None,
            };

            queue_embedding_writebacks(
                &tasks,
                embedder,
                embeddings,
                user_id,
                prepared.new_user_message,
                (assistant.id, reply_text),
                conversation_id,
            );

            let _ = out_tx
                .send(TransportEvent::Done {
                    message_id: assistant.id,
                    conversation_id,
                    parent_id: assistant.parent_id,
                    user_message_id: prepared.user_message_id,
                    token_count,
                    title,
                })
                .await;
        });

        Ok(ReceiverStream::new(out_rx))
    }

    async fn prepare(
        &self,
        user: &SessionUser,
        request: &TurnRequest,
    ) -> Result<PreparedTurn, OrchestratorError> {
        let conversation = self
            .conversations
            .ensure_owner(request.conversation_id, user.id)
            .await?;
        let model_code = request
            .model_code
            .clone()
            .or_else(|| conversation.model_code.clone());

        if request.regenerate {
            let parent_id = request.parent_message_id.ok_or_else(|| {
                OrchestratorError::Validation("parentMessageId required for regenerate".into())
            })?;
            let user_message = self.conversations.get_message(parent_id).await?;
            if user_message.conversation_id != request.conversation_id
                || user_message.role != "user"
            {
                return Err(OrchestratorError::Validation(
                    "parentMessageId must name a user message of this conversation".into(),
                ));
            }
            let anchor = self.regenerate_anchor(&user_message).await?;
            info!(
                conversation_id = request.conversation_id,
                anchor, "regenerating from checkpoint"
            );
            return Ok(PreparedTurn {
                run: RunConfig {
                    thread_id: request.conversation_id,
                    parent_checkpoint_id: Some(anchor),
                },
                patch: ChatPatch {
                    mode: Some(request.mode),
                    question: Some(user_message.content.clone()),
                    knowledge_base_ids: Some(request.knowledge_base_ids.clone()),
                    ..Default::default()
                },
                user_message_id: Some(user_message.id),
                new_user_message: None,
                needs_title: None,
                model_code,
            });
        }

        if request.content.trim().is_empty() {
            return Err(OrchestratorError::Validation("content must not be empty".into()));
        }
        let parent_id = request
            .parent_message_id
            .or(conversation.current_message_id);
        let user_row = self
            .conversations
            .persist_message(NewMessage {
                conversation_id: request.conversation_id,
                parent_id,
                role: "user".into(),
                content: request.content.clone(),
                content_type: "TEXT".into(),
                model_code: model_code.clone(),
                ..Default::default()
            })
            .await?;

        Ok(PreparedTurn {
            run: RunConfig {
                thread_id: request.conversation_id,
                parent_checkpoint_id: None,
            },
            patch: ChatPatch {
                messages: vec![ChatMessage::user(request.content.clone())],
                mode: Some(request.mode),
                question: Some(request.content.clone()),
                knowledge_base_ids: Some(request.knowledge_base_ids.clone()),
                ..Default::default()
            },
            user_message_id: Some(user_row.id),
            new_user_message: Some((user_row.id, request.content.clone())),
            needs_title: conversation
                .title
                .is_empty()
                .then(|| request.content.clone()),
            model_code,
        })
    }

    /// The checkpoint to re-run from: walking up from the previous
    /// assistant's terminal checkpoint to the last state that still ends
    /// with the user message (the turn's input).
    async fn regenerate_anchor(&self, user_message: &MessageRow) -> Result<i64, OrchestratorError> {
        let siblings = self
            .conversations
            .children(user_message.conversation_id, user_message.id)
            .await?;
        let terminal = siblings
            .iter()
            .rev()
            .find_map(|m| m.checkpoint_id)
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!(
                    "no checkpointed assistant reply under message {}",
                    user_message.id
                ))
            })?;

        let chain = self
            .checkpoints
            .list(user_message.conversation_id, None)
            .await?;
        let by_id: std::collections::HashMap<i64, _> =
            chain.iter().map(|t| (t.checkpoint_id, t)).collect();
        let mut cursor = *by_id.get(&terminal).ok_or_else(|| {
            OrchestratorError::NotFound(format!("checkpoint {terminal}"))
        })?;
        loop {
            let ends_with_user = cursor
                .state
                .messages
                .last()
                .map(|m| m.role == Role::User)
                .unwrap_or(false);
            if ends_with_user {
                return Ok(cursor.checkpoint_id);
            }
            match cursor.parent_checkpoint_id.and_then(|id| by_id.get(&id).copied()) {
                Some(parent) => cursor = parent,
                None => {
                    return Err(OrchestratorError::NotFound(format!(
                        "no fork point above checkpoint {terminal}"
                    )))
                }
            }
        }
    }
}

/// Maps executor events onto the wire, enforcing the output-node
/// whitelist. Returns when the executor drops its sender.
async fn forward_events(
    mut events_rx: mpsc::Receiver<ExecEvent>,
    conversation_id: i64,
    out_tx: &mpsc::Sender<TransportEvent>,
) {
    while let Some(event) = events_rx.recv().await {
        let wire = match event {
            ExecEvent::ChatModelStream { node, delta } => {
                if !OUTPUT_NODES.contains(&node.as_str()) {
                    continue;
                }
                TransportEvent::Chunk {
                    content: delta,
                    conversation_id,
                    message_id: -1,
                }
            }
            ExecEvent::ToolStart { name } => TransportEvent::ToolStart {
                tool: name,
                conversation_id,
            },
            ExecEvent::ToolEnd { name } => TransportEvent::ToolEnd {
                tool: name,
                conversation_id,
            },
            ExecEvent::NodeStart { .. } | ExecEvent::NodeEnd { .. } => continue,
        };
        if out_tx.send(wire).await.is_err() {
            // Client gone; the executor will hit back-pressure and stop.
            return;
        }
    }
}

/// Short LLM call for the first-turn title; degrades to a truncated
/// question.
async fn generate_title(model: &dyn ChatModel, question: &str, reply: &str) -> String {
    let request = vec![
        ChatMessage::system(TITLE_SYSTEM),
        ChatMessage::user(format!("用户: {question}\n助手: {reply}")),
    ];
    let raw = match model.invoke(&request).await {
        Ok(r) => extract_text(&r.content),
        Err(e) => {
            warn!("title generation failed: {e}");
            question.to_string()
        }
    };
    let cleaned = raw.trim().trim_matches(['"', '“', '”', '。']).to_string();
    let base = if cleaned.is_empty() {
        question.to_string()
    } else {
        cleaned
    };
    base.chars().take(TITLE_MAX_CHARS).collect()
}

#[allow(clippy::too_many_arguments)]
fn queue_embedding_writebacks(
    tasks: &TaskRunner,
    embedder: Arc<dyn Embedder>,
    embeddings: EmbeddingStore,
    user_id: i64,
    user_message: Option<(i64, String)>,
    assistant_message: (i64, String),
    conversation_id: i64,
) {
    let mut jobs: Vec<(i64, String, &'static str)> = Vec::new();
    if let Some((id, content)) = user_message {
        jobs.push((id, content, "user"));
    }
    jobs.push((assistant_message.0, assistant_message.1, "assistant"));

    for (message_id, content, role) in jobs {
        let embedder = embedder.clone();
        let embeddings = embeddings.clone();
        tasks.spawn("message_embedding", move || {
            let embedder = embedder.clone();
            let embeddings = embeddings.clone();
            let content = content.clone();
            async move {
                let vector = embedder
                    .embed(&content)
                    .await
                    .map_err(|e| e.to_string())?;
                embeddings
                    .insert_message_embedding(
                        message_id,
                        conversation_id,
                        user_id,
                        role,
                        &content,
                        &vector,
                    )
                    .await
                    .map_err(|e| e.to_string())
            }
        });
    }
}
