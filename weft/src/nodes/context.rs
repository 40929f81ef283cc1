//! Parallel context retrieval for chat mode.
//!
//! Runs the two retrievals concurrently — prior messages of this
//! conversation (history context) and the enabled knowledge bases (kb
//! context) — and emits both as formatted strings. Message history is not
//! touched here; the chatbot node injects the strings as one system
//! message. Retrieval failures degrade to empty context and never fail
//! the turn.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::nodes::CONTEXT_RETRIEVAL;
use crate::retrieval::{HybridMode, Retriever};
use crate::state::{ChatPatch, ChatState};

pub struct ContextRetrievalNode {
    retriever: Arc<Retriever>,
    top_k: usize,
    similarity_threshold: f32,
}

impl ContextRetrievalNode {
    pub fn new(retriever: Arc<Retriever>, top_k: usize, similarity_threshold: f32) -> Self {
        Self {
            retriever,
            top_k,
            similarity_threshold,
        }
    }

    async fn history_context(&self, conversation_id: i64, query: &str) -> String {
        let results = match self
            .retriever
            .semantic_search_messages(conversation_id, query, self.top_k, self.similarity_threshold)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to get history context: {e}");
                return String::new();
            }
        };
        if results.is_empty() {
            return String::new();
        }
        let lines: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let role = if m.role == "user" { "用户" } else { "助手" };
                format!("{}. {role}: {}", i + 1, m.content)
            })
            .collect();
        info!("history context: found {} relevant messages", results.len());
        format!("【相关历史对话】\n{}", lines.join("\n"))
    }

    async fn kb_context(&self, knowledge_base_ids: &[i64], query: &str) -> String {
        if knowledge_base_ids.is_empty() {
            return String::new();
        }
        let results = match self
            .retriever
            .hybrid_search_chunks(
                knowledge_base_ids,
                query,
                self.top_k,
                self.similarity_threshold,
                HybridMode::Union,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("failed to get kb context: {e}");
                return String::new();
            }
        };
        if results.is_empty() {
            return String::new();
        }
        let blocks: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, chunk)| {
                format!(
                    "{}. [{}] (相似度: {:.2})\n{}",
                    i + 1,
                    chunk.source,
                    chunk.similarity,
                    chunk.content
                )
            })
            .collect();
        info!("kb context: found {} relevant chunks", results.len());
        format!("【知识库参考资料】\n{}", blocks.join("\n\n"))
    }
}

#[async_trait]
impl Node<ChatState> for ContextRetrievalNode {
    fn id(&self) -> &str {
        CONTEXT_RETRIEVAL
    }

    async fn run(
        &self,
        state: &ChatState,
        ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        let query = state.last_user_text().unwrap_or_default();
        if query.is_empty() {
            warn!("no user query found for context retrieval");
            return Ok(ChatPatch {
                history_context: Some(String::new()),
                kb_context: Some(String::new()),
                ..Default::default()
            });
        }

        let (history_context, kb_context) = tokio::join!(
            self.history_context(ctx.thread_id, &query),
            self.kb_context(&state.knowledge_base_ids, &query),
        );
        Ok(ChatPatch {
            history_context: Some(history_context),
            kb_context: Some(kb_context),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use crate::retrieval::{Embedder, HashEmbedder, RetrievalError};
    use crate::state::GraphState as _;
    use crate::store::embedding::EmbeddingStore;
    use crate::store::test_pool;
    use crate::stream::EventSender;

    async fn seeded_node() -> ContextRetrievalNode {
        let embedder = Arc::new(HashEmbedder::new(32));
        let store = EmbeddingStore::new(test_pool().await);
        let content = "天气 很 好";
        store
            .insert_message_embedding(1, 1, 1, "user", content, &embedder.embed(content).await.unwrap())
            .await
            .unwrap();
        let chunk = "今天 天气 晴朗";
        store
            .insert_chunk(5, 1, Some("天气.md"), 0, chunk, &embedder.embed(chunk).await.unwrap(), None)
            .await
            .unwrap();
        ContextRetrievalNode::new(Arc::new(Retriever::new(embedder, store)), 5, 0.1)
    }

    fn state_with_query(query: &str, kb_ids: Vec<i64>) -> ChatState {
        let mut state = ChatState::default();
        state.apply(ChatPatch {
            messages: vec![ChatMessage::user(query)],
            knowledge_base_ids: Some(kb_ids),
            ..Default::default()
        });
        state
    }

    /// **Scenario**: both contexts come back formatted with their headers;
    /// running twice yields byte-equal strings (purity).
    #[tokio::test]
    async fn retrieves_and_formats_both_contexts() {
        let node = seeded_node().await;
        let state = state_with_query("天气 怎么样", vec![5]);
        let (ctx, _rx) = {
            let (events, rx) = EventSender::channel(64);
            (ExecContext { thread_id: 1, events }, rx)
        };

        let first = node.run(&state, &ctx).await.unwrap();
        let history = first.history_context.clone().unwrap();
        let kb = first.kb_context.clone().unwrap();
        assert!(history.starts_with("【相关历史对话】\n1. 用户: "));
        assert!(kb.starts_with("【知识库参考资料】\n1. [天气.md] (相似度: "));

        let second = node.run(&state, &ctx).await.unwrap();
        assert_eq!(second.history_context.unwrap(), history);
        assert_eq!(second.kb_context.unwrap(), kb);
    }

    /// **Scenario**: no enabled knowledge bases means empty kb context;
    /// history still runs.
    #[tokio::test]
    async fn no_kb_ids_no_kb_context() {
        let node = seeded_node().await;
        let state = state_with_query("天气 怎么样", vec![]);
        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        let patch = node.run(&state, &ctx).await.unwrap();
        assert_eq!(patch.kb_context.as_deref(), Some(""));
        assert!(!patch.history_context.unwrap().is_empty());
    }

    /// **Scenario**: a failing embedder degrades to empty context instead
    /// of failing the turn.
    #[tokio::test]
    async fn retrieval_failure_degrades() {
        struct Broken;
        #[async_trait]
        impl Embedder for Broken {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>, RetrievalError> {
                Err(RetrievalError::Embedding("offline".into()))
            }
            fn dimension(&self) -> usize {
                0
            }
        }
        let node = ContextRetrievalNode::new(
            Arc::new(Retriever::new(Arc::new(Broken), EmbeddingStore::new(test_pool().await))),
            5,
            0.1,
        );
        let state = state_with_query("任何问题", vec![5]);
        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        let patch = node.run(&state, &ctx).await.unwrap();
        assert_eq!(patch.history_context.as_deref(), Some(""));
        assert_eq!(patch.kb_context.as_deref(), Some(""));
    }
}
