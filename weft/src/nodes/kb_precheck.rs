//! Knowledge-base pre-check for deep search.
//!
//! Before any planning happens, the internal knowledge bases are searched
//! and their hits injected under the `"内部知识库"` reference key, so the
//! planner knows what is already answered and only searches the web for
//! the rest.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::nodes::KB_PRECHECK;
use crate::retrieval::{HybridMode, Retriever};
use crate::state::{ChatPatch, ChatState, Reference};

/// Reference key for internal knowledge hits.
pub const KB_REFERENCE_KEY: &str = "内部知识库";

pub struct KbPrecheckNode {
    retriever: Arc<Retriever>,
    top_k: usize,
    similarity_threshold: f32,
}

impl KbPrecheckNode {
    pub fn new(retriever: Arc<Retriever>, top_k: usize, similarity_threshold: f32) -> Self {
        Self {
            retriever,
            top_k,
            similarity_threshold,
        }
    }
}

#[async_trait]
impl Node<ChatState> for KbPrecheckNode {
    fn id(&self) -> &str {
        KB_PRECHECK
    }

    async fn run(
        &self,
        state: &ChatState,
        _ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        let question = state.effective_question();
        let passthrough = ChatPatch {
            question: Some(question.clone()),
            ..Default::default()
        };
        if question.is_empty() || state.knowledge_base_ids.is_empty() {
            info!("no knowledge base configured, skipping pre-check");
            return Ok(passthrough);
        }

        let results = match self
            .retriever
            .hybrid_search_chunks(
                &state.knowledge_base_ids,
                &question,
                self.top_k,
                self.similarity_threshold,
                HybridMode::Union,
            )
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("kb pre-check failed: {e}");
                return Ok(passthrough);
            }
        };
        if results.is_empty() {
            info!("no relevant content found in knowledge base");
            return Ok(passthrough);
        }

        let references: Vec<Reference> = results
            .iter()
            .map(|chunk| Reference {
                source: chunk.source.clone(),
                snippet: chunk.content.clone(),
                score: chunk.similarity,
                file_name: Some(chunk.source.clone()),
                chunk_index: Some(chunk.chunk_index),
            })
            .collect();
        let items: Vec<String> = references
            .iter()
            .map(|r| format!("[{}] (相关度: {:.2})\n{}", r.source, r.score, r.snippet))
            .collect();
        info!("kb pre-check: injected {} chunks", items.len());
        let kb_context = format!("【内部知识库参考资料】\n{}", items.join("\n\n"));
        Ok(ChatPatch {
            question: Some(question),
            references: Some(state.merged_references(KB_REFERENCE_KEY, items)),
            kb_context: Some(kb_context),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChatMessage;
    use crate::retrieval::{Embedder, HashEmbedder};
    use crate::state::GraphState as _;
    use crate::store::embedding::EmbeddingStore;
    use crate::store::test_pool;
    use crate::stream::EventSender;

    async fn node_with_chunk() -> KbPrecheckNode {
        let embedder = Arc::new(HashEmbedder::new(32));
        let store = EmbeddingStore::new(test_pool().await);
        let content = "公司 年假 制度 一共 十五 天";
        store
            .insert_chunk(9, 1, Some("手册.pdf"), 0, content, &embedder.embed(content).await.unwrap(), None)
            .await
            .unwrap();
        KbPrecheckNode::new(Arc::new(Retriever::new(embedder, store)), 5, 0.05)
    }

    fn deep_state(question: &str, kb_ids: Vec<i64>) -> ChatState {
        let mut state = ChatState::default();
        state.apply(ChatPatch {
            messages: vec![ChatMessage::user(question)],
            knowledge_base_ids: Some(kb_ids),
            ..Default::default()
        });
        state
    }

    /// **Scenario**: hits land under the 内部知识库 reference key and the
    /// question channel is filled from the last user message.
    #[tokio::test]
    async fn injects_kb_references() {
        let node = node_with_chunk().await;
        let state = deep_state("年假 有 几 天", vec![9]);
        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };

        let patch = node.run(&state, &ctx).await.unwrap();
        assert_eq!(patch.question.as_deref(), Some("年假 有 几 天"));
        let references = patch.references.unwrap();
        assert_eq!(references[0].key, KB_REFERENCE_KEY);
        assert!(references[0].items[0].starts_with("[手册.pdf] (相关度: "));
        assert!(patch
            .kb_context
            .unwrap()
            .starts_with("【内部知识库参考资料】"));
    }

    /// **Scenario**: without knowledge bases the node passes the question
    /// through untouched.
    #[tokio::test]
    async fn no_kb_is_passthrough() {
        let node = node_with_chunk().await;
        let state = deep_state("年假 有 几 天", vec![]);
        let (events, _rx) = EventSender::channel(64);
        let ctx = ExecContext { thread_id: 1, events };
        let patch = node.run(&state, &ctx).await.unwrap();
        assert!(patch.references.is_none());
        assert!(patch.kb_context.is_none());
        assert_eq!(patch.question.as_deref(), Some("年假 有 几 天"));
    }
}
