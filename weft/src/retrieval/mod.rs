//! Retrieval layer: semantic search over message vectors plus
//! vector + BM25 hybrid search over document chunks, fused with
//! Reciprocal Rank Fusion.
//!
//! Retrieval failures degrade to empty context at the call sites; they
//! never fail a turn.

pub mod bm25;
pub mod embedder;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::store::embedding::EmbeddingStore;
use crate::store::StoreError;

pub use bm25::{tokenize, Bm25};
pub use embedder::{Embedder, HashEmbedder, OpenAiEmbedder};

/// RRF constant: robust to score-scale differences between the rankers,
/// needs no training.
pub const RRF_K: f64 = 60.0;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("embedding: {0}")]
    Embedding(String),
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// How hybrid candidates are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HybridMode {
    /// Any document appearing in either ranking.
    Union,
    /// Only documents appearing in both rankings.
    Intersection,
}

/// A semantically similar prior message.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredMessage {
    pub role: String,
    pub content: String,
    pub similarity: f32,
}

/// One hybrid-search hit.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredChunk {
    pub content: String,
    pub source: String,
    pub chunk_index: i64,
    pub rrf_score: f64,
    /// Cosine similarity when the vector ranking saw this chunk.
    pub similarity: f32,
    pub metadata: Option<String>,
}

/// Cosine similarity (`1 - cosine_distance`); zero for mismatched or
/// zero-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

/// Embedding handle plus the vector rows; pure in its inputs — a fixed
/// corpus yields byte-identical results across calls.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: EmbeddingStore,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: EmbeddingStore) -> Self {
        Self { embedder, store }
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Top-K prior messages of the conversation above the similarity
    /// threshold, descending.
    pub async fn semantic_search_messages(
        &self,
        conversation_id: i64,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredMessage>, RetrievalError> {
        let query_vector = self.embedder.embed(query).await?;
        let candidates = self.store.message_candidates(conversation_id).await?;
        let mut scored: Vec<ScoredMessage> = candidates
            .into_iter()
            .map(|row| {
                let similarity = cosine_similarity(&query_vector, &row.vector);
                ScoredMessage {
                    role: row.role,
                    content: row.content,
                    similarity,
                }
            })
            .filter(|m| m.similarity >= threshold)
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Hybrid search over the knowledge bases' chunks.
    ///
    /// Vector candidates: top-2K by cosine, filtered by the threshold.
    /// Lexical candidates: top-2K by BM25 over the same corpus. The two
    /// rankings fuse with RRF (`Σ 1/(k + rank)`, k = 60); `union` keeps
    /// either list, `intersection` only documents present in both.
    pub async fn hybrid_search_chunks(
        &self,
        knowledge_base_ids: &[i64],
        query: &str,
        top_k: usize,
        threshold: f32,
        mode: HybridMode,
    ) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let chunks = self
            .store
            .chunks_for_knowledge_bases(knowledge_base_ids)
            .await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query).await?;
        let pool = 2 * top_k;

        let mut vector_ranked: Vec<(usize, f32)> = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i, cosine_similarity(&query_vector, &c.vector)))
            .filter(|(_, sim)| *sim >= threshold)
            .collect();
        vector_ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
        });
        vector_ranked.truncate(pool);

        let corpus: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let lexical_ranked = Bm25::new(&corpus).top_n(query, pool);

        let mut rrf: HashMap<usize, f64> = HashMap::new();
        for (rank, (index, _)) in vector_ranked.iter().enumerate() {
            *rrf.entry(*index).or_default() += 1.0 / (RRF_K + (rank + 1) as f64);
        }
        for (rank, (index, _)) in lexical_ranked.iter().enumerate() {
            *rrf.entry(*index).or_default() += 1.0 / (RRF_K + (rank + 1) as f64);
        }

        let in_vector: Vec<usize> = vector_ranked.iter().map(|(i, _)| *i).collect();
        let in_lexical: Vec<usize> = lexical_ranked.iter().map(|(i, _)| *i).collect();
        let similarity_of = |index: usize| {
            vector_ranked
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, s)| *s)
                .unwrap_or(0.0)
        };

        let mut fused: Vec<(usize, f64)> = rrf
            .into_iter()
            .filter(|(index, _)| match mode {
                HybridMode::Union => true,
                HybridMode::Intersection => {
                    in_vector.contains(index) && in_lexical.contains(index)
                }
            })
            .collect();
        fused.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        fused.truncate(top_k);

        Ok(fused
            .into_iter()
            .map(|(index, rrf_score)| {
                let chunk = &chunks[index];
                ScoredChunk {
                    content: chunk.content.clone(),
                    source: chunk
                        .file_name
                        .clone()
                        .unwrap_or_else(|| "未知来源".to_string()),
                    chunk_index: chunk.chunk_index,
                    rrf_score,
                    similarity: similarity_of(index),
                    metadata: chunk.metadata.clone(),
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::embedder::Embedder;
    use crate::store::test_pool;
    use async_trait::async_trait;

    /// Maps known substrings to fixed vectors; everything else is zero.
    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
            let v = if text.contains("graph executor") && text.len() < 20 {
                // the query itself
                vec![1.0, 0.0]
            } else if text.contains("state machines") {
                vec![0.9, 0.1] // A: vector-only match
            } else if text.contains("streams tokens") {
                vec![0.0, 1.0] // B: lexical-only match
            } else if text.contains("checkpoints") {
                vec![0.7, 0.3] // C: matches both rankings
            } else {
                vec![0.0, 0.0]
            };
            Ok(v)
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    async fn seeded_retriever() -> Retriever {
        let store = EmbeddingStore::new(test_pool().await);
        // A: vector-only. B: BM25-only (orthogonal vector). C: both.
        store
            .insert_chunk(1, 1, Some("a.md"), 0, "state machines and runtimes", &[0.9, 0.1], None)
            .await
            .unwrap();
        store
            .insert_chunk(
                1,
                1,
                Some("b.md"),
                1,
                "the graph executor streams tokens to clients over long lived responses",
                &[0.0, 1.0],
                None,
            )
            .await
            .unwrap();
        store
            .insert_chunk(
                1,
                2,
                Some("c.md"),
                0,
                "a graph executor with checkpoints",
                &[0.7, 0.3],
                None,
            )
            .await
            .unwrap();
        Retriever::new(Arc::new(StubEmbedder), store)
    }

    /// **Scenario**: cosine similarity basics, including degenerate
    /// inputs.
    #[test]
    fn cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    /// **Scenario**: union mode returns {C, A, B} in RRF-descending order —
    /// C dominates because both rankings contain it.
    #[tokio::test]
    async fn hybrid_union_rrf_ordering() {
        let retriever = seeded_retriever().await;
        let hits = retriever
            .hybrid_search_chunks(&[1], "graph executor", 3, 0.1, HybridMode::Union)
            .await
            .unwrap();
        let sources: Vec<_> = hits.iter().map(|h| h.source.as_str()).collect();
        assert_eq!(sources, vec!["c.md", "a.md", "b.md"]);
        assert!(hits[0].rrf_score > hits[1].rrf_score);
        assert!(hits[1].rrf_score > hits[2].rrf_score);
    }

    /// **Scenario**: intersection mode never returns a document absent
    /// from either ranking.
    #[tokio::test]
    async fn hybrid_intersection_subset() {
        let retriever = seeded_retriever().await;
        let hits = retriever
            .hybrid_search_chunks(&[1], "graph executor", 3, 0.1, HybridMode::Intersection)
            .await
            .unwrap();
        let sources: Vec<_> = hits.iter().map(|h| h.source.as_str()).collect();
        assert_eq!(sources, vec!["c.md"]);
    }

    /// **Scenario**: hybrid search is pure in its inputs — two runs over a
    /// fixed corpus produce identical results.
    #[tokio::test]
    async fn hybrid_search_is_pure() {
        let retriever = seeded_retriever().await;
        let first = retriever
            .hybrid_search_chunks(&[1], "graph executor", 3, 0.1, HybridMode::Union)
            .await
            .unwrap();
        let second = retriever
            .hybrid_search_chunks(&[1], "graph executor", 3, 0.1, HybridMode::Union)
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    /// **Scenario**: semantic message search filters by threshold and
    /// orders descending.
    #[tokio::test]
    async fn semantic_search_threshold_and_order() {
        let store = EmbeddingStore::new(test_pool().await);
        store
            .insert_message_embedding(1, 100, 1, "user", "state machines and runtimes", &[0.9, 0.1])
            .await
            .unwrap();
        store
            .insert_message_embedding(2, 100, 1, "assistant", "the graph executor streams tokens", &[0.0, 1.0])
            .await
            .unwrap();
        store
            .insert_message_embedding(3, 100, 1, "user", "a graph executor with checkpoints", &[0.7, 0.3])
            .await
            .unwrap();
        let retriever = Retriever::new(Arc::new(StubEmbedder), store);

        let hits = retriever
            .semantic_search_messages(100, "graph executor", 5, 0.5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2, "orthogonal message filtered out");
        assert!(hits[0].similarity >= hits[1].similarity);
        assert!(hits[0].content.contains("state machines"));
    }

    /// **Scenario**: an empty knowledge-base set yields no hits.
    #[tokio::test]
    async fn empty_kb_set_yields_nothing() {
        let retriever = seeded_retriever().await;
        let hits = retriever
            .hybrid_search_chunks(&[], "graph executor", 3, 0.1, HybridMode::Union)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
