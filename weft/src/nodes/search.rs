//! Deep-search web search node.
//!
//! Executes all pending queries concurrently against the search adapter,
//! appends the formatted hits under each query's reference key, and
//! clears the query channel. A failed query contributes nothing; the
//! planner sees what was found and re-plans.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{info, warn};

use crate::error::OrchestratorError;
use crate::graph::{ExecContext, Node};
use crate::nodes::SEARCH;
use crate::state::{ChatPatch, ChatState, ReferenceGroup};
use crate::websearch::SearchClient;

pub struct SearchNode {
    client: Arc<dyn SearchClient>,
}

impl SearchNode {
    pub fn new(client: Arc<dyn SearchClient>) -> Self {
        Self { client }
    }

    async fn search_single(&self, query: &str) -> (String, Vec<String>) {
        match self.client.search(query).await {
            Ok(hits) => {
                let formatted: Vec<String> = hits.iter().map(|h| h.format()).collect();
                info!(query, count = formatted.len(), "search results");
                (query.to_string(), formatted)
            }
            Err(e) => {
                warn!(query, "search failed: {e}");
                (query.to_string(), Vec::new())
            }
        }
    }
}

fn merge_group(references: &mut Vec<ReferenceGroup>, key: String, items: Vec<String>) {
    if items.is_empty() {
        return;
    }
    if let Some(group) = references.iter_mut().find(|g| g.key == key) {
        group.items.extend(items);
    } else {
        references.push(ReferenceGroup { key, items });
    }
}

#[async_trait]
impl Node<ChatState> for SearchNode {
    fn id(&self) -> &str {
        SEARCH
    }

    async fn run(
        &self,
        state: &ChatState,
        _ctx: &ExecContext,
    ) -> Result<ChatPatch, OrchestratorError> {
        if state.search_queries.is_empty() {
            warn!("no search queries provided");
            return Ok(ChatPatch {
                search_queries: Some(Vec::new()),
                ..Default::default()
            });
        }
        info!(queries = ?state.search_queries, "searching");

        let results = join_all(
            state
                .search_queries
                .iter()
                .map(|query| self.search_single(query)),
        )
        .await;

        let mut references = state.references.clone();
        for (query, items) in results {
            merge_group(&mut references, query, items);
        }
        Ok(ChatPatch {
            references: Some(references),
            search_queries: Some(Vec::new()),
            ..Default::default()
        })
    }
}
