//! Graph assembly: the v4 knowledge-base-integrated layout.
//!
//! ```text
//! START → router ─┬→ rewrite → context_retrieval → chatbot ⇄ tools → END
//!                 └→ kb_precheck → planning ⇄ search
//!                                     └→ summary → END
//! ```

use std::sync::Arc;

use env_config::Settings;

use crate::graph::{CompilationError, CompiledGraph, StateGraph, START};
use crate::llm::ChatModel;
use crate::nodes::{
    chatbot_route, planning_route, route_mode, ChatbotNode, ContextRetrievalNode, KbPrecheckNode,
    PlanningNode, RewriteNode, RouterNode, SearchNode, SummaryNode, ToolsNode, CHATBOT,
    CONTEXT_RETRIEVAL, KB_PRECHECK, PLANNING, REWRITE, ROUTER, SEARCH, SUMMARY, TOOLS,
};
use crate::retrieval::Retriever;
use crate::state::ChatState;
use crate::store::checkpoint::Checkpointer;
use crate::tools::ToolRegistry;
use crate::websearch::SearchClient;

/// Builds the compiled conversation graph.
///
/// The chatbot gets the model with the registry's tools bound; every
/// other LLM node uses the unbound handle.
pub fn build_graph(
    model: Arc<dyn ChatModel>,
    retriever: Arc<Retriever>,
    registry: Arc<ToolRegistry>,
    search: Arc<dyn SearchClient>,
    checkpointer: Arc<dyn Checkpointer<ChatState>>,
    settings: &Settings,
) -> Result<CompiledGraph<ChatState>, CompilationError> {
    let chat_model = if registry.is_empty() {
        model.clone()
    } else {
        model.bind_tools(registry.specs())
    };

    let mut graph = StateGraph::<ChatState>::new();
    graph.add_node(ROUTER, Arc::new(RouterNode));
    graph.add_node(REWRITE, Arc::new(RewriteNode::new(model.clone())));
    graph.add_node(
        CONTEXT_RETRIEVAL,
        Arc::new(ContextRetrievalNode::new(
            retriever.clone(),
            settings.rag_top_k,
            settings.rag_similarity_threshold,
        )),
    );
    graph.add_node(
        CHATBOT,
        Arc::new(ChatbotNode::new(
            chat_model,
            settings.max_history_messages,
            settings.max_history_tokens,
        )),
    );
    graph.add_node(TOOLS, Arc::new(ToolsNode::new(registry)));
    graph.add_node(
        KB_PRECHECK,
        Arc::new(KbPrecheckNode::new(
            retriever,
            settings.rag_top_k,
            settings.rag_similarity_threshold,
        )),
    );
    graph.add_node(
        PLANNING,
        Arc::new(PlanningNode::new(model.clone(), settings.max_search_words)),
    );
    graph.add_node(SEARCH, Arc::new(SearchNode::new(search)));
    graph.add_node(SUMMARY, Arc::new(SummaryNode::new(model)));

    graph.add_edge(START, ROUTER);
    graph.add_conditional_edges(ROUTER, Arc::new(route_mode), None);
    graph.add_edge(REWRITE, CONTEXT_RETRIEVAL);
    graph.add_edge(CONTEXT_RETRIEVAL, CHATBOT);
    graph.add_conditional_edges(CHATBOT, Arc::new(chatbot_route), None);
    graph.add_edge(TOOLS, CHATBOT);
    graph.add_edge(KB_PRECHECK, PLANNING);
    graph.add_conditional_edges(
        PLANNING,
        planning_route(settings.deep_search_max_rounds),
        None,
    );
    graph.add_edge(SEARCH, PLANNING);
    graph.add_edge(SUMMARY, crate::graph::END);

    graph.compile_with_checkpointer(checkpointer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockChat;
    use crate::retrieval::HashEmbedder;
    use crate::store::checkpoint::MemorySaver;
    use crate::store::embedding::EmbeddingStore;
    use crate::store::test_pool;
    use crate::websearch::MockSearch;

    /// **Scenario**: the full v4 wiring compiles.
    #[tokio::test]
    async fn wiring_compiles() {
        let settings = Settings::from_env().unwrap();
        let retriever = Arc::new(Retriever::new(
            Arc::new(HashEmbedder::new(16)),
            EmbeddingStore::new(test_pool().await),
        ));
        let graph = build_graph(
            Arc::new(MockChat::always("ok")),
            retriever,
            Arc::new(ToolRegistry::builtin()),
            Arc::new(MockSearch::new()),
            Arc::new(MemorySaver::<ChatState>::new()),
            &settings,
        );
        assert!(graph.is_ok());
    }
}
