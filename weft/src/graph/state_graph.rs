//! Graph builder: nodes plus explicit edges (from → to) and conditional
//! edges routed by a state predicate.
//!
//! A node has either one outgoing `add_edge` or `add_conditional_edges`,
//! never both. `compile` validates the shape and returns an executable
//! [`CompiledGraph`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::graph::compile_error::CompilationError;
use crate::graph::compiled::{CompiledGraph, NextEdge};
use crate::graph::node::Node;
use crate::state::GraphState;
use crate::store::checkpoint::Checkpointer;

/// Sentinel for graph entry: use as `from` in `add_edge(START, first)`.
pub const START: &str = "__start__";

/// Sentinel for graph exit: use as `to` in `add_edge(last, END)`.
pub const END: &str = "__end__";

/// Routing function for conditional edges: `(state) → key`.
pub type RouterFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;

pub(crate) struct ConditionalEdges<S> {
    pub(crate) router: RouterFn<S>,
    pub(crate) path_map: Option<HashMap<String, String>>,
}

impl<S> Clone for ConditionalEdges<S> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            path_map: self.path_map.clone(),
        }
    }
}

/// State graph under construction.
pub struct StateGraph<S: GraphState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    edges: Vec<(String, String)>,
    conditional_edges: HashMap<String, ConditionalEdges<S>>,
}

impl<S: GraphState> Default for StateGraph<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: GraphState> StateGraph<S> {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            conditional_edges: HashMap::new(),
        }
    }

    /// Adds a node; replaces any node with the same id.
    pub fn add_node(&mut self, id: impl Into<String>, node: Arc<dyn Node<S>>) -> &mut Self {
        self.nodes.insert(id.into(), node);
        self
    }

    /// Adds an edge. Use [`START`] / [`END`] for entry and exit.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.push((from.into(), to.into()));
        self
    }

    /// Adds conditional edges from `source`: after the source node runs,
    /// `router(state)` produces a key; the next node is `path_map[key]` when
    /// a map is given, else the key itself (or [`END`]).
    pub fn add_conditional_edges(
        &mut self,
        source: impl Into<String>,
        router: RouterFn<S>,
        path_map: Option<HashMap<String, String>>,
    ) -> &mut Self {
        self.conditional_edges
            .insert(source.into(), ConditionalEdges { router, path_map });
        self
    }

    /// Validates the shape and produces an executable graph.
    pub fn compile(self) -> Result<CompiledGraph<S>, CompilationError> {
        self.compile_internal(None)
    }

    /// Like [`compile`](Self::compile), with a checkpointer that persists
    /// the state after every executed step.
    pub fn compile_with_checkpointer(
        self,
        checkpointer: Arc<dyn Checkpointer<S>>,
    ) -> Result<CompiledGraph<S>, CompilationError> {
        self.compile_internal(Some(checkpointer))
    }

    fn compile_internal(
        self,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Result<CompiledGraph<S>, CompilationError> {
        for (from, to) in &self.edges {
            if from != START && !self.nodes.contains_key(from) {
                return Err(CompilationError::NodeNotFound(from.clone()));
            }
            if to != END && !self.nodes.contains_key(to) {
                return Err(CompilationError::NodeNotFound(to.clone()));
            }
        }
        for (source, cond) in &self.conditional_edges {
            if !self.nodes.contains_key(source) {
                return Err(CompilationError::NodeNotFound(source.clone()));
            }
            if let Some(map) = &cond.path_map {
                for target in map.values() {
                    if target != END && !self.nodes.contains_key(target) {
                        return Err(CompilationError::InvalidConditionalPathMap(target.clone()));
                    }
                }
            }
        }

        let start_edges: Vec<_> = self
            .edges
            .iter()
            .filter(|(f, _)| f == START)
            .map(|(_, t)| t.clone())
            .collect();
        let entry = match start_edges.len() {
            0 => return Err(CompilationError::MissingStart),
            1 => start_edges.into_iter().next().expect("one start edge"),
            _ => {
                return Err(CompilationError::InvalidChain(
                    "multiple edges from START".into(),
                ))
            }
        };

        let has_end = self.edges.iter().any(|(_, t)| t == END)
            || self.conditional_edges.values().any(|c| {
                c.path_map
                    .as_ref()
                    .map_or(true, |m| m.values().any(|v| v == END))
            });
        if !has_end {
            return Err(CompilationError::MissingEnd);
        }

        let froms: Vec<_> = self
            .edges
            .iter()
            .filter(|(f, _)| f != START)
            .map(|(f, _)| f.clone())
            .collect();
        let distinct: HashSet<_> = froms.iter().cloned().collect();
        if distinct.len() != froms.len() {
            return Err(CompilationError::InvalidChain("duplicate from".into()));
        }
        for source in self.conditional_edges.keys() {
            if distinct.contains(source) {
                return Err(CompilationError::NodeHasBothEdgeAndConditional(
                    source.clone(),
                ));
            }
        }

        let mut next: HashMap<String, NextEdge<S>> = self
            .edges
            .iter()
            .filter(|(f, _)| f != START)
            .map(|(f, t)| (f.clone(), NextEdge::Unconditional(t.clone())))
            .collect();
        for (source, cond) in self.conditional_edges {
            next.insert(source.clone(), NextEdge::Conditional(cond));
        }

        Ok(CompiledGraph::new(self.nodes, entry, next, checkpointer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::ExecContext;
    use crate::state::{ChatPatch, ChatState};

    struct Idle(&'static str);

    #[async_trait::async_trait]
    impl Node<ChatState> for Idle {
        fn id(&self) -> &str {
            self.0
        }
        async fn run(
            &self,
            _state: &ChatState,
            _ctx: &ExecContext,
        ) -> Result<ChatPatch, crate::error::OrchestratorError> {
            Ok(ChatPatch::default())
        }
    }

    /// **Scenario**: compile fails when an edge references an unknown node.
    #[test]
    fn unknown_node_rejected() {
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Idle("a")));
        g.add_edge(START, "a");
        g.add_edge("a", "ghost");
        match g.compile() {
            Err(CompilationError::NodeNotFound(id)) => assert_eq!(id, "ghost"),
            other => panic!("expected NodeNotFound, got {:?}", other.err()),
        }
    }

    /// **Scenario**: a node with both an edge and conditional edges is a
    /// compile error.
    #[test]
    fn both_edge_kinds_rejected() {
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Idle("a")));
        g.add_node("b", Arc::new(Idle("b")));
        g.add_edge(START, "a");
        g.add_edge("a", "b");
        g.add_edge("b", END);
        g.add_conditional_edges("a", Arc::new(|_| "b".to_string()), None);
        match g.compile() {
            Err(CompilationError::NodeHasBothEdgeAndConditional(id)) => assert_eq!(id, "a"),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    /// **Scenario**: a conditional path map pointing at a missing node is a
    /// compile error.
    #[test]
    fn bad_path_map_rejected() {
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Idle("a")));
        g.add_edge(START, "a");
        g.add_conditional_edges(
            "a",
            Arc::new(|_| "x".to_string()),
            Some([("x".to_string(), "ghost".to_string())].into_iter().collect()),
        );
        match g.compile() {
            Err(CompilationError::InvalidConditionalPathMap(id)) => assert_eq!(id, "ghost"),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    /// **Scenario**: missing START or END is a compile error.
    #[test]
    fn missing_start_and_end_rejected() {
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Idle("a")));
        g.add_edge("a", END);
        assert!(matches!(g.compile(), Err(CompilationError::MissingStart)));

        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Idle("a")));
        g.add_node("b", Arc::new(Idle("b")));
        g.add_edge(START, "a");
        g.add_edge("a", "b");
        assert!(matches!(g.compile(), Err(CompilationError::MissingEnd)));
    }
}
