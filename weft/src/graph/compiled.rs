//! Executable graph: the step loop.
//!
//! Each step runs one node, merges its patch through the state reducer,
//! writes a checkpoint (when a checkpointer is attached), and resolves the
//! outgoing edge. Checkpoints form a per-thread linked list: the first
//! checkpoint of an invocation ("input", written after the caller's patch
//! is applied) chains onto the loaded ancestor, and every step chains onto
//! the previous step.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::OrchestratorError;
use crate::graph::node::{ExecContext, Node};
use crate::graph::state_graph::{ConditionalEdges, END};
use crate::state::GraphState;
use crate::store::checkpoint::Checkpointer;
use crate::stream::{EventSender, ExecEvent};

/// Hard bound on steps per invocation; deep-search rounds and tool loops
/// are bounded well below this.
const MAX_STEPS: usize = 64;

pub(crate) enum NextEdge<S> {
    Unconditional(String),
    Conditional(ConditionalEdges<S>),
}

/// Where an invocation starts.
#[derive(Clone, Debug, Default)]
pub struct RunConfig {
    /// Thread identity (= conversation id).
    pub thread_id: i64,
    /// Fork point: start from this checkpoint's state instead of the
    /// thread's latest. Realises "regenerate".
    pub parent_checkpoint_id: Option<i64>,
}

/// Result of one invocation.
#[derive(Debug)]
pub struct RunOutcome<S> {
    pub state: S,
    /// Terminal checkpoint of this run; `None` without a checkpointer.
    pub checkpoint_id: Option<i64>,
}

/// Compiled, immutable graph ready for invocation.
pub struct CompiledGraph<S: GraphState> {
    nodes: HashMap<String, Arc<dyn Node<S>>>,
    entry: String,
    next: HashMap<String, NextEdge<S>>,
    checkpointer: Option<Arc<dyn Checkpointer<S>>>,
}

impl<S: GraphState> CompiledGraph<S> {
    pub(crate) fn new(
        nodes: HashMap<String, Arc<dyn Node<S>>>,
        entry: String,
        next: HashMap<String, NextEdge<S>>,
        checkpointer: Option<Arc<dyn Checkpointer<S>>>,
    ) -> Self {
        Self {
            nodes,
            entry,
            next,
            checkpointer,
        }
    }

    /// Runs the graph to END, emitting events as it goes.
    ///
    /// The start state is the checkpoint named by
    /// [`RunConfig::parent_checkpoint_id`], else the thread's latest, else
    /// default. `patch` is applied before the first step (it may be empty
    /// on a fork). The id returned in [`RunOutcome`] is read back within
    /// the same handle that wrote it, so it is authoritative for the
    /// transport.
    pub async fn run(
        &self,
        cfg: &RunConfig,
        patch: S::Patch,
        events: EventSender,
    ) -> Result<RunOutcome<S>, OrchestratorError> {
        let (mut state, mut parent) = self.load_start_state(cfg).await?;
        state.apply(patch);

        let mut checkpoint_id = self.save(cfg.thread_id, &mut parent, &state).await?;

        let ctx = ExecContext {
            thread_id: cfg.thread_id,
            events,
        };

        let mut current = self.entry.clone();
        let mut steps = 0usize;
        while current != END {
            steps += 1;
            if steps > MAX_STEPS {
                return Err(OrchestratorError::Internal(format!(
                    "graph exceeded {MAX_STEPS} steps at node {current}"
                )));
            }
            let node = self.nodes.get(&current).ok_or_else(|| {
                OrchestratorError::Internal(format!("edge to unknown node {current}"))
            })?;

            ctx.events
                .emit(ExecEvent::NodeStart {
                    node: current.clone(),
                })
                .await?;
            let patch = node.run(&state, &ctx).await?;
            state.apply(patch);
            checkpoint_id = self.save(cfg.thread_id, &mut parent, &state).await?;
            ctx.events
                .emit(ExecEvent::NodeEnd {
                    node: current.clone(),
                })
                .await?;

            current = self.resolve_next(&current, &state)?;
            debug!(thread_id = cfg.thread_id, next = %current, step = steps, "graph step");
        }

        Ok(RunOutcome {
            state,
            checkpoint_id,
        })
    }

    async fn load_start_state(
        &self,
        cfg: &RunConfig,
    ) -> Result<(S, Option<i64>), OrchestratorError> {
        let Some(cp) = &self.checkpointer else {
            return Ok((S::default(), None));
        };
        let tuple = match cfg.parent_checkpoint_id {
            Some(id) => Some(cp.get(cfg.thread_id, id).await?.ok_or_else(|| {
                OrchestratorError::NotFound(format!("checkpoint {id}"))
            })?),
            None => cp.get_latest(cfg.thread_id).await?,
        };
        Ok(match tuple {
            Some(t) => (t.state, Some(t.checkpoint_id)),
            None => (S::default(), None),
        })
    }

    /// Writes one checkpoint and advances the parent chain.
    async fn save(
        &self,
        thread_id: i64,
        parent: &mut Option<i64>,
        state: &S,
    ) -> Result<Option<i64>, OrchestratorError> {
        let Some(cp) = &self.checkpointer else {
            return Ok(None);
        };
        let id = cp.put(thread_id, *parent, state).await?;
        *parent = Some(id);
        Ok(Some(id))
    }

    fn resolve_next(&self, current: &str, state: &S) -> Result<String, OrchestratorError> {
        match self.next.get(current) {
            None => Ok(END.to_string()),
            Some(NextEdge::Unconditional(to)) => Ok(to.clone()),
            Some(NextEdge::Conditional(cond)) => {
                let key = (cond.router)(state);
                let target = match &cond.path_map {
                    Some(map) => map.get(&key).cloned().unwrap_or(key),
                    None => key,
                };
                if target != END && !self.nodes.contains_key(&target) {
                    return Err(OrchestratorError::Internal(format!(
                        "conditional edge from {current} routed to unknown node {target}"
                    )));
                }
                Ok(target)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{StateGraph, END, START};
    use crate::message::ChatMessage;
    use crate::state::{ChatPatch, ChatState};
    use crate::store::checkpoint::MemorySaver;

    struct Append(&'static str, &'static str);

    #[async_trait::async_trait]
    impl Node<ChatState> for Append {
        fn id(&self) -> &str {
            self.0
        }
        async fn run(
            &self,
            _state: &ChatState,
            _ctx: &ExecContext,
        ) -> Result<ChatPatch, OrchestratorError> {
            Ok(ChatPatch {
                messages: vec![ChatMessage::assistant(self.1)],
                ..Default::default()
            })
        }
    }

    /// Counts down: keeps routing to itself until planning_rounds hits 2.
    struct Loopy;

    #[async_trait::async_trait]
    impl Node<ChatState> for Loopy {
        fn id(&self) -> &str {
            "loopy"
        }
        async fn run(
            &self,
            state: &ChatState,
            _ctx: &ExecContext,
        ) -> Result<ChatPatch, OrchestratorError> {
            Ok(ChatPatch {
                planning_rounds: Some(state.planning_rounds + 1),
                ..Default::default()
            })
        }
    }

    fn drain_events(mut rx: tokio::sync::mpsc::Receiver<ExecEvent>) -> Vec<ExecEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    /// **Scenario**: a linear two-node run appends both messages, emits
    /// node start/end pairs in order, and ends.
    #[tokio::test]
    async fn linear_run_merges_patches_in_order() {
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Append("a", "one")));
        g.add_node("b", Arc::new(Append("b", "two")));
        g.add_edge(START, "a");
        g.add_edge("a", "b");
        g.add_edge("b", END);
        let graph = g.compile().unwrap();

        let (tx, rx) = EventSender::channel(32);
        let outcome = graph
            .run(&RunConfig::default(), ChatPatch::default(), tx)
            .await
            .unwrap();

        let texts: Vec<_> = outcome.state.messages.iter().map(|m| m.text()).collect();
        assert_eq!(texts, vec!["one", "two"]);
        assert!(outcome.checkpoint_id.is_none(), "no checkpointer attached");

        let events = drain_events(rx);
        assert_eq!(
            events,
            vec![
                ExecEvent::NodeStart { node: "a".into() },
                ExecEvent::NodeEnd { node: "a".into() },
                ExecEvent::NodeStart { node: "b".into() },
                ExecEvent::NodeEnd { node: "b".into() },
            ]
        );
    }

    /// **Scenario**: a conditional self-loop routes by state and terminates
    /// when the predicate flips.
    #[tokio::test]
    async fn conditional_loop_terminates() {
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("loopy", Arc::new(Loopy));
        g.add_edge(START, "loopy");
        g.add_conditional_edges(
            "loopy",
            Arc::new(|s: &ChatState| {
                if s.planning_rounds < 2 {
                    "loopy".to_string()
                } else {
                    END.to_string()
                }
            }),
            None,
        );
        let graph = g.compile().unwrap();

        let (tx, _rx) = EventSender::channel(32);
        let outcome = graph
            .run(&RunConfig::default(), ChatPatch::default(), tx)
            .await
            .unwrap();
        assert_eq!(outcome.state.planning_rounds, 2);
    }

    /// **Scenario**: with a checkpointer, every step writes a checkpoint
    /// chained onto the previous one; the input checkpoint holds the
    /// caller's patch.
    #[tokio::test]
    async fn per_step_checkpoint_chain() {
        let saver = Arc::new(MemorySaver::<ChatState>::new());
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Append("a", "one")));
        g.add_edge(START, "a");
        g.add_edge("a", END);
        let graph = g.compile_with_checkpointer(saver.clone()).unwrap();

        let (tx, _rx) = EventSender::channel(32);
        let patch = ChatPatch {
            messages: vec![ChatMessage::user("hi")],
            ..Default::default()
        };
        let outcome = graph
            .run(
                &RunConfig {
                    thread_id: 7,
                    parent_checkpoint_id: None,
                },
                patch,
                tx,
            )
            .await
            .unwrap();

        // input checkpoint + one step
        let list = saver.list(7, None).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].parent_checkpoint_id, None);
        assert_eq!(list[1].parent_checkpoint_id, Some(list[0].checkpoint_id));
        assert_eq!(outcome.checkpoint_id, Some(list[1].checkpoint_id));
        assert_eq!(list[0].message_count, 1, "input holds the user message");
        assert_eq!(list[1].message_count, 2);
    }

    /// **Scenario**: a second run continues from the thread's latest
    /// checkpoint; a fork from the input checkpoint creates a sibling
    /// branch whose terminal shares the input as ancestor.
    #[tokio::test]
    async fn resume_and_fork() {
        let saver = Arc::new(MemorySaver::<ChatState>::new());
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Append("a", "reply")));
        g.add_edge(START, "a");
        g.add_edge("a", END);
        let graph = g.compile_with_checkpointer(saver.clone()).unwrap();

        let (tx, _rx) = EventSender::channel(32);
        let first = graph
            .run(
                &RunConfig {
                    thread_id: 1,
                    parent_checkpoint_id: None,
                },
                ChatPatch {
                    messages: vec![ChatMessage::user("hi")],
                    ..Default::default()
                },
                tx.clone(),
            )
            .await
            .unwrap();
        assert_eq!(first.state.messages.len(), 2);

        // Fork from the input checkpoint (state = just the user message).
        let input_id = saver.list(1, None).await.unwrap()[0].checkpoint_id;
        let forked = graph
            .run(
                &RunConfig {
                    thread_id: 1,
                    parent_checkpoint_id: Some(input_id),
                },
                ChatPatch::default(),
                tx.clone(),
            )
            .await
            .unwrap();
        assert_eq!(
            forked.state.messages.len(),
            2,
            "fork re-ran from the user message, not the full thread"
        );

        // Both terminals are children of branches rooted at the input.
        let list = saver.list(1, None).await.unwrap();
        let forked_terminal = list
            .iter()
            .find(|t| Some(t.checkpoint_id) == forked.checkpoint_id)
            .unwrap();
        assert_eq!(forked_terminal.parent_checkpoint_id, Some(input_id));

        // A plain resume starts from the latest state.
        let resumed = graph
            .run(
                &RunConfig {
                    thread_id: 1,
                    parent_checkpoint_id: None,
                },
                ChatPatch {
                    messages: vec![ChatMessage::user("again")],
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap();
        assert_eq!(resumed.state.messages.len(), 4);
    }

    /// **Scenario**: forking from a checkpoint that does not exist is
    /// NotFound, not a silent fresh start.
    #[tokio::test]
    async fn missing_fork_point_is_not_found() {
        let saver = Arc::new(MemorySaver::<ChatState>::new());
        let mut g = StateGraph::<ChatState>::new();
        g.add_node("a", Arc::new(Append("a", "x")));
        g.add_edge(START, "a");
        g.add_edge("a", END);
        let graph = g.compile_with_checkpointer(saver).unwrap();

        let (tx, _rx) = EventSender::channel(8);
        let err = graph
            .run(
                &RunConfig {
                    thread_id: 1,
                    parent_checkpoint_id: Some(999),
                },
                ChatPatch::default(),
                tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }
}
