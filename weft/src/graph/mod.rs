//! State-graph executor: nodes + explicit edges with conditional routing,
//! a per-channel reducer, per-step checkpointing, and a bounded event
//! stream.
//!
//! Build with [`StateGraph`] (`add_node` / `add_edge` / conditional edges,
//! `START` and `END` sentinels), then [`StateGraph::compile`] or
//! [`StateGraph::compile_with_checkpointer`] into a [`CompiledGraph`] and
//! invoke it with a [`RunConfig`].

mod compile_error;
mod compiled;
mod node;
mod state_graph;

pub use compile_error::CompilationError;
pub use compiled::{CompiledGraph, RunConfig, RunOutcome};
pub use node::{ExecContext, Node};
pub use state_graph::{RouterFn, StateGraph, END, START};
