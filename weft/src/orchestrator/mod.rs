//! The per-turn orchestration service.
//!
//! Wires the node catalogue into the compiled graph and drives one turn
//! end to end: ownership check, user-message persistence (skipped on
//! regenerate), graph invocation with checkpoint forking, transport event
//! mapping with the output-node whitelist, assistant persistence bound to
//! the terminal checkpoint, first-turn title generation, and best-effort
//! embedding writeback.

mod graph_wiring;
mod service;

pub use graph_wiring::build_graph;
pub use service::{Orchestrator, TurnRequest};

use crate::nodes::{CHATBOT, SUMMARY};

/// Graph nodes whose streamed tokens are forwarded to the client. Tokens
/// from every other node (planning, rewrite) stay internal — a hard
/// contract.
pub const OUTPUT_NODES: [&str; 2] = [CHATBOT, SUMMARY];
