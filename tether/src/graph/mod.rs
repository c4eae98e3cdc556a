//! Pipeline graph: declared node order + conditional jumps, compile and run.
//!
//! `PipelineGraph` collects nodes, a declared linear order, and per-node
//! settings, then `compile()` validates the shape and produces an immutable
//! `CompiledPipeline`. The run loop projects state through each node's
//! contract, merges patches through per-field reducers, applies failure
//! policies, and records telemetry.

mod compile_error;
mod compiled;
mod context;
mod logging;
mod next;
mod node;
mod pipeline_graph;

pub use compile_error::CompilationError;
pub use compiled::CompiledPipeline;
pub use context::PipelineContext;
pub use logging::{log_node_complete, log_node_error, log_node_start, log_run_complete, log_run_start};
pub use next::Next;
pub use node::PipelineNode;
pub use pipeline_graph::{PipelineGraph, END};
