//! Per-query execution telemetry recorded by the graph engine.

/// How a node's execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Ran and returned a valid patch.
    Ok,
    /// Failed, but the node's recovery patch was applied (`recover` policy).
    Recovered,
    /// Failed and was stepped over with state unchanged (`bypass` policy).
    Bypassed,
    /// Failed fatally; the query terminated here.
    Failed,
    /// Not run: required inputs were missing in non-strict mode.
    Skipped,
}

/// One node's execution record.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeRun {
    pub node: String,
    pub status: NodeStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Telemetry for one query, embedded in its `QueryRecord`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct QueryTelemetry {
    pub nodes: Vec<NodeRun>,
    pub cache_hit: bool,
    pub hops_used: u32,
    pub total_ms: u64,
}

impl QueryTelemetry {
    /// The run record for a node, if it executed.
    pub fn node(&self, id: &str) -> Option<&NodeRun> {
        self.nodes.iter().find(|n| n.node == id)
    }
}
