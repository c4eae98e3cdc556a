//! Pipeline graph builder: nodes + declared order, compiled into an
//! executable pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{NodeSettings, PipelineSettings};
use crate::reducers::{default_reducers, Reducer};
use crate::state::Field;

use super::compile_error::CompilationError;
use super::compiled::CompiledPipeline;
use super::node::PipelineNode;

/// Sentinel jump target for ending the run.
pub const END: &str = "__end__";

/// Builder for the query pipeline: register nodes, declare the linear order of
/// enabled node names, then `compile()`.
///
/// Conditional edges live on the nodes themselves (`Next::Node` returns,
/// declared via `jump_targets`); the builder validates them against the
/// registered set. Optional nodes disabled in config are omitted from the
/// compiled order.
pub struct PipelineGraph {
    nodes: HashMap<String, Arc<dyn PipelineNode>>,
    order: Vec<String>,
    settings: PipelineSettings,
    reducers: HashMap<Field, Reducer>,
}

impl PipelineGraph {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            nodes: HashMap::new(),
            order: Vec::new(),
            settings,
            reducers: default_reducers(),
        }
    }

    /// Registers a node. Ids must be unique.
    pub fn add_node(&mut self, node: Arc<dyn PipelineNode>) -> &mut Self {
        self.nodes.insert(node.id().to_string(), node);
        self
    }

    /// Declares the linear execution order by node id.
    pub fn set_order<I, S>(&mut self, order: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.order = order.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces a field's reducer.
    pub fn set_reducer(&mut self, field: Field, reducer: Reducer) -> &mut Self {
        self.reducers.insert(field, reducer);
        self
    }

    /// Validates the shape and produces the immutable executable pipeline:
    /// every ordered id is registered, disabled nodes are optional, declared
    /// jump targets exist among the enabled nodes (or END).
    pub fn compile(self) -> Result<CompiledPipeline, CompilationError> {
        if self.order.is_empty() {
            return Err(CompilationError::EmptyOrder);
        }
        let mut seen = HashSet::new();
        for id in &self.order {
            if !seen.insert(id.clone()) {
                return Err(CompilationError::DuplicateNode(id.clone()));
            }
        }

        let mut enabled_order = Vec::new();
        for id in &self.order {
            let node = self
                .nodes
                .get(id)
                .ok_or_else(|| CompilationError::NodeNotFound(id.clone()))?;
            let node_settings = self.settings.node(id);
            if !node_settings.enabled {
                if !node.optional() {
                    return Err(CompilationError::DisabledRequiredNode(id.clone()));
                }
                continue;
            }
            enabled_order.push(id.clone());
        }
        if enabled_order.is_empty() {
            return Err(CompilationError::EmptyOrder);
        }

        let enabled: HashSet<&str> = enabled_order.iter().map(String::as_str).collect();
        for id in &enabled_order {
            let node = &self.nodes[id];
            for target in node.jump_targets() {
                if target != END && !enabled.contains(target) {
                    return Err(CompilationError::UnknownJumpTarget {
                        node: id.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }

        let node_settings: HashMap<String, NodeSettings> = enabled_order
            .iter()
            .map(|id| (id.clone(), self.settings.node(id)))
            .collect();

        Ok(CompiledPipeline {
            nodes: self.nodes,
            order: enabled_order,
            node_settings,
            strict: self.settings.strict_contracts,
            reducers: self.reducers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::NodeContract;
    use crate::error::NodeError;
    use crate::graph::{Next, PipelineContext};
    use crate::state::QueryState;
    use async_trait::async_trait;

    struct StubNode {
        id: &'static str,
        jumps: Vec<&'static str>,
        optional: bool,
    }

    impl StubNode {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                jumps: Vec::new(),
                optional: false,
            }
        }
    }

    #[async_trait]
    impl PipelineNode for StubNode {
        fn id(&self) -> &str {
            self.id
        }

        fn contract(&self) -> NodeContract {
            NodeContract::new()
        }

        fn jump_targets(&self) -> Vec<&'static str> {
            self.jumps.clone()
        }

        fn optional(&self) -> bool {
            self.optional
        }

        async fn execute(
            &self,
            _ctx: &PipelineContext,
            _input: &QueryState,
        ) -> Result<(QueryState, Next), NodeError> {
            Ok((QueryState::default(), Next::Continue))
        }
    }

    /// **Scenario**: Compile fails when the order names an unregistered node.
    #[test]
    fn unknown_node_in_order() {
        let mut graph = PipelineGraph::new(PipelineSettings::default());
        graph.add_node(Arc::new(StubNode::new("a")));
        graph.set_order(["a", "missing"]);
        assert!(matches!(
            graph.compile(),
            Err(CompilationError::NodeNotFound(id)) if id == "missing"
        ));
    }

    /// **Scenario**: Compile fails on an undeclared jump target.
    #[test]
    fn unknown_jump_target() {
        let mut graph = PipelineGraph::new(PipelineSettings::default());
        let mut node = StubNode::new("a");
        node.jumps = vec!["nowhere"];
        graph.add_node(Arc::new(node));
        graph.set_order(["a"]);
        assert!(matches!(
            graph.compile(),
            Err(CompilationError::UnknownJumpTarget { target, .. }) if target == "nowhere"
        ));
    }

    /// **Scenario**: Disabling a non-optional node fails; an optional one is omitted.
    #[test]
    fn disabled_nodes() {
        let mut settings = PipelineSettings::default();
        settings.nodes.insert(
            "b".into(),
            NodeSettings {
                enabled: false,
                ..Default::default()
            },
        );

        let mut graph = PipelineGraph::new(settings.clone());
        graph.add_node(Arc::new(StubNode::new("a")));
        graph.add_node(Arc::new(StubNode::new("b")));
        graph.set_order(["a", "b"]);
        assert!(matches!(
            graph.compile(),
            Err(CompilationError::DisabledRequiredNode(id)) if id == "b"
        ));

        let mut graph = PipelineGraph::new(settings);
        graph.add_node(Arc::new(StubNode::new("a")));
        let mut optional = StubNode::new("b");
        optional.optional = true;
        graph.add_node(Arc::new(optional));
        graph.set_order(["a", "b"]);
        let compiled = graph.compile().unwrap();
        assert_eq!(compiled.order(), ["a"]);
    }

    /// **Scenario**: END is always a valid jump target.
    #[test]
    fn end_is_valid_target() {
        let mut graph = PipelineGraph::new(PipelineSettings::default());
        let mut node = StubNode::new("a");
        node.jumps = vec![END];
        graph.add_node(Arc::new(node));
        graph.set_order(["a"]);
        assert!(graph.compile().is_ok());
    }
}
