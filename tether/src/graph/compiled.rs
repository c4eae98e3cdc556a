//! Compiled pipeline: immutable, supports run only.
//!
//! Built by `PipelineGraph::compile`. Steps through the enabled order,
//! projecting state through each node's contract, merging patches through the
//! reducer table, applying per-node failure policies and timeouts, and
//! recording telemetry for every node.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::{FailurePolicy, NodeSettings};
use crate::error::{NodeError, PipelineError};
use crate::reducers::{apply_patch, Reducer};
use crate::state::{Field, QueryState};
use crate::telemetry::{NodeRun, NodeStatus, QueryTelemetry};

use super::logging::{
    log_node_complete, log_node_error, log_node_start, log_run_complete, log_run_start,
};
use super::node::PipelineNode;
use super::pipeline_graph::END;
use super::{Next, PipelineContext};


fn record(ctx: &PipelineContext, runs: &mut Vec<NodeRun>, run: NodeRun) {
    ctx.telemetry
        .lock()
        .expect("telemetry lock poisoned")
        .push(run.clone());
    runs.push(run);
}

/// Executable pipeline produced by `PipelineGraph::compile`.
pub struct CompiledPipeline {
    pub(super) nodes: HashMap<String, Arc<dyn PipelineNode>>,
    pub(super) order: Vec<String>,
    pub(super) node_settings: HashMap<String, NodeSettings>,
    pub(super) strict: bool,
    pub(super) reducers: HashMap<Field, Reducer>,
}

impl CompiledPipeline {
    /// The enabled node ids in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Runs the pipeline to completion. Sequential within this query; the
    /// caller provides concurrency across queries.
    pub async fn run(
        &self,
        ctx: &PipelineContext,
        initial: QueryState,
    ) -> Result<(QueryState, QueryTelemetry), PipelineError> {
        let run_started = Instant::now();
        let query_id = initial.query_id.clone().unwrap_or_default();
        log_run_start(&query_id);

        let mut state = initial;
        let mut runs: Vec<NodeRun> = Vec::with_capacity(self.order.len());
        let mut idx = 0usize;

        while idx < self.order.len() {
            let id = &self.order[idx];
            if ctx.expired() {
                return Err(PipelineError::Timeout("query deadline".into()));
            }
            let node = self.nodes.get(id).expect("compiled order only lists registered nodes");
            let settings = self
                .node_settings
                .get(id)
                .cloned()
                .unwrap_or_default();
            let contract = node.contract();

            let missing = contract.missing_inputs(&state);
            if !missing.is_empty() {
                if self.strict {
                    record(ctx, &mut runs, NodeRun {
                        node: id.clone(),
                        status: NodeStatus::Failed,
                        duration_ms: 0,
                        error: Some(format!("missing required inputs {:?}", missing)),
                    });
                    return Err(PipelineError::ContractViolation {
                        node: id.clone(),
                        detail: format!("missing required inputs {:?}", missing),
                    });
                }
                tracing::warn!(node = %id, ?missing, "required inputs missing, skipping node");
                record(ctx, &mut runs, NodeRun {
                    node: id.clone(),
                    status: NodeStatus::Skipped,
                    duration_ms: 0,
                    error: None,
                });
                idx += 1;
                continue;
            }

            let input = state.project(&contract.input_fields());
            log_node_start(id);
            let node_started = Instant::now();

            let mut limit = settings.timeout();
            if let Some(remaining) = ctx.remaining() {
                limit = limit.min(remaining);
            }
            let result: Result<(QueryState, Next), NodeError> = tokio::select! {
                res = tokio::time::timeout(limit, node.execute(ctx, &input)) => {
                    match res {
                        Ok(inner) => inner,
                        Err(_) => Err(NodeError::timeout(format!("node {} exceeded {:?}", id, limit))),
                    }
                }
                _ = ctx.cancel.cancelled() => Err(NodeError::timeout("query cancelled")),
            };
            let duration_ms = node_started.elapsed().as_millis() as u64;

            match result {
                Ok((patch, next)) => {
                    if let Err(issue) = contract.validate_outputs(&patch, self.strict) {
                        if self.strict {
                            record(ctx, &mut runs, NodeRun {
                                node: id.clone(),
                                status: NodeStatus::Failed,
                                duration_ms,
                                error: Some(issue.to_string()),
                            });
                            return Err(PipelineError::ContractViolation {
                                node: id.clone(),
                                detail: issue.to_string(),
                            });
                        }
                        tracing::warn!(node = %id, issue = %issue, "contract issue, merging partial patch");
                    }
                    apply_patch(&mut state, &patch, &self.reducers);
                    record(ctx, &mut runs, NodeRun {
                        node: id.clone(),
                        status: NodeStatus::Ok,
                        duration_ms,
                        error: None,
                    });
                    log_node_complete(id, NodeStatus::Ok, duration_ms);

                    match next {
                        Next::Continue => idx += 1,
                        Next::End => break,
                        Next::Node(target) => {
                            if target == END {
                                break;
                            }
                            idx = self
                                .order
                                .iter()
                                .position(|n| *n == target)
                                .expect("jump targets validated at compile time");
                        }
                    }
                }
                Err(err) => {
                    log_node_error(id, &err);
                    match settings.policy {
                        FailurePolicy::Fatal => {
                            record(ctx, &mut runs, NodeRun {
                                node: id.clone(),
                                status: NodeStatus::Failed,
                                duration_ms,
                                error: Some(err.to_string()),
                            });
                            return Err(err.into_pipeline_error(id));
                        }
                        FailurePolicy::Recover => {
                            apply_patch(&mut state, &node.recovery_patch(), &self.reducers);
                            record(ctx, &mut runs, NodeRun {
                                node: id.clone(),
                                status: NodeStatus::Recovered,
                                duration_ms,
                                error: Some(err.to_string()),
                            });
                            idx += 1;
                        }
                        FailurePolicy::Bypass => {
                            record(ctx, &mut runs, NodeRun {
                                node: id.clone(),
                                status: NodeStatus::Bypassed,
                                duration_ms,
                                error: Some(err.to_string()),
                            });
                            idx += 1;
                        }
                    }
                }
            }
        }

        let total_ms = run_started.elapsed().as_millis() as u64;
        log_run_complete(&query_id, total_ms);
        let telemetry = QueryTelemetry {
            nodes: runs,
            cache_hit: state.cache_hit.unwrap_or(false),
            hops_used: state.hops_used.unwrap_or(0),
            total_ms,
        };
        Ok((state, telemetry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineSettings;
    use crate::contract::NodeContract;
    use crate::graph::PipelineGraph;
    use crate::test_support;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Sets `confidence`; optionally fails or stalls.
    struct ScoreNode {
        id: &'static str,
        fail: bool,
        stall: bool,
        undeclared_answer: bool,
    }

    impl ScoreNode {
        fn ok(id: &'static str) -> Self {
            Self {
                id,
                fail: false,
                stall: false,
                undeclared_answer: false,
            }
        }
    }

    #[async_trait]
    impl PipelineNode for ScoreNode {
        fn id(&self) -> &str {
            self.id
        }

        fn contract(&self) -> NodeContract {
            NodeContract::new()
                .requires(&[Field::Question])
                .guarantees(&[Field::Confidence])
        }

        fn recovery_patch(&self) -> QueryState {
            QueryState {
                confidence: Some(0.0),
                ..Default::default()
            }
        }

        async fn execute(
            &self,
            _ctx: &PipelineContext,
            input: &QueryState,
        ) -> Result<(QueryState, Next), NodeError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.fail {
                return Err(NodeError::upstream("backend down"));
            }
            assert!(input.answer.is_none(), "input must be projected");
            let patch = QueryState {
                confidence: Some(0.9),
                answer: self.undeclared_answer.then(|| "sneaky".to_string()),
                ..Default::default()
            };
            Ok((patch, Next::Continue))
        }
    }

    fn question_state() -> QueryState {
        QueryState {
            question: Some("How do I reset my password?".into()),
            ..Default::default()
        }
    }

    fn compile(settings: PipelineSettings, nodes: Vec<ScoreNode>) -> CompiledPipeline {
        let mut graph = PipelineGraph::new(settings);
        let order: Vec<String> = nodes.iter().map(|n| n.id.to_string()).collect();
        for node in nodes {
            graph.add_node(Arc::new(node));
        }
        graph.set_order(order);
        graph.compile().unwrap()
    }

    /// **Scenario**: A successful run records Ok telemetry for each node and
    /// the merged state carries the guaranteed output.
    #[tokio::test]
    async fn run_merges_and_records() {
        let pipeline = compile(PipelineSettings::default(), vec![ScoreNode::ok("score")]);
        let ctx = test_support::context().await;
        let (state, telemetry) = pipeline.run(&ctx, question_state()).await.unwrap();
        assert_eq!(state.confidence, Some(0.9));
        assert_eq!(telemetry.nodes.len(), 1);
        assert_eq!(telemetry.node("score").unwrap().status, NodeStatus::Ok);
    }

    /// **Scenario**: Strict mode rejects undeclared output fields.
    #[tokio::test]
    async fn strict_rejects_undeclared_outputs() {
        let mut node = ScoreNode::ok("score");
        node.undeclared_answer = true;
        let pipeline = compile(PipelineSettings::default(), vec![node]);
        let ctx = test_support::context().await;
        let err = pipeline.run(&ctx, question_state()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ContractViolation { .. }));
    }

    /// **Scenario**: Missing required input is fatal in strict mode, a logged
    /// skip otherwise.
    #[tokio::test]
    async fn missing_input_strict_vs_lenient() {
        let strict = compile(PipelineSettings::default(), vec![ScoreNode::ok("score")]);
        let ctx = test_support::context().await;
        let err = strict.run(&ctx, QueryState::default()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ContractViolation { .. }));

        let lenient_settings = PipelineSettings {
            strict_contracts: false,
            ..Default::default()
        };
        let lenient = compile(lenient_settings, vec![ScoreNode::ok("score")]);
        let (_, telemetry) = lenient.run(&ctx, QueryState::default()).await.unwrap();
        assert_eq!(telemetry.node("score").unwrap().status, NodeStatus::Skipped);
    }

    /// **Scenario**: Failure policies — fatal terminates, recover applies the
    /// documented patch, bypass leaves state unchanged.
    #[tokio::test]
    async fn failure_policies() {
        use crate::config::{FailurePolicy, NodeSettings};

        let mut failing = ScoreNode::ok("score");
        failing.fail = true;
        let pipeline = compile(PipelineSettings::default(), vec![failing]);
        let ctx = test_support::context().await;
        let err = pipeline.run(&ctx, question_state()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Upstream(_)));

        for (policy, expected_status, expected_confidence) in [
            (FailurePolicy::Recover, NodeStatus::Recovered, Some(0.0)),
            (FailurePolicy::Bypass, NodeStatus::Bypassed, None),
        ] {
            let mut settings = PipelineSettings::default();
            settings.nodes.insert(
                "score".into(),
                NodeSettings {
                    policy,
                    ..Default::default()
                },
            );
            let mut failing = ScoreNode::ok("score");
            failing.fail = true;
            let pipeline = compile(settings, vec![failing]);
            let (state, telemetry) = pipeline.run(&ctx, question_state()).await.unwrap();
            assert_eq!(telemetry.node("score").unwrap().status, expected_status);
            assert_eq!(state.confidence, expected_confidence);
        }
    }

    /// **Scenario**: A node exceeding its timeout fails with Timeout under the
    /// fatal policy.
    #[tokio::test(start_paused = true)]
    async fn node_timeout() {
        let mut settings = PipelineSettings::default();
        settings.nodes.insert(
            "score".into(),
            NodeSettings {
                timeout_ms: 50,
                ..Default::default()
            },
        );
        let mut stalling = ScoreNode::ok("score");
        stalling.stall = true;
        let pipeline = compile(settings, vec![stalling]);
        let ctx = test_support::context().await;
        let err = pipeline.run(&ctx, question_state()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout(_)));
    }
}
