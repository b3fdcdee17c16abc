/*
 * Symbolic Execution Engine
 *
 * Path-sensitive exploration of one procedure's CFG.
 *
 * Algorithm:
 * 1. Seed the start node with the initial state (formals bound, empty pre)
 * 2. Pop the pending node with the lowest reverse-postorder rank
 * 3. At join nodes, widen the disjunct set if it exceeds max_disjuncts
 * 4. Interpret the node's instructions on each state; forks multiply states
 * 5. Closed paths (return, defect, uncaught throw) become specs
 * 6. Surviving states flow to successors; loop heads are unrolled at most
 *    loop_unroll times per path
 *
 * Budgets:
 * - path_budget: closed paths per procedure; excess marks the summary incomplete
 * - step_budget: interpreted instructions; excess fails the procedure
 * - procedure_timeout_ms: wall clock; excess fails the procedure
 *
 * References:
 * - Calcagno et al. (2009). "Compositional Shape Analysis by means of Bi-Abduction"
 * - Distefano, O'Hearn, Yang (2006). "A Local Shape Analysis based on Separation Logic"
 */

use super::path_state::PathState;
use super::spec::{unknown_spec, Outcome, Spec, Summary, SummaryStatus};
use crate::config::EngineConfig;
use crate::errors::{AnalysisError, Result};
use crate::features::interpreter::{AbductionMode, Interpreter, StepOutcome};
use crate::features::summary::SummaryLookup;
use crate::shared::models::{NodeId, ProcedureDesc, Site};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, trace};

/// Counters for one procedure analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    /// Closed paths (before spec deduplication)
    pub paths: usize,
    /// Interpreted instructions
    pub steps: usize,
    /// State pairs merged at join nodes
    pub joins: usize,
    /// Paths dropped by the loop bound or the disjunct limit
    pub dropped: usize,
    /// Paths the interpreter could not model
    pub abandoned: usize,
    pub elapsed_ms: u64,
}

impl EngineStats {
    pub fn merge(&mut self, other: &EngineStats) {
        self.paths += other.paths;
        self.steps += other.steps;
        self.joins += other.joins;
        self.dropped += other.dropped;
        self.abandoned += other.abandoned;
        self.elapsed_ms += other.elapsed_ms;
    }
}

#[derive(Debug, Clone)]
pub struct ProcedureResult {
    pub summary: Summary,
    pub stats: EngineStats,
}

/// Per-procedure symbolic executor
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

/// Worklist entry key: reverse-postorder rank first, then node id
type PendingKey = (usize, NodeId);

/// Mutable state of one `analyze` run
struct Run<'p> {
    proc: &'p ProcedureDesc,
    started: Instant,
    pending: BTreeMap<PendingKey, Vec<PathState>>,
    specs: Vec<Spec>,
    seen: BTreeSet<String>,
    incomplete: Vec<String>,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute the summary of `proc` against the callee summaries in `lookup`
    pub fn analyze(&self, proc: &ProcedureDesc, lookup: &dyn SummaryLookup) -> Result<ProcedureResult> {
        let interp = Interpreter::new(proc, lookup, &self.config, AbductionMode::Enabled);
        let ranks = reverse_postorder(proc);
        let joins = proc.cfg.join_nodes();

        let mut run = Run {
            proc,
            started: Instant::now(),
            pending: BTreeMap::new(),
            specs: Vec::new(),
            seen: BTreeSet::new(),
            incomplete: Vec::new(),
            stats: EngineStats::default(),
        };
        let start = proc.cfg.start;
        run.enqueue(&ranks, start, PathState::initial(proc));

        while let Some(((_, node_id), mut states)) = run.pending.pop_first() {
            self.check_timeout(&run)?;
            if run.stats.paths >= self.config.path_budget {
                run.incomplete
                    .push(format!("path budget of {} exhausted", self.config.path_budget));
                break;
            }
            let Some(node) = proc.cfg.node(node_id) else {
                return Err(AnalysisError::malformed(
                    &proc.id,
                    format!("edge to missing node {}", node_id),
                ));
            };
            if joins.contains(&node_id) && states.len() > self.config.max_disjuncts {
                states = self.widen(states, &mut run);
            }
            trace!(procedure = %proc.id, node = node_id, states = states.len(), "visit");

            for mut st in states {
                let visits = st.visits.entry(node_id).or_insert(0);
                *visits += 1;
                if *visits > self.config.loop_unroll + 1 {
                    run.stats.dropped += 1;
                    continue;
                }
                st.path.push(node_id);

                let mut frontier = vec![st];
                for (index, instruction) in node.instrs.iter().enumerate() {
                    let site = Site::new(node_id, index as u32);
                    let mut next = Vec::new();
                    for st in frontier {
                        run.stats.steps += 1;
                        if run.stats.steps > self.config.step_budget {
                            return Err(AnalysisError::StepBudget {
                                budget: self.config.step_budget,
                            });
                        }
                        let mut outcomes = interp.step(&st, instruction, site)?;
                        if outcomes.len() > 1 {
                            for (choice, o) in outcomes.iter_mut().enumerate() {
                                o.state_mut().choices.push(choice as u32);
                            }
                        }
                        for outcome in outcomes {
                            match outcome {
                                StepOutcome::Continue(s) => next.push(s),
                                StepOutcome::Throw(s) => self.throw(&interp, &ranks, &mut run, node.exn_succs.as_slice(), s),
                                other => run.close(other),
                            }
                        }
                    }
                    frontier = next;
                }

                for st in frontier {
                    if node_id == proc.cfg.exit || node.succs.is_empty() {
                        run.close(interp.exit_frame(st));
                        continue;
                    }
                    for succ in &node.succs {
                        run.enqueue(&ranks, *succ, st.clone());
                    }
                }
            }
        }

        run.stats.elapsed_ms = run.started.elapsed().as_millis() as u64;
        let summary = run.finish();
        debug!(
            procedure = %proc.id,
            specs = summary.specs.len(),
            paths = run.stats.paths,
            steps = run.stats.steps,
            joins = run.stats.joins,
            dropped = run.stats.dropped,
            incomplete = summary.is_incomplete(),
            "procedure analyzed"
        );
        Ok(ProcedureResult {
            summary,
            stats: run.stats,
        })
    }

    /// Route an exception to the node's handlers, or close the path
    fn throw(
        &self,
        interp: &Interpreter<'_>,
        ranks: &FxHashMap<NodeId, usize>,
        run: &mut Run<'_>,
        handlers: &[NodeId],
        st: PathState,
    ) {
        if handlers.is_empty() {
            run.close(interp.exit_frame(st));
            return;
        }
        for handler in handlers {
            let mut caught = st.clone();
            caught.exceptional = false;
            run.enqueue(ranks, *handler, caught);
        }
    }

    fn check_timeout(&self, run: &Run<'_>) -> Result<()> {
        if let Some(limit) = self.config.procedure_timeout() {
            let elapsed = run.started.elapsed();
            if elapsed > limit {
                return Err(AnalysisError::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Bring the disjunct set at a join node under `max_disjuncts`:
    /// drop duplicates, join compatible states, then truncate
    fn widen(&self, states: Vec<PathState>, run: &mut Run<'_>) -> Vec<PathState> {
        let mut by_key: BTreeMap<String, PathState> = BTreeMap::new();
        for st in states {
            by_key.entry(st.state_key()).or_insert(st);
        }
        let unique: Vec<PathState> = by_key.into_values().collect();
        if unique.len() <= self.config.max_disjuncts {
            return unique;
        }

        let mut groups: Vec<PathState> = Vec::new();
        for st in unique {
            match groups.iter_mut().find(|g| g.compatible(&st)) {
                Some(g) => {
                    *g = g.join(&st);
                    run.stats.joins += 1;
                }
                None => groups.push(st),
            }
        }
        if groups.len() > self.config.max_disjuncts {
            run.stats.dropped += groups.len() - self.config.max_disjuncts;
            groups.truncate(self.config.max_disjuncts);
            run.incomplete.push(format!(
                "more than {} incompatible states at a join",
                self.config.max_disjuncts
            ));
        }
        groups
    }
}

impl Run<'_> {
    fn enqueue(&mut self, ranks: &FxHashMap<NodeId, usize>, node: NodeId, st: PathState) {
        let rank = ranks.get(&node).copied().unwrap_or(usize::MAX);
        self.pending.entry((rank, node)).or_default().push(st);
    }

    /// Turn a terminal outcome into a spec
    fn close(&mut self, outcome: StepOutcome) {
        let (st, result, locations) = match outcome {
            StepOutcome::Error {
                state,
                kind,
                locations,
            } => (state, Outcome::Error(kind), locations),
            StepOutcome::Return(state) => (state, Outcome::Ok, Vec::new()),
            StepOutcome::Abandon { reason, .. } => {
                self.stats.abandoned += 1;
                self.incomplete.push(reason);
                return;
            }
            // not terminal; callers route these elsewhere
            StepOutcome::Continue(_) | StepOutcome::Throw(_) => return,
        };
        self.stats.paths += 1;
        let spec = st.into_spec(self.proc, result, &locations);
        if self.seen.insert(spec.canonical_key()) {
            self.specs.push(spec);
        }
    }

    fn finish(&mut self) -> Summary {
        let procedure = self.proc.id.clone();
        let mut reasons: Vec<String> = Vec::new();
        for r in self.incomplete.drain(..) {
            if !reasons.contains(&r) {
                reasons.push(r);
            }
        }
        if self.specs.is_empty() && (!reasons.is_empty() || self.stats.dropped > 0) {
            let reason = if reasons.is_empty() {
                "every path exceeded the loop bound".to_string()
            } else {
                reasons.join("; ")
            };
            return Summary {
                procedure,
                specs: vec![unknown_spec(self.proc.formals.len())],
                status: SummaryStatus::Unknown { reason },
            };
        }
        let status = if reasons.is_empty() {
            SummaryStatus::Complete
        } else {
            SummaryStatus::Incomplete {
                reason: reasons.join("; "),
            }
        };
        Summary {
            procedure,
            specs: std::mem::take(&mut self.specs),
            status,
        }
    }
}

/// Reverse-postorder rank of every node reachable from start
fn reverse_postorder(proc: &ProcedureDesc) -> FxHashMap<NodeId, usize> {
    let cfg = &proc.cfg;
    let mut visited: BTreeSet<NodeId> = BTreeSet::new();
    let mut postorder: Vec<NodeId> = Vec::new();
    // (node, next successor index)
    let mut stack: Vec<(NodeId, usize)> = vec![(cfg.start, 0)];
    visited.insert(cfg.start);

    while let Some((node, idx)) = stack.pop() {
        let succs: Vec<NodeId> = cfg
            .node(node)
            .map(|n| n.succs.iter().chain(&n.exn_succs).copied().collect())
            .unwrap_or_default();
        if let Some(&succ) = succs.get(idx) {
            stack.push((node, idx + 1));
            if visited.insert(succ) {
                stack.push((succ, 0));
            }
        } else {
            postorder.push(node);
        }
    }

    postorder
        .into_iter()
        .rev()
        .enumerate()
        .map(|(rank, node)| (node, rank))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::summary::NoSummaries;
    use crate::shared::models::{
        Cond, ErrorKind, Expr, Instr, NodeKind, ProcedureBuilder, EXIT_NODE,
    };

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    /// `if (x == null) {} else { x.f = 1 }` joined before exit
    fn diamond() -> ProcedureDesc {
        ProcedureBuilder::new("diamond")
            .formal("x")
            .node(2, NodeKind::Statement, vec![], vec![3, 4])
            .node(
                3,
                NodeKind::Prune,
                vec![Instr::Prune {
                    cond: Cond::is_null("x"),
                    true_branch: true,
                }],
                vec![5],
            )
            .node(
                4,
                NodeKind::Prune,
                vec![
                    Instr::Prune {
                        cond: Cond::is_null("x"),
                        true_branch: false,
                    },
                    Instr::store("x", "f", Expr::Int(1)),
                ],
                vec![5],
            )
            .node(5, NodeKind::Statement, vec![Instr::ret(None)], vec![EXIT_NODE])
            .build()
            .unwrap()
    }

    #[test]
    fn test_diamond_yields_one_spec_per_branch() {
        let result = engine().analyze(&diamond(), &NoSummaries).unwrap();
        let summary = result.summary;
        assert_eq!(summary.status, SummaryStatus::Complete);
        assert_eq!(summary.ok_specs().count(), 2);
        assert!(summary.error_specs().next().is_none());
    }

    #[test]
    fn test_reverse_postorder_orders_join_after_branches() {
        let ranks = reverse_postorder(&diamond());
        assert!(ranks[&2] < ranks[&3]);
        assert!(ranks[&3] < ranks[&5]);
        assert!(ranks[&4] < ranks[&5]);
    }

    #[test]
    fn test_error_spec_carries_trace() {
        let proc = ProcedureBuilder::new("f")
            .formal("x")
            .body(vec![Instr::free("x"), Instr::free("x")])
            .build()
            .unwrap();
        let summary = engine().analyze(&proc, &NoSummaries).unwrap().summary;
        let errors: Vec<&Spec> = summary.error_specs().collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].outcome, Outcome::Error(ErrorKind::DoubleFree));
        assert_eq!(errors[0].witness.trace.len(), 2);
        assert_eq!(errors[0].witness.locations.len(), 1);
    }

    #[test]
    fn test_loop_is_bounded() {
        // 2: i = 0 ; 3: loop head ; 4: body ; 5: exit branch
        let proc = ProcedureBuilder::new("loop")
            .formal("n")
            .node(2, NodeKind::Statement, vec![Instr::assign("i", Expr::Int(0))], vec![3])
            .node(3, NodeKind::Statement, vec![], vec![4, 5])
            .node(
                4,
                NodeKind::Prune,
                vec![
                    Instr::Prune {
                        cond: Cond::new(crate::shared::models::CmpOp::Lt, Expr::var("i"), Expr::var("n")),
                        true_branch: true,
                    },
                    Instr::assign("i", Expr::var("i").offset(1)),
                ],
                vec![3],
            )
            .node(
                5,
                NodeKind::Prune,
                vec![Instr::Prune {
                    cond: Cond::new(crate::shared::models::CmpOp::Lt, Expr::var("i"), Expr::var("n")),
                    true_branch: false,
                }],
                vec![EXIT_NODE],
            )
            .build()
            .unwrap();
        let result = engine().analyze(&proc, &NoSummaries).unwrap();
        assert!(result.stats.dropped > 0);
        assert!(result.summary.ok_specs().count() >= 1);
    }

    #[test]
    fn test_step_budget_fails_procedure() {
        let proc = ProcedureBuilder::new("f")
            .body(vec![Instr::assign("a", Expr::Int(1)); 10])
            .build()
            .unwrap();
        let engine = Engine::new(EngineConfig::default().step_budget(5));
        let err = engine.analyze(&proc, &NoSummaries).unwrap_err();
        assert!(matches!(err, AnalysisError::StepBudget { budget: 5 }));
    }

    #[test]
    fn test_uncaught_throw_closes_exceptional_spec() {
        let proc = ProcedureBuilder::new("f")
            .body(vec![Instr::Throw { value: None }])
            .build()
            .unwrap();
        let summary = engine().analyze(&proc, &NoSummaries).unwrap().summary;
        assert_eq!(summary.specs.len(), 1);
        assert!(summary.specs[0].exceptional);
    }

    #[test]
    fn test_caught_throw_continues_at_handler() {
        let proc = ProcedureBuilder::new("f")
            .node(2, NodeKind::Statement, vec![Instr::Throw { value: None }], vec![EXIT_NODE])
            .node(3, NodeKind::Exception, vec![Instr::ret(None)], vec![EXIT_NODE])
            .exn_edge(2, 3)
            .build()
            .unwrap();
        let summary = engine().analyze(&proc, &NoSummaries).unwrap().summary;
        assert_eq!(summary.specs.len(), 1);
        assert!(!summary.specs[0].exceptional);
        assert_eq!(summary.specs[0].witness.path, vec![0, 2, 3]);
    }

    #[test]
    fn test_unsupported_instruction_fails_procedure() {
        let proc = ProcedureBuilder::new("f")
            .body(vec![Instr::Unsupported {
                description: "asm".into(),
            }])
            .build()
            .unwrap();
        assert!(matches!(
            engine().analyze(&proc, &NoSummaries),
            Err(AnalysisError::UnsupportedInstruction { .. })
        ));
    }

    #[test]
    fn test_widening_joins_compatible_states() {
        // four assignments of different constants joined at node 6
        let mut builder = ProcedureBuilder::new("f").node(2, NodeKind::Statement, vec![], vec![3, 4, 5, 7]);
        for (id, k) in [(3, 1), (4, 2), (5, 3), (7, 4)] {
            builder = builder.node(id, NodeKind::Statement, vec![Instr::assign("a", Expr::Int(k))], vec![6]);
        }
        let proc = builder
            .node(6, NodeKind::Statement, vec![Instr::ret(Some(Expr::var("a")))], vec![EXIT_NODE])
            .build()
            .unwrap();
        let engine = Engine::new(EngineConfig::default().max_disjuncts(2));
        let result = engine.analyze(&proc, &NoSummaries).unwrap();
        assert!(result.stats.joins > 0);
        assert_eq!(result.summary.specs.len(), 1);
        assert!(result.summary.specs[0].witness.joined);
    }
}
