//! Bottom-up parallel scheduler
//!
//! ```text
//! Program ─▶ CallGraph ─▶ SCCs (callee-first)
//!                              │
//!        ┌─────────────────────┴─────────────────────┐
//!        ▼                                           ▼
//!   leaf SCCs spawned                 remaining[scc] = #callee SCCs
//!        │                                           ▲
//!        └── analyze ─▶ publish final ─▶ decrement dependents' counters,
//!                                        spawn those that reach zero
//! ```
//! Non-recursive SCCs are analyzed once against final callee summaries.
//! Recursive SCCs run up to `scc_rounds` fixpoint rounds; each round sees
//! the previous round's summaries for in-SCC callees, and the last round is
//! published as final.

use super::call_graph::{CallGraph, Scc};
use super::state::{ProcedureState, StateTracker};
use crate::config::EngineConfig;
use crate::errors::{AnalysisError, Result};
use crate::features::biabduction::{Engine, EngineStats, ProcedureResult, Summary};
use crate::features::detectors::IncompleteRecord;
use crate::features::summary::{GenerationView, Round, SummaryLookup, SummaryStore};
use crate::shared::models::{ProcedureDesc, ProcedureId, Program};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one scheduling run
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub generation: u32,
    /// Final summaries of every procedure in the program
    pub summaries: BTreeMap<ProcedureId, Arc<Summary>>,
    /// Procedures whose summary is incomplete or unknown, sorted
    pub incomplete: Vec<IncompleteRecord>,
    pub stats: EngineStats,
    /// Procedures in the order their final summaries were published
    pub order: Vec<ProcedureId>,
    pub scc_count: usize,
    pub elapsed_ms: u64,
}

/// Report sent by an SCC task to the coordinator
struct SccReport {
    finished: Vec<ProcedureId>,
    incomplete: Vec<IncompleteRecord>,
    stats: EngineStats,
}

pub struct Scheduler {
    engine: Engine,
    store: Arc<SummaryStore>,
}

impl Scheduler {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_store(config, Arc::new(SummaryStore::new()))
    }

    /// Schedule into an existing store; each run starts a new generation
    pub fn with_store(config: EngineConfig, store: Arc<SummaryStore>) -> Self {
        Self {
            engine: Engine::new(config),
            store,
        }
    }

    pub fn store(&self) -> &Arc<SummaryStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    /// Analyze every procedure of `program` bottom-up
    pub fn run(&self, program: &Program) -> Result<ScheduleOutcome> {
        program.validate()?;
        let started = Instant::now();
        let generation = self.store.begin_generation();
        let graph = CallGraph::from_program(program);
        let sccs = graph.sccs();
        info!(
            procedures = graph.len(),
            sccs = sccs.len(),
            generation,
            "analysis run started"
        );

        let procedures: BTreeMap<&ProcedureId, &ProcedureDesc> =
            program.procedures.iter().map(|p| (&p.id, p)).collect();
        let ctx = RunContext {
            engine: &self.engine,
            store: &self.store,
            states: StateTracker::new(procedures.keys().copied()),
            procedures,
            generation,
            deadline: self.config().run_timeout().map(|t| started + t),
            sccs,
        };

        let (tx, rx) = mpsc::channel();
        self.execute(&ctx, tx)?;
        if !ctx.states.all_done() {
            warn!(
                done = ctx.states.count(ProcedureState::Done),
                total = ctx.procedures.len(),
                "run ended with procedures not analyzed"
            );
        }

        let mut outcome = ScheduleOutcome {
            generation,
            summaries: self.store.final_summaries(generation),
            incomplete: Vec::new(),
            stats: EngineStats::default(),
            order: Vec::new(),
            scc_count: ctx.sccs.len(),
            elapsed_ms: 0,
        };
        for report in rx {
            outcome.order.extend(report.finished);
            outcome.incomplete.extend(report.incomplete);
            outcome.stats.merge(&report.stats);
        }
        outcome
            .incomplete
            .sort_by(|a, b| a.procedure.cmp(&b.procedure));
        outcome.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            generation,
            summaries = outcome.summaries.len(),
            incomplete = outcome.incomplete.len(),
            paths = outcome.stats.paths,
            elapsed_ms = outcome.elapsed_ms,
            "analysis run finished"
        );
        Ok(outcome)
    }

    #[cfg(feature = "parallel")]
    fn execute(&self, ctx: &RunContext<'_>, tx: Sender<SccReport>) -> Result<()> {
        let threads = self.config().effective_worker_threads();
        if threads <= 1 || ctx.sccs.len() <= 1 {
            ctx.run_sequential(tx);
            return Ok(());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("biabduction-worker-{}", i))
            .build()
            .map_err(|e| AnalysisError::ThreadPool(e.to_string()))?;
        let wave = Wave::new(ctx);
        pool.scope(|s| {
            for scc in &ctx.sccs {
                if scc.depends_on.is_empty() {
                    wave.spawn(s, scc.id, tx.clone());
                }
            }
        });
        Ok(())
    }

    #[cfg(not(feature = "parallel"))]
    fn execute(&self, ctx: &RunContext<'_>, tx: Sender<SccReport>) -> Result<()> {
        ctx.run_sequential(tx);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Run context
// ═══════════════════════════════════════════════════════════════════════════

struct RunContext<'r> {
    engine: &'r Engine,
    store: &'r SummaryStore,
    states: StateTracker,
    procedures: BTreeMap<&'r ProcedureId, &'r ProcedureDesc>,
    generation: u32,
    deadline: Option<Instant>,
    sccs: Vec<Scc>,
}

impl RunContext<'_> {
    fn run_sequential(&self, tx: Sender<SccReport>) {
        for scc in &self.sccs {
            send(&tx, self.analyze_scc(scc));
        }
    }

    fn analyze_scc(&self, scc: &Scc) -> SccReport {
        for id in &scc.members {
            self.states.mark_ready(id);
        }
        debug!(
            scc = scc.id,
            members = ?scc.members.iter().map(ProcedureId::as_str).collect::<Vec<_>>(),
            recursive = scc.is_recursive,
            "SCC started"
        );

        let mut report = SccReport {
            finished: Vec::new(),
            incomplete: Vec::new(),
            stats: EngineStats::default(),
        };

        let finals: Vec<Summary> = if self.deadline.is_some_and(|d| Instant::now() >= d) {
            warn!(scc = scc.id, "run timeout reached; publishing unknown summaries");
            scc.members
                .iter()
                .map(|id| Summary::unknown(id.clone(), self.n_formals(id), "run timeout"))
                .collect()
        } else if scc.is_recursive {
            self.fixpoint(scc, &mut report.stats)
        } else {
            let view = GenerationView::new(self.store, self.generation);
            scc.members
                .iter()
                .map(|id| self.analyze_member(id, &view, &mut report.stats))
                .collect()
        };

        for summary in finals {
            let id = summary.procedure.clone();
            report.incomplete.extend(IncompleteRecord::from_summary(&summary));
            if let Err(e) = self.store.publish(self.generation, summary) {
                warn!(procedure = %id, error = %e, "final summary not published");
            }
            self.states.mark_done(&id);
            report.finished.push(id);
        }
        debug!(scc = scc.id, "SCC done");
        report
    }

    /// Bounded fixpoint iteration over a recursive SCC
    fn fixpoint(&self, scc: &Scc, stats: &mut EngineStats) -> Vec<Summary> {
        let rounds = self.engine.config().scc_rounds;
        let mut partial: BTreeMap<ProcedureId, Arc<Summary>> = BTreeMap::new();

        for round in 0..rounds {
            let view = GenerationView::for_round(
                self.store,
                self.generation,
                scc.members.iter().cloned(),
                partial.clone(),
            );
            let mut next = BTreeMap::new();
            for id in &scc.members {
                let summary = self.analyze_member(id, &view, stats);
                let published = self
                    .store
                    .publish_round(self.generation, Round::Fixpoint(round as u32), summary.clone())
                    .unwrap_or_else(|e| {
                        warn!(procedure = %id, error = %e, "round summary not published");
                        Arc::new(summary)
                    });
                next.insert(id.clone(), published);
            }

            let converged = !partial.is_empty()
                && next
                    .iter()
                    .all(|(id, s)| partial.get(id).is_some_and(|p| p.canonical_keys() == s.canonical_keys()));
            partial = next;
            debug!(scc = scc.id, round, converged, "fixpoint round finished");
            if converged {
                break;
            }
        }

        scc.members
            .iter()
            .map(|id| match partial.get(id) {
                Some(s) => Summary::clone(s),
                None => Summary::unknown(id.clone(), self.n_formals(id), "no fixpoint round ran"),
            })
            .collect()
    }

    fn analyze_member(&self, id: &ProcedureId, lookup: &dyn SummaryLookup, stats: &mut EngineStats) -> Summary {
        let Some(proc) = self.procedures.get(id) else {
            return Summary::unknown(id.clone(), 0, "procedure not in program");
        };
        self.states.mark_analyzing(id);
        let (summary, proc_stats) = isolate(id, proc.formals.len(), || self.engine.analyze(proc, lookup));
        stats.merge(&proc_stats);
        summary
    }

    fn n_formals(&self, id: &ProcedureId) -> usize {
        self.procedures.get(id).map_or(0, |p| p.formals.len())
    }
}

fn send(tx: &Sender<SccReport>, report: SccReport) {
    if tx.send(report).is_err() {
        warn!("scheduler coordinator stopped listening");
    }
}

/// Run one procedure analysis, turning errors and panics into the
/// conservative unknown summary
pub(crate) fn isolate(
    id: &ProcedureId,
    n_formals: usize,
    analyze: impl FnOnce() -> Result<ProcedureResult>,
) -> (Summary, EngineStats) {
    let err = match panic::catch_unwind(AssertUnwindSafe(analyze)) {
        Ok(Ok(result)) => return (result.summary, result.stats),
        Ok(Err(e)) => e,
        Err(payload) => AnalysisError::WorkerPanic {
            procedure: id.clone(),
            message: panic_message(payload.as_ref()),
        },
    };
    if err.is_budget() {
        warn!(procedure = %id, error = %err, "budget exhausted; using unknown summary");
    } else {
        warn!(procedure = %id, error = %err, "analysis failed; using unknown summary");
    }
    (
        Summary::unknown(id.clone(), n_formals, err.to_string()),
        EngineStats::default(),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Parallel wave
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(feature = "parallel")]
struct Wave<'c, 'r> {
    ctx: &'c RunContext<'r>,
    /// SCCs calling into each SCC
    dependents: Vec<Vec<usize>>,
    /// Callee SCCs not yet done, per SCC
    remaining: Vec<std::sync::atomic::AtomicUsize>,
}

#[cfg(feature = "parallel")]
impl<'c, 'r> Wave<'c, 'r> {
    fn new(ctx: &'c RunContext<'r>) -> Self {
        let mut dependents = vec![Vec::new(); ctx.sccs.len()];
        for scc in &ctx.sccs {
            for &callee in &scc.depends_on {
                dependents[callee].push(scc.id);
            }
        }
        let remaining = ctx
            .sccs
            .iter()
            .map(|s| std::sync::atomic::AtomicUsize::new(s.depends_on.len()))
            .collect();
        Self {
            ctx,
            dependents,
            remaining,
        }
    }

    fn spawn<'s>(&'s self, scope: &rayon::Scope<'s>, id: usize, tx: Sender<SccReport>) {
        scope.spawn(move |s| {
            send(&tx, self.ctx.analyze_scc(&self.ctx.sccs[id]));
            for &dep in &self.dependents[id] {
                if self.remaining[dep].fetch_sub(1, std::sync::atomic::Ordering::AcqRel) == 1 {
                    self.spawn(s, dep, tx.clone());
                }
            }
        });
    }
}
