//! Witness replay
//!
//! Re-executes a spec's witness path starting from its precondition, with
//! abduction disabled. A sound spec replays to the same outcome; for specs
//! that did not go through a join the replayed spec is identical up to
//! symbol renaming.

use super::engine::Engine;
use super::path_state::PathState;
use super::spec::{Outcome, Spec};
use crate::errors::{AnalysisError, Result};
use crate::features::interpreter::{AbductionMode, Interpreter, StepOutcome};
use crate::features::summary::SummaryLookup;
use crate::shared::models::{ProcedureDesc, Site};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ReplayResult {
    pub replayed: Spec,
    /// The replay matches the original spec
    pub reproduced: bool,
}

impl Engine {
    /// Replay `spec`'s witness on `proc`
    pub fn replay(&self, proc: &ProcedureDesc, spec: &Spec, lookup: &dyn SummaryLookup) -> Result<ReplayResult> {
        let interp = Interpreter::new(proc, lookup, self.config(), AbductionMode::Disabled);
        let witness = &spec.witness;
        let mut choices = witness.choices.iter().copied();
        let mut st = PathState::from_spec(proc, spec);

        let diverged = |site: Site, reason: String| AnalysisError::ReplayDiverged { site, reason };

        for (pos, &node_id) in witness.path.iter().enumerate() {
            let node = proc
                .cfg
                .node(node_id)
                .ok_or_else(|| diverged(Site::new(node_id, 0), "witness visits a missing node".into()))?;
            let last = pos + 1 == witness.path.len();
            *st.visits.entry(node_id).or_insert(0) += 1;
            st.path.push(node_id);

            let mut terminal: Option<StepOutcome> = None;
            for (index, instruction) in node.instrs.iter().enumerate() {
                let site = Site::new(node_id, index as u32);
                let mut outcomes = interp.step(&st, instruction, site)?;
                let outcome = match outcomes.len() {
                    0 => return Err(diverged(site, "path became infeasible".into())),
                    1 => outcomes.remove(0),
                    n => {
                        let choice = choices
                            .next()
                            .ok_or_else(|| diverged(site, "fork without a recorded choice".into()))?;
                        if choice as usize >= n {
                            return Err(diverged(site, format!("choice {} of {} outcomes", choice, n)));
                        }
                        let mut picked = outcomes.swap_remove(choice as usize);
                        picked.state_mut().choices.push(choice);
                        picked
                    }
                };
                match outcome {
                    StepOutcome::Continue(next) => st = next,
                    StepOutcome::Throw(mut thrown) => {
                        if last {
                            terminal = Some(interp.exit_frame(thrown));
                        } else {
                            // the next witness node is the handler
                            thrown.exceptional = false;
                            st = thrown;
                        }
                        break;
                    }
                    other => {
                        terminal = Some(other);
                        break;
                    }
                }
            }

            if let Some(outcome) = terminal {
                if !last {
                    return Err(diverged(
                        Site::new(node_id, 0),
                        "path ended before the end of the witness".into(),
                    ));
                }
                return self.finish_replay(proc, spec, outcome);
            }
            if last {
                return self.finish_replay(proc, spec, interp.exit_frame(st));
            }
        }
        Err(diverged(Site::new(proc.cfg.start, 0), "empty witness".into()))
    }

    fn finish_replay(&self, proc: &ProcedureDesc, original: &Spec, outcome: StepOutcome) -> Result<ReplayResult> {
        let (st, result, locations) = match outcome {
            StepOutcome::Error {
                state,
                kind,
                locations,
            } => (state, Outcome::Error(kind), locations),
            StepOutcome::Return(state) => (state, Outcome::Ok, Vec::new()),
            StepOutcome::Abandon { state, reason } => {
                let site = state.trace.last().copied().unwrap_or(Site::new(proc.cfg.start, 0));
                return Err(AnalysisError::ReplayDiverged { site, reason });
            }
            StepOutcome::Continue(state) | StepOutcome::Throw(state) => (state, Outcome::Ok, Vec::new()),
        };
        let replayed = st.into_spec(proc, result, &locations);
        let reproduced = if original.witness.joined {
            replayed.outcome == original.outcome
        } else {
            replayed.canonical_key() == original.canonical_key()
        };
        debug!(procedure = %proc.id, outcome = %replayed.outcome, reproduced, "spec replayed");
        Ok(ReplayResult { replayed, reproduced })
    }
}
