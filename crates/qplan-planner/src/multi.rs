//! Round-robin trial races between candidate plans.
//!
//! Every candidate advances one unit of work per round. A candidate finishes
//! its trial when it reaches EOF or produces `max_results` documents; the race
//! ends after the first round in which any candidate finishes, or once every
//! candidate has spent `max_works`. Finished candidates beat unfinished ones;
//! among finished candidates fewer works wins; ties go to the earliest
//! registered candidate.

use std::cmp::Ordering;

use serde::Serialize;

use qplan_core::hash::Hash256;
use qplan_core::types::Document;

use crate::candidates::CandidatePlan;
use crate::error::{PlanError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum TrialStep {
    Advanced(Document),
    NeedTime,
    Eof,
}

/// A runnable candidate: exec implements this for its access path stages.
pub trait TrialCandidate {
    fn plan(&self) -> &CandidatePlan;

    /// Fingerprint of the result set this candidate produces; all candidates
    /// of one race must agree.
    fn semantics(&self) -> Hash256;

    fn step(&mut self) -> TrialStep;

    fn works(&self) -> u64;
}

#[derive(Debug, Clone, Copy)]
pub struct TrialConfig {
    pub max_works: u64,
    pub max_results: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateScore {
    pub plan: String,
    pub works: u64,
    pub advanced: usize,
    pub eof: bool,
    pub finished: bool,
}

pub struct RaceOutcome<C> {
    pub winner: usize,
    pub candidates: Vec<C>,
    /// Documents the winner produced during the trial, in order.
    pub buffered: Vec<Document>,
    pub scores: Vec<CandidateScore>,
    /// Results an execution of the winner must reach for its works to be
    /// comparable with `winner_works`: `max_results` when the winner finished,
    /// otherwise what it produced before the works budget ran out.
    pub window: usize,
}

impl<C: TrialCandidate> RaceOutcome<C> {
    pub fn winner_plan(&self) -> &CandidatePlan {
        self.candidates[self.winner].plan()
    }

    pub fn winner_works(&self) -> u64 {
        self.scores[self.winner].works
    }

    /// Whether the winner already hit EOF during the trial.
    pub fn winner_eof(&self) -> bool {
        self.scores[self.winner].eof
    }

    /// Whether the winner finished its trial rather than running out of works.
    pub fn winner_finished(&self) -> bool {
        self.scores[self.winner].finished
    }

    /// What the plan cache records about this race.
    pub fn decision(&self) -> PlanDecision {
        PlanDecision {
            works: self.winner_works(),
            window: self.window,
            scores: self.scores.clone(),
        }
    }

    /// The winning candidate (to keep draining) and its buffered output.
    pub fn into_winner(mut self) -> (C, Vec<Document>) {
        let winner = self.candidates.swap_remove(self.winner);
        (winner, self.buffered)
    }
}

/// The winner of a race as the plan cache stores it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanDecision {
    pub works: u64,
    /// Trial window the works were measured over, in results.
    pub window: usize,
    pub scores: Vec<CandidateScore>,
}

impl PlanDecision {
    pub fn new(works: u64, window: usize) -> Self {
        Self {
            works,
            window,
            scores: Vec::new(),
        }
    }
}

#[derive(Default)]
struct TrialState {
    buffered: Vec<Document>,
    eof: bool,
    finished: bool,
    done: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct MultiPlanner {
    config: TrialConfig,
}

impl MultiPlanner {
    pub fn new(config: TrialConfig) -> Self {
        Self { config }
    }

    pub fn race<C: TrialCandidate>(&self, mut candidates: Vec<C>) -> Result<RaceOutcome<C>> {
        let first = candidates.first().ok_or(PlanError::NoCandidates)?;
        let expected = first.semantics();
        if let Some(bad) = candidates.iter().find(|c| c.semantics() != expected) {
            return Err(PlanError::PlanningInconsistency(format!(
                "candidate '{}' does not produce the same results as '{}'",
                bad.plan().access,
                first.plan().access
            )));
        }

        let max_results = self.config.max_results.max(1);
        let mut states: Vec<TrialState> = candidates.iter().map(|_| TrialState::default()).collect();

        loop {
            let mut any_finished = false;
            for (candidate, state) in candidates.iter_mut().zip(states.iter_mut()) {
                if state.done {
                    continue;
                }
                match candidate.step() {
                    TrialStep::Advanced(doc) => {
                        state.buffered.push(doc);
                        if state.buffered.len() >= max_results {
                            state.finished = true;
                        }
                    }
                    TrialStep::NeedTime => {}
                    TrialStep::Eof => {
                        state.eof = true;
                        state.finished = true;
                    }
                }
                if state.finished || candidate.works() >= self.config.max_works {
                    state.done = true;
                }
                any_finished |= state.finished;
            }
            if any_finished || states.iter().all(|s| s.done) {
                break;
            }
        }

        let scores: Vec<CandidateScore> = candidates
            .iter()
            .zip(states.iter())
            .map(|(c, s)| CandidateScore {
                plan: c.plan().access.to_string(),
                works: c.works(),
                advanced: s.buffered.len(),
                eof: s.eof,
                finished: s.finished,
            })
            .collect();

        let winner = (0..scores.len())
            .min_by(|&a, &b| rank(&scores[a], &scores[b]).then(a.cmp(&b)))
            .unwrap_or(0);

        #[cfg(feature = "tracing")]
        tracing::debug!(
            winner = %scores[winner].plan,
            works = scores[winner].works,
            candidates = scores.len(),
            "multi-planner race decided"
        );

        let window = if scores[winner].finished {
            max_results
        } else {
            scores[winner].advanced
        };
        let buffered = std::mem::take(&mut states[winner].buffered);
        Ok(RaceOutcome {
            winner,
            candidates,
            buffered,
            scores,
            window,
        })
    }
}

/// `Less` means `a` ranks ahead of `b`.
fn rank(a: &CandidateScore, b: &CandidateScore) -> Ordering {
    match (a.finished, b.finished) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => a.works.cmp(&b.works),
        (false, false) => b
            .advanced
            .cmp(&a.advanced)
            .then_with(|| a.works.cmp(&b.works)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::AccessPath;
    use qplan_core::hash::hash_str;
    use qplan_core::id::CandidateId;

    /// Produces a document every `every` works and hits EOF after `total` works.
    struct Scripted {
        plan: CandidatePlan,
        works: u64,
        every: u64,
        total: u64,
        semantics: &'static str,
    }

    fn scripted(id: u64, every: u64, total: u64) -> Scripted {
        Scripted {
            plan: CandidatePlan {
                id: CandidateId::new(id),
                access: AccessPath::IndexScan {
                    index: format!("i{id}"),
                    key_pattern: format!("{{i{id}: 1}}"),
                    field: format!("i{id}"),
                },
            },
            works: 0,
            every,
            total,
            semantics: "same",
        }
    }

    impl TrialCandidate for Scripted {
        fn plan(&self) -> &CandidatePlan {
            &self.plan
        }
        fn semantics(&self) -> Hash256 {
            hash_str(self.semantics)
        }
        fn step(&mut self) -> TrialStep {
            if self.works >= self.total {
                return TrialStep::Eof;
            }
            self.works += 1;
            if self.works % self.every == 0 {
                TrialStep::Advanced(Document::new().with("w", self.works as i64))
            } else {
                TrialStep::NeedTime
            }
        }
        fn works(&self) -> u64 {
            self.works
        }
    }

    fn planner() -> MultiPlanner {
        MultiPlanner::new(TrialConfig {
            max_works: 1_000,
            max_results: 3,
        })
    }

    #[test]
    fn fastest_to_finish_wins() {
        let out = planner()
            .race(vec![scripted(0, 10, 500), scripted(1, 1, 2)])
            .unwrap();
        assert_eq!(out.winner, 1);
        assert!(out.winner_eof());
        assert_eq!(out.buffered.len(), 2);
        assert!(!out.scores[0].finished);
        assert_eq!(out.window, 3);
    }

    #[test]
    fn ties_go_to_earliest_registered() {
        let out = planner()
            .race(vec![scripted(0, 1, 50), scripted(1, 1, 50)])
            .unwrap();
        assert_eq!(out.winner, 0);
        assert_eq!(out.scores[0].works, out.scores[1].works);
    }

    #[test]
    fn unfinished_races_prefer_productivity() {
        let planner = MultiPlanner::new(TrialConfig {
            max_works: 20,
            max_results: 100,
        });
        let out = planner
            .race(vec![scripted(0, 10, 500), scripted(1, 4, 500)])
            .unwrap();
        assert_eq!(out.winner, 1);
        assert!(!out.winner_finished());
        // Five results within the 20-work budget: later executions are
        // measured up to their fifth result.
        assert_eq!(out.decision(), PlanDecision {
            works: 20,
            window: 5,
            scores: out.scores.clone(),
        });
        let (winner, buffered) = out.into_winner();
        assert_eq!(winner.plan.id, CandidateId::new(1));
        assert_eq!(buffered.len(), 5);
    }

    #[test]
    fn mismatched_semantics_is_an_inconsistency() {
        let mut odd = scripted(1, 1, 5);
        odd.semantics = "different";
        let err = planner().race(vec![scripted(0, 1, 5), odd]).err().unwrap();
        assert!(matches!(err, PlanError::PlanningInconsistency(_)));
        assert!(matches!(
            planner().race(Vec::<Scripted>::new()).err().unwrap(),
            PlanError::NoCandidates
        ));
    }
}
