// src/dag/state_manager.rs

//! Job state transitions for one execution.
//!
//! The orchestrator loop owns the `jobs` map of an [`Execution`] and applies
//! every transition through [`StateManager`], so the rules for readiness and
//! skip propagation live in one place.
//!
//! [`Execution`]: crate::engine::Execution

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::dag::graph::JobGraph;
use crate::dag::job::JobId;
use crate::dag::job_state::{JobState, JobStatus};

pub struct StateManager<'a> {
    graph: &'a JobGraph,
    jobs: &'a mut BTreeMap<JobId, JobState>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a JobGraph, jobs: &'a mut BTreeMap<JobId, JobState>) -> Self {
        Self { graph, jobs }
    }

    /// All direct dependencies of `id` succeeded.
    pub fn deps_satisfied(&self, id: &str) -> bool {
        deps_satisfied(self.graph, self.jobs, id)
    }

    /// Mark every `Pending` job of a level whose dependencies succeeded as
    /// `Ready` and return them in level order.
    ///
    /// Pending jobs that can never run (an upstream job failed or was skipped)
    /// are marked `Skipped` instead.
    pub fn promote_ready(&mut self, level: &[JobId]) -> Vec<JobId> {
        let mut ready = Vec::new();

        for id in level {
            let pending = matches!(
                self.jobs.get(id).map(|s| s.status),
                Some(JobStatus::Pending)
            );
            if !pending {
                continue;
            }

            if self.deps_satisfied(id) {
                if let Some(state) = self.jobs.get_mut(id) {
                    state.mark_ready();
                    ready.push(id.clone());
                }
            } else if self.deps_blocked(id) {
                if let Some(state) = self.jobs.get_mut(id) {
                    debug!(job_id = %id, "upstream job did not succeed; skipping");
                    state.mark_skipped();
                }
            }
        }

        ready
    }

    fn deps_blocked(&self, id: &str) -> bool {
        self.graph.dependencies_of(id).iter().any(|dep| {
            matches!(
                self.jobs.get(dep).map(|s| s.status),
                Some(JobStatus::Failed | JobStatus::Skipped)
            )
        })
    }

    /// Skip every transitive dependent of `failed` that has not started.
    ///
    /// Returns the newly skipped job ids.
    pub fn mark_dependents_skipped(&mut self, failed: &str) -> Vec<JobId> {
        let mut skipped = Vec::new();

        for id in self.graph.transitive_dependents(failed) {
            match self.jobs.get_mut(&id) {
                Some(state) if matches!(state.status, JobStatus::Pending | JobStatus::Ready) => {
                    state.mark_skipped();
                    debug!(job_id = %id, upstream = %failed, "skipping dependent of failed job");
                    skipped.push(id);
                }
                Some(_) => {}
                None => warn!(job_id = %id, "job in graph missing from execution state"),
            }
        }

        skipped
    }

    /// Skip every job that has not started. Used when an execution halts.
    pub fn skip_unstarted(&mut self) -> Vec<JobId> {
        let mut skipped = Vec::new();
        for (id, state) in self.jobs.iter_mut() {
            if matches!(state.status, JobStatus::Pending | JobStatus::Ready) {
                state.mark_skipped();
                skipped.push(id.clone());
            }
        }
        skipped
    }

    /// Put `Ready` jobs that were never dispatched back to `Pending`.
    pub fn revert_undispatched(&mut self) -> usize {
        let mut n = 0;
        for state in self.jobs.values_mut() {
            if state.status == JobStatus::Ready {
                state.status = JobStatus::Pending;
                n += 1;
            }
        }
        n
    }
}

pub fn deps_satisfied(graph: &JobGraph, jobs: &BTreeMap<JobId, JobState>, id: &str) -> bool {
    graph
        .dependencies_of(id)
        .iter()
        .all(|dep| matches!(jobs.get(dep).map(|s| s.status), Some(JobStatus::Succeeded)))
}

pub fn any_failed(jobs: &BTreeMap<JobId, JobState>) -> bool {
    jobs.values().any(|s| s.status == JobStatus::Failed)
}

/// Index of the first level that still has a non-terminal job.
pub fn next_unresolved_level(
    levels: &[Vec<JobId>],
    jobs: &BTreeMap<JobId, JobState>,
) -> Option<usize> {
    levels.iter().position(|level| {
        level
            .iter()
            .any(|id| jobs.get(id).is_some_and(|s| !s.status.is_terminal()))
    })
}
