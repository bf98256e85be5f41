// src/dag/validator.rs

//! Pure validation and ordering functions over a list of [`JobConfig`].
//!
//! - [`validate`] reports *every* problem it finds (duplicate ids, unknown or
//!   self dependencies, cycles) so a graph can be fixed in one pass.
//! - [`topological_sort`] and [`execution_levels`] refuse invalid graphs and
//!   are deterministic: ties are broken by input order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;

use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use serde::Serialize;

use crate::dag::graph::JobGraph;
use crate::dag::job::{JobConfig, JobId, JobType};
use crate::errors::{OrchestratorError, Result};

/// A single problem found in a job graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationIssue {
    EmptyJobId {
        index: usize,
    },
    DuplicateJobId {
        job_id: JobId,
    },
    MissingDependency {
        job_id: JobId,
        dependency: JobId,
    },
    SelfDependency {
        job_id: JobId,
    },
    Cycle {
        jobs: Vec<JobId>,
    },
    /// Produced by the orchestrator, not by [`validate`]: the type is known
    /// but nothing is registered to run it.
    UnregisteredJobType {
        job_id: JobId,
        job_type: JobType,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyJobId { index } => {
                write!(f, "job at index {index} has an empty id")
            }
            ValidationIssue::DuplicateJobId { job_id } => {
                write!(f, "duplicate job id '{job_id}'")
            }
            ValidationIssue::MissingDependency { job_id, dependency } => {
                write!(f, "job '{job_id}' depends on unknown job '{dependency}'")
            }
            ValidationIssue::SelfDependency { job_id } => {
                write!(f, "job '{job_id}' depends on itself")
            }
            ValidationIssue::Cycle { jobs } => {
                write!(f, "cycle detected between jobs [{}]", jobs.join(", "))
            }
            ValidationIssue::UnregisteredJobType { job_id, job_type } => {
                write!(f, "job '{job_id}' has type '{job_type}' with no registered handler")
            }
        }
    }
}

/// Result of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn from_issues(errors: Vec<ValidationIssue>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Convert into a `Result`, mapping an invalid report to
    /// [`OrchestratorError::Validation`].
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(OrchestratorError::Validation(self.errors))
        }
    }
}

/// Topological order and level partition of a valid graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub topological_order: Vec<JobId>,
    pub execution_levels: Vec<Vec<JobId>>,
}

/// Check a job list for duplicate ids, dangling and self dependencies, and
/// cycles. All detected issues are returned.
pub fn validate(jobs: &[JobConfig]) -> ValidationReport {
    let mut issues = Vec::new();

    let mut seen: HashSet<&str> = HashSet::new();
    for (index, job) in jobs.iter().enumerate() {
        if job.id.trim().is_empty() {
            issues.push(ValidationIssue::EmptyJobId { index });
            continue;
        }
        if !seen.insert(job.id.as_str()) {
            issues.push(ValidationIssue::DuplicateJobId {
                job_id: job.id.clone(),
            });
        }
    }

    let mut reported: HashSet<(&str, &str)> = HashSet::new();
    for job in jobs {
        for dep in &job.depends_on {
            if !reported.insert((job.id.as_str(), dep.as_str())) {
                continue;
            }
            if dep == &job.id {
                issues.push(ValidationIssue::SelfDependency {
                    job_id: job.id.clone(),
                });
            } else if !seen.contains(dep.as_str()) {
                issues.push(ValidationIssue::MissingDependency {
                    job_id: job.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    issues.extend(find_cycles(jobs));

    ValidationReport::from_issues(issues)
}

/// Report each strongly connected component with more than one job as a
/// cycle. Self loops are reported separately as `SelfDependency`.
fn find_cycles(jobs: &[JobConfig]) -> Vec<ValidationIssue> {
    let position: HashMap<&str, usize> = jobs
        .iter()
        .enumerate()
        .rev()
        .map(|(i, j)| (j.id.as_str(), i))
        .collect();

    // Edge direction: dep -> job.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for job in jobs {
        graph.add_node(job.id.as_str());
    }
    for job in jobs {
        for dep in &job.depends_on {
            if dep != &job.id && position.contains_key(dep.as_str()) {
                graph.add_edge(dep.as_str(), job.id.as_str(), ());
            }
        }
    }

    let mut cycles: Vec<Vec<&str>> = tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .collect();

    for component in cycles.iter_mut() {
        component.sort_by_key(|id| position.get(id).copied().unwrap_or(usize::MAX));
    }
    cycles.sort_by_key(|component| {
        component
            .first()
            .and_then(|id| position.get(id).copied())
            .unwrap_or(usize::MAX)
    });

    cycles
        .into_iter()
        .map(|component| ValidationIssue::Cycle {
            jobs: component.into_iter().map(str::to_string).collect(),
        })
        .collect()
}

/// Deterministic dependency-first ordering. Among jobs that are ready at the
/// same time, the one that appears first in the input wins.
pub fn topological_sort(jobs: &[JobConfig]) -> Result<Vec<JobConfig>> {
    validate(jobs).into_result()?;
    let graph = JobGraph::from_jobs(jobs);
    Ok(sorted_ids(&graph)
        .into_iter()
        .filter_map(|id| graph.job(&id).cloned())
        .collect())
}

/// Partition jobs into levels: level *k* holds every job whose dependencies
/// all live in levels `0..k`. Jobs in one level are independent of each
/// other and keep their input order.
pub fn execution_levels(jobs: &[JobConfig]) -> Result<Vec<Vec<JobConfig>>> {
    validate(jobs).into_result()?;
    let graph = JobGraph::from_jobs(jobs);
    Ok(level_ids(&graph)
        .into_iter()
        .map(|level| {
            level
                .into_iter()
                .filter_map(|id| graph.job(&id).cloned())
                .collect()
        })
        .collect())
}

/// Topological order and levels together, as ids.
pub fn plan(jobs: &[JobConfig]) -> Result<ExecutionPlan> {
    validate(jobs).into_result()?;
    let graph = JobGraph::from_jobs(jobs);
    Ok(ExecutionPlan {
        topological_order: sorted_ids(&graph),
        execution_levels: level_ids(&graph),
    })
}

/// Kahn's algorithm with a min-heap on input position. Assumes a valid graph.
fn sorted_ids(graph: &JobGraph) -> Vec<JobId> {
    let ids: Vec<&str> = graph.job_ids().collect();
    let index: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut in_degree: Vec<usize> = ids
        .iter()
        .map(|id| graph.dependencies_of(id).len())
        .collect();

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut out = Vec::with_capacity(ids.len());
    while let Some(Reverse(i)) = ready.pop() {
        let id = ids[i];
        out.push(id.to_string());
        for dependent in graph.dependents_of(id) {
            if let Some(&j) = index.get(dependent.as_str()) {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.push(Reverse(j));
                }
            }
        }
    }

    out
}

/// Level of a job = 1 + max level of its dependencies. Assumes a valid graph.
pub(crate) fn level_ids(graph: &JobGraph) -> Vec<Vec<JobId>> {
    let mut level_of: HashMap<JobId, usize> = HashMap::new();
    for id in sorted_ids(graph) {
        let level = graph
            .dependencies_of(&id)
            .iter()
            .filter_map(|dep| level_of.get(dep))
            .map(|l| l + 1)
            .max()
            .unwrap_or(0);
        level_of.insert(id, level);
    }

    let depth = level_of.values().max().map(|m| m + 1).unwrap_or(0);
    let mut levels: Vec<Vec<JobId>> = vec![Vec::new(); depth];
    for id in graph.job_ids() {
        if let Some(&level) = level_of.get(id) {
            levels[level].push(id.to_string());
        }
    }
    levels
}
