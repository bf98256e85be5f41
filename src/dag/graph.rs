// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use crate::dag::job::{JobConfig, JobId};

/// Internal node structure: stores the job plus immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    job: JobConfig,
    /// Direct dependencies, deduplicated, in declaration order.
    deps: Vec<JobId>,
    /// Direct dependents: jobs that list this one in `depends_on`.
    dependents: Vec<JobId>,
}

/// In-memory adjacency view of a job graph, keyed by job id.
///
/// Acyclicity and dependency existence are checked by
/// [`crate::dag::validator`]; this type only keeps adjacency information
/// (in input order) for scheduling and skip propagation. When ids are
/// duplicated the first occurrence wins.
#[derive(Debug, Clone, Default)]
pub struct JobGraph {
    nodes: HashMap<JobId, DagNode>,
    order: Vec<JobId>,
}

impl JobGraph {
    pub fn from_jobs(jobs: &[JobConfig]) -> Self {
        let mut nodes: HashMap<JobId, DagNode> = HashMap::new();
        let mut order = Vec::with_capacity(jobs.len());

        // First pass: create nodes with their dependency lists.
        for job in jobs {
            if nodes.contains_key(&job.id) {
                continue;
            }
            let mut seen = HashSet::new();
            let deps = job
                .depends_on
                .iter()
                .filter(|d| seen.insert(d.as_str()))
                .cloned()
                .collect();
            nodes.insert(
                job.id.clone(),
                DagNode {
                    job: job.clone(),
                    deps,
                    dependents: Vec::new(),
                },
            );
            order.push(job.id.clone());
        }

        // Second pass: populate dependents in input order.
        for name in &order {
            let deps = nodes.get(name).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        Self { nodes, order }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Job ids in input order.
    pub fn job_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn job(&self, id: &str) -> Option<&JobConfig> {
        self.nodes.get(id).map(|n| &n.job)
    }

    /// Immediate dependencies of a job.
    pub fn dependencies_of(&self, id: &str) -> &[JobId] {
        self.nodes.get(id).map(|n| n.deps.as_slice()).unwrap_or(&[])
    }

    /// Immediate dependents of a job.
    pub fn dependents_of(&self, id: &str) -> &[JobId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Every job reachable downstream of `id`, excluding `id` itself.
    pub fn transitive_dependents(&self, id: &str) -> Vec<JobId> {
        let mut stack: Vec<JobId> = self.dependents_of(id).to_vec();
        let mut visited: HashSet<JobId> = HashSet::new();
        let mut out = Vec::new();

        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            stack.extend(self.dependents_of(&name).iter().cloned());
            out.push(name);
        }

        out
    }
}
