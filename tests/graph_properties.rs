// tests/graph_properties.rs

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use trainflow::dag::{execution_levels, topological_sort, validate, JobConfig, ValidationIssue};
use trainflow::errors::OrchestratorError;
use trainflow_test_utils::builders::job;

// Acyclic by construction: job N may only depend on jobs 0..N-1. The list
// is shuffled so input order differs from dependency order.
fn dag_strategy(max_jobs: usize) -> impl Strategy<Value = Vec<JobConfig>> {
    (1..=max_jobs)
        .prop_flat_map(|n| {
            proptest::collection::vec(proptest::collection::vec(any::<usize>(), 0..n), n)
        })
        .prop_map(build_jobs)
        .prop_flat_map(|jobs| Just(jobs).prop_shuffle())
}

fn build_jobs(raw_deps: Vec<Vec<usize>>) -> Vec<JobConfig> {
    raw_deps
        .into_iter()
        .enumerate()
        .map(|(i, potential)| {
            let deps: HashSet<usize> = if i == 0 {
                HashSet::new()
            } else {
                potential.into_iter().map(|d| d % i).collect()
            };
            let dep_names: Vec<String> = deps.iter().map(|d| format!("job_{d}")).collect();
            let dep_refs: Vec<&str> = dep_names.iter().map(String::as_str).collect();
            job(&format!("job_{i}"), &dep_refs)
        })
        .collect()
}

proptest! {
    #[test]
    fn topological_order_is_a_dependency_respecting_permutation(jobs in dag_strategy(12)) {
        prop_assert!(validate(&jobs).valid);
        let order = topological_sort(&jobs).unwrap();

        prop_assert_eq!(order.len(), jobs.len());
        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, j)| (j.id.as_str(), i)).collect();
        prop_assert_eq!(position.len(), jobs.len());

        for j in &jobs {
            for dep in &j.depends_on {
                prop_assert!(position[dep.as_str()] < position[j.id.as_str()],
                    "{} placed before its dependency {}", j.id, dep);
            }
        }
    }

    #[test]
    fn levels_partition_jobs_without_intra_level_dependencies(jobs in dag_strategy(12)) {
        let levels = execution_levels(&jobs).unwrap();

        let level_of: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .flat_map(|(l, js)| js.iter().map(move |j| (j.id.as_str(), l)))
            .collect();
        prop_assert_eq!(level_of.len(), jobs.len());
        prop_assert_eq!(levels.iter().map(Vec::len).sum::<usize>(), jobs.len());

        for j in &jobs {
            let own = level_of[j.id.as_str()];
            let expected = j
                .depends_on
                .iter()
                .map(|d| level_of[d.as_str()] + 1)
                .max()
                .unwrap_or(0);
            // Level = 1 + max level of dependencies, so none share a level.
            prop_assert_eq!(own, expected);
        }
        for level in &levels {
            prop_assert!(!level.is_empty());
        }
    }

    #[test]
    fn closing_a_cycle_is_always_rejected(jobs in dag_strategy(8)) {
        // Make the first root depend on a job that transitively depends on it,
        // or on itself when nothing does.
        let mut jobs = jobs;
        let root = jobs.iter().position(|j| j.depends_on.is_empty()).unwrap();
        let root_id = jobs[root].id.clone();
        let dependent = jobs
            .iter()
            .find(|j| j.depends_on.contains(&root_id))
            .map(|j| j.id.clone())
            .unwrap_or_else(|| root_id.clone());
        jobs[root].depends_on.push(dependent);

        let report = validate(&jobs);
        prop_assert!(!report.valid);
        let has_cycle_issue = report.errors.iter().any(|e| matches!(
            e,
            ValidationIssue::Cycle { .. } | ValidationIssue::SelfDependency { .. }
        ));
        prop_assert!(has_cycle_issue);
        prop_assert!(matches!(topological_sort(&jobs), Err(OrchestratorError::Validation(_))));
    }
}

#[test]
fn empty_graph_is_valid_with_zero_levels() {
    assert!(validate(&[]).valid);
    assert!(execution_levels(&[]).unwrap().is_empty());
    assert!(topological_sort(&[]).unwrap().is_empty());
}

#[test]
fn diamond_levels_keep_input_order() {
    let jobs = vec![
        job("A", &[]),
        job("C", &["A"]),
        job("B", &["A"]),
        job("D", &["B", "C"]),
    ];
    let ids: Vec<Vec<String>> = execution_levels(&jobs)
        .unwrap()
        .into_iter()
        .map(|l| l.into_iter().map(|j| j.id).collect())
        .collect();
    assert_eq!(ids, vec![vec!["A"], vec!["C", "B"], vec!["D"]]);
}
