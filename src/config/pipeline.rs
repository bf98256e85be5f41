// src/config/pipeline.rs

//! Pipeline files: a workflow id plus its jobs.
//!
//! ```toml
//! workflow = "resnet-finetune"
//! parallelism = 2
//!
//! [[job]]
//! id = "prep"
//! type = "command"
//! parameters = { cmd = "python prep.py" }
//!
//! [[job]]
//! id = "train"
//! type = "command"
//! depends_on = ["prep"]
//! parameters = { cmd = "python train.py" }
//! ```

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::dag::JobConfig;
use crate::errors::{OrchestratorError, Result};
use crate::types::FailurePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineFile {
    pub workflow: String,
    #[serde(default)]
    pub parallelism: Option<usize>,
    #[serde(default)]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
}

impl PipelineFile {
    pub fn parse(contents: &str) -> Result<Self> {
        let pipeline: PipelineFile = toml::from_str(contents)?;
        if pipeline.workflow.trim().is_empty() {
            return Err(OrchestratorError::ConfigError(
                "pipeline `workflow` must not be empty".to_string(),
            ));
        }
        Ok(pipeline)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::JobType;
    use serde_json::json;

    #[test]
    fn parses_jobs_with_snake_case_dependencies() {
        let p = PipelineFile::parse(
            r#"
            workflow = "wf"
            parallelism = 2

            [[job]]
            id = "prep"
            type = "data_preparation"

            [[job]]
            id = "train"
            type = "training"
            depends_on = ["prep"]
            capability = "gpu"
            priority = 5
            parameters = { epochs = 3, lr = 0.01 }
            "#,
        )
        .unwrap();

        assert_eq!(p.workflow, "wf");
        assert_eq!(p.parallelism, Some(2));
        assert_eq!(p.jobs.len(), 2);
        let train = &p.jobs[1];
        assert_eq!(train.job_type, JobType::Training);
        assert_eq!(train.depends_on, vec!["prep".to_string()]);
        assert_eq!(train.capability.as_deref(), Some("gpu"));
        assert_eq!(train.priority, 5);
        assert_eq!(train.parameters["epochs"], json!(3));
    }

    #[test]
    fn unknown_job_type_is_a_parse_error() {
        let err = PipelineFile::parse("workflow = \"wf\"\n[[job]]\nid = \"a\"\ntype = \"magic\"\n");
        assert!(matches!(err, Err(OrchestratorError::TomlError(_))));
    }

    #[test]
    fn empty_workflow_is_rejected() {
        assert!(PipelineFile::parse("workflow = \"\"").is_err());
    }
}
