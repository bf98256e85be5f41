// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `trainflow`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "trainflow",
    version,
    about = "Run ML job graphs level by level, locally or across a worker fleet.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Trainflow.toml` in the current working directory. A missing
    /// default file means built-in defaults.
    #[arg(long, global = true, value_name = "PATH", default_value = "Trainflow.toml")]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TRAINFLOW_LOG` or a default level will be used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Serve the HTTP API until Ctrl-C.
    Serve {
        /// Overrides `[server].bind`.
        #[arg(long, value_name = "ADDR")]
        bind: Option<String>,
    },

    /// Validate a pipeline file and print its execution plan.
    Validate {
        #[arg(value_name = "PIPELINE")]
        pipeline: PathBuf,
    },

    /// Execute a pipeline file and wait for it to finish.
    Run {
        #[arg(value_name = "PIPELINE")]
        pipeline: PathBuf,

        /// Overrides the pipeline's and the config's parallelism.
        #[arg(long, value_name = "N")]
        parallelism: Option<usize>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_with_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "trainflow",
            "run",
            "pipe.toml",
            "--parallelism",
            "2",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
        assert_eq!(args.config, PathBuf::from("Trainflow.toml"));
        match args.command {
            Command::Run { pipeline, parallelism } => {
                assert_eq!(pipeline, PathBuf::from("pipe.toml"));
                assert_eq!(parallelism, Some(2));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn subcommand_is_required() {
        assert!(CliArgs::try_parse_from(["trainflow"]).is_err());
    }
}
