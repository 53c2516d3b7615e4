use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "promptr", version, about = "Submit prompt batches and watch backend health")]
pub struct Cli {
    /// Backend base URL.
    #[arg(long, global = true, env = "PROMPTR_BASE_URL")]
    pub base_url: Option<String>,

    /// Print JSON instead of a text summary.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create, run and inspect prompt batches.
    #[command(subcommand)]
    Batch(BatchCommand),

    /// Check backend reachability.
    #[command(subcommand)]
    Health(HealthCommand),
}

#[derive(Debug, Subcommand)]
pub enum BatchCommand {
    /// Create a batch from a prompt file.
    ///
    /// The file is either a JSON array (strings or `{"text": ...}` objects)
    /// or plain text with prompts separated by blank lines.
    Create {
        file: PathBuf,
        /// Batch name (defaults to the file stem).
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Target platform for every prompt.
        #[arg(long)]
        target: Option<String>,
    },

    /// Start a pending batch.
    Run {
        job_id: String,
        /// Poll until the batch finishes.
        #[arg(long)]
        watch: bool,
        /// Poll interval used with `--watch`.
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },

    /// Show a batch.
    Status {
        job_id: String,
        /// Include every task.
        #[arg(long)]
        tasks: bool,
    },

    /// Stop a running batch.
    Stop { job_id: String },

    /// List every batch.
    List,
}

#[derive(Debug, Subcommand)]
pub enum HealthCommand {
    /// Probe once and exit non-zero when the backend is unhealthy.
    Check,
    /// Keep probing and print every status until interrupted.
    Watch,
    /// Reset the circuit breaker and probe.
    Reset,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_batch_run_with_watch() {
        let cli = Cli::try_parse_from(["promptr", "batch", "run", "job-1", "--watch"]).unwrap();
        assert_matches!(
            cli.command,
            Command::Batch(BatchCommand::Run { ref job_id, watch: true, interval_secs: 5 }) if job_id == "job-1"
        );
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "promptr",
            "health",
            "check",
            "--json",
            "--base-url",
            "http://backend:5000",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.base_url.as_deref(), Some("http://backend:5000"));
        assert_matches!(cli.command, Command::Health(HealthCommand::Check));
    }

    #[test]
    fn create_requires_a_file() {
        assert!(Cli::try_parse_from(["promptr", "batch", "create"]).is_err());
    }
}
