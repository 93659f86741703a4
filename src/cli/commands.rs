use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Reproduce the software environment of a research paper's code
#[derive(Parser, Debug)]
#[command(
    name = "reprobox",
    about = "Reproduce the software environment of a research paper's code",
    version,
    author,
    long_about = "reprobox clones a paper's repository, infers its dependencies from manifests \
                  and imports, picks a compatible Python, and provisions an isolated \
                  environment. Optional packages that fail to install are reported instead \
                  of aborting the run."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Verbose output (debug logging)")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Provision the environment for one paper",
        long_about = "Locates and clones the paper's repository, resolves its requirements and \
                      provisions a virtual environment for the best compatible Python.\n\n\
                      Examples:\n  \
                      reprobox run https://github.com/owner/project\n  \
                      reprobox run paper.pdf --repo https://github.com/owner/project\n  \
                      reprobox run paper.pdf --repo URL --persistent --name project\n  \
                      reprobox run URL --auto-run --output-dir ./demo --format json"
    )]
    Run(RunArgs),

    #[command(
        about = "Process many papers concurrently",
        long_about = "Reads one '<paper> [<repository-url>]' entry per line and runs each in its \
                      own ephemeral workspace. Ctrl-C cancels the remaining runs and removes \
                      their workspaces.\n\n\
                      Examples:\n  \
                      reprobox batch papers.txt --jobs 8\n  \
                      reprobox batch papers.txt --format csv -o results.csv"
    )]
    Batch(BatchArgs),

    #[command(
        about = "Show what a local checkout needs, without installing anything",
        long_about = "Reads manifests and scans imports of a local directory and prints the \
                      merged requirement set, conflicts and ambiguous imports.\n\n\
                      Examples:\n  \
                      reprobox inspect .\n  \
                      reprobox inspect ../project --format yaml"
    )]
    Inspect(InspectArgs),

    #[command(
        about = "Remove workspaces",
        long_about = "Removes leftover ephemeral workspaces and named persistent ones. \
                      Directories without a reprobox marker are never touched.\n\n\
                      Examples:\n  \
                      reprobox cleanup --ephemeral\n  \
                      reprobox cleanup --persistent project\n  \
                      reprobox cleanup --all-persistent"
    )]
    Cleanup(CleanupArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "PAPER", help = "Paper path or URL, or the repository URL itself")]
    pub paper: String,

    #[arg(long, value_name = "URL", help = "Repository URL (skips lookup)")]
    pub repo: Option<String>,

    #[arg(long, help = "Keep the workspace after the run")]
    pub persistent: bool,

    #[arg(
        long,
        value_name = "NAME",
        requires = "persistent",
        help = "Persistent workspace name (defaults to the repository name)"
    )]
    pub name: Option<String>,

    #[arg(long, help = "Generate and execute a demo script after provisioning")]
    pub auto_run: bool,

    #[arg(long, value_name = "DIR", help = "Copy the generated demo script here")]
    pub output_dir: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct BatchArgs {
    #[arg(value_name = "FILE", help = "Batch file, one '<paper> [<repository-url>]' per line")]
    pub file: PathBuf,

    #[arg(
        short = 'j',
        long,
        value_name = "N",
        help = "Concurrent runs (defaults to REPROBOX_MAX_CONCURRENT_RUNS)"
    )]
    pub jobs: Option<usize>,

    #[arg(long, help = "Generate and execute a demo script for each paper")]
    pub auto_run: bool,

    #[arg(long, value_name = "DIR", help = "Copy generated demo scripts under DIR/<row>/")]
    pub output_dir: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: BatchFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    #[arg(
        value_name = "PATH",
        help = "Path to a checkout (defaults to current directory)"
    )]
    pub repository_path: Option<PathBuf>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct CleanupArgs {
    #[arg(long, help = "Remove leftover ephemeral workspaces")]
    pub ephemeral: bool,

    #[arg(long, value_name = "NAME", help = "Remove a persistent workspace (repeatable)")]
    pub persistent: Vec<String>,

    #[arg(long, conflicts_with = "persistent", help = "Remove every persistent workspace")]
    pub all_persistent: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

/// Batch output additionally supports a flat table.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFormatArg {
    Json,
    Yaml,
    Human,
    Csv,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

impl From<BatchFormatArg> for super::output::OutputFormat {
    fn from(arg: BatchFormatArg) -> Self {
        match arg {
            BatchFormatArg::Json => super::output::OutputFormat::Json,
            BatchFormatArg::Yaml => super::output::OutputFormat::Yaml,
            BatchFormatArg::Human => super::output::OutputFormat::Human,
            BatchFormatArg::Csv => super::output::OutputFormat::Csv,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_args_verify() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_default_run_args() {
        let args = CliArgs::parse_from(["reprobox", "run", "https://github.com/u/repo"]);
        match args.command {
            Commands::Run(run) => {
                assert_eq!(run.paper, "https://github.com/u/repo");
                assert_eq!(run.format, OutputFormatArg::Human);
                assert!(run.repo.is_none());
                assert!(!run.persistent);
                assert!(!run.auto_run);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_persistent_with_name() {
        let args = CliArgs::parse_from([
            "reprobox",
            "run",
            "paper.pdf",
            "--repo",
            "https://github.com/u/repo",
            "--persistent",
            "--name",
            "mine",
        ]);
        match args.command {
            Commands::Run(run) => {
                assert!(run.persistent);
                assert_eq!(run.name.as_deref(), Some("mine"));
                assert_eq!(run.repo.as_deref(), Some("https://github.com/u/repo"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_name_requires_persistent() {
        let result = CliArgs::try_parse_from(["reprobox", "run", "paper.pdf", "--name", "x"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_batch_args() {
        let args = CliArgs::parse_from([
            "reprobox", "batch", "papers.txt", "--jobs", "3", "--format", "csv", "-o", "out.csv",
        ]);
        match args.command {
            Commands::Batch(batch) => {
                assert_eq!(batch.file, PathBuf::from("papers.txt"));
                assert_eq!(batch.jobs, Some(3));
                assert_eq!(batch.format, BatchFormatArg::Csv);
                assert_eq!(batch.output, Some(PathBuf::from("out.csv")));
            }
            _ => panic!("Expected Batch command"),
        }
    }

    #[test]
    fn test_cleanup_repeatable_persistent() {
        let args = CliArgs::parse_from([
            "reprobox",
            "cleanup",
            "--persistent",
            "a",
            "--persistent",
            "b",
        ]);
        match args.command {
            Commands::Cleanup(cleanup) => {
                assert_eq!(cleanup.persistent, vec!["a", "b"]);
                assert!(!cleanup.ephemeral);
            }
            _ => panic!("Expected Cleanup command"),
        }
    }

    #[test]
    fn test_cleanup_all_conflicts_with_named() {
        let result = CliArgs::try_parse_from([
            "reprobox",
            "cleanup",
            "--all-persistent",
            "--persistent",
            "a",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = CliArgs::try_parse_from(["reprobox", "-q", "-v", "inspect"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_csv_only_for_batch() {
        let result = CliArgs::try_parse_from(["reprobox", "inspect", "--format", "csv"]);
        assert!(result.is_err());
    }
}
