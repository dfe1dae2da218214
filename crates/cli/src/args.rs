use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "docsift")]
#[command(version)]
#[command(about = "Ingest remote files, classify them and summarize them through language-model lanes")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "DOCSIFT_CONFIG", default_value = "docsift.toml")]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides [logging]
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Override [source] root
    #[arg(long)]
    pub source_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline once and exit
    Run,
    /// Run at startup and then periodically until Ctrl-C
    Poll {
        /// Seconds between runs, overrides [trigger] poll_interval_secs
        #[arg(long)]
        interval_secs: Option<u64>,
    },
    /// Show the progress store, or the recorded state of one remote path
    Status {
        path: Option<String>,
    },
    /// Check the configuration and exit
    ValidateConfig,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_poll_with_overrides() {
        let cli = Cli::try_parse_from([
            "docsift",
            "--config",
            "/etc/docsift.toml",
            "--log-level",
            "debug",
            "--source-root",
            "/mnt/share",
            "poll",
            "--interval-secs",
            "300",
        ])
        .unwrap();

        assert_eq!(cli.config, PathBuf::from("/etc/docsift.toml"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.source_root, Some(PathBuf::from("/mnt/share")));
        assert!(matches!(cli.command, Commands::Poll { interval_secs: Some(300) }));
    }

    #[test]
    fn test_status_path_is_optional() {
        let cli = Cli::try_parse_from(["docsift", "status", "RFI/a.pdf"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { path: Some(ref p) } if p == "RFI/a.pdf"));

        let cli = Cli::try_parse_from(["docsift", "status"]).unwrap();
        assert!(matches!(cli.command, Commands::Status { path: None }));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["docsift"]).is_err());
    }
}
