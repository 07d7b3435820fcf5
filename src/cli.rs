use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "signage", version, about = "Keep a local media directory in sync with an object store")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum Command {
    /// Sync on a schedule until interrupted (default)
    Run,
    /// Scan the media directory and print the inventory as JSON
    Scan,
    /// Run one sync cycle and print the report
    Sync,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let cli = Cli::try_parse_from(["signage"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["signage", "sync", "-vv", "--config", "/etc/signage.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Sync)));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/signage.toml")));
    }

    #[test]
    fn test_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
