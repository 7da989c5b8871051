//! CLI command definitions
//!
//! Uses `clap` derive API for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use assetpipe::pipeline::Step;

/// assetpipe - Sass, images and templates with live reload
#[derive(Parser, Debug)]
#[command(name = "assetpipe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to assetpipe.toml config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Working directory
    #[arg(long, global = true)]
    pub cwd: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Build everything, then watch and serve with live reload (default)
    Dev,

    /// Clean and build once, then exit
    Build,

    /// Remove generated outputs
    Clean,

    /// Compile stylesheets
    Styles,

    /// Optimize images
    Images,

    /// Render templates
    Templates,

    /// Validate configuration and print the path table
    Check,
}

impl Commands {
    /// The single step this command runs, if it is one
    pub fn step(self) -> Option<Step> {
        match self {
            Commands::Clean => Some(Step::Clean),
            Commands::Styles => Some(Step::Styles),
            Commands::Images => Some(Step::Images),
            Commands::Templates => Some(Step::Templates),
            Commands::Dev | Commands::Build | Commands::Check => None,
        }
    }
}

impl Cli {
    /// The command to run; no subcommand means `dev`
    pub fn effective_command(&self) -> Commands {
        self.command.unwrap_or(Commands::Dev)
    }

    /// Default log filter for the chosen verbosity
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "assetpipe=debug"
        } else if self.quiet {
            "assetpipe=warn"
        } else {
            "assetpipe=info"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_means_dev() {
        let cli = Cli::parse_from(["assetpipe"]);
        assert_eq!(cli.effective_command(), Commands::Dev);
        assert_eq!(cli.log_filter(), "assetpipe=info");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["assetpipe", "styles", "-q", "--cwd", "site"]);
        assert_eq!(cli.effective_command(), Commands::Styles);
        assert_eq!(cli.effective_command().step(), Some(Step::Styles));
        assert_eq!(cli.cwd, Some(PathBuf::from("site")));
        assert_eq!(cli.log_filter(), "assetpipe=warn");
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["assetpipe", "-v", "-q"]).is_err());
    }
}
