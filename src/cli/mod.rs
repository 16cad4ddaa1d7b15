//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mailqa",
    version,
    about = "Hybrid retrieval over a personal email corpus",
    long_about = "mailqa answers questions about your email by expanding the question, running BM25 \
                  and vector search for every phrasing, fusing the rankings, rescoring with subject, \
                  sender and date signals, and returning one passage per conversation thread."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/mailqa/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Retrieve the most relevant passages for a question
    Query {
        /// Question text
        question: String,

        /// Session whose history is used to resolve references
        #[arg(short, long)]
        session: Option<String>,

        /// Maximum number of results (one per thread)
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Search the question as asked, without LLM expansion
        #[arg(long)]
        no_expand: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show corpus statistics
    Stats,

    /// Inspect or clear conversation history
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Print the stored turns of a session
    Show {
        /// Session ID
        session: String,
    },

    /// Delete a session's history
    Clear {
        /// Session ID
        session: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section (e.g. "retrieval")
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_query() {
        let cli = Cli::try_parse_from([
            "mailqa", "query", "when is the offsite", "-s", "abc", "-k", "5", "--json",
        ])
        .unwrap();

        match cli.command {
            Commands::Query {
                question,
                session,
                top_k,
                no_expand,
                json,
            } => {
                assert_eq!(question, "when is the offsite");
                assert_eq!(session.as_deref(), Some("abc"));
                assert_eq!(top_k, Some(5));
                assert!(!no_expand);
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
