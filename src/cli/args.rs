//! CLI argument definitions using clap
//!
//! Commands:
//! - causelog track --entity <id> --old <file> --new <file>
//! - causelog query --entity <id> [filters]
//! - causelog report --entity <id> [--since <ts>] [--until <ts>]
//! - causelog related --change <id>
//! - causelog health [--entity <id>]
//! - causelog maintain [--entity <id>]
//! - causelog validate [--entity <id>]
//!
//! Every command takes `--config <path>` (default `./causelog.json`).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};

use crate::model::{CauseType, ChangeCategory, Priority};
use crate::query::{SortDirection, SortField};

/// causelog - change tracking and causation analysis for character snapshots
#[derive(Parser, Debug)]
#[command(name = "causelog")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArg {
    /// Path to configuration file; defaults apply when it does not exist
    #[arg(long, default_value = "./causelog.json")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compare two snapshots and persist the attributed changes
    Track {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        entity: String,
        /// Older snapshot (JSON file)
        #[arg(long)]
        old: PathBuf,
        /// Newer snapshot (JSON file)
        #[arg(long)]
        new: PathBuf,
        /// Reference recorded for the older snapshot (defaults to the file name)
        #[arg(long)]
        old_ref: Option<String>,
        /// Reference recorded for the newer snapshot (defaults to the file name)
        #[arg(long)]
        new_ref: Option<String>,
    },

    /// Search an entity's change history
    Query {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        entity: String,
        #[arg(long = "category")]
        categories: Vec<ChangeCategory>,
        #[arg(long = "priority")]
        priorities: Vec<Priority>,
        #[arg(long)]
        cause_type: Option<CauseType>,
        #[arg(long)]
        cause_name: Option<String>,
        /// Only changes with (true) or without (false) a known cause
        #[arg(long)]
        attributed: Option<bool>,
        /// Case-insensitive text in descriptions and field paths
        #[arg(long)]
        text: Option<String>,
        /// RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        /// RFC 3339 timestamp
        #[arg(long)]
        until: Option<DateTime<Utc>>,
        #[arg(long, default_value = "timestamp")]
        sort: SortField,
        #[arg(long, default_value = "desc")]
        order: SortDirection,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = crate::query::DEFAULT_LIMIT)]
        limit: usize,
        /// Also search archived entries
        #[arg(long)]
        include_archived: bool,
    },

    /// Summarize causation for an entity
    Report {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        entity: String,
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long)]
        until: Option<DateTime<Utc>>,
    },

    /// Show the causal chain around a change, searching every entity
    Related {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        change: String,
    },

    /// Storage health (every stored entity when --entity is omitted)
    Health {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        entity: Option<String>,
    },

    /// Rotate if due, apply retention, validate
    Maintain {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        entity: Option<String>,
    },

    /// Validate and repair metadata
    Validate {
        #[command(flatten)]
        config: ConfigArg,
        #[arg(long)]
        entity: Option<String>,
    },
}

impl Command {
    pub fn config_path(&self) -> &PathBuf {
        match self {
            Command::Track { config, .. }
            | Command::Query { config, .. }
            | Command::Report { config, .. }
            | Command::Related { config, .. }
            | Command::Health { config, .. }
            | Command::Maintain { config, .. }
            | Command::Validate { config, .. } => &config.config,
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        let cli = Cli::try_parse_from([
            "causelog",
            "query",
            "--entity",
            "42",
            "--priority",
            "high",
            "--category",
            "combat-stats",
            "--sort",
            "priority",
            "--limit",
            "10",
        ])
        .unwrap();
        match cli.command {
            Command::Query {
                entity,
                priorities,
                categories,
                sort,
                limit,
                ..
            } => {
                assert_eq!(entity, "42");
                assert_eq!(priorities, vec![Priority::High]);
                assert_eq!(categories, vec![ChangeCategory::CombatStats]);
                assert_eq!(sort, SortField::Priority);
                assert_eq!(limit, 10);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_default_config_path() {
        let cli = Cli::try_parse_from(["causelog", "health"]).unwrap();
        assert_eq!(cli.command.config_path(), &PathBuf::from("./causelog.json"));
    }

    #[test]
    fn test_track_requires_snapshots() {
        assert!(Cli::try_parse_from(["causelog", "track", "--entity", "42"]).is_err());
    }
}
