//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "ehdb-sync", version, about = "Mirror the gallery catalog into a local store")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, env = "EHDB_CONFIG", default_value = "config.toml")]
    pub config: PathBuf,

    /// Print Prometheus metrics after the run.
    #[arg(long, global = true)]
    pub print_metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Sync the newest galleries from the front-page listing.
    Sync {
        /// Site host, overrides the config.
        #[arg(long)]
        host: Option<String>,
        /// Re-read this many hours before the newest stored gallery, updating what is found.
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        offset: i64,
        /// Read exactly this many listing pages (0 = until caught up).
        #[arg(long)]
        pages: Option<u32>,
    },

    /// Refresh galleries posted within the last N hours.
    Resync {
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },

    /// Fetch specific galleries by gid/token or URL.
    Fetch {
        /// Gallery references such as 123456/abcdef0123.
        galleries: Vec<String>,
        /// Read references from a file, one per line.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Sync new torrents from the torrent listing.
    TorrentSync {
        #[arg(long)]
        host: Option<String>,
        /// Read exactly this many listing pages (0 = until caught up).
        #[arg(long)]
        pages: Option<u32>,
        /// Upstream status filter.
        #[arg(long)]
        status: Option<String>,
        /// Free-text search.
        #[arg(long)]
        search: Option<String>,
    },

    /// Import torrents for galleries whose version group is unknown.
    TorrentImport {
        #[arg(long)]
        host: Option<String>,
    },

    /// Recompute the replaced flag of every version group.
    MarkReplaced,

    /// Run the scheduled workflows until interrupted.
    Daemon,
}

impl Command {
    /// Host override given on the command line.
    pub fn host(&self) -> Option<&str> {
        match self {
            Command::Sync { host, .. }
            | Command::TorrentSync { host, .. }
            | Command::TorrentImport { host } => host.as_deref().filter(|h| !h.is_empty()),
            _ => None,
        }
    }
}

/// `--pages 0` means no limit.
pub fn page_limit(pages: Option<u32>) -> Option<u32> {
    pages.filter(|pages| *pages > 0)
}
