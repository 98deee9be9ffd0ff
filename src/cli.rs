use std::time::Duration;

use anyhow::Result;
use camino::Utf8PathBuf as PathBuf;
use clap::Parser;

#[derive(Parser)]
#[command(version)]
pub struct Args {
    /// URL of the filesystem authority gateway
    #[clap(long, env = "DFS_AUTHORITY", value_name = "URL")]
    pub authority: String,

    /// Identity to act as on the remote namespace
    #[clap(long, env = "DFS_IDENTITY", value_name = "USER")]
    pub identity: String,

    /// Replication factor for uploaded files (authority default if unset)
    #[clap(long, env = "DFS_REPLICATION", value_name = "N")]
    pub replication: Option<u16>,

    /// Block size for uploaded files (authority default if unset)
    #[clap(long, env = "DFS_BLOCK_SIZE", value_name = "BYTES")]
    pub block_size: Option<u64>,

    /// Budget for each remote call
    #[clap(long, env = "DFS_TIMEOUT", value_parser = parse_seconds, value_name = "SECONDS")]
    pub timeout: Option<Duration>,

    #[clap(long, env, hide(true), default_value_t = false)]
    pub log_span_durations: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Create a directory and all missing ancestors
    Mkdir { path: String },

    /// Upload a local file into a remote directory
    Put {
        local: PathBuf,
        remote_dir: String,
        #[clap(long)]
        overwrite: bool,
    },

    /// Download a remote file to a local path
    Get {
        remote: String,
        local: PathBuf,
        /// Skip checksum verification
        #[clap(long)]
        no_verify: bool,
    },

    /// Remove an entry
    Rm {
        path: String,
        #[clap(short, long)]
        recursive: bool,
    },

    /// Rename or move an entry within the authority
    Mv { source: String, dest: String },

    /// List the entries directly under a path
    Ls { path: String },

    /// Recursively list all files under a path, with block placement
    Find { path: String },
}

fn parse_seconds(s: &str) -> Result<Duration> {
    Ok(Duration::from_secs(s.parse()?))
}
