//! Command-line front-end (spec.md §6 "External Interfaces").

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(name = "webdavfs-mount", version, about = "User-space network subsystem for a WebDAV-backed filesystem mount")]
pub struct Cli {
    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase verbosity (-v debug, -vv trace). Overridden by RUST_LOG.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Mount a WebDAV collection and run the network subsystem in the foreground.
    Mount(MountArgs),
    /// Probe a WebDAV base URL (OPTIONS + PROPFIND) without mounting.
    Probe(ProbeArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
pub struct MountArgs {
    /// Base URL of the WebDAV collection to mount.
    pub base_url: String,

    /// Username for HTTP Basic authentication.
    #[arg(long)]
    pub username: Option<String>,

    /// Mount read-only (disables PUT/DELETE/MKCOL/MOVE/LOCK).
    #[arg(long)]
    pub read_only: bool,

    /// Enable AppleDouble-header mirroring mode.
    #[arg(long)]
    pub mirrored: bool,

    /// Worker thread count (also sizes the stream slot pool).
    #[arg(long)]
    pub worker_threads: Option<usize>,

    /// Seconds a finished download's validators stay fresh.
    #[arg(long)]
    pub freshness_window_secs: Option<i64>,

    /// Path to a TOML proxy override file to watch for changes.
    #[arg(long)]
    pub proxy_override: Option<PathBuf>,

    /// Path to the certificate-confirmation UI helper binary. Omit to
    /// auto-accept every certificate (development only).
    #[arg(long)]
    pub cert_prompt_helper: Option<PathBuf>,

    /// Persist this mount's configuration under the config directory
    /// instead of running it.
    #[arg(long)]
    pub save_as: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ProbeArgs {
    /// Base URL of the WebDAV collection to probe.
    pub base_url: String,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    pub shell: Shell,
}
