use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pinctl",
    about = "Offline state tools for a pin cluster node",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Migrate the latest consensus snapshot to the current schema version
    /// and write it back.
    Upgrade,

    /// Write the pin set from the latest snapshot as a JSON list.
    Export(ExportArgs),

    /// Replace the consensus state with pins read from a JSON list.
    ///
    /// The previous snapshot is overwritten; export first if you may need
    /// it again.
    Import(ImportArgs),

    /// Verify that the stored state matches the schema version this binary
    /// understands.
    Check,

    /// Archive the consensus data directory. The next daemon start begins
    /// from an empty state.
    Cleanup,
}

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Output file (defaults to stdout).
    #[arg(short = 'f', long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Input file (defaults to stdin).
    #[arg(short = 'f', long, value_name = "PATH")]
    pub file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "PINCTL_DATA_DIR",
        value_name = "PATH",
        default_value = "./data"
    )]
    pub data_dir: PathBuf,

    /// How many archived consensus data directories `cleanup` keeps.
    #[arg(
        long = "backups-rotate",
        global = true,
        env = "PINCTL_BACKUPS_ROTATE",
        value_name = "N",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=100)
    )]
    pub backups_rotate: u64,
}

impl Config {
    pub fn peerstore_path(&self) -> PathBuf {
        self.data_dir.join("peerstore")
    }
}
