use std::path::PathBuf;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    #[command(subcommand)]
    pub(crate) command: OppmCommand,

    /// Increase log verbosity (-v info, -vv debug)
    #[clap(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Only log errors
    #[clap(short, long, global = true, conflicts_with = "verbose")]
    pub(crate) quiet: bool,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum OppmCommand {
    /// Creates the root with `apps/`, `shims/` and an empty `meta.toml`, and makes it the active root
    Init {
        /// Root directory. Defaults to `~/.oppm`
        #[clap(short, long)]
        root: Option<PathBuf>,
    },
    /// Lists installed applications
    List {
        #[clap(long)]
        json: bool,
    },
    /// Installs an executable, archive or directory into `apps/<name>/`
    Install {
        path: PathBuf,
        /// Application name. Derived from the file or directory name if omitted
        #[clap(short, long)]
        name: Option<String>,
    },
    /// Removes an application, its directory and every shim pointing into it
    Remove {
        name: String,
    },
    /// Deletes every application and shim. The root itself is kept
    Clean,
    /// Manages shims in `shims/`
    Exe {
        #[command(subcommand)]
        command: ExeCommand,
    },
    /// Synchronises the metadata with the directories found in `apps/`
    Update,
    /// Moves the whole root to a new location
    Migrate {
        path: PathBuf,
    },
    /// Packs the whole root into a `.tar.gz` backup
    Pack {
        /// Output file. Defaults to `./oppm_backups/oppm_backup_<timestamp>.tar.gz`
        #[clap(short, long)]
        output: Option<PathBuf>,
        /// Replace an existing output file
        #[clap(long)]
        overwrite: bool,
    },
    /// Restores a root from a backup made by `pack`
    Rebuild {
        archive: PathBuf,
        /// Root to restore into. Defaults to the active root
        #[clap(short, long)]
        root: Option<PathBuf>,
        /// Replace a non-empty target directory
        #[clap(long)]
        force: bool,
    },
    /// Checks metadata, app directories and shims for inconsistencies
    Health {
        /// Repair what can be repaired without losing data
        #[clap(long)]
        fix: bool,
        /// With --fix, also delete orphaned app directories and stray files
        #[clap(long, requires = "fix")]
        prune: bool,
        #[clap(long)]
        json: bool,
    },
    /// Shows the active root and where its files live
    Config,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum ExeCommand {
    /// Exposes an executable under `apps/` as a command in `shims/`
    Add {
        path: PathBuf,
        /// Shim name. Defaults to the executable's file name
        #[clap(short = 'e', long = "name")]
        name: Option<String>,
        /// Always write a forwarding script instead of a symlink
        #[clap(long)]
        stub: bool,
    },
    /// Deletes a shim
    Delete {
        name: String,
    },
    /// Lists shims and whether they resolve
    Show {
        #[clap(long)]
        json: bool,
    },
}
