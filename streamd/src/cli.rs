//! Thin command surface over the in-scope components (spec.md §1: "the CLI
//! command dispatcher and help text... is out of scope, specified only by
//! the interfaces it exposes"). No interactive menu, no installer
//! routines — those are named out-of-scope collaborators.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "streamd", about = "USB audio capture stream supervisor", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the supervisor daemon: enumerate devices and supervise one
    /// encoder stream per device until shutdown.
    Run {
        #[arg(long, default_value = "/etc/streamd/config.yaml")]
        config: PathBuf,
    },
    /// Query current device and lock-file liveness.
    Status {
        #[arg(long, default_value = "/etc/streamd/config.yaml")]
        config: PathBuf,
        /// Emit the structured JSON form instead of the human-readable table.
        #[arg(long)]
        json: bool,
    },
    /// Check for, and optionally install, a newer release.
    Update {
        #[arg(long, default_value = "/etc/streamd/config.yaml")]
        config: PathBuf,
        #[arg(long)]
        release_index_url: String,
        #[arg(long)]
        current_version: String,
        /// Only report whether an update is available; do not install it.
        #[arg(long)]
        check_only: bool,
    },
    /// Migrate a legacy bash config into the YAML format this binary reads.
    MigrateConfig {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Emit the USB hotplug rule file for currently enumerated devices.
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    Emit {
        #[arg(long, default_value = "/etc/streamd/config.yaml")]
        config: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Run `udevadm control --reload` and `udevadm trigger` after
        /// writing the rule file. Deferred by default — the operator may
        /// prefer to apply it out of band.
        #[arg(long)]
        reload: bool,
    },
}
