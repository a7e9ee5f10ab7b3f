use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line options for mailwake.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the TOML account configuration (falls back to MAILWAKE_CONFIG).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Path to the op-state database (defaults to the data directory).
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Abort the command after this many seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check every account once and print newly arrived mail.
    Poll,
    /// List mailboxes with message counts.
    Folders {
        /// Account name; the primary account when omitted.
        #[arg(long, default_value = "")]
        account: String,
    },
    /// Print the op-state entries of a namespace.
    State {
        #[arg(default_value = "email_poll")]
        namespace: String,
    },
}
