//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap. Keeps argument parsing
//! separate from execution logic.

use clap::{Parser, Subcommand};

/// Xymon control client
#[derive(Parser)]
#[command(name = "xymonctl")]
#[command(about = "Talk to the xymond status daemon", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Daemon address (overrides $XYMOND_ADDR and the default)
    #[arg(long, global = true)]
    pub daemon: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a raw protocol message read from the arguments or stdin
    Send {
        /// The message; read from stdin when omitted
        message: Option<String>,
    },

    /// Report a status color for HOST.TEST
    Status {
        /// Target as HOST.TEST
        target: String,
        /// The color to report
        color: String,
        /// Status text
        text: Vec<String>,
        /// Validity in minutes
        #[arg(long)]
        validity: Option<u32>,
    },

    /// Ask for the current color of HOST.TEST
    Query {
        /// Target as HOST.TEST
        target: String,
    },

    /// Dump the status board
    Board {
        /// Filters like host=RE, test=RE, color=red,yellow, fields=...
        filters: Vec<String>,
    },

    /// Show the full log for HOST.TEST
    Log {
        /// Target as HOST.TEST
        target: String,
    },

    /// Disable a test for a number of minutes (-1 until it recovers)
    Disable {
        /// Target as HOST.TEST, or HOST.* for every test
        target: String,
        /// Duration in minutes
        duration: i64,
        /// Reason shown while disabled
        reason: Vec<String>,
    },

    /// Re-enable a disabled test
    Enable {
        /// Target as HOST.TEST, or HOST.* for every test
        target: String,
    },

    /// Acknowledge an alert by its cookie
    Ack {
        cookie: i64,
        /// Duration in minutes
        duration: i64,
        /// Acknowledgement text
        text: Vec<String>,
    },

    /// Drop a host, or one of its tests
    Drop {
        host: String,
        test: Option<String>,
    },

    /// Rename a host, or one of its tests
    Rename {
        host: String,
        /// New host name, or the test to rename
        first: String,
        /// New test name when renaming a test
        second: Option<String>,
    },

    /// List hosts reporting in without being configured
    Ghosts,

    /// Check that the daemon is alive
    Ping,

    /// Attach to a broadcast channel and stream records to stdout
    Listen {
        /// Channel name (status, stachg, page, data, notes, enadis,
        /// client, clichg, user)
        channel: String,
        /// Directory holding the channel sockets
        #[arg(long, default_value = "/var/run/xymon")]
        channel_dir: std::path::PathBuf,
    },
}
