//! Shared types for the xymond daemon and its clients.
//!
//! Everything the daemon, the control CLI and external workers agree on
//! lives here: the color enumeration, the channel names, wire framing
//! and field escaping, and the configuration structures.

pub mod color;
pub mod config;
pub mod error;
pub mod wire;

pub use color::{AlertClass, Color, ColorPolicy};
pub use error::XymonError;

/// Crate version, shared by both binaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default TCP port for the daemon's wire protocol.
pub const DEFAULT_PORT: u16 = 1984;

/// Checkpoint record magic, first field of every checkpoint line.
pub const CHECKPOINT_MAGIC: &str = "@@XYMONDCHK-V1";

/// Test columns that are synthesized on demand and never checkpointed.
pub const SYNTHETIC_TESTS: [&str; 2] = ["info", "trends"];

/// The nine broadcast channels workers can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelName {
    Status,
    Stachg,
    Page,
    Data,
    Notes,
    Enadis,
    Client,
    Clichg,
    User,
}

impl ChannelName {
    /// All channels, in the order they are created at startup.
    pub const ALL: [ChannelName; 9] = [
        ChannelName::Status,
        ChannelName::Stachg,
        ChannelName::Page,
        ChannelName::Data,
        ChannelName::Notes,
        ChannelName::Enadis,
        ChannelName::Client,
        ChannelName::Clichg,
        ChannelName::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelName::Status => "status",
            ChannelName::Stachg => "stachg",
            ChannelName::Page => "page",
            ChannelName::Data => "data",
            ChannelName::Notes => "notes",
            ChannelName::Enadis => "enadis",
            ChannelName::Client => "client",
            ChannelName::Clichg => "clichg",
            ChannelName::User => "user",
        }
    }

    pub fn parse(name: &str) -> Option<ChannelName> {
        Self::ALL.iter().copied().find(|c| c.as_str() == name)
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roundtrip() {
        for ch in ChannelName::ALL {
            assert_eq!(ChannelName::parse(ch.as_str()), Some(ch));
        }
        assert_eq!(ChannelName::parse("bogus"), None);
    }
}
