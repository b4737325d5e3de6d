//! xymond - monitoring status daemon.
//!
//! Accepts status reports from monitoring agents over a line protocol,
//! keeps authoritative in-memory state per (host, test, origin), applies
//! the color-transition policy (flap suppression, debounce, disables,
//! downtime, acknowledgements, staleness) and broadcasts change events
//! to worker processes over per-channel Unix sockets.

pub mod channels;
pub mod checkpoint;
pub mod daemon;
pub mod dispatcher;
pub mod engine;
pub mod log;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod sweep;

pub use daemon::{ControlMsg, Daemon};
pub use engine::{Engine, StatusArgs};
