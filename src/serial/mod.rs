//! Core serial link functionality: configuration and transport, the
//! text/hex codec, the bounded activity log, statistics, auto-send, and the
//! session orchestrating them.

pub mod autosend;
pub mod encoding;
pub mod log;
pub mod port;
pub mod session;
pub mod stats;

pub use autosend::AutoSendScheduler;
pub use encoding::DataMode;
pub use log::{ActivityLog, LogCategory, LogEntry};
pub use port::{DeviceEvent, LinkConfig, list_port_names, open_port, watch_ports};
pub use session::{LinkState, RenderHook, SerialLinkSession};
pub use stats::{Statistics, StatsSnapshot, format_elapsed};
