//! # Serial Probe
//!
//! A terminal-style debugging tool for byte-oriented serial links.
//!
//! The crate opens a device connection, continuously drains inbound bytes,
//! lets an operator push outbound bytes, and renders both directions as text
//! or hex while tracking connection lifetime and throughput.
//!
//! ## Features
//!
//! - **Session ownership**: one [`serial::SerialLinkSession`] exclusively
//!   owns its connection and tears it down in a fixed, safe order.
//! - **Async transport**: non-blocking serial I/O on the Tokio runtime via
//!   `tokio-serial`.
//! - **Text/hex codec**: validated hex input and uppercase hex rendering.
//! - **Bounded activity log**: capped with one-step compaction, exportable.
//! - **Auto-send**: periodic re-submission of the current payload with
//!   overlap skipping.
//!
//! ## Architecture
//!
//! - [`serial`]: core session, transport, codec, log, statistics, auto-send
//! - [`settings`]: persisted operator settings
//! - [`export`]: sink boundary for saving rendered logs
//! - [`error`]: crate error types

pub mod error;
pub mod export;
pub mod serial;
pub mod settings;

/// Re-exports for convenience
pub mod prelude {
    pub use crate::error::*;
    pub use crate::export::{ExportSink, FileExportSink};
    pub use crate::serial::encoding::{DataMode, byte_length, decode_inbound, encode_outbound};
    pub use crate::serial::log::{ActivityLog, LogCategory, LogEntry};
    pub use crate::serial::port::{
        COMMON_BAUD_RATES, DataBits, DeviceEvent, FlowControl, LinkConfig, Parity, StopBits,
        list_port_names, watch_ports,
    };
    pub use crate::serial::session::{LinkState, SerialLinkSession};
    pub use crate::serial::stats::{StatsSnapshot, format_elapsed};
    pub use crate::settings::Settings;
}
