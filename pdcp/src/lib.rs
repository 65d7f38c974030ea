//! Packet Data Convergence Protocol (PDCP) Library
//!
//! Implements the per-radio-bearer PDCP entity according to 3GPP TS 36.323 / 38.323:
//! sequence numbering, ciphering and integrity protection keyed on COUNT,
//! in-order duplicate-free delivery over RLC AM, discard timers and status reports.

pub mod ciphering;
pub mod config;
pub mod counter;
pub mod entity;
pub mod header;
pub mod interfaces;
pub mod metrics;
pub mod pending;
pub mod rx_gaps;
pub mod security;
pub mod task;
pub mod timer;

#[cfg(test)]
mod testing;

pub use config::{DiscardTimer, PdcpConfig, RbType, RlcMode, SnSize};
pub use entity::{PdcpBearerState, PdcpEntity};
pub use interfaces::{PdcpRlcInterface, PdcpUpperInterface};
pub use metrics::{DropReason, PdcpBearerMetrics};
pub use security::{SecurityConfig, SecurityDirection, SecurityFunction};
pub use task::{spawn_bearer, PdcpCommand, PdcpHandle};

use thiserror::Error;

/// PDCP errors surfaced to callers of configuration-time operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PdcpError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Bearer not configured")]
    NotConfigured,

    #[error("Invalid control PDU: {0}")]
    InvalidControlPdu(String),

    #[error("Unsupported SN size for status report: {0} bits")]
    UnsupportedStatusReportSnSize(u8),

    #[error("Status report bitmap too large: {bits} bits")]
    StatusReportTooLarge { bits: usize },

    #[error("Invalid bearer state: {0}")]
    InvalidState(String),

    #[error("Bearer task closed")]
    BearerClosed,
}
