//! PDCP bearer configuration
//!
//! The configuration is fixed once a bearer is activated; header length and
//! reordering window are derived from the SN size.

use crate::PdcpError;
use common::LinkDirection;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PDCP SN field length
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum SnSize {
    /// 5 bits, UM data bearers only
    Len5 = 5,
    /// 7 bits
    Len7 = 7,
    /// 12 bits
    Len12 = 12,
    /// 18 bits
    Len18 = 18,
}

impl SnSize {
    /// Number of SN bits
    pub fn bits(&self) -> u32 {
        *self as u32
    }

    /// Largest SN value
    pub fn max_sn(&self) -> u32 {
        (1 << self.bits()) - 1
    }

    /// Size of the SN space
    pub fn cardinality(&self) -> u32 {
        1 << self.bits()
    }

    /// Reordering window, half of the SN space
    pub fn reordering_window(&self) -> u32 {
        1 << (self.bits() - 1)
    }

    /// Data PDU header length: D/C bit plus SN, rounded up to whole bytes
    pub fn header_len(&self) -> usize {
        (self.bits() as usize + 1 + 7) / 8
    }
}

/// Radio bearer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RbType {
    /// Signalling radio bearer (RRC)
    Srb,
    /// Data radio bearer (user plane)
    Drb,
}

/// RLC mode of the logical channel below the PDCP entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RlcMode {
    /// Unacknowledged Mode
    Um,
    /// Acknowledged Mode
    Am,
}

/// discardTimer value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardTimer {
    /// Expire after the given number of milliseconds
    Ms(u32),
    /// Never expire
    Infinity,
}

impl DiscardTimer {
    /// Timeout to arm, `None` for infinity
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            DiscardTimer::Ms(ms) => Some(Duration::from_millis(u64::from(*ms))),
            DiscardTimer::Infinity => None,
        }
    }
}

/// PDCP layer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcpConfig {
    /// 5-bit BEARER input to the security algorithms
    pub bearer_id: u8,
    /// Bearer class
    pub rb_type: RbType,
    /// RLC mode of the underlying logical channel
    pub rlc_mode: RlcMode,
    /// SN size
    pub sn_size: SnSize,
    /// Discard timer for buffered SDUs
    pub discard_timer: DiscardTimer,
    /// Whether status reports are sent on request and on re-establishment
    pub status_report_required: bool,
    /// Direction this entity transmits in
    pub tx_direction: LinkDirection,
}

impl PdcpConfig {
    /// SRB configuration with the given SN size
    pub fn srb(bearer_id: u8, sn_size: SnSize, tx_direction: LinkDirection) -> Self {
        Self {
            bearer_id,
            rb_type: RbType::Srb,
            rlc_mode: RlcMode::Am,
            sn_size,
            discard_timer: DiscardTimer::Infinity,
            status_report_required: false,
            tx_direction,
        }
    }

    /// DRB configuration
    pub fn drb(
        bearer_id: u8,
        rlc_mode: RlcMode,
        sn_size: SnSize,
        discard_timer: DiscardTimer,
        tx_direction: LinkDirection,
    ) -> Self {
        Self {
            bearer_id,
            rb_type: RbType::Drb,
            rlc_mode,
            sn_size,
            discard_timer,
            status_report_required: false,
            tx_direction,
        }
    }

    /// Enable status reports
    pub fn with_status_report(mut self) -> Self {
        self.status_report_required = true;
        self
    }

    /// Whether this bearer keeps SDUs until delivery is confirmed
    pub fn is_am_drb(&self) -> bool {
        self.rb_type == RbType::Drb && self.rlc_mode == RlcMode::Am
    }

    /// Check combinations of SN size, bearer type and RLC mode
    pub fn validate(&self) -> Result<(), PdcpError> {
        if self.bearer_id > 0x1F {
            return Err(PdcpError::ConfigurationError(format!(
                "Invalid bearer ID: {} (must fit 5 bits)",
                self.bearer_id
            )));
        }

        if self.sn_size == SnSize::Len5
            && !(self.rb_type == RbType::Drb && self.rlc_mode == RlcMode::Um)
        {
            return Err(PdcpError::ConfigurationError(
                "5-bit SN is only valid for DRBs over RLC UM".to_string(),
            ));
        }

        if self.is_am_drb() && !matches!(self.sn_size, SnSize::Len12 | SnSize::Len18) {
            return Err(PdcpError::ConfigurationError(format!(
                "Invalid SN size for AM DRB: {} bits (must be 12 or 18)",
                self.sn_size.bits()
            )));
        }

        if self.status_report_required && !self.is_am_drb() {
            return Err(PdcpError::ConfigurationError(
                "Status reports require a DRB over RLC AM".to_string(),
            ));
        }

        Ok(())
    }
}
