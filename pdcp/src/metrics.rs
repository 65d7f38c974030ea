//! PDCP bearer metrics

use serde::Serialize;
use std::fmt;

/// Reasons a PDU or SDU is silently discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Bearer not configured
    Inactive,
    /// RLC suspended during re-establishment
    RlcSuspended,
    /// RLC transmit queue full
    RlcQueueFull,
    /// Pending-delivery store refused the SDU
    StoreRejected,
    /// PDU shorter than its header (plus MAC-I on SRBs)
    TooShort,
    /// AM DRB PDU duplicate or outside the reordering window
    OutOfWindow,
    /// MAC-I verification failed
    IntegrityFailure,
    /// Control PDU that is not a status report, or malformed
    InvalidControlPdu,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::Inactive => "bearer inactive",
            DropReason::RlcSuspended => "RLC suspended",
            DropReason::RlcQueueFull => "RLC queue full",
            DropReason::StoreRejected => "pending-delivery store rejected SDU",
            DropReason::TooShort => "PDU too short",
            DropReason::OutOfWindow => "duplicate or out-of-window SN",
            DropReason::IntegrityFailure => "integrity check failed",
            DropReason::InvalidControlPdu => "invalid control PDU",
        };
        write!(f, "{}", s)
    }
}

/// Drop counters per reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropCounters {
    pub inactive: u64,
    pub rlc_suspended: u64,
    pub rlc_queue_full: u64,
    pub store_rejected: u64,
    pub too_short: u64,
    pub out_of_window: u64,
    pub integrity_failure: u64,
    pub invalid_control_pdu: u64,
}

impl DropCounters {
    fn slot(&mut self, reason: DropReason) -> &mut u64 {
        match reason {
            DropReason::Inactive => &mut self.inactive,
            DropReason::RlcSuspended => &mut self.rlc_suspended,
            DropReason::RlcQueueFull => &mut self.rlc_queue_full,
            DropReason::StoreRejected => &mut self.store_rejected,
            DropReason::TooShort => &mut self.too_short,
            DropReason::OutOfWindow => &mut self.out_of_window,
            DropReason::IntegrityFailure => &mut self.integrity_failure,
            DropReason::InvalidControlPdu => &mut self.invalid_control_pdu,
        }
    }

    /// Total drops
    pub fn total(&self) -> u64 {
        self.inactive
            + self.rlc_suspended
            + self.rlc_queue_full
            + self.store_rejected
            + self.too_short
            + self.out_of_window
            + self.integrity_failure
            + self.invalid_control_pdu
    }
}

/// Per-bearer counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PdcpBearerMetrics {
    pub num_tx_pdus: u64,
    pub num_tx_pdu_bytes: u64,
    pub num_rx_pdus: u64,
    pub num_rx_pdu_bytes: u64,
    /// Bytes confirmed delivered by RLC or a status report
    pub num_tx_acked_bytes: u64,
    pub num_tx_acked_sdus: u64,
    /// Sum of buffering time of acknowledged SDUs, in ms
    pub tx_notification_latency_ms: u64,
    pub num_tx_buffered_pdus: u64,
    pub num_tx_buffered_pdus_bytes: u64,
    pub num_integrity_failures: u64,
    pub num_status_reports_tx: u64,
    pub num_status_reports_rx: u64,
    pub num_discard_timeouts: u64,
    pub drops: DropCounters,
}

impl PdcpBearerMetrics {
    /// Count a dropped PDU or SDU
    pub fn record_drop(&mut self, reason: DropReason) {
        *self.drops.slot(reason) += 1;
        if reason == DropReason::IntegrityFailure {
            self.num_integrity_failures += 1;
        }
    }

    /// Average time from buffering to acknowledgement per SDU, in ms
    pub fn avg_ack_latency_ms(&self) -> Option<f64> {
        if self.num_tx_acked_sdus == 0 {
            return None;
        }
        Some(self.tx_notification_latency_ms as f64 / self.num_tx_acked_sdus as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_drop() {
        let mut metrics = PdcpBearerMetrics::default();
        metrics.record_drop(DropReason::TooShort);
        metrics.record_drop(DropReason::IntegrityFailure);
        metrics.record_drop(DropReason::IntegrityFailure);

        assert_eq!(metrics.drops.too_short, 1);
        assert_eq!(metrics.drops.integrity_failure, 2);
        assert_eq!(metrics.num_integrity_failures, 2);
        assert_eq!(metrics.drops.total(), 3);
    }

    #[test]
    fn test_metrics_serialize() {
        let mut metrics = PdcpBearerMetrics::default();
        metrics.num_tx_pdus = 4;
        metrics.record_drop(DropReason::OutOfWindow);

        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["num_tx_pdus"], 4);
        assert_eq!(json["drops"]["out_of_window"], 1);
    }

    #[test]
    fn test_drop_reason_display() {
        assert_eq!(DropReason::RlcQueueFull.to_string(), "RLC queue full");
    }
}
