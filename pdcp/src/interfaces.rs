//! Interfaces between PDCP and its neighbouring layers
//!
//! PDCP sits between RLC below and RRC / the GTP-U gateway above. Both sides
//! are consumed through the traits here so the entity can be driven by a real
//! RLC, a loopback link or a test double.

use bytes::Bytes;
use common::Lcid;

/// Services PDCP consumes from RLC
pub trait PdcpRlcInterface: Send + Sync {
    /// Hand a PDU to RLC for transmission. `sn` is the PDCP SN of a data PDU,
    /// kept by RLC to correlate later delivery and failure notifications.
    /// Control PDUs carry no SN.
    fn write_sdu(&self, lcid: Lcid, sn: Option<u32>, pdu: Bytes);

    /// Discard the SDU with PDCP SN `sn` if RLC has not transmitted it yet
    fn discard_sdu(&self, lcid: Lcid, sn: u32);

    /// Whether the logical channel runs RLC UM
    fn rb_is_um(&self, lcid: Lcid) -> bool;

    /// Whether the RLC transmit queue is full
    fn sdu_queue_is_full(&self, lcid: Lcid) -> bool;

    /// Whether the RLC entity is suspended (re-establishment in progress)
    fn is_suspended(&self, lcid: Lcid) -> bool;
}

/// Services PDCP consumes from the layer above (RRC for SRBs, GW for DRBs)
pub trait PdcpUpperInterface: Send + Sync {
    /// Deliver a received SDU
    fn write_pdu(&self, lcid: Lcid, sdu: Bytes);

    /// Integrity verification failed on a signalling bearer
    fn notify_integrity_failure(&self, lcid: Lcid);
}
