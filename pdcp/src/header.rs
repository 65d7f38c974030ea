//! PDCP PDU formats
//!
//! Data PDU: D/C bit (0) in bit 7 of the first byte, SN right-aligned over the
//! header bytes (1 byte for 5/7-bit SN, 2 for 12-bit, 3 for 18-bit).
//!
//! Status report control PDU:
//! ```text
//! | D/C=1 | PDU type (3) | FMS high bits |   byte 0
//! |          FMS remaining bits          |   byte 1 (.. byte 2 for 18-bit SN)
//! |       bitmap, MSB first, SN = FMS+1.. |
//! ```

use crate::config::SnSize;
use crate::counter::sn_add;
use crate::PdcpError;
use bytes::{BufMut, Bytes, BytesMut};
use common::unpack_bits;

const DC_BIT: u8 = 0x80;
const PDU_TYPE_SHIFT: u8 = 4;
const PDU_TYPE_MASK: u8 = 0x07;

/// Control PDU types (TS 36.323 Table 6.3.8.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPduType {
    /// PDCP status report
    StatusReport = 0,
    /// Interspersed ROHC feedback packet
    RohcFeedback = 1,
}

impl ControlPduType {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(ControlPduType::StatusReport),
            1 => Some(ControlPduType::RohcFeedback),
            _ => None,
        }
    }
}

/// Whether the D/C bit marks a control PDU
pub fn is_control_pdu(pdu: &[u8]) -> bool {
    pdu.first().map_or(false, |b| b & DC_BIT != 0)
}

/// PDU type field of a control PDU
pub fn control_pdu_type(pdu: &[u8]) -> Option<ControlPduType> {
    let first = *pdu.first()?;
    ControlPduType::from_bits((first >> PDU_TYPE_SHIFT) & PDU_TYPE_MASK)
}

/// Append a data PDU header carrying `sn`
pub fn write_data_header(buf: &mut BytesMut, sn: u32, sn_size: SnSize) {
    let sn = sn & sn_size.max_sn();
    let len = sn_size.header_len();
    for i in 0..len {
        let shift = 8 * (len - 1 - i);
        buf.put_u8((sn >> shift) as u8);
    }
}

/// Read the SN of a data PDU. The caller checks the PDU holds a full header.
pub fn read_data_header(pdu: &[u8], sn_size: SnSize) -> u32 {
    let sn = pdu[..sn_size.header_len()]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b));
    sn & sn_size.max_sn()
}

/// Decoded PDCP status report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// First missing SN
    pub fms: u32,
    /// Bitmap, bit i set when SN FMS+1+i was received
    pub bitmap: Bytes,
}

impl StatusReport {
    /// Report with no bitmap
    pub fn new(fms: u32) -> Self {
        Self {
            fms,
            bitmap: Bytes::new(),
        }
    }

    /// Report with a bitmap
    pub fn with_bitmap(fms: u32, bitmap: Bytes) -> Self {
        Self { fms, bitmap }
    }

    /// Length of the FMS field for the SN size
    fn fms_len(sn_size: SnSize) -> Result<usize, PdcpError> {
        match sn_size {
            SnSize::Len12 => Ok(2),
            SnSize::Len18 => Ok(3),
            other => Err(PdcpError::UnsupportedStatusReportSnSize(other.bits() as u8)),
        }
    }

    /// Encode into a control PDU
    pub fn encode(&self, sn_size: SnSize) -> Result<Bytes, PdcpError> {
        let fms_len = Self::fms_len(sn_size)?;
        let fms = self.fms & sn_size.max_sn();

        let mut buf = BytesMut::with_capacity(fms_len + self.bitmap.len());
        let first = DC_BIT | ((ControlPduType::StatusReport as u8) << PDU_TYPE_SHIFT);
        for i in 0..fms_len {
            let shift = 8 * (fms_len - 1 - i);
            let byte = (fms >> shift) as u8;
            buf.put_u8(if i == 0 { first | byte } else { byte });
        }
        buf.extend_from_slice(&self.bitmap);

        Ok(buf.freeze())
    }

    /// Decode a status report control PDU
    pub fn decode(pdu: &[u8], sn_size: SnSize) -> Result<Self, PdcpError> {
        let fms_len = Self::fms_len(sn_size)?;

        if !is_control_pdu(pdu) {
            return Err(PdcpError::InvalidControlPdu("D/C bit not set".to_string()));
        }
        if control_pdu_type(pdu) != Some(ControlPduType::StatusReport) {
            return Err(PdcpError::InvalidControlPdu("not a status report".to_string()));
        }
        if pdu.len() < fms_len {
            return Err(PdcpError::InvalidControlPdu(format!(
                "status report too short: {} bytes",
                pdu.len()
            )));
        }

        let bitmap_bits = (pdu.len() - fms_len) * 8;
        if bitmap_bits > sn_size.reordering_window() as usize {
            return Err(PdcpError::InvalidControlPdu(format!(
                "status report bitmap of {} bits exceeds the reordering window",
                bitmap_bits
            )));
        }

        let fms = pdu[..fms_len]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
            & sn_size.max_sn();

        Ok(Self {
            fms,
            bitmap: Bytes::copy_from_slice(&pdu[fms_len..]),
        })
    }

    /// SNs marked received in the bitmap. Only the first reordering window
    /// of bits counts, anything further would wrap back behind FMS.
    pub fn acked_sns(&self, sn_size: SnSize) -> Vec<u32> {
        unpack_bits(&self.bitmap)
            .into_iter()
            .take(sn_size.reordering_window() as usize)
            .enumerate()
            .filter(|(_, received)| *received)
            .map(|(i, _)| sn_add(self.fms, i as u32 + 1, sn_size))
            .collect()
    }
}
