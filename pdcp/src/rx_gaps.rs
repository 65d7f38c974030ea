//! Receive gap tracker for AM DRBs
//!
//! Tracks the first missing COUNT (FMC) and the COUNTs received above it, which
//! is what a PDCP status report describes.

use crate::config::SnSize;
use crate::counter::sn_from_count;
use crate::PdcpError;
use bytes::Bytes;
use common::pack_bits;
use tracing::{debug, warn};

/// Receive gap tracker
#[derive(Debug, Clone)]
pub struct ReceiveGapTracker {
    sn_size: SnSize,
    fmc: u32,
    /// Received COUNTs above FMC, descending, so the smallest sits at the tail
    rx_counts: Vec<u32>,
    largest: Option<u32>,
}

impl ReceiveGapTracker {
    /// Tracker expecting COUNT 0 first
    pub fn new(sn_size: SnSize) -> Self {
        Self {
            sn_size,
            fmc: 0,
            rx_counts: Vec::new(),
            largest: None,
        }
    }

    /// First missing COUNT
    pub fn first_missing_count(&self) -> u32 {
        self.fmc
    }

    /// Largest COUNT recorded so far
    pub fn largest_received_count(&self) -> Option<u32> {
        self.largest
    }

    /// Received COUNTs above FMC, descending
    pub fn received_above_fmc(&self) -> &[u32] {
        &self.rx_counts
    }

    fn window(&self) -> usize {
        self.sn_size.reordering_window() as usize
    }

    /// Distance of `count` above FMC, `None` when it lies behind FMC.
    /// COUNT wraps at 2^32.
    fn offset(&self, count: u32) -> Option<u32> {
        let offset = count.wrapping_sub(self.fmc);
        (offset <= i32::MAX as u32).then_some(offset)
    }

    /// Record a received COUNT
    pub fn record_received(&mut self, count: u32) {
        let offset = match self.offset(count) {
            Some(offset) => offset,
            None => {
                debug!("Ignoring COUNT {} below FMC {}", count, self.fmc);
                return;
            }
        };

        let above_largest = self
            .largest
            .map_or(true, |largest| (count.wrapping_sub(largest) as i32) > 0);
        if above_largest {
            self.largest = Some(count);
        }

        if offset == 0 {
            self.fmc = self.fmc.wrapping_add(1);
            self.collapse();
        } else {
            let fmc = self.fmc;
            if let Err(pos) = self
                .rx_counts
                .binary_search_by(|other| offset.cmp(&other.wrapping_sub(fmc)))
            {
                self.rx_counts.insert(pos, count);
            }
        }

        if self.rx_counts.len() > self.window() {
            if let Some(&tail) = self.rx_counts.last() {
                warn!(
                    "Receive gap tracker overflow, giving up on COUNT {}..{}",
                    self.fmc, tail
                );
                self.fmc = tail;
                self.collapse();
            }
        }
    }

    /// Pop the tail while it is contiguous with FMC
    fn collapse(&mut self) {
        while self.rx_counts.last() == Some(&self.fmc) {
            self.rx_counts.pop();
            self.fmc = self.fmc.wrapping_add(1);
        }
    }

    /// FMS and optional bitmap for a status report.
    ///
    /// Bit i of the bitmap stands for COUNT FMC+1+i. No bitmap is returned when
    /// nothing above FMC has been received.
    pub fn build_status_bitmap(&self) -> Result<(u32, Option<Bytes>), PdcpError> {
        let fms = sn_from_count(self.fmc, self.sn_size);

        let span = match self.largest.and_then(|largest| self.offset(largest)) {
            Some(span) if span > 0 => span,
            _ => return Ok((fms, None)),
        };

        let nbits = span as usize;
        if nbits > self.window() {
            return Err(PdcpError::StatusReportTooLarge { bits: nbits });
        }

        let mut bits = vec![false; nbits];
        for &count in &self.rx_counts {
            let offset = count.wrapping_sub(self.fmc).wrapping_sub(1) as usize;
            if let Some(bit) = bits.get_mut(offset) {
                *bit = true;
            }
        }

        Ok((fms, Some(pack_bits(&bits))))
    }

    /// Forget everything and expect `count` next
    pub fn reset_to(&mut self, count: u32) {
        self.fmc = count;
        self.rx_counts.clear();
        self.largest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_then_contiguous() {
        let mut tracker = ReceiveGapTracker::new(SnSize::Len12);
        tracker.record_received(2);
        tracker.record_received(1);
        assert_eq!(tracker.first_missing_count(), 0);
        assert_eq!(tracker.received_above_fmc(), &[2, 1]);

        tracker.record_received(0);
        assert_eq!(tracker.first_missing_count(), 3);
        assert!(tracker.received_above_fmc().is_empty());

        tracker.record_received(3);
        assert_eq!(tracker.first_missing_count(), 4);
        assert!(tracker.received_above_fmc().is_empty());
    }

    #[test]
    fn test_stale_and_duplicate_counts_ignored() {
        let mut tracker = ReceiveGapTracker::new(SnSize::Len12);
        tracker.record_received(0);
        tracker.record_received(0);
        tracker.record_received(5);
        tracker.record_received(5);
        assert_eq!(tracker.first_missing_count(), 1);
        assert_eq!(tracker.received_above_fmc(), &[5]);
        assert_eq!(tracker.largest_received_count(), Some(5));
    }

    #[test]
    fn test_bitmap() {
        let mut tracker = ReceiveGapTracker::new(SnSize::Len12);
        for count in [0, 2, 4, 5] {
            tracker.record_received(count);
        }
        // FMS 1, bitmap covers 2..=5 -> 1011
        let (fms, bitmap) = tracker.build_status_bitmap().unwrap();
        assert_eq!(fms, 1);
        assert_eq!(bitmap.unwrap().as_ref(), &[0b1011_0000]);
    }

    #[test]
    fn test_no_bitmap_when_in_order() {
        let mut tracker = ReceiveGapTracker::new(SnSize::Len12);
        let (fms, bitmap) = tracker.build_status_bitmap().unwrap();
        assert_eq!(fms, 0);
        assert!(bitmap.is_none());

        for count in 0..4 {
            tracker.record_received(count);
        }
        let (fms, bitmap) = tracker.build_status_bitmap().unwrap();
        assert_eq!(fms, 4);
        assert!(bitmap.is_none());
    }

    #[test]
    fn test_fms_is_sn_of_fmc() {
        let mut tracker = ReceiveGapTracker::new(SnSize::Len12);
        tracker.reset_to(4096 + 10);
        tracker.record_received(4096 + 12);
        let (fms, bitmap) = tracker.build_status_bitmap().unwrap();
        assert_eq!(fms, 10);
        assert_eq!(bitmap.unwrap().as_ref(), &[0b0100_0000]);
    }

    #[test]
    fn test_count_wraps_at_u32_max() {
        let mut tracker = ReceiveGapTracker::new(SnSize::Len12);
        tracker.reset_to(u32::MAX - 1);
        tracker.record_received(u32::MAX - 1);
        tracker.record_received(1);
        assert_eq!(tracker.first_missing_count(), u32::MAX);
        assert_eq!(tracker.received_above_fmc(), &[1]);

        tracker.record_received(u32::MAX);
        assert_eq!(tracker.first_missing_count(), 0);
        assert_eq!(tracker.largest_received_count(), Some(1));
        let (fms, bitmap) = tracker.build_status_bitmap().unwrap();
        assert_eq!(fms, 0);
        assert_eq!(bitmap.unwrap().as_ref(), &[0b1000_0000]);

        // Far behind FMC once wrapped
        tracker.record_received(u32::MAX - 5);
        assert_eq!(tracker.received_above_fmc(), &[1]);
        assert_eq!(tracker.largest_received_count(), Some(1));
    }

    #[test]
    fn test_compaction_on_overflow() {
        let mut tracker = ReceiveGapTracker::new(SnSize::Len5);
        let window = SnSize::Len5.reordering_window();
        // COUNT 0 lost, 2..=window+2 received with a hole at 1
        for count in 2..=window + 2 {
            tracker.record_received(count);
        }
        assert_eq!(tracker.first_missing_count(), window + 3);
        assert!(tracker.received_above_fmc().is_empty());
    }
}
