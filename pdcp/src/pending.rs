//! Pending-delivery store for AM DRBs
//!
//! Holds transmitted SDUs until RLC confirms delivery, a status report
//! acknowledges them, or their discard timer expires. Slots are indexed by SN,
//! so capacity equals the SN space. Live SNs are kept within half the SN space
//! ahead of the first missing SN (FMS) so the receiver can always tell HFNs apart.

use crate::config::SnSize;
use crate::counter::{sn_add, sn_distance};
use crate::timer::{DiscardTimer, DiscardTimerService};
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Reasons an SDU cannot be buffered
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRejection {
    #[error("SN={0} already buffered")]
    AlreadyPresent(u32),

    #[error("Store full")]
    Full,

    #[error("SN={sn} outside allocation window (FMS={fms})")]
    OutOfAllocationWindow { sn: u32, fms: u32 },
}

/// SDU waiting for delivery confirmation
#[derive(Debug)]
pub struct PendingUnit {
    sn: u32,
    sdu: Bytes,
    created_at: Instant,
    token: u64,
    // Cancelled on drop
    _discard_timer: Option<DiscardTimer>,
}

impl PendingUnit {
    /// SN of the SDU
    pub fn sn(&self) -> u32 {
        self.sn
    }

    /// The buffered SDU
    pub fn sdu(&self) -> &Bytes {
        &self.sdu
    }

    /// When the SDU was buffered
    pub fn created_at(&self) -> Instant {
        self.created_at
    }
}

/// Pending-delivery store
#[derive(Debug)]
pub struct PendingDeliveryStore {
    sn_size: SnSize,
    slots: Vec<Option<Box<PendingUnit>>>,
    count: usize,
    bytes: usize,
    fms: u32,
    timers: DiscardTimerService,
}

impl PendingDeliveryStore {
    /// Create an empty store sized to the SN space
    pub fn new(sn_size: SnSize, timers: DiscardTimerService) -> Self {
        let capacity = sn_size.cardinality() as usize;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);

        Self {
            sn_size,
            slots,
            count: 0,
            bytes: 0,
            fms: 0,
            timers,
        }
    }

    fn half_space(&self) -> u32 {
        self.sn_size.reordering_window()
    }

    fn slot(&self, sn: u32) -> usize {
        (sn & self.sn_size.max_sn()) as usize
    }

    /// Maximum number of SDUs
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of buffered SDUs
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Total buffered SDU bytes
    pub fn buffered_bytes(&self) -> usize {
        self.bytes
    }

    /// Oldest buffered SN, or the next position when empty
    pub fn first_missing_sn(&self) -> u32 {
        self.fms
    }

    /// Whether `sn` is buffered
    pub fn contains(&self, sn: u32) -> bool {
        self.slots[self.slot(sn)].is_some()
    }

    /// Buffered unit for `sn`
    pub fn get(&self, sn: u32) -> Option<&PendingUnit> {
        self.slots[self.slot(sn)].as_deref()
    }

    /// Buffer a copy of `sdu` under `sn`, arming its discard timer if `discard_timeout` is finite
    pub fn insert(
        &mut self,
        sn: u32,
        sdu: Bytes,
        discard_timeout: Option<Duration>,
    ) -> Result<(), StoreRejection> {
        let sn = sn & self.sn_size.max_sn();

        if self.contains(sn) {
            return Err(StoreRejection::AlreadyPresent(sn));
        }
        if self.count >= self.capacity() {
            return Err(StoreRejection::Full);
        }
        if !self.is_empty() && sn_distance(self.fms, sn, self.sn_size) >= self.half_space() {
            info!("Cannot buffer SDU SN={} (FMS={})", sn, self.fms);
            return Err(StoreRejection::OutOfAllocationWindow { sn, fms: self.fms });
        }

        let token = self.timers.next_token();

        let discard_timer = discard_timeout.and_then(|timeout| self.timers.arm(sn, token, timeout));

        self.bytes += sdu.len();
        let slot = self.slot(sn);
        self.slots[slot] = Some(Box::new(PendingUnit {
            sn,
            sdu,
            created_at: Instant::now(),
            token,
            _discard_timer: discard_timer,
        }));
        self.count += 1;
        if self.count == 1 {
            self.fms = sn;
        }

        trace!("Buffered SDU SN={} ({} buffered, FMS={})", sn, self.count, self.fms);
        Ok(())
    }

    /// Remove `sn`, returning whether it was buffered
    pub fn remove(&mut self, sn: u32) -> bool {
        self.take(sn).is_some()
    }

    /// Remove `sn` and hand back the unit. Its discard timer is cancelled.
    pub fn take(&mut self, sn: u32) -> Option<PendingUnit> {
        let sn = sn & self.sn_size.max_sn();
        let slot = self.slot(sn);
        let unit = self.slots[slot].take()?;

        self.count -= 1;
        self.bytes -= unit.sdu.len();
        if sn == self.fms {
            self.update_fms();
        }

        Some(*unit)
    }

    fn update_fms(&mut self) {
        if self.is_empty() {
            self.fms = sn_add(self.fms, 1, self.sn_size);
            return;
        }

        for offset in 1..self.half_space() {
            let sn = sn_add(self.fms, offset, self.sn_size);
            if self.contains(sn) {
                self.fms = sn;
                return;
            }
        }

        // Unreachable while the allocation window holds
        debug!("No buffered SDU within half the SN space of FMS={}", self.fms);
    }

    /// Whether a discard timer expiry still refers to the buffered instance of `sn`
    pub fn is_current_timer(&self, sn: u32, token: u64) -> bool {
        self.get(sn).map_or(false, |unit| unit.token == token)
    }

    /// Remove every SDU whose SN precedes `sn` in SN space. Returns the removed units.
    pub fn take_before(&mut self, sn: u32) -> Vec<PendingUnit> {
        let sn = sn & self.sn_size.max_sn();
        let mut removed = Vec::new();
        if self.is_empty() {
            return removed;
        }

        let half = self.half_space();
        let start = self.fms;
        for offset in 0..half {
            let candidate = sn_add(start, offset, self.sn_size);
            let distance = sn_distance(candidate, sn, self.sn_size);
            if distance == 0 || distance > half {
                break;
            }
            if let Some(unit) = self.take(candidate) {
                removed.push(unit);
            }
            if self.is_empty() {
                break;
            }
        }

        removed
    }

    /// Snapshot of every buffered `(sn, sdu)`, ordered from FMS
    pub fn get_all(&self) -> Vec<(u32, Bytes)> {
        let mut all = Vec::with_capacity(self.count);
        if self.is_empty() {
            return all;
        }
        for offset in 0..self.sn_size.cardinality() {
            let sn = sn_add(self.fms, offset, self.sn_size);
            if let Some(unit) = self.get(sn) {
                all.push((sn, unit.sdu.clone()));
                if all.len() == self.count {
                    break;
                }
            }
        }
        all
    }

    /// Drop every SDU and cancel all timers
    pub fn clear(&mut self) {
        if self.count > 0 {
            debug!("Clearing {} buffered SDUs", self.count);
        }
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.count = 0;
        self.bytes = 0;
        self.fms = 0;
    }
}
