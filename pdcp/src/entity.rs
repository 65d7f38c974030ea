//! PDCP entity
//!
//! One entity per logical channel. Owns the bearer state, the pending-delivery
//! store and the receive gap tracker (AM DRBs only) and runs the TX and RX
//! pipelines of TS 36.323 section 5.1 plus the status report procedure.
//!
//! Steady-state operations never fail towards the caller: anything that cannot
//! be processed is discarded, logged and counted in [`PdcpBearerMetrics`].

use crate::ciphering::{self, MAC_I_LEN};
use crate::config::{PdcpConfig, RbType, RlcMode, SnSize};
use crate::counter::{count, wrapped_increment};
use crate::header::{
    control_pdu_type, is_control_pdu, read_data_header, write_data_header, ControlPduType,
    StatusReport,
};
use crate::interfaces::{PdcpRlcInterface, PdcpUpperInterface};
use crate::metrics::{DropReason, PdcpBearerMetrics};
use crate::pending::{PendingDeliveryStore, PendingUnit};
use crate::rx_gaps::ReceiveGapTracker;
use crate::security::{SecurityConfig, SecurityContext, SecurityDirection, SecurityFunction};
use crate::timer::{DiscardTimerExpired, DiscardTimerReceiver, DiscardTimerService};
use crate::PdcpError;
use bytes::{Bytes, BytesMut};
use common::{bytes_to_hex, Lcid};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// TX and RX state variables of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdcpBearerState {
    /// Next PDCP SN to assign
    pub tx_sn: u32,
    /// TX hyper frame number
    pub tx_hfn: u32,
    /// Next expected PDCP SN
    pub rx_sn: u32,
    /// RX hyper frame number
    pub rx_hfn: u32,
    /// SN of the last PDU delivered to upper layers (AM DRBs)
    pub last_submitted_rx_sn: u32,
}

impl PdcpBearerState {
    fn initial(sn_size: SnSize) -> Self {
        Self {
            tx_sn: 0,
            tx_hfn: 0,
            rx_sn: 0,
            rx_hfn: 0,
            last_submitted_rx_sn: sn_size.max_sn(),
        }
    }
}

#[derive(Debug)]
struct AmContext {
    pending: PendingDeliveryStore,
    rx_gaps: ReceiveGapTracker,
}

/// Bearer flavour, fixed at configuration
#[derive(Debug)]
enum BearerMode {
    Signalling,
    DataUm,
    DataAm(Box<AmContext>),
}

#[derive(Debug)]
struct Bearer {
    cfg: PdcpConfig,
    st: PdcpBearerState,
    mode: BearerMode,
}

/// Log and count a discarded unit
fn discard(lcid: Lcid, metrics: &mut PdcpBearerMetrics, reason: DropReason, sn: Option<u32>) {
    match (reason, sn) {
        (DropReason::IntegrityFailure, Some(sn)) => error!("{}: discarding SN={}: {}", lcid, sn, reason),
        (DropReason::Inactive, _) | (DropReason::RlcQueueFull, _) => debug!("{}: discarding: {}", lcid, reason),
        (_, Some(sn)) => warn!("{}: discarding SN={}: {}", lcid, sn, reason),
        (_, None) => warn!("{}: discarding: {}", lcid, reason),
    }
    metrics.record_drop(reason);
}

/// Count an acknowledged SDU towards acked bytes and latency
fn record_ack(metrics: &mut PdcpBearerMetrics, unit: &PendingUnit) {
    metrics.num_tx_acked_bytes += unit.sdu().len() as u64;
    metrics.num_tx_acked_sdus += 1;
    metrics.tx_notification_latency_ms += unit.created_at().elapsed().as_millis() as u64;
}

/// PDCP entity for one logical channel
pub struct PdcpEntity {
    lcid: Lcid,
    rlc: Arc<dyn PdcpRlcInterface>,
    upper: Arc<dyn PdcpUpperInterface>,
    timers: DiscardTimerService,
    bearer: Option<Bearer>,
    security: SecurityContext,
    sec_cfg: SecurityConfig,
    metrics: PdcpBearerMetrics,
}

impl PdcpEntity {
    /// Create an inactive entity. Discard timer expirations are posted to the
    /// returned receiver and must be fed back through [`Self::handle_discard_timer`].
    pub fn new(
        lcid: Lcid,
        rlc: Arc<dyn PdcpRlcInterface>,
        upper: Arc<dyn PdcpUpperInterface>,
    ) -> (Self, DiscardTimerReceiver) {
        let (timers, timer_rx) = DiscardTimerService::new(lcid);
        let entity = Self {
            lcid,
            rlc,
            upper,
            timers,
            bearer: None,
            security: SecurityContext::new(),
            sec_cfg: SecurityConfig::default(),
            metrics: PdcpBearerMetrics::default(),
        };
        (entity, timer_rx)
    }

    /// Logical channel served by this entity
    pub fn lcid(&self) -> Lcid {
        self.lcid
    }

    /// Whether the bearer is configured
    pub fn is_active(&self) -> bool {
        self.bearer.is_some()
    }

    /// Active configuration
    pub fn config(&self) -> Option<&PdcpConfig> {
        self.bearer.as_ref().map(|b| &b.cfg)
    }

    /// Activate the bearer. On error the entity keeps its previous state.
    pub fn configure(&mut self, cfg: PdcpConfig) -> Result<(), PdcpError> {
        cfg.validate()?;

        let rlc_is_um = self.rlc.rb_is_um(self.lcid);
        if rlc_is_um != (cfg.rlc_mode == RlcMode::Um) {
            return Err(PdcpError::ConfigurationError(format!(
                "{}: PDCP configured for RLC {:?} but RLC runs {}",
                self.lcid,
                cfg.rlc_mode,
                if rlc_is_um { "UM" } else { "AM" }
            )));
        }

        let mode = match (cfg.rb_type, cfg.rlc_mode) {
            (RbType::Srb, _) => BearerMode::Signalling,
            (RbType::Drb, RlcMode::Um) => BearerMode::DataUm,
            (RbType::Drb, RlcMode::Am) => BearerMode::DataAm(Box::new(AmContext {
                pending: PendingDeliveryStore::new(cfg.sn_size, self.timers.clone()),
                rx_gaps: ReceiveGapTracker::new(cfg.sn_size),
            })),
        };

        if self.bearer.is_some() {
            info!("{}: reconfiguring PDCP bearer", self.lcid);
        }

        info!(
            "{}: PDCP bearer configured: {:?} over RLC {:?}, SN size {} bits, discard timer {:?}, status report {}",
            self.lcid,
            cfg.rb_type,
            cfg.rlc_mode,
            cfg.sn_size.bits(),
            cfg.discard_timer,
            cfg.status_report_required
        );

        self.bearer = Some(Bearer {
            st: PdcpBearerState::initial(cfg.sn_size),
            cfg,
            mode,
        });
        Ok(())
    }

    /// Deactivate the bearer, cancelling all discard timers
    pub fn reset(&mut self) {
        if self.bearer.take().is_some() {
            info!("{}: PDCP bearer reset", self.lcid);
        }
        self.security.clear();
    }

    /// Re-establish the bearer (TS 36.323 section 5.2)
    pub fn reestablish(&mut self) {
        let bearer = match self.bearer.as_mut() {
            Some(bearer) => bearer,
            None => {
                warn!("{}: re-establishment requested on inactive bearer", self.lcid);
                return;
            }
        };
        info!("{}: re-establishing PDCP bearer", self.lcid);

        if !matches!(bearer.mode, BearerMode::DataAm(_)) {
            bearer.st.tx_sn = 0;
            bearer.st.tx_hfn = 0;
            bearer.st.rx_sn = 0;
            bearer.st.rx_hfn = 0;
            return;
        }

        if bearer.cfg.status_report_required {
            if let Err(e) = self.send_status_report() {
                warn!("{}: no status report on re-establishment: {}", self.lcid, e);
            }
        }

        let undelivered = match self.bearer.as_mut().map(|b| &mut b.mode) {
            Some(BearerMode::DataAm(am)) => {
                let all = am.pending.get_all();
                am.pending.clear();
                all
            }
            _ => Vec::new(),
        };

        debug!("{}: resubmitting {} undelivered SDUs", self.lcid, undelivered.len());
        for (sn, sdu) in undelivered {
            self.transmit(sdu, Some(sn));
        }
    }

    /// Install keys and algorithms
    pub fn config_security(&mut self, sec_cfg: SecurityConfig) {
        info!(
            "{}: security configured: {:?} / {:?}",
            self.lcid, sec_cfg.cipher_algo, sec_cfg.integ_algo
        );
        self.sec_cfg = sec_cfg;
    }

    /// Enable integrity protection in `direction`
    pub fn enable_integrity(&mut self, direction: SecurityDirection) {
        self.security
            .set_direction_active(SecurityFunction::Integrity, direction, true);
        info!("{}: integrity enabled for {:?}", self.lcid, direction);
    }

    /// Enable ciphering in `direction`
    pub fn enable_encryption(&mut self, direction: SecurityDirection) {
        self.security
            .set_direction_active(SecurityFunction::Confidentiality, direction, true);
        info!("{}: encryption enabled for {:?}", self.lcid, direction);
    }

    /// Activate `function` in `direction` once the counter reaches `at_count`
    pub fn enable_security_timed(
        &mut self,
        function: SecurityFunction,
        direction: SecurityDirection,
        at_count: u32,
    ) {
        self.security.schedule_activation(function, direction, at_count);
    }

    /// Whether `function` is active for `direction`
    pub fn is_security_active(&self, function: SecurityFunction, direction: SecurityDirection) -> bool {
        self.security.is_active(function, direction)
    }

    /// Current state variables, for handover context transfer
    pub fn bearer_state(&self) -> Option<PdcpBearerState> {
        self.bearer.as_ref().map(|b| b.st)
    }

    /// Overwrite the state variables. Re-anchors the receive gap tracker.
    pub fn set_bearer_state(&mut self, state: PdcpBearerState) -> Result<(), PdcpError> {
        let bearer = self.bearer.as_mut().ok_or(PdcpError::NotConfigured)?;
        let sn_size = bearer.cfg.sn_size;
        let max_sn = sn_size.max_sn();

        if state.tx_sn > max_sn || state.rx_sn > max_sn || state.last_submitted_rx_sn > max_sn {
            return Err(PdcpError::InvalidState(format!(
                "SN out of range for {}-bit SN: {:?}",
                sn_size.bits(),
                state
            )));
        }

        bearer.st = state;
        if let BearerMode::DataAm(am) = &mut bearer.mode {
            am.rx_gaps.reset_to(count(state.rx_hfn, state.rx_sn, sn_size));
        }
        info!("{}: bearer state set: {:?}", self.lcid, state);
        Ok(())
    }

    /// Snapshot of undelivered SDUs, ordered from the first missing SN
    pub fn buffered_sdus(&self) -> Vec<(u32, Bytes)> {
        match self.bearer.as_ref().map(|b| &b.mode) {
            Some(BearerMode::DataAm(am)) => am.pending.get_all(),
            _ => Vec::new(),
        }
    }

    /// Current metrics
    pub fn metrics(&self) -> PdcpBearerMetrics {
        let mut metrics = self.metrics.clone();
        if let Some(BearerMode::DataAm(am)) = self.bearer.as_ref().map(|b| &b.mode) {
            metrics.num_tx_buffered_pdus = am.pending.len() as u64;
            metrics.num_tx_buffered_pdus_bytes = am.pending.buffered_bytes() as u64;
        }
        metrics
    }

    /// Zero the counters
    pub fn reset_metrics(&mut self) {
        self.metrics = PdcpBearerMetrics::default();
    }

    /// TX pipeline. `explicit_sn` keeps the SN of an SDU forwarded at handover
    /// or resubmitted at re-establishment, and does not advance the TX state.
    pub fn write_sdu(&mut self, sdu: Bytes, explicit_sn: Option<u32>) {
        let lcid = self.lcid;
        if self.bearer.is_none() {
            return discard(lcid, &mut self.metrics, DropReason::Inactive, explicit_sn);
        }
        if self.rlc.is_suspended(lcid) {
            return discard(lcid, &mut self.metrics, DropReason::RlcSuspended, explicit_sn);
        }
        if self.rlc.sdu_queue_is_full(lcid) {
            return discard(lcid, &mut self.metrics, DropReason::RlcQueueFull, explicit_sn);
        }

        self.transmit(sdu, explicit_sn);
    }

    /// Store, protect and hand one SDU to RLC. Re-establishment resubmits
    /// through here while RLC is still suspended.
    fn transmit(&mut self, sdu: Bytes, explicit_sn: Option<u32>) {
        let lcid = self.lcid;
        let bearer = match self.bearer.as_mut() {
            Some(bearer) => bearer,
            None => return discard(lcid, &mut self.metrics, DropReason::Inactive, explicit_sn),
        };

        let sn_size = bearer.cfg.sn_size;
        let sn = explicit_sn.map_or(bearer.st.tx_sn, |sn| sn & sn_size.max_sn());
        let tx_count = count(bearer.st.tx_hfn, sn, sn_size);

        if let BearerMode::DataAm(am) = &mut bearer.mode {
            if let Err(e) = am.pending.insert(sn, sdu.clone(), bearer.cfg.discard_timer.timeout()) {
                debug!("{}: {}", lcid, e);
                return discard(lcid, &mut self.metrics, DropReason::StoreRejected, Some(sn));
            }
        }

        self.security.apply_scheduled(SecurityDirection::TX, tx_count);

        let header_len = sn_size.header_len();
        let mut pdu = BytesMut::with_capacity(header_len + sdu.len() + MAC_I_LEN);
        write_data_header(&mut pdu, sn, sn_size);
        pdu.extend_from_slice(&sdu);

        let bearer_id = bearer.cfg.bearer_id;
        let direction = bearer.cfg.tx_direction;

        if let BearerMode::Signalling = bearer.mode {
            let mac_i = if self.security.is_active(SecurityFunction::Integrity, SecurityDirection::TX) {
                ciphering::compute_mac(
                    self.sec_cfg.integ_algo,
                    &self.sec_cfg.k_int,
                    tx_count,
                    bearer_id,
                    direction,
                    &pdu,
                )
            } else {
                [0; MAC_I_LEN]
            };
            pdu.extend_from_slice(&mac_i);
        }

        if self.security.is_active(SecurityFunction::Confidentiality, SecurityDirection::TX) {
            ciphering::encrypt(
                self.sec_cfg.cipher_algo,
                &self.sec_cfg.k_enc,
                tx_count,
                bearer_id,
                direction,
                &mut pdu[header_len..],
            );
        }

        if explicit_sn.is_none() {
            let (next_sn, wrapped) = wrapped_increment(bearer.st.tx_sn, sn_size);
            bearer.st.tx_sn = next_sn;
            if wrapped {
                bearer.st.tx_hfn = bearer.st.tx_hfn.wrapping_add(1);
            }
        }

        trace!("{}: TX PDU SN={} COUNT={} ({} bytes)", lcid, sn, tx_count, pdu.len());
        self.metrics.num_tx_pdus += 1;
        self.metrics.num_tx_pdu_bytes += pdu.len() as u64;

        self.rlc.write_sdu(lcid, Some(sn), pdu.freeze());
    }

    /// RX pipeline for a PDU received from RLC
    pub fn write_pdu(&mut self, pdu: BytesMut) {
        let lcid = self.lcid;
        let (rb_type, rlc_mode, sn_size) = match &self.bearer {
            Some(bearer) => (bearer.cfg.rb_type, bearer.cfg.rlc_mode, bearer.cfg.sn_size),
            None => return discard(lcid, &mut self.metrics, DropReason::Inactive, None),
        };

        if rb_type == RbType::Drb && is_control_pdu(&pdu) {
            self.handle_control_pdu(pdu.freeze());
            return;
        }

        let min_len = match rb_type {
            RbType::Srb => sn_size.header_len() + MAC_I_LEN,
            RbType::Drb => sn_size.header_len(),
        };
        if pdu.len() < min_len {
            return discard(lcid, &mut self.metrics, DropReason::TooShort, None);
        }

        self.metrics.num_rx_pdus += 1;
        self.metrics.num_rx_pdu_bytes += pdu.len() as u64;

        let sn = read_data_header(&pdu, sn_size);
        let sdu = match (rb_type, rlc_mode) {
            (RbType::Srb, _) => self.rx_srb_pdu(sn, pdu),
            (RbType::Drb, RlcMode::Um) => self.rx_um_drb_pdu(sn, pdu),
            (RbType::Drb, RlcMode::Am) => self.rx_am_drb_pdu(sn, pdu),
        };

        if let Some(sdu) = sdu {
            self.upper.write_pdu(lcid, sdu);
        }
    }

    /// COUNT of a received SRB or UM DRB PDU: a SN below the next expected SN
    /// belongs to the next HFN
    fn rx_count_in_order(st: &PdcpBearerState, sn: u32, sn_size: SnSize) -> u32 {
        if sn < st.rx_sn {
            count(st.rx_hfn.wrapping_add(1), sn, sn_size)
        } else {
            count(st.rx_hfn, sn, sn_size)
        }
    }

    /// Advance RX_HFN / next expected SN past an accepted SRB or UM DRB PDU
    fn advance_rx_in_order(st: &mut PdcpBearerState, sn: u32, sn_size: SnSize) {
        if sn < st.rx_sn {
            st.rx_hfn = st.rx_hfn.wrapping_add(1);
        }
        let (next_sn, wrapped) = wrapped_increment(sn, sn_size);
        st.rx_sn = next_sn;
        if wrapped {
            st.rx_hfn = st.rx_hfn.wrapping_add(1);
        }
    }

    fn decipher(
        security: &SecurityContext,
        sec_cfg: &SecurityConfig,
        cfg: &PdcpConfig,
        rx_count: u32,
        data: &mut [u8],
    ) {
        if security.is_active_at(SecurityFunction::Confidentiality, SecurityDirection::RX, rx_count) {
            ciphering::decrypt(
                sec_cfg.cipher_algo,
                &sec_cfg.k_enc,
                rx_count,
                cfg.bearer_id,
                cfg.tx_direction.opposite(),
                data,
            );
        }
    }

    fn rx_srb_pdu(&mut self, sn: u32, mut pdu: BytesMut) -> Option<Bytes> {
        let lcid = self.lcid;
        let bearer = self.bearer.as_mut()?;
        let sn_size = bearer.cfg.sn_size;
        let header_len = sn_size.header_len();

        // Activations due at this COUNT take effect only once the MAC-I checks out
        let rx_count = Self::rx_count_in_order(&bearer.st, sn, sn_size);
        Self::decipher(&self.security, &self.sec_cfg, &bearer.cfg, rx_count, &mut pdu[header_len..]);

        let mac_i = pdu.split_off(pdu.len() - MAC_I_LEN);
        if self
            .security
            .is_active_at(SecurityFunction::Integrity, SecurityDirection::RX, rx_count)
            && !ciphering::verify_mac(
                self.sec_cfg.integ_algo,
                &self.sec_cfg.k_int,
                rx_count,
                bearer.cfg.bearer_id,
                bearer.cfg.tx_direction.opposite(),
                &pdu,
                &mac_i,
            )
        {
            discard(lcid, &mut self.metrics, DropReason::IntegrityFailure, Some(sn));
            self.upper.notify_integrity_failure(lcid);
            return None;
        }

        self.security.apply_scheduled(SecurityDirection::RX, rx_count);
        Self::advance_rx_in_order(&mut bearer.st, sn, sn_size);
        trace!("{}: RX SRB PDU SN={} COUNT={}", lcid, sn, rx_count);

        Some(pdu.split_off(header_len).freeze())
    }

    fn rx_um_drb_pdu(&mut self, sn: u32, mut pdu: BytesMut) -> Option<Bytes> {
        let bearer = self.bearer.as_mut()?;
        let sn_size = bearer.cfg.sn_size;
        let header_len = sn_size.header_len();

        let rx_count = Self::rx_count_in_order(&bearer.st, sn, sn_size);
        self.security.apply_scheduled(SecurityDirection::RX, rx_count);

        Self::advance_rx_in_order(&mut bearer.st, sn, sn_size);
        Self::decipher(&self.security, &self.sec_cfg, &bearer.cfg, rx_count, &mut pdu[header_len..]);
        trace!("{}: RX UM PDU SN={} COUNT={}", self.lcid, sn, rx_count);

        Some(pdu.split_off(header_len).freeze())
    }

    /// AM DRB reception (TS 36.323 section 5.1.2.1.2)
    fn rx_am_drb_pdu(&mut self, sn: u32, mut pdu: BytesMut) -> Option<Bytes> {
        let lcid = self.lcid;
        let bearer = self.bearer.as_mut()?;
        let sn_size = bearer.cfg.sn_size;
        let header_len = sn_size.header_len();
        let window = sn_size.reordering_window() as i32;
        let st = &mut bearer.st;

        let sn_i = sn as i32;
        let last_submit_diff_sn = st.last_submitted_rx_sn as i32 - sn_i;
        let sn_diff_last_submit = sn_i - st.last_submitted_rx_sn as i32;
        let rx_sn_diff_sn = st.rx_sn as i32 - sn_i;
        let sn_diff_rx_sn = sn_i - st.rx_sn as i32;

        if (0 <= sn_diff_last_submit && sn_diff_last_submit > window)
            || (0 <= last_submit_diff_sn && last_submit_diff_sn < window)
        {
            debug!(
                "{}: SN={} outside reordering window (last submitted SN={})",
                lcid, sn, st.last_submitted_rx_sn
            );
            discard(lcid, &mut self.metrics, DropReason::OutOfWindow, Some(sn));
            return None;
        }

        // A far-ahead PDU at RX_HFN 0 has no previous HFN to belong to
        let mut track_gap = true;
        let rx_count = if rx_sn_diff_sn > window {
            // Far behind: the peer already wrapped
            st.rx_hfn = st.rx_hfn.wrapping_add(1);
            let rx_count = count(st.rx_hfn, sn, sn_size);
            let (next_sn, wrapped) = wrapped_increment(sn, sn_size);
            st.rx_sn = next_sn;
            if wrapped {
                st.rx_hfn = st.rx_hfn.wrapping_add(1);
            }
            rx_count
        } else if sn_diff_rx_sn >= window {
            // Far ahead: left over from the previous HFN
            track_gap = st.rx_hfn != 0;
            count(st.rx_hfn.wrapping_sub(1), sn, sn_size)
        } else if sn >= st.rx_sn {
            let rx_count = count(st.rx_hfn, sn, sn_size);
            let (next_sn, wrapped) = wrapped_increment(sn, sn_size);
            st.rx_sn = next_sn;
            if wrapped {
                st.rx_hfn = st.rx_hfn.wrapping_add(1);
            }
            rx_count
        } else {
            count(st.rx_hfn, sn, sn_size)
        };

        st.last_submitted_rx_sn = sn;
        if let BearerMode::DataAm(am) = &mut bearer.mode {
            if track_gap {
                am.rx_gaps.record_received(rx_count);
            }
        }

        self.security.apply_scheduled(SecurityDirection::RX, rx_count);
        Self::decipher(&self.security, &self.sec_cfg, &bearer.cfg, rx_count, &mut pdu[header_len..]);
        trace!("{}: RX AM PDU SN={} COUNT={}", lcid, sn, rx_count);

        Some(pdu.split_off(header_len).freeze())
    }

    fn handle_control_pdu(&mut self, pdu: Bytes) {
        let lcid = self.lcid;
        let sn_size = match self.bearer.as_ref() {
            Some(Bearer {
                cfg,
                mode: BearerMode::DataAm(_),
                ..
            }) => cfg.sn_size,
            _ => {
                debug!("{}: control PDU on a bearer without status reports", lcid);
                return discard(lcid, &mut self.metrics, DropReason::InvalidControlPdu, None);
            }
        };

        match control_pdu_type(&pdu) {
            Some(ControlPduType::StatusReport) => {}
            Some(ControlPduType::RohcFeedback) => {
                debug!("{}: ROHC feedback not supported", lcid);
                return discard(lcid, &mut self.metrics, DropReason::InvalidControlPdu, None);
            }
            None => return discard(lcid, &mut self.metrics, DropReason::InvalidControlPdu, None),
        }

        match StatusReport::decode(&pdu, sn_size) {
            Ok(report) => self.handle_status_report(&report),
            Err(e) => {
                warn!("{}: {} [{}]", lcid, e, bytes_to_hex(&pdu));
                discard(lcid, &mut self.metrics, DropReason::InvalidControlPdu, None);
            }
        }
    }

    /// Remove everything the peer reports as received from the pending-delivery store
    pub fn handle_status_report(&mut self, report: &StatusReport) {
        let lcid = self.lcid;
        let bearer = match self.bearer.as_mut() {
            Some(bearer) => bearer,
            None => return,
        };
        let sn_size = bearer.cfg.sn_size;
        let am = match &mut bearer.mode {
            BearerMode::DataAm(am) => am,
            _ => return,
        };

        self.metrics.num_status_reports_rx += 1;
        let fms = report.fms & sn_size.max_sn();

        let below_fms = am.pending.take_before(fms);
        for unit in &below_fms {
            record_ack(&mut self.metrics, unit);
        }

        let mut acked_in_bitmap = 0usize;
        for sn in report.acked_sns(sn_size) {
            if let Some(unit) = am.pending.take(sn) {
                record_ack(&mut self.metrics, &unit);
                acked_in_bitmap += 1;
            }
        }

        debug!(
            "{}: status report FMS={}: {} SDUs below FMS, {} in bitmap acknowledged, {} still buffered",
            lcid,
            fms,
            below_fms.len(),
            acked_in_bitmap,
            am.pending.len()
        );
    }

    /// Build a status report from the receive gap tracker and send it
    pub fn send_status_report(&mut self) -> Result<(), PdcpError> {
        let lcid = self.lcid;
        let bearer = self.bearer.as_ref().ok_or(PdcpError::NotConfigured)?;
        let am = match &bearer.mode {
            BearerMode::DataAm(am) if bearer.cfg.status_report_required => am,
            _ => {
                return Err(PdcpError::InvalidState(
                    "status reports not configured on this bearer".to_string(),
                ))
            }
        };

        let (fms, bitmap) = am.rx_gaps.build_status_bitmap()?;
        let report = match bitmap {
            Some(bitmap) => StatusReport::with_bitmap(fms, bitmap),
            None => StatusReport::new(fms),
        };
        let pdu = report.encode(bearer.cfg.sn_size)?;

        debug!(
            "{}: sending status report FMS={} with {} bitmap bytes",
            lcid,
            fms,
            report.bitmap.len()
        );
        self.metrics.num_status_reports_tx += 1;
        self.rlc.write_sdu(lcid, None, pdu);
        Ok(())
    }

    /// RLC confirmed delivery of the SDUs with these SNs
    pub fn notify_delivery(&mut self, sns: &[u32]) {
        let lcid = self.lcid;
        let am = match self.bearer.as_mut().map(|b| &mut b.mode) {
            Some(BearerMode::DataAm(am)) => am,
            _ => {
                warn!("{}: delivery notification on a bearer without delivery tracking", lcid);
                return;
            }
        };

        for &sn in sns {
            match am.pending.take(sn) {
                Some(unit) => {
                    trace!("{}: delivered SN={}", lcid, sn);
                    record_ack(&mut self.metrics, &unit);
                }
                None => debug!("{}: delivered SN={} no longer buffered", lcid, sn),
            }
        }
    }

    /// RLC gave up on the SDUs with these SNs
    pub fn notify_failure(&mut self, sns: &[u32]) {
        let lcid = self.lcid;
        let am = match self.bearer.as_mut().map(|b| &mut b.mode) {
            Some(BearerMode::DataAm(am)) => am,
            _ => {
                warn!("{}: failure notification on a bearer without delivery tracking", lcid);
                return;
            }
        };

        for &sn in sns {
            if am.pending.remove(sn) {
                info!("{}: delivery of SN={} failed", lcid, sn);
            } else {
                debug!("{}: failed SN={} no longer buffered", lcid, sn);
            }
        }
    }

    /// Discard timer expiry. Ignored when the SDU was already removed.
    pub fn handle_discard_timer(&mut self, expired: DiscardTimerExpired) {
        let lcid = self.lcid;
        let am = match self.bearer.as_mut().map(|b| &mut b.mode) {
            Some(BearerMode::DataAm(am)) => am,
            _ => return,
        };

        if !am.pending.is_current_timer(expired.sn, expired.token) {
            trace!("{}: stale discard timer for SN={}", lcid, expired.sn);
            return;
        }

        debug!("{}: discard timer expired for SN={}", lcid, expired.sn);
        self.rlc.discard_sdu(lcid, expired.sn);
        am.pending.remove(expired.sn);
        self.metrics.num_discard_timeouts += 1;
    }
}
