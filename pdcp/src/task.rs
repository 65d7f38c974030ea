//! Per-bearer PDCP task
//!
//! The entity is moved into a tokio task that owns it exclusively. Submissions,
//! received PDUs, RLC notifications and discard timer expirations all reach it
//! as messages, so every mutation of a bearer happens on one serialized strand.

use crate::config::PdcpConfig;
use crate::entity::{PdcpBearerState, PdcpEntity};
use crate::metrics::PdcpBearerMetrics;
use crate::security::{SecurityConfig, SecurityDirection, SecurityFunction};
use crate::timer::DiscardTimerReceiver;
use crate::PdcpError;
use bytes::{Bytes, BytesMut};
use common::Lcid;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const COMMAND_QUEUE_SIZE: usize = 1024;

/// Message to a bearer task
#[derive(Debug)]
pub enum PdcpCommand {
    /// SDU from the upper layer, with an optional SN to keep
    WriteSdu { sdu: Bytes, sn: Option<u32> },
    /// PDU from RLC
    WritePdu(BytesMut),
    /// RLC delivered these SNs
    NotifyDelivery(Vec<u32>),
    /// RLC failed to deliver these SNs
    NotifyFailure(Vec<u32>),
    Configure(PdcpConfig, oneshot::Sender<Result<(), PdcpError>>),
    ConfigSecurity(SecurityConfig),
    EnableIntegrity(SecurityDirection),
    EnableEncryption(SecurityDirection),
    EnableSecurityTimed {
        function: SecurityFunction,
        direction: SecurityDirection,
        count: u32,
    },
    SendStatusReport(oneshot::Sender<Result<(), PdcpError>>),
    Reestablish,
    Reset,
    GetState(oneshot::Sender<Option<PdcpBearerState>>),
    SetState(PdcpBearerState, oneshot::Sender<Result<(), PdcpError>>),
    GetBufferedSdus(oneshot::Sender<Vec<(u32, Bytes)>>),
    GetMetrics(oneshot::Sender<PdcpBearerMetrics>),
    ResetMetrics,
    /// Stop the task. The bearer is reset and its timers cancelled.
    Shutdown,
}

/// Cloneable handle to a bearer task
#[derive(Debug, Clone)]
pub struct PdcpHandle {
    lcid: Lcid,
    command_tx: mpsc::Sender<PdcpCommand>,
}

/// Move `entity` into its own task. `timer_rx` is the receiver returned by [`PdcpEntity::new`].
pub fn spawn_bearer(entity: PdcpEntity, timer_rx: DiscardTimerReceiver) -> (PdcpHandle, JoinHandle<()>) {
    let lcid = entity.lcid();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
    let handle = tokio::spawn(run_bearer(entity, command_rx, timer_rx));
    (PdcpHandle { lcid, command_tx }, handle)
}

async fn run_bearer(
    mut entity: PdcpEntity,
    mut command_rx: mpsc::Receiver<PdcpCommand>,
    mut timer_rx: DiscardTimerReceiver,
) {
    let lcid = entity.lcid();
    info!("{}: PDCP bearer task started", lcid);

    loop {
        tokio::select! {
            cmd = command_rx.recv() => match cmd {
                Some(PdcpCommand::Shutdown) | None => break,
                Some(cmd) => handle_command(&mut entity, cmd),
            },
            Some(expired) = timer_rx.recv() => entity.handle_discard_timer(expired),
        }
    }

    entity.reset();
    info!("{}: PDCP bearer task stopped", lcid);
}

fn handle_command(entity: &mut PdcpEntity, cmd: PdcpCommand) {
    match cmd {
        PdcpCommand::WriteSdu { sdu, sn } => entity.write_sdu(sdu, sn),
        PdcpCommand::WritePdu(pdu) => entity.write_pdu(pdu),
        PdcpCommand::NotifyDelivery(sns) => entity.notify_delivery(&sns),
        PdcpCommand::NotifyFailure(sns) => entity.notify_failure(&sns),
        PdcpCommand::Configure(cfg, reply) => {
            let _ = reply.send(entity.configure(cfg));
        }
        PdcpCommand::ConfigSecurity(sec_cfg) => entity.config_security(sec_cfg),
        PdcpCommand::EnableIntegrity(direction) => entity.enable_integrity(direction),
        PdcpCommand::EnableEncryption(direction) => entity.enable_encryption(direction),
        PdcpCommand::EnableSecurityTimed {
            function,
            direction,
            count,
        } => entity.enable_security_timed(function, direction, count),
        PdcpCommand::SendStatusReport(reply) => {
            let _ = reply.send(entity.send_status_report());
        }
        PdcpCommand::Reestablish => entity.reestablish(),
        PdcpCommand::Reset => entity.reset(),
        PdcpCommand::GetState(reply) => {
            let _ = reply.send(entity.bearer_state());
        }
        PdcpCommand::SetState(state, reply) => {
            let _ = reply.send(entity.set_bearer_state(state));
        }
        PdcpCommand::GetBufferedSdus(reply) => {
            let _ = reply.send(entity.buffered_sdus());
        }
        PdcpCommand::GetMetrics(reply) => {
            let _ = reply.send(entity.metrics());
        }
        PdcpCommand::ResetMetrics => entity.reset_metrics(),
        PdcpCommand::Shutdown => debug!("{}: shutdown handled by the task loop", entity.lcid()),
    }
}

impl PdcpHandle {
    /// Logical channel of the bearer
    pub fn lcid(&self) -> Lcid {
        self.lcid
    }

    /// Whether the task has stopped
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    async fn send(&self, cmd: PdcpCommand) -> Result<(), PdcpError> {
        self.command_tx
            .send(cmd)
            .await
            .map_err(|_| PdcpError::BearerClosed)
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> PdcpCommand,
    ) -> Result<T, PdcpError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| PdcpError::BearerClosed)
    }

    /// Submit an SDU for transmission
    pub async fn write_sdu(&self, sdu: Bytes) -> Result<(), PdcpError> {
        self.send(PdcpCommand::WriteSdu { sdu, sn: None }).await
    }

    /// Submit an SDU that keeps a given SN (handover forwarding)
    pub async fn write_sdu_with_sn(&self, sdu: Bytes, sn: u32) -> Result<(), PdcpError> {
        self.send(PdcpCommand::WriteSdu { sdu, sn: Some(sn) }).await
    }

    /// Pass a PDU received from RLC
    pub async fn write_pdu(&self, pdu: BytesMut) -> Result<(), PdcpError> {
        self.send(PdcpCommand::WritePdu(pdu)).await
    }

    /// RLC delivery confirmation
    pub async fn notify_delivery(&self, sns: Vec<u32>) -> Result<(), PdcpError> {
        self.send(PdcpCommand::NotifyDelivery(sns)).await
    }

    /// RLC delivery failure
    pub async fn notify_failure(&self, sns: Vec<u32>) -> Result<(), PdcpError> {
        self.send(PdcpCommand::NotifyFailure(sns)).await
    }

    /// (Re)configure the bearer
    pub async fn configure(&self, cfg: PdcpConfig) -> Result<(), PdcpError> {
        self.query(|reply| PdcpCommand::Configure(cfg, reply)).await?
    }

    pub async fn config_security(&self, sec_cfg: SecurityConfig) -> Result<(), PdcpError> {
        self.send(PdcpCommand::ConfigSecurity(sec_cfg)).await
    }

    pub async fn enable_integrity(&self, direction: SecurityDirection) -> Result<(), PdcpError> {
        self.send(PdcpCommand::EnableIntegrity(direction)).await
    }

    pub async fn enable_encryption(&self, direction: SecurityDirection) -> Result<(), PdcpError> {
        self.send(PdcpCommand::EnableEncryption(direction)).await
    }

    pub async fn enable_security_timed(
        &self,
        function: SecurityFunction,
        direction: SecurityDirection,
        count: u32,
    ) -> Result<(), PdcpError> {
        self.send(PdcpCommand::EnableSecurityTimed {
            function,
            direction,
            count,
        })
        .await
    }

    /// Build and send a status report
    pub async fn send_status_report(&self) -> Result<(), PdcpError> {
        self.query(PdcpCommand::SendStatusReport).await?
    }

    pub async fn reestablish(&self) -> Result<(), PdcpError> {
        self.send(PdcpCommand::Reestablish).await
    }

    pub async fn reset(&self) -> Result<(), PdcpError> {
        self.send(PdcpCommand::Reset).await
    }

    pub async fn bearer_state(&self) -> Result<Option<PdcpBearerState>, PdcpError> {
        self.query(PdcpCommand::GetState).await
    }

    pub async fn set_bearer_state(&self, state: PdcpBearerState) -> Result<(), PdcpError> {
        self.query(|reply| PdcpCommand::SetState(state, reply)).await?
    }

    /// Undelivered SDUs for forwarding
    pub async fn buffered_sdus(&self) -> Result<Vec<(u32, Bytes)>, PdcpError> {
        self.query(PdcpCommand::GetBufferedSdus).await
    }

    pub async fn metrics(&self) -> Result<PdcpBearerMetrics, PdcpError> {
        self.query(PdcpCommand::GetMetrics).await
    }

    pub async fn reset_metrics(&self) -> Result<(), PdcpError> {
        self.send(PdcpCommand::ResetMetrics).await
    }

    /// Stop the bearer task
    pub async fn shutdown(&self) -> Result<(), PdcpError> {
        self.send(PdcpCommand::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiscardTimer, RlcMode, SnSize};
    use crate::testing::{MockRlc, MockUpper};
    use common::LinkDirection;
    use std::sync::Arc;
    use std::time::Duration;

    fn spawn_am(rlc: &Arc<MockRlc>, discard_timer: DiscardTimer) -> (PdcpHandle, JoinHandle<()>) {
        let upper = Arc::new(MockUpper::default());
        let (mut entity, timer_rx) = PdcpEntity::new(Lcid(4), rlc.clone(), upper);
        let cfg = PdcpConfig::drb(4, RlcMode::Am, SnSize::Len12, discard_timer, LinkDirection::Downlink);
        entity.configure(cfg).unwrap();
        spawn_bearer(entity, timer_rx)
    }

    #[tokio::test]
    async fn test_handle_roundtrip() {
        let rlc = MockRlc::am();
        let (handle, _task) = spawn_am(&rlc, DiscardTimer::Infinity);

        for i in 0..3u8 {
            handle.write_sdu(Bytes::from(vec![i; 8])).await.unwrap();
        }
        let state = handle.bearer_state().await.unwrap().unwrap();
        assert_eq!(state.tx_sn, 3);
        assert_eq!(rlc.take_sent().len(), 3);

        handle.notify_delivery(vec![0, 1]).await.unwrap();
        let buffered = handle.buffered_sdus().await.unwrap();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].0, 2);

        let metrics = handle.metrics().await.unwrap();
        assert_eq!(metrics.num_tx_pdus, 3);
        assert_eq!(metrics.num_tx_acked_bytes, 16);
    }

    #[tokio::test]
    async fn test_configure_error_through_handle() {
        let rlc = MockRlc::am();
        let (handle, _task) = spawn_am(&rlc, DiscardTimer::Infinity);

        let bad = PdcpConfig::srb(1, SnSize::Len5, LinkDirection::Downlink);
        assert!(matches!(
            handle.configure(bad).await,
            Err(PdcpError::ConfigurationError(_))
        ));
        // Status reports were not requested for this bearer
        assert!(handle.send_status_report().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discard_timer_on_task() {
        let rlc = MockRlc::am();
        let (handle, _task) = spawn_am(&rlc, DiscardTimer::Ms(100));

        handle.write_sdu(Bytes::from_static(b"stale")).await.unwrap();
        handle.write_sdu(Bytes::from_static(b"acked")).await.unwrap();
        handle.notify_delivery(vec![1]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(handle.buffered_sdus().await.unwrap().is_empty());
        assert_eq!(*rlc.discarded.lock().unwrap(), vec![0]);
        assert_eq!(handle.metrics().await.unwrap().num_discard_timeouts, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let rlc = MockRlc::am();
        let (handle, task) = spawn_am(&rlc, DiscardTimer::Infinity);

        handle.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(handle.is_closed());
        assert_eq!(
            handle.write_sdu(Bytes::from_static(b"x")).await,
            Err(PdcpError::BearerClosed)
        );
        assert_eq!(handle.metrics().await, Err(PdcpError::BearerClosed));
    }
}
