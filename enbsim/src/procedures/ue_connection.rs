//! ue_connection - the UE side of RRC connection establishment for one attempt

use super::ProcedureResult;
use super::timer::{Expiry, NamedTimers, RetryPolicy, TimerAction, TimerId};
use crate::UeConfig;
use anyhow::{Result, ensure};
use async_std::sync::Mutex;
use async_trait::async_trait;
use rrc::{
    Crnti, EstablishmentCause, NasInfo, PlmnIdentity, RrcMessage, RrcPdu,
    RrcTransactionIdentifier, UeIdentityType,
};
use slog::{Logger, debug, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use transport::{IoService, MessageHandler};

pub type UeCompletionCallback = Box<dyn FnOnce(ProcedureResult) + Send + 'static>;

/// How the UE identifies itself in RrcConnectionRequest and RrcConnectionSetupComplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeIdentityInfo {
    pub identity_type: UeIdentityType,
    pub identity_value: u64,
    pub establishment_cause: EstablishmentCause,
    pub selected_plmn_identity: PlmnIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UeTimerConfig {
    pub max_retries: u32,
    pub random_access_response_timeout: Duration,
    pub connection_setup_timeout: Duration,
    pub watchdog_timeout: Duration,
}

impl From<&UeConfig> for UeTimerConfig {
    fn from(config: &UeConfig) -> Self {
        UeTimerConfig {
            max_retries: config.max_retries,
            random_access_response_timeout: config.random_access_response_timeout(),
            connection_setup_timeout: config.connection_setup_timeout(),
            watchdog_timeout: config.watchdog_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum UeTimer {
    RandomAccessResponse,
    ConnectionSetup,
    Watchdog,
}

impl UeTimer {
    fn timeout_result(&self, phase: Phase) -> ProcedureResult {
        match self {
            UeTimer::RandomAccessResponse => ProcedureResult::ErrorRandomAccessTimeout,
            UeTimer::ConnectionSetup => ProcedureResult::ErrorSetupTimeout,
            UeTimer::Watchdog => match phase {
                Phase::AwaitingConnectionSetup => ProcedureResult::ErrorSetupTimeout,
                _ => ProcedureResult::ErrorRandomAccessTimeout,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    AwaitingRandomAccessResponse,
    AwaitingConnectionSetup,
    Done(ProcedureResult),
}

struct State {
    phase: Phase,
    preamble_id: u8,
    temporary_crnti: Option<Crnti>,
    timers: NamedTimers<UeTimer>,
    on_complete: Option<UeCompletionCallback>,
}

struct Inner {
    random_access_policy: RetryPolicy,
    connection_setup_policy: RetryPolicy,
    watchdog_policy: RetryPolicy,
    nas_info: NasInfo,
    identity: UeIdentityInfo,
    enb_address: SocketAddr,
    io: IoService<RrcPdu>,
    logger: Logger,
    executed: AtomicBool,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct UeConnectionProcedure {
    inner: Arc<Inner>,
}

impl UeConnectionProcedure {
    pub fn new(
        nas_info: NasInfo,
        timer_config: UeTimerConfig,
        enb_address: SocketAddr,
        io: IoService<RrcPdu>,
        on_complete: impl FnOnce(ProcedureResult) + Send + 'static,
        identity: UeIdentityInfo,
        logger: Logger,
    ) -> Result<Self> {
        let random_access_policy = RetryPolicy::new(
            timer_config.max_retries,
            timer_config.random_access_response_timeout,
        )?;
        let connection_setup_policy = RetryPolicy::new(
            timer_config.max_retries,
            timer_config.connection_setup_timeout,
        )?;
        ensure!(
            !timer_config.watchdog_timeout.is_zero(),
            "Watchdog timeout must be non-zero"
        );
        let watchdog_policy = RetryPolicy::one_shot(timer_config.watchdog_timeout)?;

        Ok(UeConnectionProcedure {
            inner: Arc::new(Inner {
                random_access_policy,
                connection_setup_policy,
                watchdog_policy,
                nas_info,
                identity,
                enb_address,
                io,
                logger,
                executed: AtomicBool::new(false),
                state: Mutex::new(State {
                    phase: Phase::Created,
                    preamble_id: 0,
                    temporary_crnti: None,
                    timers: NamedTimers::new(),
                    on_complete: Some(Box::new(on_complete)),
                }),
            }),
        })
    }

    // RRC connection establishment, UE side
    // 1.    RandomAccessPreamble >>       (repeated on random access timer expiry)
    // 2.    RandomAccessResponse <<
    // 3.    RrcConnectionRequest >>       (repeated on connection setup timer expiry)
    // 4.    RrcConnectionSetup <<
    // 5.    RrcConnectionSetupComplete >>
    /// Start the attempt.  Does not block: the outcome is reported through the completion
    /// callback.  Takes over the IoService's inbound message handler.  Fails if called twice,
    /// unless the first call failed to start the IoService.
    ///
    /// The attempt runs only while the caller holds on to the procedure (or a clone of it).
    /// Neither the IoService nor the timers keep it alive.
    pub async fn execute(&self) -> Result<()> {
        ensure!(
            !self.inner.executed.swap(true, Ordering::SeqCst),
            "UE connection procedure already executed"
        );
        if let Err(e) = self.inner.io.start().await {
            self.inner.executed.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        let handler = UeHandler(Arc::downgrade(&self.inner));
        self.inner.io.register_handler(Arc::new(handler)).await;

        let preamble_id = rand::random::<u8>();
        let mut state = self.inner.state.lock().await;
        state.preamble_id = preamble_id;
        self.start_timer(
            &mut state,
            UeTimer::RandomAccessResponse,
            self.inner.random_access_policy,
        );
        self.start_timer(&mut state, UeTimer::Watchdog, self.inner.watchdog_policy);
        state.phase = Phase::AwaitingRandomAccessResponse;
        drop(state);

        info!(
            self.inner.logger,
            "Start RRC connection establishment toward {}", self.inner.enb_address
        );
        self.send_random_access_preamble(preamble_id).await;
        Ok(())
    }

    pub async fn result(&self) -> Option<ProcedureResult> {
        match self.inner.state.lock().await.phase {
            Phase::Done(result) => Some(result),
            _ => None,
        }
    }

    /// The C-RNTI the eNB assigned in its RandomAccessResponse, if one has arrived.
    pub async fn temporary_crnti(&self) -> Option<Crnti> {
        self.inner.state.lock().await.temporary_crnti
    }

    async fn handle_random_access_response(
        &self,
        preamble_id: u8,
        temporary_crnti: Crnti,
        uplink_grant: u32,
    ) {
        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::AwaitingRandomAccessResponse {
            debug!(
                self.inner.logger,
                "Not awaiting RandomAccessResponse ({:?}) - ignore", state.phase
            );
            return;
        }
        if preamble_id != state.preamble_id {
            debug!(
                self.inner.logger,
                "RandomAccessResponse for preamble {preamble_id} not {} - ignore",
                state.preamble_id
            );
            return;
        }
        state.timers.stop(UeTimer::RandomAccessResponse);
        state.temporary_crnti = Some(temporary_crnti);
        self.start_timer(
            &mut state,
            UeTimer::ConnectionSetup,
            self.inner.connection_setup_policy,
        );
        state.phase = Phase::AwaitingConnectionSetup;
        drop(state);

        info!(
            self.inner.logger,
            "Random access complete - temporary C-RNTI {temporary_crnti}, \
             uplink grant {uplink_grant}"
        );
        self.send_connection_request(temporary_crnti).await;
    }

    async fn handle_connection_setup(
        &self,
        temporary_crnti: Crnti,
        rrc_transaction_identifier: RrcTransactionIdentifier,
    ) {
        let mut state = self.inner.state.lock().await;
        if state.temporary_crnti != Some(temporary_crnti) {
            debug!(
                self.inner.logger,
                "RrcConnectionSetup for C-RNTI {temporary_crnti} not {:?} - ignore",
                state.temporary_crnti
            );
            return;
        }
        match state.phase {
            Phase::AwaitingConnectionSetup => {}
            Phase::Done(ProcedureResult::Success) => {
                // Our RrcConnectionSetupComplete was lost and the eNB is retrying.
                drop(state);
                debug!(
                    self.inner.logger,
                    "Repeated RrcConnectionSetup - resend RrcConnectionSetupComplete"
                );
                self.send_connection_setup_complete(rrc_transaction_identifier)
                    .await;
                return;
            }
            phase => {
                debug!(
                    self.inner.logger,
                    "Not awaiting RrcConnectionSetup ({phase:?}) - ignore"
                );
                return;
            }
        }
        let completion = self.finish(&mut state, ProcedureResult::Success);
        drop(state);

        self.send_connection_setup_complete(rrc_transaction_identifier)
            .await;
        info!(self.inner.logger, "RRC connection established");
        fire(completion, ProcedureResult::Success);
    }

    fn start_timer(&self, state: &mut State, name: UeTimer, policy: RetryPolicy) {
        let weak = Arc::downgrade(&self.inner);
        state.timers.start(name, policy, move |id, expiry| {
            on_expiry(weak.clone(), name, id, expiry)
        });
    }

    async fn on_timer_expiry(&self, name: UeTimer, id: TimerId, expiry: Expiry) -> TimerAction {
        let mut state = self.inner.state.lock().await;
        if !state.timers.is_current(name, id) {
            return TimerAction::Stop;
        }
        match (name, expiry) {
            (UeTimer::RandomAccessResponse, Expiry::Retry(n)) => {
                let preamble_id = state.preamble_id;
                drop(state);
                debug!(
                    self.inner.logger,
                    "No RandomAccessResponse after {n} wait(s) - resend RandomAccessPreamble"
                );
                self.send_random_access_preamble(preamble_id).await;
                TimerAction::Continue
            }
            (UeTimer::ConnectionSetup, Expiry::Retry(n)) => {
                let Some(temporary_crnti) = state.temporary_crnti else {
                    return TimerAction::Stop;
                };
                drop(state);
                debug!(
                    self.inner.logger,
                    "No RrcConnectionSetup after {n} wait(s) - resend RrcConnectionRequest"
                );
                self.send_connection_request(temporary_crnti).await;
                TimerAction::Continue
            }
            (name, _) => {
                let result = name.timeout_result(state.phase);
                let completion = self.finish(&mut state, result);
                drop(state);
                warn!(
                    self.inner.logger,
                    "RRC connection establishment failed - {result} ({name:?} timer)"
                );
                fire(completion, result);
                TimerAction::Stop
            }
        }
    }

    // The single transition into a terminal state, made under the state lock.  Stopping the
    // timers here means a timer task that has already woken up sees is_current() fail.
    fn finish(&self, state: &mut State, result: ProcedureResult) -> Option<UeCompletionCallback> {
        state.phase = Phase::Done(result);
        state.timers.stop_all();
        state.on_complete.take()
    }

    async fn send_random_access_preamble(&self, preamble_id: u8) {
        let pdu = rrc::build::random_access_preamble(preamble_id);
        debug!(self.inner.logger, "<< RandomAccessPreamble {preamble_id}");
        self.send(&pdu).await;
    }

    async fn send_connection_request(&self, temporary_crnti: Crnti) {
        let identity = &self.inner.identity;
        let pdu = rrc::build::connection_request(
            temporary_crnti,
            identity.identity_type,
            identity.identity_value,
            identity.establishment_cause,
        );
        debug!(self.inner.logger, "<< RrcConnectionRequest");
        self.send(&pdu).await;
    }

    async fn send_connection_setup_complete(
        &self,
        rrc_transaction_identifier: RrcTransactionIdentifier,
    ) {
        let pdu = rrc::build::connection_setup_complete(
            rrc_transaction_identifier,
            self.inner.identity.selected_plmn_identity,
            self.inner.nas_info.clone(),
        );
        debug!(self.inner.logger, "<< RrcConnectionSetupComplete");
        self.send(&pdu).await;
    }

    async fn send(&self, pdu: &RrcPdu) {
        if let Err(e) = self.inner.io.send_message(self.inner.enb_address, pdu).await {
            warn!(
                self.inner.logger,
                "Failed to send {} - {e}",
                pdu.message.name()
            );
        }
    }

    async fn handle_message(&self, source: SocketAddr, pdu: RrcPdu) {
        if source != self.inner.enb_address {
            debug!(
                self.inner.logger,
                "{} from {source}, which is not our eNB - ignore",
                pdu.message.name()
            );
            return;
        }
        let (interface, channel_info, message) = pdu.into_parts();
        debug!(
            self.inner.logger,
            ">> {} ({:?}/{:?})",
            message.name(),
            interface,
            channel_info.channel
        );
        match message {
            RrcMessage::RandomAccessResponse {
                preamble_id,
                temporary_crnti,
                uplink_grant,
            } => {
                self.handle_random_access_response(preamble_id, temporary_crnti, uplink_grant)
                    .await
            }
            RrcMessage::RrcConnectionSetup {
                temporary_crnti,
                rrc_transaction_identifier,
            } => {
                self.handle_connection_setup(temporary_crnti, rrc_transaction_identifier)
                    .await
            }
            m => debug!(self.inner.logger, "Unexpected {} - ignore", m.name()),
        }
    }
}

struct UeHandler(Weak<Inner>);

#[async_trait]
impl MessageHandler<RrcPdu> for UeHandler {
    async fn handle_message(&self, source: SocketAddr, pdu: RrcPdu) {
        if let Some(inner) = self.0.upgrade() {
            UeConnectionProcedure { inner }
                .handle_message(source, pdu)
                .await
        }
    }
}

async fn on_expiry(
    inner: Weak<Inner>,
    name: UeTimer,
    id: TimerId,
    expiry: Expiry,
) -> TimerAction {
    match inner.upgrade() {
        Some(inner) => {
            let procedure = UeConnectionProcedure { inner };
            procedure.on_timer_expiry(name, id, expiry).await
        }
        None => TimerAction::Stop,
    }
}

fn fire(completion: Option<UeCompletionCallback>, result: ProcedureResult) {
    if let Some(on_complete) = completion {
        on_complete(result);
    }
}
