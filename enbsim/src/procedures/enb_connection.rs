//! enb_connection - the eNB side of RRC connection establishment for one UE

use super::ProcedureResult;
use super::timer::{Expiry, NamedTimers, RetryPolicy, TimerAction, TimerId};
use crate::{RequestContext, UeContext};
use anyhow::Result;
use async_std::sync::Mutex;
use rrc::{ChannelInfo, Interface, RrcMessage, RrcPdu};
use slog::{Logger, debug, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use transport::IoService;

pub type EnbCompletionCallback = Box<dyn FnOnce(ProcedureResult, UeContext) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EnbTimer {
    SetupComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    AwaitingSetupComplete,
    Done(ProcedureResult),
}

struct State {
    phase: Phase,
    ue: Option<UeContext>,
    timers: NamedTimers<EnbTimer>,
    on_complete: Option<EnbCompletionCallback>,
}

struct Inner {
    policy: RetryPolicy,
    io: IoService<RrcPdu>,
    logger: Logger,
    terminal: AtomicBool,
    state: Mutex<State>,
}

#[derive(Clone)]
pub struct EnbConnectionProcedure {
    inner: Arc<Inner>,
}

impl EnbConnectionProcedure {
    pub fn new(
        max_retries: u32,
        timeout_interval: Duration,
        io: IoService<RrcPdu>,
        on_complete: impl FnOnce(ProcedureResult, UeContext) + Send + 'static,
        logger: Logger,
    ) -> Result<Self> {
        let policy = RetryPolicy::new(max_retries, timeout_interval)?;
        Ok(EnbConnectionProcedure {
            inner: Arc::new(Inner {
                policy,
                io,
                logger,
                terminal: AtomicBool::new(false),
                state: Mutex::new(State {
                    phase: Phase::Created,
                    ue: None,
                    timers: NamedTimers::new(),
                    on_complete: Some(Box::new(on_complete)),
                }),
            }),
        })
    }

    // RRC connection establishment, eNB side
    // 1.    RrcConnectionRequest >>       (request_context present)
    // 2.    RrcConnectionSetup <<         (repeated on each timer expiry)
    // 3.    RrcConnectionSetupComplete >> (request_context absent)
    pub async fn handle_establishment_message(
        &self,
        source: SocketAddr,
        interface: Interface,
        channel_info: ChannelInfo,
        message: RrcMessage,
        request_context: Option<RequestContext>,
    ) {
        debug!(
            self.inner.logger,
            ">> {} ({:?}/{:?}) from {}",
            message.name(),
            interface,
            channel_info.channel,
            source
        );
        match request_context {
            Some(request_context) => {
                self.handle_connection_request(source, message, request_context)
                    .await
            }
            None => self.handle_connection_setup_complete(message).await,
        }
    }

    /// Once true, never false again.
    pub fn is_terminal(&self) -> bool {
        self.inner.terminal.load(Ordering::SeqCst)
    }

    pub async fn result(&self) -> Option<ProcedureResult> {
        match self.inner.state.lock().await.phase {
            Phase::Done(result) => Some(result),
            _ => None,
        }
    }

    pub async fn ue_context(&self) -> Option<UeContext> {
        self.inner.state.lock().await.ue.clone()
    }

    async fn handle_connection_request(
        &self,
        source: SocketAddr,
        message: RrcMessage,
        request_context: RequestContext,
    ) {
        let RrcMessage::RrcConnectionRequest {
            ue_identity,
            establishment_cause,
            ..
        } = message
        else {
            debug!(
                self.inner.logger,
                "Expected RrcConnectionRequest, got {} - ignore",
                message.name()
            );
            return;
        };

        let mut state = self.inner.state.lock().await;
        match state.phase {
            Phase::Created => {
                state.ue = Some(UeContext::new(
                    source,
                    &request_context,
                    ue_identity,
                    establishment_cause,
                ));
                self.start_setup_complete_timer(&mut state);
                state.phase = Phase::AwaitingSetupComplete;
            }
            Phase::AwaitingSetupComplete => {
                debug!(
                    self.inner.logger,
                    "Repeated RrcConnectionRequest - resend RrcConnectionSetup"
                );
            }
            Phase::Done(result) => {
                debug!(
                    self.inner.logger,
                    "RrcConnectionRequest after procedure ended ({result}) - ignore"
                );
                return;
            }
        }
        let ue = state.ue.clone();
        drop(state);

        if let Some(ue) = ue {
            self.send_connection_setup(&ue).await;
        }
    }

    async fn handle_connection_setup_complete(&self, message: RrcMessage) {
        let RrcMessage::RrcConnectionSetupComplete {
            rrc_transaction_identifier,
            selected_plmn_identity,
            nas_info,
        } = message
        else {
            debug!(
                self.inner.logger,
                "Expected RrcConnectionSetupComplete, got {} - ignore",
                message.name()
            );
            return;
        };

        let mut state = self.inner.state.lock().await;
        if state.phase != Phase::AwaitingSetupComplete {
            debug!(
                self.inner.logger,
                "Not awaiting RrcConnectionSetupComplete ({:?}) - ignore", state.phase
            );
            return;
        }
        let Some(ue) = state.ue.as_mut() else {
            return;
        };
        if ue.rrc_transaction_identifier != rrc_transaction_identifier {
            debug!(
                self.inner.logger,
                "RrcConnectionSetupComplete transaction {:?} doesn't match {:?} - ignore",
                rrc_transaction_identifier,
                ue.rrc_transaction_identifier
            );
            return;
        }
        ue.complete(selected_plmn_identity, nas_info);
        let completion = self.finish(&mut state, ProcedureResult::Success);
        drop(state);

        info!(self.inner.logger, "RRC connection established");
        fire(completion, ProcedureResult::Success);
    }

    fn start_setup_complete_timer(&self, state: &mut State) {
        let weak = Arc::downgrade(&self.inner);
        state.timers.start(
            EnbTimer::SetupComplete,
            self.inner.policy,
            move |id, expiry| on_expiry(weak.clone(), id, expiry),
        );
    }

    async fn on_timer_expiry(&self, id: TimerId, expiry: Expiry) -> TimerAction {
        let mut state = self.inner.state.lock().await;
        if !state.timers.is_current(EnbTimer::SetupComplete, id) {
            return TimerAction::Stop;
        }
        match expiry {
            Expiry::Retry(n) => {
                let Some(ue) = state.ue.clone() else {
                    return TimerAction::Stop;
                };
                drop(state);
                debug!(
                    self.inner.logger,
                    "No RrcConnectionSetupComplete after {n} wait(s) - resend RrcConnectionSetup"
                );
                self.send_connection_setup(&ue).await;
                TimerAction::Continue
            }
            Expiry::Exhausted => {
                let result = ProcedureResult::ErrorNoConnectionCompleteMessage;
                let completion = self.finish(&mut state, result);
                drop(state);
                warn!(
                    self.inner.logger,
                    "RRC connection establishment failed - {result} after {:?}",
                    self.inner.policy.total_wait()
                );
                fire(completion, result);
                TimerAction::Stop
            }
        }
    }

    // The single transition into a terminal state.  Callers hold the state lock, so whichever of
    // the timer and the message path gets here first wins, and the other sees Phase::Done.
    fn finish(
        &self,
        state: &mut State,
        result: ProcedureResult,
    ) -> Option<(EnbCompletionCallback, UeContext)> {
        state.phase = Phase::Done(result);
        state.timers.stop_all();
        self.inner.terminal.store(true, Ordering::SeqCst);
        let on_complete = state.on_complete.take()?;
        let ue = state.ue.clone()?;
        Some((on_complete, ue))
    }

    async fn send_connection_setup(&self, ue: &UeContext) {
        let pdu = rrc::build::connection_setup(ue.key, ue.rrc_transaction_identifier);
        debug!(self.inner.logger, "<< RrcConnectionSetup");
        if let Err(e) = self.inner.io.send_message(ue.address, &pdu).await {
            warn!(self.inner.logger, "Failed to send RrcConnectionSetup - {e}");
        }
    }
}

async fn on_expiry(inner: Weak<Inner>, id: TimerId, expiry: Expiry) -> TimerAction {
    match inner.upgrade() {
        Some(inner) => {
            let procedure = EnbConnectionProcedure { inner };
            procedure.on_timer_expiry(id, expiry).await
        }
        None => TimerAction::Stop,
    }
}

fn fire(completion: Option<(EnbCompletionCallback, UeContext)>, result: ProcedureResult) {
    if let Some((on_complete, ue)) = completion {
        on_complete(result, ue);
    }
}
