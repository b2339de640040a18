//! enb_dispatcher - routes the eNB's inbound Uu messages to one connection procedure per UE

use super::{EnbConnectionProcedure, ProcedureResult, RetryPolicy};
use crate::{EnbConfig, RequestContext, UeContext};
use anyhow::Result;
use async_trait::async_trait;
use atomic_counter::{AtomicCounter, RelaxedCounter};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rrc::{ChannelInfo, Crnti, Interface, RrcMessage, RrcPdu, RrcTransactionIdentifier};
use slog::{Logger, debug, info, o, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use transport::{IoService, MessageHandler};

/// Runs RRC connection establishment for every UE that contacts the eNB.  The dispatcher stops
/// handling messages once the last clone of it is dropped.
#[derive(Clone)]
pub struct EnbDispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    io: IoService<RrcPdu>,
    config: EnbConfig,
    registry: Arc<Registry>,
    next_crnti: RelaxedCounter,
    next_generation: RelaxedCounter,
    registered: AtomicBool,
    logger: Logger,
}

struct Registration {
    // Distinguishes successive procedures on a reused key.
    generation: usize,
    procedure: EnbConnectionProcedure,
}

// Per-UE tables.  Where an operation touches more than one, it locks `procedures` first.
#[derive(Default)]
struct Registry {
    procedures: DashMap<Crnti, Registration>,
    results_by_ue: DashMap<Crnti, ProcedureResult>,
    contexts_by_ue: DashMap<Crnti, UeContext>,
}

impl Registry {
    // Store a procedure's outcome, unless a newer procedure has taken over the key since it
    // finished.  The key's registration stays read-locked until both writes are done, so a new
    // attempt cannot slip in between the check and the writes.
    fn record_completion(
        &self,
        key: Crnti,
        generation: usize,
        result: ProcedureResult,
        ue: UeContext,
    ) -> bool {
        let Some(registration) = self.procedures.get(&key) else {
            return false;
        };
        if registration.generation != generation {
            return false;
        }
        // Context first, so that a visible result always has its context.
        self.contexts_by_ue.insert(key, ue);
        self.results_by_ue.insert(key, result);
        true
    }
}

impl EnbDispatcher {
    pub fn new(io: IoService<RrcPdu>, config: EnbConfig, logger: Logger) -> Result<Self> {
        // Fail now rather than on the first RrcConnectionRequest.
        RetryPolicy::new(config.max_retries, config.setup_complete_timeout())?;
        Ok(EnbDispatcher {
            inner: Arc::new(Inner {
                io,
                config,
                registry: Arc::new(Registry::default()),
                next_crnti: RelaxedCounter::new(0),
                next_generation: RelaxedCounter::new(0),
                registered: AtomicBool::new(false),
                logger,
            }),
        })
    }

    /// Start handling the IoService's inbound messages.  Does not block, and calling it again
    /// has no effect.
    pub async fn execute(&self) {
        if self.inner.registered.swap(true, Ordering::SeqCst) {
            return;
        }
        let handler = DispatcherHandler(Arc::downgrade(&self.inner));
        self.inner.io.register_handler(Arc::new(handler)).await;
        info!(self.inner.logger, "eNB handling RRC connection establishment");
    }

    /// Terminal result for the UE, or None while its procedure is running (or never started).
    pub fn result(&self, key: Crnti) -> Option<ProcedureResult> {
        self.inner
            .registry
            .results_by_ue
            .get(&key)
            .map(|r| *r.value())
    }

    pub fn results_by_ue(&self) -> HashMap<Crnti, ProcedureResult> {
        self.inner
            .registry
            .results_by_ue
            .iter()
            .map(|r| (*r.key(), *r.value()))
            .collect()
    }

    pub fn context(&self, key: Crnti) -> Option<UeContext> {
        self.inner
            .registry
            .contexts_by_ue
            .get(&key)
            .map(|c| c.value().clone())
    }

    pub fn contexts_by_ue(&self) -> HashMap<Crnti, UeContext> {
        self.inner
            .registry
            .contexts_by_ue
            .iter()
            .map(|c| (*c.key(), c.value().clone()))
            .collect()
    }

    async fn handle_message(&self, source: SocketAddr, pdu: RrcPdu) {
        let (interface, channel_info, message) = pdu.into_parts();
        match message {
            RrcMessage::RandomAccessPreamble { preamble_id } => {
                self.handle_random_access_preamble(source, preamble_id)
                    .await
            }
            RrcMessage::RrcConnectionRequest {
                temporary_crnti, ..
            } => {
                self.handle_connection_request(
                    source,
                    interface,
                    channel_info,
                    message,
                    temporary_crnti,
                )
                .await
            }
            RrcMessage::RrcConnectionSetupComplete {
                rrc_transaction_identifier,
                ..
            } => {
                self.handle_connection_setup_complete(
                    source,
                    interface,
                    channel_info,
                    message,
                    rrc_transaction_identifier,
                )
                .await
            }
            m => debug!(
                self.inner.logger,
                "Unexpected {} from {source} - ignore",
                m.name()
            ),
        }
    }

    async fn handle_random_access_preamble(&self, source: SocketAddr, preamble_id: u8) {
        debug!(
            self.inner.logger,
            ">> RandomAccessPreamble {preamble_id} from {source}"
        );
        let Some(temporary_crnti) = self.allocate_crnti() else {
            warn!(
                self.inner.logger,
                "No free C-RNTI - ignore RandomAccessPreamble"
            );
            return;
        };
        let pdu = rrc::build::random_access_response(
            preamble_id,
            temporary_crnti,
            self.inner.config.uplink_grant,
        );
        debug!(
            self.inner.logger,
            "<< RandomAccessResponse with temporary C-RNTI {temporary_crnti}"
        );
        if let Err(e) = self.inner.io.send_message(source, &pdu).await {
            warn!(self.inner.logger, "Failed to send RandomAccessResponse - {e}");
        }
    }

    async fn handle_connection_request(
        &self,
        source: SocketAddr,
        interface: Interface,
        channel_info: ChannelInfo,
        message: RrcMessage,
        key: Crnti,
    ) {
        let procedure = match self.procedure_for_request(key) {
            Ok(procedure) => procedure,
            Err(e) => {
                warn!(
                    self.inner.logger,
                    "Failed to create procedure for UE {key} - {e}"
                );
                return;
            }
        };
        let request_context = RequestContext {
            temporary_crnti: key,
            uplink_grant: self.inner.config.uplink_grant,
            rrc_transaction_identifier: transaction_identifier_for(key),
        };
        procedure
            .handle_establishment_message(
                source,
                interface,
                channel_info,
                message,
                Some(request_context),
            )
            .await;
    }

    async fn handle_connection_setup_complete(
        &self,
        source: SocketAddr,
        interface: Interface,
        channel_info: ChannelInfo,
        message: RrcMessage,
        rrc_transaction_identifier: RrcTransactionIdentifier,
    ) {
        let key = ue_key_for(rrc_transaction_identifier);
        let Some(procedure) = self
            .inner
            .registry
            .procedures
            .get(&key)
            .map(|r| r.procedure.clone())
        else {
            debug!(
                self.inner.logger,
                "RrcConnectionSetupComplete for unknown UE {key} - ignore"
            );
            return;
        };
        procedure
            .handle_establishment_message(source, interface, channel_info, message, None)
            .await;
    }

    // Look up the live procedure for this UE, creating one if there is none.  A key whose
    // procedure has ended may be reused by a new connection attempt.
    fn procedure_for_request(&self, key: Crnti) -> Result<EnbConnectionProcedure> {
        let registry = &self.inner.registry;
        let procedure = match registry.procedures.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().procedure.is_terminal() {
                    info!(
                        self.inner.logger,
                        "New connection attempt reuses C-RNTI {key}"
                    );
                    registry.results_by_ue.remove(&key);
                    entry.insert(self.new_registration(key)?);
                }
                entry.get().procedure.clone()
            }
            Entry::Vacant(entry) => entry
                .insert(self.new_registration(key)?)
                .procedure
                .clone(),
        };
        Ok(procedure)
    }

    fn new_registration(&self, key: Crnti) -> Result<Registration> {
        let generation = self.inner.next_generation.inc();
        let registry = Arc::downgrade(&self.inner.registry);
        let logger = self.inner.logger.new(o!("ue_key" => key.0));
        info!(logger, "Start RRC connection establishment");
        let procedure = EnbConnectionProcedure::new(
            self.inner.config.max_retries,
            self.inner.config.setup_complete_timeout(),
            self.inner.io.clone(),
            move |result, ue: UeContext| {
                if let Some(registry) = registry.upgrade() {
                    registry.record_completion(key, generation, result, ue);
                }
            },
            logger,
        )?;
        Ok(Registration {
            generation,
            procedure,
        })
    }

    fn allocate_crnti(&self) -> Option<Crnti> {
        for _ in 0..=u16::MAX {
            let crnti = Crnti(self.inner.next_crnti.inc() as u16);
            let in_use = self
                .inner
                .registry
                .procedures
                .get(&crnti)
                .is_some_and(|r| !r.procedure.is_terminal());
            if !in_use {
                return Some(crnti);
            }
        }
        None
    }
}

// The eNB hands out the UE key as the transaction identifier of RrcConnectionSetup, so that
// RrcConnectionSetupComplete can be routed on its transaction identifier alone.
fn transaction_identifier_for(key: Crnti) -> RrcTransactionIdentifier {
    RrcTransactionIdentifier(key.0)
}

fn ue_key_for(rrc_transaction_identifier: RrcTransactionIdentifier) -> Crnti {
    Crnti(rrc_transaction_identifier.0)
}

// Registered with the IoService in place of the dispatcher itself, so that the IoService does
// not keep the dispatcher alive.
struct DispatcherHandler(Weak<Inner>);

#[async_trait]
impl MessageHandler<RrcPdu> for DispatcherHandler {
    async fn handle_message(&self, source: SocketAddr, pdu: RrcPdu) {
        if let Some(inner) = self.0.upgrade() {
            EnbDispatcher { inner }.handle_message(source, pdu).await
        }
    }
}
