//! mock_enb - an eNB that completes random access, then either swallows RrcConnectionRequest or
//! answers it with a fixed number of copies of RrcConnectionSetup

use anyhow::Result;
use async_trait::async_trait;
use atomic_counter::{AtomicCounter, RelaxedCounter};
use rrc::{Crnti, RrcMessage, RrcPdu, RrcTransactionIdentifier};
use slog::{Logger, debug, o};
use std::net::SocketAddr;
use std::sync::Arc;
use transport::{IoService, MessageHandler, local_endpoint};

#[derive(Clone)]
pub struct MockEnb {
    io: IoService<RrcPdu>,
    inner: Arc<Counters>,
}

struct Counters {
    setup_copies: usize,
    next_crnti: RelaxedCounter,
    preambles: RelaxedCounter,
    connection_requests: RelaxedCounter,
    setup_completes: RelaxedCounter,
    logger: Logger,
}

impl MockEnb {
    /// Never answers RrcConnectionRequest.
    pub async fn start(logger: &Logger) -> Result<Self> {
        Self::start_answering(0, logger).await
    }

    /// Answers each RrcConnectionRequest with `setup_copies` identical RrcConnectionSetups.
    pub async fn start_answering(setup_copies: usize, logger: &Logger) -> Result<Self> {
        let logger = logger.new(o!("mock_enb" => 1));
        let io = IoService::new("mock-enb", local_endpoint(0), &logger);
        io.start().await?;
        let enb = MockEnb {
            io,
            inner: Arc::new(Counters {
                setup_copies,
                next_crnti: RelaxedCounter::new(0),
                preambles: RelaxedCounter::new(0),
                connection_requests: RelaxedCounter::new(0),
                setup_completes: RelaxedCounter::new(0),
                logger,
            }),
        };
        enb.io.register_handler(Arc::new(enb.clone())).await;
        Ok(enb)
    }

    pub async fn address(&self) -> Result<SocketAddr> {
        Ok(self.io.local_addr().await?)
    }

    pub fn preambles(&self) -> usize {
        self.inner.preambles.get()
    }

    pub fn connection_requests(&self) -> usize {
        self.inner.connection_requests.get()
    }

    pub fn setup_completes(&self) -> usize {
        self.inner.setup_completes.get()
    }

    pub async fn stop(&self) {
        self.io.stop().await
    }
}

#[async_trait]
impl MessageHandler<RrcPdu> for MockEnb {
    async fn handle_message(&self, source: SocketAddr, pdu: RrcPdu) {
        match pdu.message {
            RrcMessage::RandomAccessPreamble { preamble_id } => {
                self.inner.preambles.inc();
                let crnti = Crnti(self.inner.next_crnti.inc() as u16);
                let response = rrc::build::random_access_response(preamble_id, crnti, 34);
                let _ = self.io.send_message(source, &response).await;
            }
            RrcMessage::RrcConnectionRequest {
                temporary_crnti, ..
            } => {
                self.inner.connection_requests.inc();
                if self.inner.setup_copies == 0 {
                    debug!(self.inner.logger, "Swallow RrcConnectionRequest");
                    return;
                }
                let setup = rrc::build::connection_setup(
                    temporary_crnti,
                    RrcTransactionIdentifier(temporary_crnti.0),
                );
                for _ in 0..self.inner.setup_copies {
                    let _ = self.io.send_message(source, &setup).await;
                }
            }
            RrcMessage::RrcConnectionSetupComplete { .. } => {
                self.inner.setup_completes.inc();
            }
            m => debug!(self.inner.logger, "Ignore {}", m.name()),
        }
    }
}
