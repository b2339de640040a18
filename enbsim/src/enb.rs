use crate::{EnbConfig, EnbDispatcher};
use anyhow::Result;
use rrc::RrcPdu;
use slog::{Logger, info};
use std::net::SocketAddr;
use transport::IoService;

/// A simulated eNB: one Uu transport endpoint with a dispatcher running RRC connection
/// establishment for every UE that contacts it.
#[derive(Clone)]
pub struct Enb {
    io: IoService<RrcPdu>,
    dispatcher: EnbDispatcher,
    local_addr: SocketAddr,
    logger: Logger,
}

impl Enb {
    pub async fn start(
        config: EnbConfig,
        bind_address: SocketAddr,
        logger: Logger,
    ) -> Result<Self> {
        let io = IoService::new("enb", bind_address, &logger);
        let dispatcher = EnbDispatcher::new(io.clone(), config, logger.clone())?;
        let local_addr = io.start().await?;
        dispatcher.execute().await;
        info!(&logger, "eNB serving Uu on {local_addr}");
        Ok(Enb {
            io,
            dispatcher,
            local_addr,
            logger,
        })
    }

    pub fn dispatcher(&self) -> &EnbDispatcher {
        &self.dispatcher
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn graceful_shutdown(self) {
        info!(&self.logger, "Shutting down");
        self.io.stop().await;
    }
}
