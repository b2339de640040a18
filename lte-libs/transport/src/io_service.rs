//! io_service - a named UDP endpoint that serializes outbound messages and hands inbound ones
//! to a handler

use crate::TransportError;
use async_net::UdpSocket;
use async_std::sync::{Mutex, RwLock};
use async_std::task::JoinHandle;
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use slog::{Logger, debug, info, o, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use stop_token::{StopSource, StopToken, prelude::*};

const MAX_DATAGRAM_LEN: usize = 65535;

/// Receiver of the messages arriving at an IoService.  Called on the service's receive task,
/// one message at a time.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync + 'static {
    async fn handle_message(&self, source: SocketAddr, message: M);
}

/// A datagram endpoint.  Sends are fire-and-forget: a successful send says nothing about delivery.
pub struct IoService<M> {
    inner: Arc<Inner<M>>,
}

impl<M> Clone for IoService<M> {
    fn clone(&self) -> Self {
        IoService {
            inner: self.inner.clone(),
        }
    }
}

struct Inner<M> {
    name: String,
    bind_address: SocketAddr,
    socket: RwLock<Option<UdpSocket>>,
    handler: RwLock<Option<Arc<dyn MessageHandler<M>>>>,
    running: Mutex<Option<Running>>,
    logger: Logger,
}

struct Running {
    stop_source: StopSource,
    receive_task: JoinHandle<()>,
}

impl<M> IoService<M>
where
    M: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(name: &str, bind_address: SocketAddr, logger: &Logger) -> Self {
        IoService {
            inner: Arc::new(Inner {
                name: name.to_string(),
                bind_address,
                socket: RwLock::new(None),
                handler: RwLock::new(None),
                running: Mutex::new(None),
                logger: logger.new(o!("io" => name.to_string())),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bind the socket and start the receive task.  Returns the bound address, which differs
    /// from the requested one when port 0 was requested.  Starting a started service is a no-op.
    pub async fn start(&self) -> Result<SocketAddr, TransportError> {
        let mut running = self.inner.running.lock().await;
        if running.is_none() {
            let socket = UdpSocket::bind(self.inner.bind_address).await?;
            let stop_source = StopSource::new();
            let receive_task = async_std::task::spawn(receive_loop(
                self.inner.clone(),
                socket.clone(),
                stop_source.token(),
            ));
            info!(self.inner.logger, "Listening on {}", socket.local_addr()?);
            *self.inner.socket.write().await = Some(socket);
            *running = Some(Running {
                stop_source,
                receive_task,
            });
        }
        self.local_addr().await
    }

    /// Stop receiving, close the socket and forget the registered handler.
    pub async fn stop(&self) {
        let Some(Running {
            stop_source,
            receive_task,
        }) = self.inner.running.lock().await.take()
        else {
            return;
        };
        drop(stop_source);
        receive_task.await;
        self.inner.socket.write().await.take();
        self.inner.handler.write().await.take();
        info!(self.inner.logger, "Stopped");
    }

    pub async fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        match &*self.inner.socket.read().await {
            Some(socket) => Ok(socket.local_addr()?),
            None => Err(TransportError::NotStarted(self.inner.name.clone())),
        }
    }

    /// Register the handler for inbound messages, replacing any previous one.
    pub async fn register_handler(&self, handler: Arc<dyn MessageHandler<M>>) {
        *self.inner.handler.write().await = Some(handler);
    }

    pub async fn send_message(
        &self,
        destination: SocketAddr,
        message: &M,
    ) -> Result<(), TransportError> {
        let socket = self
            .inner
            .socket
            .read()
            .await
            .clone()
            .ok_or_else(|| TransportError::NotStarted(self.inner.name.clone()))?;
        let bytes = serde_json::to_vec(message)?;
        socket.send_to(&bytes, destination).await?;
        Ok(())
    }
}

async fn receive_loop<M>(inner: Arc<Inner<M>>, socket: UdpSocket, stop_token: StopToken)
where
    M: DeserializeOwned + Send + 'static,
{
    let mut buf = vec![0u8; MAX_DATAGRAM_LEN];
    loop {
        let (len, source) = match socket.recv_from(&mut buf).timeout_at(stop_token.clone()).await
        {
            Err(_stopped) => break,
            Ok(Err(e)) => {
                warn!(inner.logger, "Receive error - {e}");
                continue;
            }
            Ok(Ok(x)) => x,
        };
        let message = match serde_json::from_slice::<M>(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                warn!(inner.logger, "Dropping undecodable datagram from {source} - {e}");
                continue;
            }
        };
        let handler = inner.handler.read().await.clone();
        match handler {
            Some(handler) => handler.handle_message(source, message).await,
            None => debug!(inner.logger, "No handler registered - drop message from {source}"),
        }
    }
}
