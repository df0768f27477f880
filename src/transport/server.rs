//! TCP listener and connection handler
//!
//! Each accepted connection gets its own task. The task reads request lines
//! until one decodes, then commits the connection to one role:
//! - a publish is fanned out and the connection closed (no acknowledgment)
//! - a subscribe turns the connection into a long-lived consumer stream
//!
//! Undecodable lines, including ones that are not UTF-8 or exceed the frame
//! limit, are dropped and reading continues.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::config::ServerSettings;
use crate::transport::codec::{self, Request, RequestFrame, RequestLineCodec};
use crate::utils::error::ServerError;

/// TCP listener feeding accepted connections to a shared `Broker`.
pub struct Server {
    listener: TcpListener,
    broker: Arc<Broker>,
    shutdown: CancellationToken,
}

impl Server {
    /// Binds the listener described by `settings`. Failing to bind is fatal.
    pub async fn bind(settings: &ServerSettings, broker: Arc<Broker>) -> Result<Self, ServerError> {
        if !settings.protocol.eq_ignore_ascii_case("tcp") {
            return Err(ServerError::UnsupportedProtocol(settings.protocol.clone()));
        }

        let listener =
            TcpListener::bind(&settings.address)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: settings.address.clone(),
                    source,
                })?;

        Ok(Self {
            listener,
            broker,
            shutdown: CancellationToken::new(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops `run` when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accepts connections until the shutdown token fires, then closes all
    /// subscriptions. A failed accept is logged and does not stop the loop.
    pub async fn run(self) {
        match self.listener.local_addr() {
            Ok(addr) => info!("listening for tcp connections on {addr}"),
            Err(e) => warn!(error = %e, "listener address unavailable"),
        }

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let broker = self.broker.clone();
                    tokio::spawn(handle_connection(broker, stream, peer));
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            }
        }

        self.broker.shutdown();
        info!("listener stopped");
    }
}

/// Serves one connection until it has been used as a producer or consumer,
/// or until the peer goes away.
pub async fn handle_connection(broker: Arc<Broker>, stream: TcpStream, peer: SocketAddr) {
    let peer = peer.to_string();
    debug!(%peer, "connection accepted");

    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(
        read_half,
        RequestLineCodec::new(broker.settings().max_frame_bytes),
    );
    let writer = FramedWrite::new(write_half, LinesCodec::new());

    loop {
        let line = match reader.next().await {
            Some(Ok(RequestFrame::Line(line))) => line,
            Some(Ok(RequestFrame::Oversized)) => {
                warn!(%peer, "dropping request line over the frame limit");
                continue;
            }
            Some(Err(e)) => {
                debug!(%peer, error = %e, "read failed");
                break;
            }
            None => {
                debug!(%peer, "connection closed by peer");
                break;
            }
        };

        if line.trim_ascii().is_empty() {
            continue;
        }

        match codec::decode_request(&line) {
            Ok(Request::Publish { topic, body }) => {
                match broker.publish(&topic, body).await {
                    Ok(report) => {
                        debug!(%peer, %topic, delivered = report.delivered, "publish handled")
                    }
                    Err(e) => warn!(%peer, %topic, error = %e, "publish rejected"),
                }
                break;
            }
            Ok(Request::Subscribe { topic }) => {
                broker.consume(&topic, reader, writer, &peer).await;
                return;
            }
            Err(e) => {
                debug!(%peer, error = %e, "dropping malformed request");
            }
        }
    }

    if let Err(e) = writer.into_inner().shutdown().await {
        debug!(%peer, error = %e, "error closing connection");
    }
}
