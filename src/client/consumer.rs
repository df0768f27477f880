//! Consumer connection
//!
//! `Consumer` holds a subscribed connection and yields decoded deliveries.
//! Broker heartbeats are consumed silently. Dropping the consumer closes the
//! connection, which the broker notices and unsubscribes.

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::broker::message::Message;
use crate::transport::codec::{self, Request};
use crate::utils::error::ClientError;

/// A connection subscribed to one topic.
pub struct Consumer {
    reader: FramedRead<OwnedReadHalf, LinesCodec>,
    _writer: FramedWrite<OwnedWriteHalf, LinesCodec>,
}

impl Consumer {
    /// Connects to `addr` and subscribes to `topic`.
    ///
    /// The broker registers the subscription asynchronously; messages
    /// published before it does are not delivered.
    pub async fn connect(addr: impl ToSocketAddrs, topic: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        let mut writer = FramedWrite::new(write_half, LinesCodec::new());

        let request = codec::encode_request(&Request::Subscribe {
            topic: topic.to_string(),
        })?;
        writer.send(request.as_str()).await?;

        Ok(Self {
            reader: FramedRead::new(read_half, LinesCodec::new()),
            _writer: writer,
        })
    }

    /// Waits for the next delivery. `Ok(None)` means the broker closed the
    /// connection.
    pub async fn next_message(&mut self) -> Result<Option<Message>, ClientError> {
        while let Some(line) = self.reader.next().await {
            let line = line?;
            if codec::is_heartbeat(&line) {
                continue;
            }
            return Ok(Some(codec::decode_delivery(&line)?));
        }
        Ok(None)
    }
}
