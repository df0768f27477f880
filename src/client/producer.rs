use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LinesCodec};

use crate::transport::codec::{self, Request};
use crate::utils::error::ClientError;

/// Publishes `body` on `topic` through a fresh connection.
///
/// Returns once the broker has closed the connection, which it does after
/// fan-out completes or after rejecting the publish; the two cases are
/// indistinguishable to the producer.
pub async fn publish(
    addr: impl ToSocketAddrs,
    topic: &str,
    body: &str,
) -> Result<(), ClientError> {
    let stream = TcpStream::connect(addr).await?;
    let mut framed = Framed::new(stream, LinesCodec::new());

    let request = codec::encode_request(&Request::Publish {
        topic: topic.to_string(),
        body: body.to_string(),
    })?;
    framed.send(request.as_str()).await?;

    // the broker never answers a publish, it only hangs up
    while let Some(line) = framed.next().await {
        line?;
    }
    Ok(())
}
