use std::time::Duration;

use futures::prelude::*;
use libp2p_stream::IncomingStreams;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BiomeP2pError;
use crate::message::{Message, PeerId};
use crate::node::BiomeP2pHandle;
use crate::protocols::direct;
use crate::queue::{delivery_queue, Inbox, DELIVERY_QUEUE_CAPACITY};

/// Direct point-to-point channel on one named protocol.
///
/// Registration installs the inbound handler in the runtime; it stays
/// active for the node's lifetime. Every inbound substream carries exactly
/// one message, which lands in a bounded queue of
/// [`DELIVERY_QUEUE_CAPACITY`] entries.
pub struct StreamChannel {
    protocol: String,
    handle: BiomeP2pHandle,
    inbox: Inbox,
}

impl StreamChannel {
    pub(crate) async fn register(protocol: &str, handle: BiomeP2pHandle) -> Result<Self, BiomeP2pError> {
        let (deliver_to, inbox) = delivery_queue(DELIVERY_QUEUE_CAPACITY);
        handle.register_stream_handler(deliver_to).await?;
        debug!(%protocol, "Registered direct stream handler");

        Ok(Self {
            protocol: protocol.to_string(),
            handle,
            inbox,
        })
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    /// Waits for the next direct message.
    pub async fn receive(&self) -> Result<Message, BiomeP2pError> {
        self.inbox.recv().await
    }

    /// Sends one message to `peer_id` over a fresh substream.
    pub async fn send(&self, peer_id: &PeerId, data: Vec<u8>) -> Result<(), BiomeP2pError> {
        self.handle.send_to(peer_id, data).await
    }
}

/// Accept loop of the direct protocol.
///
/// Never waits on the delivery queue itself: substreams not taken off
/// `incoming` promptly are dropped by libp2p, so each one gets its own
/// handler task.
pub(crate) async fn accept(
    mut incoming: IncomingStreams,
    deliver_to: mpsc::Sender<Message>,
    read_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let (peer, substream) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = incoming.next() => match next {
                Some(accepted) => accepted,
                None => break,
            },
        };

        tokio::spawn(handle_inbound(
            PeerId::from(peer),
            substream,
            deliver_to.clone(),
            read_timeout,
            cancel.clone(),
        ));
    }
    debug!("Direct stream accept loop stopped");
}

/// Body of one inbound handler invocation.
///
/// Reads one frame, enqueues it (suspending while the queue is full), then
/// closes the substream. Any failure drops the substream, which resets it.
pub(crate) async fn handle_inbound<S>(
    sender: PeerId,
    mut substream: S,
    deliver_to: mpsc::Sender<Message>,
    read_timeout: Duration,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let data = match tokio::time::timeout(read_timeout, direct::read_frame(&mut substream)).await {
        Ok(Ok(data)) => data,
        Ok(Err(e)) => {
            debug!(peer = %sender, "Bad direct frame, resetting: {}", e);
            return;
        }
        Err(_) => {
            debug!(peer = %sender, "Direct frame read timed out, resetting");
            return;
        }
    };
    debug!(peer = %sender, bytes = data.len(), "Received direct message");

    let delivered = tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = deliver_to.send(Message::direct(sender.clone(), data)) => sent.is_ok(),
    };
    if !delivered {
        debug!(peer = %sender, "Stream queue closed, resetting");
        return;
    }

    if let Err(e) = substream.close().await {
        debug!(peer = %sender, "Graceful close failed, stream was reset: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use tokio::time::timeout;

    const READ_TIMEOUT: Duration = Duration::from_secs(1);

    fn wire(bytes: &[u8]) -> Cursor<Vec<u8>> {
        Cursor::new(bytes.to_vec())
    }

    #[tokio::test]
    async fn inbound_frame_is_enqueued_without_terminator() {
        let (deliver_to, inbox) = delivery_queue(DELIVERY_QUEUE_CAPACITY);

        handle_inbound(PeerId::new("remote"), wire(b"ping\n"), deliver_to, READ_TIMEOUT, CancellationToken::new()).await;

        let msg = inbox.recv().await.unwrap();
        assert_eq!(msg.data, b"ping");
        assert_eq!(msg.sender, PeerId::new("remote"));
        assert_eq!(msg.topic, None);
        assert_eq!(inbox.recv().await, Err(BiomeP2pError::ChannelClosed));
    }

    #[tokio::test]
    async fn unterminated_frame_is_not_delivered() {
        let (deliver_to, inbox) = delivery_queue(DELIVERY_QUEUE_CAPACITY);

        handle_inbound(PeerId::new("remote"), wire(b"ping"), deliver_to, READ_TIMEOUT, CancellationToken::new()).await;

        assert_eq!(inbox.recv().await, Err(BiomeP2pError::ChannelClosed));
    }

    #[tokio::test]
    async fn handlers_wait_for_room_in_queue() {
        let (deliver_to, inbox) = delivery_queue(1);

        let handlers: Vec<_> = (0..20)
            .map(|n| {
                tokio::spawn(handle_inbound(
                    PeerId::new("remote"),
                    wire(format!("ping{}\n", n).as_bytes()),
                    deliver_to.clone(),
                    READ_TIMEOUT,
                    CancellationToken::new(),
                ))
            })
            .collect();
        drop(deliver_to);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handlers.iter().filter(|h| h.is_finished()).count(), 1);

        let mut received = Vec::new();
        while let Ok(msg) = inbox.recv().await {
            received.push(msg.data_lossy());
        }
        received.sort();
        let mut expected: Vec<_> = (0..20).map(|n| format!("ping{}", n)).collect();
        expected.sort();
        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn cancellation_releases_a_waiting_handler() {
        let (deliver_to, inbox) = delivery_queue(1);
        deliver_to.try_send(Message::direct(PeerId::new("remote"), b"first".to_vec())).unwrap();
        let cancel = CancellationToken::new();

        let handler = tokio::spawn(handle_inbound(
            PeerId::new("remote"),
            wire(b"second\n"),
            deliver_to,
            READ_TIMEOUT,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handler.is_finished());

        cancel.cancel();
        timeout(Duration::from_secs(1), handler).await.unwrap().unwrap();

        assert_eq!(inbox.recv().await.unwrap().data, b"first");
        assert_eq!(inbox.recv().await, Err(BiomeP2pError::ChannelClosed));
    }
}
