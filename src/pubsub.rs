use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BiomeP2pError;
use crate::message::{Message, PeerId};
use crate::node::BiomeP2pHandle;
use crate::queue::{delivery_queue, Inbox, DELIVERY_QUEUE_CAPACITY};

/// Membership in one gossipsub topic.
///
/// A listening task moves messages from the topic subscription into a
/// bounded queue, skipping the ones this node published itself.
pub struct PubSubTopic {
    name: String,
    handle: BiomeP2pHandle,
    inbox: Inbox,
    listener: JoinHandle<()>,
}

impl PubSubTopic {
    pub(crate) async fn join(
        name: &str,
        handle: BiomeP2pHandle,
        local_peer_id: PeerId,
        cancel: CancellationToken,
    ) -> Result<Self, BiomeP2pError> {
        let subscription = handle.subscribe(name).await?;
        let (deliver_to, inbox) = delivery_queue(DELIVERY_QUEUE_CAPACITY);
        let listener = tokio::spawn(listen(subscription, local_peer_id, deliver_to, cancel));

        Ok(Self {
            name: name.to_string(),
            handle,
            inbox,
            listener,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn inbox(&self) -> Inbox {
        self.inbox.clone()
    }

    /// Waits for the next message from another peer.
    pub async fn receive(&self) -> Result<Message, BiomeP2pError> {
        self.inbox.recv().await
    }

    /// Publishes `data` to every current subscriber of the topic.
    ///
    /// Returns once the message is handed to the substrate; there is no
    /// delivery acknowledgement.
    pub async fn publish(&self, data: Vec<u8>) -> Result<(), BiomeP2pError> {
        self.handle.publish(&self.name, data).await
    }

    /// Waits for the listening task to finish after cancellation.
    pub(crate) async fn stopped(self) -> Result<(), BiomeP2pError> {
        self.listener
            .await
            .map_err(|e| BiomeP2pError::Internal(format!("listener for {}: {}", self.name, e)))
    }
}

/// Listening loop of a topic.
///
/// Ends when the subscription ends or `cancel` fires; dropping
/// `deliver_to` on the way out closes the delivery queue.
pub(crate) async fn listen(
    mut subscription: mpsc::Receiver<Message>,
    local_peer_id: PeerId,
    deliver_to: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = subscription.recv() => match next {
                Some(message) => message,
                None => break,
            },
        };

        // exclude messages we published ourselves
        if message.sender == local_peer_id {
            continue;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = deliver_to.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!(peer_id = %local_peer_id, "Topic listener stopped");
}
