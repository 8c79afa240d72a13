//! Bounded delivery queues between network tasks and consumers.
//!
//! The producer side is a plain `mpsc::Sender` held by a listening task or
//! an inbound stream handler; a full queue suspends that producer until a
//! consumer drains an entry. The consumer side is an [`Inbox`], which can
//! be cloned and shared between any number of consumers. Once every
//! producer is gone and the queue is drained, receives report
//! [`BiomeP2pError::ChannelClosed`].

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::BiomeP2pError;
use crate::message::Message;

/// Pending messages a delivery queue holds before producers block.
pub const DELIVERY_QUEUE_CAPACITY: usize = 128;

pub(crate) fn delivery_queue(capacity: usize) -> (mpsc::Sender<Message>, Inbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        tx,
        Inbox {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

#[derive(Clone, Debug)]
pub struct Inbox {
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
}

impl Inbox {
    /// Waits for the next message.
    pub async fn recv(&self) -> Result<Message, BiomeP2pError> {
        self.rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(BiomeP2pError::ChannelClosed)
    }

    /// Returns the next message if one is queued right now.
    ///
    /// `Ok(None)` also covers the case where another consumer is currently
    /// waiting on the queue.
    pub fn try_recv(&self) -> Result<Option<Message>, BiomeP2pError> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Ok(None);
        };
        match rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(BiomeP2pError::ChannelClosed),
        }
    }

    /// Blocking variant of [`Inbox::recv`] for synchronous callers.
    ///
    /// Must not be called from within an async execution context.
    pub fn recv_blocking(&self) -> Result<Message, BiomeP2pError> {
        self.rx
            .blocking_lock()
            .blocking_recv()
            .ok_or(BiomeP2pError::ChannelClosed)
    }
}
