use tokio::sync::{mpsc, oneshot};

use crate::error::BiomeP2pError;
use crate::message::{Message, PeerId};

pub type Responder<T> = oneshot::Sender<Result<T, BiomeP2pError>>;

#[derive(Debug)]
pub enum Command {
    // PubSub
    Subscribe {
        topic: String,
        respond_to: Responder<mpsc::Receiver<Message>>,
    },
    Publish {
        topic: String,
        data: Vec<u8>,
        respond_to: Responder<()>,
    },

    // Direct streams
    RegisterStreamHandler {
        deliver_to: mpsc::Sender<Message>,
        respond_to: Responder<()>,
    },
    SendDirect {
        peer_id: libp2p::PeerId,
        frame: Vec<u8>,
        respond_to: Responder<()>,
    },

    // Queries
    GetConnectedPeers {
        respond_to: Responder<Vec<PeerId>>,
    },
    GetListenAddresses {
        respond_to: Responder<Vec<String>>,
    },
    GetTopicPeers {
        topic: String,
        respond_to: Responder<Vec<PeerId>>,
    },
    DiscoverPeers {
        respond_to: Responder<()>,
    },
}
