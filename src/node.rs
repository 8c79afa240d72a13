use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::behaviour::BiomeBehaviour;
use crate::command::Command;
use crate::config::BiomeP2pConfig;
use crate::error::BiomeP2pError;
use crate::identity;
use crate::message::{Message, PeerId};
use crate::protocols::direct;
use crate::pubsub::PubSubTopic;
use crate::queue::Inbox;
use crate::runtime::Runtime;
use crate::stream::StreamChannel;

use libp2p::{
    core::multiaddr::Protocol,
    noise,
    tcp,
    yamux,
    Multiaddr,
    Swarm,
    SwarmBuilder,
};
use std::time::Duration;

const COMMAND_BUFFER_SIZE: usize = 100;

/// A running P2P node.
///
/// Owns the host runtime, the joined topics and the direct stream channel.
/// Dropping the node cancels everything; [`BiomeP2p::shutdown`] does the
/// same and waits until the host is closed.
pub struct BiomeP2p {
    handle: BiomeP2pHandle,
    local_peer_id: PeerId,
    config: BiomeP2pConfig,
    topics: Vec<PubSubTopic>,
    stream: Option<StreamChannel>,
    cancel: CancellationToken,
    runtime: JoinHandle<()>,
    _cancel_on_drop: DropGuard,
}

/// Cloneable handle for interacting with the P2P node.
#[derive(Clone, Debug)]
pub struct BiomeP2pHandle {
    command_tx: mpsc::Sender<Command>,
}

impl BiomeP2p {
    /// Create and start the P2P node.
    pub async fn start(config: BiomeP2pConfig) -> Result<BiomeP2p, BiomeP2pError> {
        config.validate()?;

        // 1. Setup keys and identity
        let local_key = identity::resolve_keypair(config.private_key.as_deref())?;
        let local_peer_id = PeerId::from(local_key.public().to_peer_id());

        // 2. Setup host
        let mut swarm = build_swarm(local_key, &config)?;

        let listen_addr: Multiaddr = config.listen_address()
            .parse()
            .map_err(|e: libp2p::multiaddr::Error| BiomeP2pError::InvalidConfig(e.to_string()))?;
        swarm.listen_on(listen_addr)
            .map_err(|e| BiomeP2pError::NetworkError(e.to_string()))?;

        bootstrap(&mut swarm, config.bootstrap_addresses()?);

        let direct_protocol = config.protocol_name
            .as_deref()
            .map(direct::protocol_from_name)
            .transpose()?;
        let request_timeout = Duration::from_secs(config.request_timeout_secs);

        // 3. Lifetime
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let runtime = tokio::spawn(
            Runtime::new(swarm, direct_protocol, request_timeout, command_rx, cancel.clone()).run(),
        );
        let handle = BiomeP2pHandle { command_tx };
        let cancel_on_drop = cancel.clone().drop_guard();

        // 4. Topics
        let mut topics = Vec::with_capacity(config.topics.len());
        for name in &config.topics {
            let topic = PubSubTopic::join(name, handle.clone(), local_peer_id.clone(), cancel.clone()).await?;
            topics.push(topic);
        }

        // 5. Direct streams
        let stream = match &config.protocol_name {
            Some(protocol) => Some(StreamChannel::register(protocol, handle.clone()).await?),
            None => None,
        };

        info!(peer_id = %local_peer_id, "P2P node started");

        Ok(BiomeP2p {
            handle,
            local_peer_id,
            config,
            topics,
            stream,
            cancel,
            runtime,
            _cancel_on_drop: cancel_on_drop,
        })
    }

    pub fn handle(&self) -> BiomeP2pHandle {
        self.handle.clone()
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.local_peer_id
    }

    pub fn config(&self) -> &BiomeP2pConfig {
        &self.config
    }

    pub fn topics(&self) -> &[PubSubTopic] {
        &self.topics
    }

    pub fn topic(&self, name: &str) -> Option<&PubSubTopic> {
        self.topics.iter().find(|t| t.name() == name)
    }

    pub fn stream(&self) -> Option<&StreamChannel> {
        self.stream.as_ref()
    }

    fn primary_topic(&self) -> Result<&PubSubTopic, BiomeP2pError> {
        self.topics
            .first()
            .ok_or_else(|| BiomeP2pError::TopicNotJoined("<none>".to_string()))
    }

    fn stream_channel(&self) -> Result<&StreamChannel, BiomeP2pError> {
        self.stream.as_ref().ok_or(BiomeP2pError::ProtocolNotConfigured)
    }

    /// Publishes to the primary topic.
    pub async fn publish(&self, data: Vec<u8>) -> Result<(), BiomeP2pError> {
        self.primary_topic()?.publish(data).await
    }

    pub async fn send_to(&self, peer_id: &PeerId, data: Vec<u8>) -> Result<(), BiomeP2pError> {
        self.stream_channel()?.send(peer_id, data).await
    }

    /// Next message on the primary topic; `ChannelClosed` once the node has stopped.
    pub async fn receive_pubsub(&self) -> Result<Message, BiomeP2pError> {
        self.primary_topic()?.receive().await
    }

    pub async fn receive_stream(&self) -> Result<Message, BiomeP2pError> {
        self.stream_channel()?.receive().await
    }

    pub fn pubsub_inbox(&self) -> Result<Inbox, BiomeP2pError> {
        Ok(self.primary_topic()?.inbox())
    }

    pub fn stream_inbox(&self) -> Result<Inbox, BiomeP2pError> {
        Ok(self.stream_channel()?.inbox())
    }

    /// Stops the node: cancels every listening loop and closes the host.
    pub async fn shutdown(self) -> Result<(), BiomeP2pError> {
        let BiomeP2p { cancel, runtime, topics, local_peer_id, .. } = self;
        cancel.cancel();

        runtime
            .await
            .map_err(|e| BiomeP2pError::Internal(format!("runtime: {}", e)))?;
        for topic in topics {
            topic.stopped().await?;
        }

        info!(peer_id = %local_peer_id, "P2P node stopped");
        Ok(())
    }
}

fn build_swarm(
    local_key: libp2p::identity::Keypair,
    config: &BiomeP2pConfig,
) -> Result<Swarm<BiomeBehaviour>, BiomeP2pError> {
    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);
    // The builder only reports behaviour failures as boxed errors.
    let mut behaviour_error = None;

    let swarm = SwarmBuilder::with_existing_identity(local_key)
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        ).map_err(|e| BiomeP2pError::NetworkError(e.to_string()))?
        .with_dns().map_err(|e| BiomeP2pError::NetworkError(e.to_string()))?
        .with_relay_client(noise::Config::new, yamux::Config::default)
        .map_err(|e| BiomeP2pError::NetworkError(e.to_string()))?
        .with_behaviour(|key, relay_client| {
            BiomeBehaviour::new(key, relay_client, config).map_err(|e| {
                behaviour_error = Some(e.clone());
                Box::new(e) as Box<dyn std::error::Error + Send + Sync>
            })
        })
        .map_err(|e| behaviour_error.take().unwrap_or_else(|| BiomeP2pError::NetworkError(e.to_string())))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(idle_timeout))
        .build();

    Ok(swarm)
}

/// Hands bootstrap peers to the routing provider and dials them.
fn bootstrap(swarm: &mut Swarm<BiomeBehaviour>, peers: Vec<Multiaddr>) {
    if peers.is_empty() {
        return;
    }

    for ma in peers {
        if let Some(peer_id) = extract_peer_id_from_multiaddr(&ma) {
            if let Some(kad) = swarm.behaviour_mut().kad.as_mut() {
                kad.add_address(&peer_id, ma.clone());
            }
        }

        if let Err(e) = swarm.dial(ma.clone()) {
            warn!(address = %ma, "Failed to dial bootstrap peer: {}", e);
        }
    }

    if let Some(kad) = swarm.behaviour_mut().kad.as_mut() {
        if let Err(e) = kad.bootstrap() {
            debug!("Kademlia bootstrap not started: {}", e);
        }
    }
}

impl BiomeP2pHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, BiomeP2pError>>) -> Command,
    ) -> Result<T, BiomeP2pError> {
        let (tx, rx) = oneshot::channel();
        self.command_tx.send(make(tx))
            .await.map_err(|_| BiomeP2pError::NotStarted)?;
        rx.await.map_err(|_| BiomeP2pError::NotStarted)?
    }

    pub(crate) async fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Message>, BiomeP2pError> {
        self.request(|respond_to| Command::Subscribe { topic: topic.to_string(), respond_to })
            .await
    }

    pub(crate) async fn register_stream_handler(&self, deliver_to: mpsc::Sender<Message>) -> Result<(), BiomeP2pError> {
        self.request(|respond_to| Command::RegisterStreamHandler { deliver_to, respond_to })
            .await
    }

    /// Publishes on a topic this node has joined.
    pub async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), BiomeP2pError> {
        self.request(|respond_to| Command::Publish { topic: topic.to_string(), data, respond_to })
            .await
    }

    /// Sends one framed message to `peer_id` over the direct protocol.
    ///
    /// A missing trailing newline is appended; payloads with a newline
    /// anywhere else are rejected. Resolves once the frame is written and
    /// the substream closed.
    pub async fn send_to(&self, peer_id: &PeerId, data: Vec<u8>) -> Result<(), BiomeP2pError> {
        let peer_id = peer_id.to_libp2p()?;
        let frame = direct::frame(data)?;
        self.request(|respond_to| Command::SendDirect { peer_id, frame, respond_to })
            .await
    }

    pub async fn connected_peers(&self) -> Result<Vec<PeerId>, BiomeP2pError> {
        self.request(|respond_to| Command::GetConnectedPeers { respond_to })
            .await
    }

    pub async fn listen_addresses(&self) -> Result<Vec<String>, BiomeP2pError> {
        self.request(|respond_to| Command::GetListenAddresses { respond_to })
            .await
    }

    /// Peers known to be subscribed to `topic`.
    pub async fn topic_peers(&self, topic: &str) -> Result<Vec<PeerId>, BiomeP2pError> {
        self.request(|respond_to| Command::GetTopicPeers { topic: topic.to_string(), respond_to })
            .await
    }

    pub async fn discover_peers(&self) -> Result<(), BiomeP2pError> {
        self.request(|respond_to| Command::DiscoverPeers { respond_to })
            .await
    }
}

fn extract_peer_id_from_multiaddr(ma: &Multiaddr) -> Option<libp2p::PeerId> {
    ma.iter().find_map(|p| match p {
        Protocol::P2p(id) => Some(id),
        _ => None,
    })
}
