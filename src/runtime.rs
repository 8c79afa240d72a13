use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use libp2p::{
    gossipsub,
    identify,
    kad,
    mdns,
    swarm::SwarmEvent,
    upnp,
    PeerId as LibPeerId,
    StreamProtocol,
    Swarm,
};

use libp2p_stream::Control;

use crate::behaviour::{BiomeBehaviour, BiomeBehaviourEvent};
use crate::command::Command;
use crate::error::BiomeP2pError;
use crate::message::{Message, PeerId};
use crate::protocols::direct;
use crate::stream;

/// Messages a topic subscription buffers between the runtime and the topic
/// listener.
///
/// The runtime never waits on a topic: once this buffer is full, further
/// messages for that topic are dropped with a warning until the listener
/// catches up. Backpressure from a full delivery queue therefore stops at
/// the listener and does not throttle gossip ingestion.
pub const SUBSCRIPTION_BUFFER_SIZE: usize = 32;

pub struct Runtime {
    swarm: Swarm<BiomeBehaviour>,
    command_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,

    // State
    subscriptions: HashMap<gossipsub::TopicHash, (String, mpsc::Sender<Message>)>,
    direct: Option<(StreamProtocol, Control)>,
    request_timeout: Duration,
}

impl Runtime {
    pub fn new(
        swarm: Swarm<BiomeBehaviour>,
        direct_protocol: Option<StreamProtocol>,
        request_timeout: Duration,
        command_rx: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Self {
        let control = swarm.behaviour().direct.as_ref().map(|b| b.new_control());
        let direct = direct_protocol.zip(control);
        Self {
            swarm,
            command_rx,
            cancel,
            subscriptions: HashMap::new(),
            direct,
            request_timeout,
        }
    }

    pub async fn run(mut self) {
        // Main Loop
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Cancellation requested, shutting down");
                    break;
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(c) => self.handle_command(c),
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event);
                }
            }
        }

        self.close();
    }

    /// Closes the host: stops listening and drops every connection.
    fn close(mut self) {
        let peers: Vec<LibPeerId> = self.swarm.connected_peers().copied().collect();
        for peer in peers {
            let _ = self.swarm.disconnect_peer_id(peer);
        }
        // Ends the direct accept loop and releases handlers waiting on a full queue.
        self.cancel.cancel();
        // Dropping the senders ends every topic listener.
        self.subscriptions.clear();
        info!(peer_id = %self.swarm.local_peer_id(), "Host closed");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe { topic, respond_to } => {
                let ident = gossipsub::IdentTopic::new(&topic);
                let res = match self.swarm.behaviour_mut().gossipsub.subscribe(&ident) {
                    Ok(_) => {
                        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER_SIZE);
                        self.subscriptions.insert(ident.hash(), (topic.clone(), tx));
                        info!(%topic, "Joined topic");
                        Ok(rx)
                    }
                    Err(e) => Err(BiomeP2pError::NetworkError(e.to_string())),
                };
                let _ = respond_to.send(res);
            }
            Command::Publish { topic, data, respond_to } => {
                let ident = gossipsub::IdentTopic::new(&topic);
                let res = if !self.subscriptions.contains_key(&ident.hash()) {
                    Err(BiomeP2pError::TopicNotJoined(topic))
                } else {
                    match self.swarm.behaviour_mut().gossipsub.publish(ident, data) {
                        Ok(id) => {
                            debug!(%topic, message_id = %id, "Published");
                            Ok(())
                        }
                        Err(gossipsub::PublishError::InsufficientPeers) => {
                            debug!(%topic, "Published with no subscribed peers yet");
                            Ok(())
                        }
                        Err(e) => Err(BiomeP2pError::NetworkError(e.to_string())),
                    }
                };
                let _ = respond_to.send(res);
            }
            Command::RegisterStreamHandler { deliver_to, respond_to } => {
                let res = match &mut self.direct {
                    Some((protocol, control)) => match control.accept(protocol.clone()) {
                        Ok(incoming) => {
                            tokio::spawn(stream::accept(
                                incoming,
                                deliver_to,
                                self.request_timeout,
                                self.cancel.clone(),
                            ));
                            Ok(())
                        }
                        Err(e) => Err(BiomeP2pError::Internal(e.to_string())),
                    },
                    None => Err(BiomeP2pError::ProtocolNotConfigured),
                };
                let _ = respond_to.send(res);
            }
            Command::SendDirect { peer_id, frame, respond_to } => match &self.direct {
                Some((protocol, control)) => {
                    // open_stream only completes while this loop polls the swarm.
                    let send = direct::send(
                        control.clone(),
                        peer_id,
                        protocol.clone(),
                        frame,
                        self.request_timeout,
                    );
                    tokio::spawn(async move {
                        let res = send.await;
                        if let Err(e) = &res {
                            warn!(%peer_id, "Direct send failed: {}", e);
                        }
                        let _ = respond_to.send(res);
                    });
                }
                None => {
                    let _ = respond_to.send(Err(BiomeP2pError::ProtocolNotConfigured));
                }
            },
            Command::GetConnectedPeers { respond_to } => {
                let peers = self.swarm.connected_peers()
                    .map(|p| PeerId::from(*p))
                    .collect();
                let _ = respond_to.send(Ok(peers));
            }
            Command::GetListenAddresses { respond_to } => {
                let addrs = self.swarm.listeners().map(|a| a.to_string()).collect();
                let _ = respond_to.send(Ok(addrs));
            }
            Command::GetTopicPeers { topic, respond_to } => {
                let hash = gossipsub::IdentTopic::new(&topic).hash();
                let peers = self.swarm.behaviour().gossipsub.all_peers()
                    .filter(|(_, topics)| topics.contains(&&hash))
                    .map(|(p, _)| PeerId::from(*p))
                    .collect();
                let _ = respond_to.send(Ok(peers));
            }
            Command::DiscoverPeers { respond_to } => {
                let res = match self.swarm.behaviour_mut().kad.as_mut() {
                    Some(kad) => kad.bootstrap()
                        .map(|_| ())
                        .map_err(|e| BiomeP2pError::NetworkError(e.to_string())),
                    None => Err(BiomeP2pError::NetworkError("Kademlia is disabled".into())),
                };
                let _ = respond_to.send(res);
            }
        }
    }

    fn handle_swarm_event(&mut self, event: SwarmEvent<BiomeBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}/p2p/{}", address, self.swarm.local_peer_id());
            }
            SwarmEvent::Behaviour(BiomeBehaviourEvent::Gossipsub(gossipsub::Event::Message { propagation_source, message, .. })) => {
                self.deliver_pubsub(propagation_source, message);
            }
            SwarmEvent::Behaviour(BiomeBehaviourEvent::Gossipsub(gossipsub::Event::Subscribed { peer_id, topic })) => {
                debug!(%peer_id, %topic, "Peer subscribed");
            }
            SwarmEvent::Behaviour(BiomeBehaviourEvent::Mdns(mdns::Event::Discovered(list))) => {
                for (peer_id, multiaddr) in list {
                    debug!(%peer_id, %multiaddr, "Discovered peer via mDNS");
                    if let Some(kad) = self.swarm.behaviour_mut().kad.as_mut() {
                        kad.add_address(&peer_id, multiaddr.clone());
                    }
                    if !self.swarm.is_connected(&peer_id) {
                        if let Err(e) = self.swarm.dial(multiaddr) {
                            debug!(%peer_id, "Failed to dial discovered peer: {}", e);
                        }
                    }
                }
            }
            SwarmEvent::Behaviour(BiomeBehaviourEvent::Identify(identify::Event::Received { peer_id, info, .. })) => {
                // Add addresses to Kademlia
                if let Some(kad) = self.swarm.behaviour_mut().kad.as_mut() {
                    for addr in info.listen_addrs {
                        kad.add_address(&peer_id, addr);
                    }
                }
            }
            SwarmEvent::Behaviour(BiomeBehaviourEvent::Kad(kad::Event::RoutingUpdated { peer, .. })) => {
                debug!(%peer, "Routing table updated");
            }
            SwarmEvent::Behaviour(BiomeBehaviourEvent::Upnp(upnp::Event::NewExternalAddr(addr))) => {
                info!(%addr, "UPnP mapped external address");
            }
            SwarmEvent::Behaviour(BiomeBehaviourEvent::Upnp(upnp::Event::NonRoutableGateway)) => {
                warn!("UPnP gateway is not exposed to the public network");
            }
            SwarmEvent::ConnectionEstablished { peer_id, endpoint, .. } => {
                debug!(%peer_id, address = %endpoint.get_remote_address(), "Connection established");
            }
            SwarmEvent::ConnectionClosed { peer_id, cause, .. } => {
                debug!(%peer_id, ?cause, "Connection closed");
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!(?peer_id, "Outgoing connection failed: {}", error);
            }
            _ => {}
        }
    }

    fn deliver_pubsub(&mut self, propagation_source: LibPeerId, message: gossipsub::Message) {
        let Some((topic, tx)) = self.subscriptions.get(&message.topic) else {
            return;
        };
        let sender = message.source.unwrap_or(propagation_source);
        let delivery = Message::pubsub(sender.into(), topic.clone(), message.data);

        if !offer(topic, tx, delivery) {
            debug!(%topic, "Topic listener gone, dropping subscription");
            self.subscriptions.remove(&message.topic);
        }
    }
}

/// Hands a message to a topic listener without waiting.
///
/// A full subscription buffer drops the message. Returns `false` once the
/// listener is gone.
fn offer(topic: &str, tx: &mpsc::Sender<Message>, delivery: Message) -> bool {
    match tx.try_send(delivery) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(%topic, "Subscriber too slow, dropping message");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}
