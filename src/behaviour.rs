use libp2p_stream as stream;
use libp2p::{
    gossipsub,
    identify,
    identity::Keypair,
    kad,
    mdns,
    relay,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour},
    upnp,
};
use std::time::Duration;

use crate::config::BiomeP2pConfig;
use crate::error::BiomeP2pError;
use crate::protocols::direct::protocol_from_name;

/// Identify protocol version announced by every node.
pub const IDENTIFY_PROTOCOL: &str = "/biome/1.0.0";

#[derive(NetworkBehaviour)]
pub struct BiomeBehaviour {
    pub gossipsub: gossipsub::Behaviour,
    pub identify: identify::Behaviour,
    pub direct: Toggle<stream::Behaviour>,
    pub kad: Toggle<kad::Behaviour<kad::store::MemoryStore>>,
    pub mdns: Toggle<mdns::tokio::Behaviour>,
    pub upnp: Toggle<upnp::tokio::Behaviour>,
    pub relay_client: Toggle<relay::client::Behaviour>,
}

impl BiomeBehaviour {
    pub fn new(
        local_key: &Keypair,
        relay_client: relay::client::Behaviour,
        config: &BiomeP2pConfig,
    ) -> Result<Self, BiomeP2pError> {
        let local_peer_id = local_key.public().to_peer_id();

        // GossipSub
        let gossip_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(Duration::from_secs(1))
            .validation_mode(gossipsub::ValidationMode::Strict)
            .max_transmit_size(1024 * 1024)
            .build()
            .map_err(|e| BiomeP2pError::NetworkError(format!("gossipsub config: {}", e)))?;
        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(local_key.clone()),
            gossip_config,
        )
        .map_err(|e| BiomeP2pError::NetworkError(format!("gossipsub: {}", e)))?;

        // Identify
        let identify = identify::Behaviour::new(
            identify::Config::new(IDENTIFY_PROTOCOL.into(), local_key.public())
                .with_agent_version(config.node_name.clone()),
        );

        // Direct streams, only when a protocol is configured
        let direct = match &config.protocol_name {
            Some(name) => {
                protocol_from_name(name)?;
                Some(stream::Behaviour::new())
            }
            None => None,
        };

        // Kademlia
        let kad = if config.enable_kad {
            let store = kad::store::MemoryStore::new(local_peer_id);
            let mut kad_config = kad::Config::new(kad::PROTOCOL_NAME);
            kad_config.set_query_timeout(Duration::from_secs(60));
            Some(kad::Behaviour::with_config(local_peer_id, store, kad_config))
        } else {
            None
        };

        // mDNS
        let mdns = if config.enable_mdns {
            let behaviour = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)
                .map_err(|e| BiomeP2pError::NetworkError(format!("mDNS: {}", e)))?;
            Some(behaviour)
        } else {
            None
        };

        let upnp = config.enable_upnp.then(upnp::tokio::Behaviour::default);
        let relay_client = config.enable_relay.then_some(relay_client);

        Ok(Self {
            gossipsub,
            identify,
            direct: Toggle::from(direct),
            kad: Toggle::from(kad),
            mdns: Toggle::from(mdns),
            upnp: Toggle::from(upnp),
            relay_client: Toggle::from(relay_client),
        })
    }
}
