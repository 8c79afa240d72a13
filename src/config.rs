use std::path::Path;
use std::str::FromStr;

use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};

use crate::error::BiomeP2pError;
use crate::identity;

/// Delimiter used when bootstrap peers are passed as a single string.
pub const BOOTSTRAP_BUNDLE_DELIMITER: char = ';';

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiomeP2pConfig {
    /// Topics to join; the first one is the primary topic.
    pub topics: Vec<String>,

    /// Direct stream protocol, e.g. `/biome/direct/1.0.0`. `None` disables direct streams.
    pub protocol_name: Option<String>,

    /// Port to listen on (0 for random)
    pub listen_port: u16,

    /// List of Multiaddr strings to bootstrap from
    pub bootstrap_peers: Vec<String>,

    /// Encoded private key; a fresh Ed25519 key is generated when absent.
    #[serde(with = "identity::serde_base64")]
    pub private_key: Option<Vec<u8>>,

    /// Identity name for the node (used in Identify protocol)
    pub node_name: String,

    /// Bind to 127.0.0.1 instead of 0.0.0.0
    pub local_only: bool,

    /// Enable local network discovery via mDNS
    pub enable_mdns: bool,

    /// Enable Kademlia DHT for peer routing
    pub enable_kad: bool,

    /// Try to open the listen port on the gateway via UPnP
    pub enable_upnp: bool,

    /// Accept relayed connections through circuit relays
    pub enable_relay: bool,

    /// Bound on opening and writing an outbound direct message, and on
    /// reading an inbound one
    pub request_timeout_secs: u64,

    pub idle_timeout_secs: u64,
}

impl Default for BiomeP2pConfig {
    fn default() -> Self {
        Self {
            topics: vec!["biome".to_string()],
            protocol_name: None,
            listen_port: 0,
            bootstrap_peers: vec![],
            private_key: None,
            node_name: "biome-node".to_string(),
            local_only: false,
            enable_mdns: true,
            enable_kad: true,
            enable_upnp: false,
            enable_relay: false,
            request_timeout_secs: 10,
            idle_timeout_secs: 60,
        }
    }
}

impl BiomeP2pConfig {
    pub fn new(topic: &str) -> Self {
        Self {
            topics: vec![topic.to_string()],
            ..Self::default()
        }
    }

    pub fn with_protocol(mut self, protocol_name: &str) -> Self {
        self.protocol_name = Some(protocol_name.to_string());
        self
    }

    /// Appends the peers of a `;`-delimited bundle. An empty bundle adds nothing.
    pub fn with_bootstrap_bundle(mut self, bundle: &str) -> Self {
        self.bootstrap_peers.extend(
            bundle
                .split(BOOTSTRAP_BUNDLE_DELIMITER)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn with_private_key_base64(mut self, text: &str) -> Result<Self, BiomeP2pError> {
        self.private_key = if text.trim().is_empty() {
            None
        } else {
            Some(identity::decode_private_key_base64(text)?)
        };
        Ok(self)
    }

    pub fn primary_topic(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }

    pub fn from_json_str(json: &str) -> Result<Self, BiomeP2pError> {
        serde_json::from_str(json).map_err(|e| BiomeP2pError::InvalidConfig(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BiomeP2pError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BiomeP2pError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn listen_address(&self) -> String {
        let ip = if self.local_only { "127.0.0.1" } else { "0.0.0.0" };
        format!("/ip4/{}/tcp/{}", ip, self.listen_port)
    }

    pub(crate) fn bootstrap_addresses(&self) -> Result<Vec<Multiaddr>, BiomeP2pError> {
        self.bootstrap_peers
            .iter()
            .map(|addr| {
                Multiaddr::from_str(addr).map_err(|e| {
                    BiomeP2pError::InvalidConfig(format!("bad bootstrap peer {}: {}", addr, e))
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), BiomeP2pError> {
        if self.topics.is_empty() {
            return Err(BiomeP2pError::InvalidConfig(
                "at least one topic is required".into(),
            ));
        }
        if let Some(topic) = self.topics.iter().find(|t| t.trim().is_empty()) {
            return Err(BiomeP2pError::InvalidTopic(format!("{:?}", topic)));
        }
        if let Some(protocol) = &self.protocol_name {
            if !protocol.starts_with('/') {
                return Err(BiomeP2pError::InvalidConfig(format!(
                    "protocol name must start with '/': {}",
                    protocol
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(BiomeP2pError::InvalidConfig(
                "request_timeout_secs must be greater than 0".into(),
            ));
        }
        self.bootstrap_addresses()?;
        Ok(())
    }
}
