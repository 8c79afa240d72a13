use std::fmt;
use std::str::FromStr;

use crate::error::BiomeP2pError;

/// Peer identity in its base58 text form.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PeerId(pub(crate) String);

impl PeerId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the text form into the substrate's identity type.
    pub(crate) fn to_libp2p(&self) -> Result<libp2p::PeerId, BiomeP2pError> {
        libp2p::PeerId::from_str(&self.0)
            .map_err(|e| BiomeP2pError::InvalidPeerId(format!("{}: {}", self.0, e)))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<libp2p::PeerId> for PeerId {
    fn from(id: libp2p::PeerId) -> Self {
        Self(id.to_base58())
    }
}

impl FromStr for PeerId {
    type Err = BiomeP2pError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = libp2p::PeerId::from_str(s)
            .map_err(|e| BiomeP2pError::InvalidPeerId(format!("{}: {}", s, e)))?;
        Ok(id.into())
    }
}

/// A datum received from the network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Originator of the message.
    pub sender: PeerId,
    /// Topic the message arrived on; `None` for direct stream deliveries.
    pub topic: Option<String>,
    pub data: Vec<u8>,
}

impl Message {
    pub fn pubsub(sender: PeerId, topic: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            sender,
            topic: Some(topic.into()),
            data,
        }
    }

    pub fn direct(sender: PeerId, data: Vec<u8>) -> Self {
        Self {
            sender,
            topic: None,
            data,
        }
    }

    pub fn data_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}
