use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BiomeP2pError {
    #[error("Node is not running")]
    NotStarted,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Invalid peer id: {0}")]
    InvalidPeerId(String),

    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Topic not joined: {0}")]
    TopicNotJoined(String),

    #[error("No direct protocol configured")]
    ProtocolNotConfigured,

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Delivery channel closed")]
    ChannelClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}
