//! # Biome P2P
//!
//! A small peer-to-peer node over libp2p.
//!
//! ## Features
//! - Pub/Sub messaging on one or more topics, without self-echo
//! - One-shot direct messages over a named stream protocol
//! - Bounded delivery queues with backpressure
//! - Kademlia, mDNS, UPnP and relay support
//! - Zero libp2p type exposure

pub mod config;
pub mod identity;
pub mod message;
mod behaviour;
mod command;
mod error;
mod node;
mod protocols;
mod pubsub;
mod queue;
mod runtime;
mod stream;

pub use config::{BiomeP2pConfig, BOOTSTRAP_BUNDLE_DELIMITER};
pub use error::BiomeP2pError;
pub use message::{Message, PeerId};
pub use node::{BiomeP2p, BiomeP2pHandle};
pub use protocols::direct::{frame, MAX_FRAME_SIZE};
pub use pubsub::PubSubTopic;
pub use queue::{Inbox, DELIVERY_QUEUE_CAPACITY};
pub use stream::StreamChannel;
