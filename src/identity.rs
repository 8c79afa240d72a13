//! Node identity handling.
//!
//! Private keys travel as the substrate's protobuf key encoding. Callers
//! that move keys through text (config files, command lines) use the
//! standard base64 form of those bytes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use libp2p::identity::Keypair;

use crate::error::BiomeP2pError;
use crate::message::PeerId;

/// Generates a fresh Ed25519 key and returns its encoded bytes.
pub fn generate_private_key() -> Result<Vec<u8>, BiomeP2pError> {
    encode_private_key(&Keypair::generate_ed25519())
}

pub fn encode_private_key(keypair: &Keypair) -> Result<Vec<u8>, BiomeP2pError> {
    keypair
        .to_protobuf_encoding()
        .map_err(|e| BiomeP2pError::InvalidKey(e.to_string()))
}

pub fn decode_private_key(bytes: &[u8]) -> Result<Keypair, BiomeP2pError> {
    Keypair::from_protobuf_encoding(bytes).map_err(|e| BiomeP2pError::InvalidKey(e.to_string()))
}

pub fn encode_private_key_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_private_key_base64(text: &str) -> Result<Vec<u8>, BiomeP2pError> {
    BASE64
        .decode(text.trim())
        .map_err(|e| BiomeP2pError::InvalidKey(format!("bad base64: {}", e)))
}

/// Derives the peer id a node started with `bytes` will report.
pub fn peer_id_from_private_key(bytes: &[u8]) -> Result<PeerId, BiomeP2pError> {
    let keypair = decode_private_key(bytes)?;
    Ok(keypair.public().to_peer_id().into())
}

/// Resolves the signing identity: decode supplied bytes or generate Ed25519.
pub(crate) fn resolve_keypair(bytes: Option<&[u8]>) -> Result<Keypair, BiomeP2pError> {
    match bytes {
        Some(bytes) => decode_private_key(bytes),
        None => Ok(Keypair::generate_ed25519()),
    }
}

/// Serde adapter carrying optional key bytes as base64 text.
pub(crate) mod serde_base64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(bytes) => serializer.serialize_some(&super::encode_private_key_base64(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text {
            Some(text) if !text.trim().is_empty() => super::decode_private_key_base64(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bytes_round_trip() {
        let bytes = generate_private_key().unwrap();
        let decoded = decode_private_key(&bytes).unwrap();
        assert_eq!(encode_private_key(&decoded).unwrap(), bytes);
    }

    #[test]
    fn base64_form_round_trips() {
        let bytes = generate_private_key().unwrap();
        let text = encode_private_key_base64(&bytes);
        assert_eq!(decode_private_key_base64(&text).unwrap(), bytes);
    }

    #[test]
    fn peer_id_is_deterministic() {
        let bytes = generate_private_key().unwrap();
        let a = peer_id_from_private_key(&bytes).unwrap();
        let b = peer_id_from_private_key(&bytes).unwrap();
        assert_eq!(a, b);

        let other = peer_id_from_private_key(&generate_private_key().unwrap()).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn garbage_key_is_rejected() {
        assert!(matches!(
            decode_private_key(&[1, 2, 3, 4]),
            Err(BiomeP2pError::InvalidKey(_))
        ));
        assert!(matches!(
            decode_private_key_base64("***"),
            Err(BiomeP2pError::InvalidKey(_))
        ));
    }

    #[test]
    fn missing_key_generates_fresh_identity() {
        let a = resolve_keypair(None).unwrap();
        let b = resolve_keypair(None).unwrap();
        assert_ne!(a.public().to_peer_id(), b.public().to_peer_id());
    }
}
