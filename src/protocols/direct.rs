//! One-shot direct messages.
//!
//! Every message opens its own substream, writes exactly one
//! newline-terminated frame and closes. The receiving side reads exactly one
//! frame; anything that is not a complete frame fails the read and the
//! substream is reset by dropping it.

use futures::io::BufReader;
use futures::prelude::*;
use libp2p::StreamProtocol;
use libp2p_stream as stream;
use std::io;
use std::time::Duration;

use crate::error::BiomeP2pError;

pub const FRAME_TERMINATOR: u8 = b'\n';

/// Largest frame body accepted on either side.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Turns a caller payload into a wire frame.
///
/// A trailing terminator is kept, a missing one is appended. A terminator
/// anywhere else would split the frame on the receiving side, so such
/// payloads are rejected.
pub fn frame(mut payload: Vec<u8>) -> Result<Vec<u8>, BiomeP2pError> {
    let terminated = payload.last() == Some(&FRAME_TERMINATOR);
    let body_len = if terminated { payload.len() - 1 } else { payload.len() };

    if payload[..body_len].contains(&FRAME_TERMINATOR) {
        return Err(BiomeP2pError::InvalidPayload(
            "payload contains a newline before its end".into(),
        ));
    }
    if body_len > MAX_FRAME_SIZE {
        return Err(BiomeP2pError::InvalidPayload(format!(
            "payload of {} bytes exceeds {} bytes",
            body_len, MAX_FRAME_SIZE
        )));
    }

    if !terminated {
        payload.push(FRAME_TERMINATOR);
    }
    Ok(payload)
}

/// Reads one frame and returns its body without the terminator.
pub(crate) async fn read_frame<T>(io: &mut T) -> io::Result<Vec<u8>>
where
    T: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    let mut reader = BufReader::new((&mut *io).take(MAX_FRAME_SIZE as u64 + 1));
    reader.read_until(FRAME_TERMINATOR, &mut buf).await?;

    if buf.last() != Some(&FRAME_TERMINATOR) {
        return if buf.len() > MAX_FRAME_SIZE {
            Err(io::Error::new(io::ErrorKind::InvalidData, "Frame too large"))
        } else {
            Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "Stream ended before frame terminator",
            ))
        };
    }

    buf.pop();
    Ok(buf)
}

/// Writes an already framed message and closes the write side.
pub(crate) async fn write_frame<T>(io: &mut T, frame: &[u8]) -> io::Result<()>
where
    T: AsyncWrite + Unpin,
{
    io.write_all(frame).await?;
    io.close().await
}

pub(crate) fn protocol_from_name(name: &str) -> Result<StreamProtocol, BiomeP2pError> {
    StreamProtocol::try_from_owned(name.to_string())
        .map_err(|e| BiomeP2pError::InvalidConfig(format!("bad protocol name {}: {}", name, e)))
}

/// Opens a substream to `peer`, dialing it if needed, and writes one frame.
///
/// Completes once the frame is written and the substream closed; the
/// receiver may still be waiting for room in its queue at that point.
pub(crate) async fn send(
    mut control: stream::Control,
    peer: libp2p::PeerId,
    protocol: StreamProtocol,
    frame: Vec<u8>,
    timeout: Duration,
) -> Result<(), BiomeP2pError> {
    let exchange = async move {
        let mut substream = control
            .open_stream(peer, protocol)
            .await
            .map_err(|e| BiomeP2pError::NetworkError(format!("open stream to {}: {}", peer, e)))?;
        write_frame(&mut substream, &frame)
            .await
            .map_err(|e| BiomeP2pError::NetworkError(format!("write to {}: {}", peer, e)))
    };

    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| BiomeP2pError::NetworkError(format!("send to {} timed out", peer)))?
}
