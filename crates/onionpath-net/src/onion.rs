//! Onion layer primitives
//!
//! Wire format (same shape in both directions):
//!
//! ```text
//! direction[1] || message_nonce[24] || tag_0[32] || E_0( tag_1[32] || E_1( ... E_{n-1}(payload) ) )
//! ```
//!
//! - `direction` is 0 for frames built by the path owner and 1 for frames
//!   built by the endpoint and wrapped by relays on the way back.
//! - `message_nonce` is 16 random bytes followed by the sender's per-path
//!   sequence number (u64, little-endian). It travels in the clear.
//! - Layer `i` is XChaCha20 under hop `i`'s shared key with nonce
//!   `hmac(direction || message_nonce, hop_i.session_nonce)[..24]`.
//! - `tag_i = hmac(direction || message_nonce || E_i(..), hop_i.shared_key)`
//!   lets hop `i` authenticate exactly the layer it peels.
//!
//! The path owner only ever encrypts outbound layers and relays only ever
//! encrypt inbound ones, so an echoed message nonce never repeats a keystream.

use onionpath_core::{CryptoBackend, Digest, Nonce, SharedKey, TunnelNonce, HASH_SIZE, NONCE_SIZE};
use thiserror::Error;

/// Bytes of the cleartext message nonce
pub const MESSAGE_NONCE_SIZE: usize = NONCE_SIZE;
/// Bytes of the cleartext frame header (direction and message nonce)
pub const FRAME_HEADER_SIZE: usize = 1 + MESSAGE_NONCE_SIZE;
/// Bytes of the per-layer authentication tag
pub const TAG_SIZE: usize = HASH_SIZE;
/// Random bytes in the message nonce (the rest is the sequence number)
const NONCE_RANDOM_SIZE: usize = MESSAGE_NONCE_SIZE - 8;

/// Which way a frame travels along the path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    /// Built by the path owner, peeled by relays
    Outbound = 0,
    /// Built by the endpoint, wrapped by relays, opened by the path owner
    Inbound = 1,
}

impl Direction {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, OnionError> {
        match byte {
            0 => Ok(Self::Outbound),
            1 => Ok(Self::Inbound),
            other => Err(OnionError::UnknownDirection(other)),
        }
    }
}

/// Onion errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OnionError {
    #[error("Onion frame truncated")]
    Truncated,
    #[error("Layer integrity check failed")]
    Integrity,
    #[error("Unknown frame direction {0}")]
    UnknownDirection(u8),
    #[error("Frame travels {0:?}, not the way this operation handles")]
    WrongDirection(Direction),
}

/// Fresh message nonce: random prefix plus the sender's sequence number.
pub fn message_nonce(backend: &dyn CryptoBackend, sequence: u64) -> Nonce {
    let mut bytes = [0u8; MESSAGE_NONCE_SIZE];
    backend.randomize(&mut bytes[..NONCE_RANDOM_SIZE]);
    bytes[NONCE_RANDOM_SIZE..].copy_from_slice(&sequence.to_le_bytes());
    Nonce(bytes)
}

fn header(direction: Direction, message_nonce: &Nonce) -> [u8; FRAME_HEADER_SIZE] {
    let mut bytes = [0u8; FRAME_HEADER_SIZE];
    bytes[0] = direction.as_byte();
    bytes[1..].copy_from_slice(message_nonce.as_bytes());
    bytes
}

/// Stream-cipher nonce for one hop's layer of one message in one direction.
pub fn layer_nonce(
    backend: &dyn CryptoBackend,
    session_nonce: &TunnelNonce,
    message_nonce: &Nonce,
    direction: Direction,
) -> Nonce {
    let mixed = backend.hmac(&header(direction, message_nonce), session_nonce.as_bytes());
    let mut bytes = [0u8; NONCE_SIZE];
    bytes.copy_from_slice(&mixed.as_bytes()[..NONCE_SIZE]);
    Nonce(bytes)
}

fn layer_tag(
    backend: &dyn CryptoBackend,
    key: &SharedKey,
    message_nonce: &Nonce,
    direction: Direction,
    ciphertext: &[u8],
) -> Digest {
    let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + ciphertext.len());
    buf.extend_from_slice(&header(direction, message_nonce));
    buf.extend_from_slice(ciphertext);
    backend.hmac(&buf, key.as_bytes())
}

/// Encrypt `body` under one hop and prepend that hop's tag.
pub fn seal_layer(
    backend: &dyn CryptoBackend,
    key: &SharedKey,
    session_nonce: &TunnelNonce,
    message_nonce: &Nonce,
    direction: Direction,
    mut body: Vec<u8>,
) -> Vec<u8> {
    let nonce = layer_nonce(backend, session_nonce, message_nonce, direction);
    backend.xchacha20_xor(&mut body, key, &nonce);
    let tag = layer_tag(backend, key, message_nonce, direction, &body);

    let mut layer = Vec::with_capacity(TAG_SIZE + body.len());
    layer.extend_from_slice(tag.as_bytes());
    layer.extend_from_slice(&body);
    layer
}

/// Verify and strip one hop's layer.
pub fn open_layer(
    backend: &dyn CryptoBackend,
    key: &SharedKey,
    session_nonce: &TunnelNonce,
    message_nonce: &Nonce,
    direction: Direction,
    layer: &[u8],
) -> Result<Vec<u8>, OnionError> {
    if layer.len() < TAG_SIZE {
        return Err(OnionError::Truncated);
    }
    let (tag, ciphertext) = layer.split_at(TAG_SIZE);

    let mut received = [0u8; TAG_SIZE];
    received.copy_from_slice(tag);
    let expected = layer_tag(backend, key, message_nonce, direction, ciphertext);
    if !expected.ct_eq(&Digest(received)) {
        return Err(OnionError::Integrity);
    }

    let mut body = ciphertext.to_vec();
    let nonce = layer_nonce(backend, session_nonce, message_nonce, direction);
    backend.xchacha20_xor(&mut body, key, &nonce);
    Ok(body)
}

/// Prefix layered ciphertext with its direction and message nonce.
pub fn frame(direction: Direction, message_nonce: &Nonce, layers: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + layers.len());
    out.extend_from_slice(&header(direction, message_nonce));
    out.extend_from_slice(layers);
    out
}

/// Split a frame into its direction, message nonce and layered ciphertext.
pub fn split_frame(bytes: &[u8]) -> Result<(Direction, Nonce, &[u8]), OnionError> {
    if bytes.len() < FRAME_HEADER_SIZE {
        return Err(OnionError::Truncated);
    }
    let direction = Direction::from_byte(bytes[0])?;
    let (nonce, layers) = bytes[1..].split_at(MESSAGE_NONCE_SIZE);
    let mut n = [0u8; MESSAGE_NONCE_SIZE];
    n.copy_from_slice(nonce);
    Ok((direction, Nonce(n), layers))
}

/// Relay view: remove the outermost layer of an outbound frame.
pub fn peel_frame(
    backend: &dyn CryptoBackend,
    key: &SharedKey,
    session_nonce: &TunnelNonce,
    bytes: &[u8],
) -> Result<Vec<u8>, OnionError> {
    let (direction, nonce, layers) = split_frame(bytes)?;
    if direction != Direction::Outbound {
        return Err(OnionError::WrongDirection(direction));
    }
    let inner = open_layer(backend, key, session_nonce, &nonce, direction, layers)?;
    Ok(frame(direction, &nonce, &inner))
}

/// Relay view: add one layer around an inbound frame, keeping its header.
///
/// Outbound frames are refused: a relay never encrypts in the owner's
/// direction.
pub fn wrap_frame(
    backend: &dyn CryptoBackend,
    key: &SharedKey,
    session_nonce: &TunnelNonce,
    bytes: &[u8],
) -> Result<Vec<u8>, OnionError> {
    let (direction, nonce, layers) = split_frame(bytes)?;
    if direction != Direction::Inbound {
        return Err(OnionError::WrongDirection(direction));
    }
    let outer = seal_layer(backend, key, session_nonce, &nonce, direction, layers.to_vec());
    Ok(frame(direction, &nonce, &outer))
}
