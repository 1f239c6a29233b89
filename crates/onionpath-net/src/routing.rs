//! Routing messages carried inside path onions
//!
//! Encoded with postcard. Each message names the transaction it belongs to so
//! the receiving side can correlate responses with pending lookups.

use onionpath_core::{CryptoBackend, Keypair, PublicKey, Signature, SIG_SIZE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Routing message errors
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),
}

/// Messages exchanged with a path endpoint
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingMessage {
    /// Ask the endpoint for a service record by name
    FindService { txid: u64, name: String },
    /// Record found
    ServiceFound { txid: u64, record: ServiceRecord },
    /// No record by that name
    ServiceNotFound { txid: u64 },
}

impl RoutingMessage {
    /// Transaction this message belongs to
    pub fn txid(&self) -> u64 {
        match self {
            Self::FindService { txid, .. }
            | Self::ServiceFound { txid, .. }
            | Self::ServiceNotFound { txid } => *txid,
        }
    }

    /// Is this a reply to a lookup?
    pub fn is_response(&self) -> bool {
        !matches!(self, Self::FindService { .. })
    }

    pub fn encode(&self) -> Result<Vec<u8>, RoutingError> {
        Ok(postcard::to_allocvec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, RoutingError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}

/// Signed service record published by a hidden service
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Human-readable service name
    pub name: String,
    /// Service identity key
    pub address: PublicKey,
    /// Opaque service payload (introduction points etc.)
    pub payload: Vec<u8>,
    /// Detached signature over `sign_bytes()`
    pub signature: Vec<u8>,
}

impl ServiceRecord {
    /// Create and sign a record with the service identity.
    pub fn signed(
        backend: &dyn CryptoBackend,
        identity: &Keypair,
        name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        let mut record = Self {
            name: name.into(),
            address: identity.public,
            payload,
            signature: Vec::new(),
        };
        let sig = backend.sign(&identity.secret, &record.sign_bytes());
        record.signature = sig.as_bytes().to_vec();
        record
    }

    /// `name_len(u32 LE) || name || address || payload`
    pub fn sign_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.name.len() + 32 + self.payload.len());
        bytes.extend_from_slice(&(self.name.len() as u32).to_le_bytes());
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.extend_from_slice(self.address.as_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Check the record was signed by the key it names.
    pub fn verify(&self, backend: &dyn CryptoBackend) -> bool {
        let Ok(sig) = <[u8; SIG_SIZE]>::try_from(self.signature.as_slice()) else {
            return false;
        };
        backend.verify(&self.address, &self.sign_bytes(), &Signature(sig))
    }
}
