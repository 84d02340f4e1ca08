// Copyright 2025 Cowboy AI, LLC.

//! Keyed hash chain for event integrity
//!
//! Every recorded event carries an HMAC-SHA256 over its own fields and the
//! hash of its predecessor. The first event of a stream chains from
//! [`EventHash::ROOT`]. The secret comes from a [`KeyProvider`]; provisioning
//! and rotation are outside this crate.

use crate::infrastructure::event_store::RecordedEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Env var read by [`EnvKeyProvider`]
pub const HASH_KEY_ENV: &str = "CIM_LEDGER_HASH_KEY";

/// Errors raised while obtaining the hashing secret
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// No secret is available
    #[error("Hash key missing: {0}")]
    Missing(String),

    /// The secret could not be used
    #[error("Invalid hash key: {0}")]
    Invalid(String),
}

/// Errors that can occur during chain verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainVerificationError {
    /// The event does not link to the hash of its predecessor
    #[error("Broken chain in stream {stream_id} at sequence {sequence}: {reason}")]
    BrokenChain {
        /// Stream being verified
        stream_id: String,
        /// The sequence number where the break occurred
        sequence: u64,
        /// Description of why the chain is broken
        reason: String,
    },

    /// The stored hash does not match the recomputed one
    #[error("Hash mismatch in stream {stream_id} at sequence {sequence}")]
    HashMismatch {
        /// Stream being verified
        stream_id: String,
        /// The sequence number where the mismatch occurred
        sequence: u64,
    },

    /// Sequence numbers are not contiguous
    #[error("Sequence gap in stream {stream_id}: expected {expected}, found {found}")]
    SequenceGap {
        /// Stream being verified
        stream_id: String,
        /// Sequence that should have come next
        expected: u64,
        /// Sequence that was found
        found: u64,
    },
}

impl ChainVerificationError {
    /// Sequence number at which verification failed
    pub fn sequence(&self) -> u64 {
        match self {
            ChainVerificationError::BrokenChain { sequence, .. }
            | ChainVerificationError::HashMismatch { sequence, .. } => *sequence,
            ChainVerificationError::SequenceGap { found, .. } => *found,
        }
    }
}

/// 32-byte keyed hash linking an event to its predecessor
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventHash([u8; 32]);

impl EventHash {
    /// Fixed predecessor of the first event in every stream
    pub const ROOT: EventHash = EventHash([0u8; 32]);

    /// Wrap raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64 character hex string
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// True for the root constant
    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }
}

impl fmt::Debug for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventHash({})", self.to_hex())
    }
}

impl fmt::Display for EventHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for EventHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for EventHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EventHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Source of the process-wide hashing secret
pub trait KeyProvider: Send + Sync {
    /// Return the secret bytes
    fn hash_key(&self) -> Result<Vec<u8>, KeyError>;
}

/// Secret held in memory, for tests and embedded use
#[derive(Clone)]
pub struct StaticKeyProvider {
    key: Vec<u8>,
}

impl StaticKeyProvider {
    /// Create a provider over the given bytes
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn hash_key(&self) -> Result<Vec<u8>, KeyError> {
        Ok(self.key.clone())
    }
}

/// Reads a hex-encoded secret from [`HASH_KEY_ENV`]
#[derive(Debug, Clone, Default)]
pub struct EnvKeyProvider;

impl KeyProvider for EnvKeyProvider {
    fn hash_key(&self) -> Result<Vec<u8>, KeyError> {
        let value = std::env::var(HASH_KEY_ENV)
            .map_err(|_| KeyError::Missing(format!("{HASH_KEY_ENV} is not set")))?;
        hex::decode(value.trim())
            .map_err(|e| KeyError::Invalid(format!("{HASH_KEY_ENV} must be hex: {e}")))
    }
}

/// Computes and verifies event hashes with a fixed secret
#[derive(Clone)]
pub struct ChainVerifier {
    mac: HmacSha256,
}

impl fmt::Debug for ChainVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainVerifier").finish_non_exhaustive()
    }
}

impl ChainVerifier {
    /// Create a verifier from raw secret bytes
    pub fn new(key: &[u8]) -> Result<Self, KeyError> {
        if key.is_empty() {
            return Err(KeyError::Invalid("hash key must not be empty".to_string()));
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|e| KeyError::Invalid(e.to_string()))?;
        Ok(Self { mac })
    }

    /// Create a verifier from a key provider
    pub fn from_provider(provider: &dyn KeyProvider) -> Result<Self, KeyError> {
        Self::new(&provider.hash_key()?)
    }

    fn keyed(
        &self,
        previous: &EventHash,
        stream_id: &str,
        sequence: u64,
        event_type: &str,
        recorded_at: DateTime<Utc>,
        payload: &str,
    ) -> HmacSha256 {
        let mut mac = self.mac.clone();
        update_field(&mut mac, stream_id.as_bytes());
        mac.update(&sequence.to_le_bytes());
        update_field(&mut mac, event_type.as_bytes());
        update_field(
            &mut mac,
            recorded_at
                .to_rfc3339_opts(SecondsFormat::Nanos, true)
                .as_bytes(),
        );
        update_field(&mut mac, payload.as_bytes());
        mac.update(previous.as_bytes());
        mac
    }

    /// Compute the hash of an event from its fields and its predecessor's hash
    pub fn compute(
        &self,
        previous: &EventHash,
        stream_id: &str,
        sequence: u64,
        event_type: &str,
        recorded_at: DateTime<Utc>,
        payload: &str,
    ) -> EventHash {
        let digest = self
            .keyed(previous, stream_id, sequence, event_type, recorded_at, payload)
            .finalize()
            .into_bytes();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        EventHash(bytes)
    }

    /// Check an event against the hash of its predecessor
    pub fn verify(&self, event: &RecordedEvent, previous: &EventHash) -> bool {
        if event.previous_hash != *previous {
            return false;
        }
        self.keyed(
            previous,
            &event.stream_id,
            event.sequence,
            &event.event_type,
            event.recorded_at,
            &event.payload,
        )
        .verify_slice(event.hash.as_bytes())
        .is_ok()
    }
}

fn update_field(mac: &mut HmacSha256, bytes: &[u8]) {
    mac.update(&(bytes.len() as u64).to_le_bytes());
    mac.update(bytes);
}

/// Running position while walking a stream in order
#[derive(Debug, Clone)]
pub struct ChainCursor {
    stream_id: String,
    next_sequence: u64,
    head: EventHash,
}

impl ChainCursor {
    /// Cursor positioned before the first event of a stream
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self::resume(stream_id, 0, EventHash::ROOT)
    }

    /// Cursor positioned after a known event
    pub fn resume(stream_id: impl Into<String>, sequence: u64, hash: EventHash) -> Self {
        Self {
            stream_id: stream_id.into(),
            next_sequence: sequence + 1,
            head: hash,
        }
    }

    /// Hash of the last accepted event
    pub fn head(&self) -> EventHash {
        self.head
    }

    /// Sequence of the last accepted event
    pub fn version(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Accept the next event or report why it does not belong
    pub fn advance(
        &mut self,
        verifier: &ChainVerifier,
        event: &RecordedEvent,
    ) -> Result<(), ChainVerificationError> {
        if event.sequence != self.next_sequence {
            return Err(ChainVerificationError::SequenceGap {
                stream_id: self.stream_id.clone(),
                expected: self.next_sequence,
                found: event.sequence,
            });
        }
        if event.previous_hash != self.head {
            return Err(ChainVerificationError::BrokenChain {
                stream_id: self.stream_id.clone(),
                sequence: event.sequence,
                reason: format!(
                    "previous hash {} does not match {}",
                    event.previous_hash, self.head
                ),
            });
        }
        if event.stream_id != self.stream_id || !verifier.verify(event, &self.head) {
            return Err(ChainVerificationError::HashMismatch {
                stream_id: self.stream_id.clone(),
                sequence: event.sequence,
            });
        }
        self.head = event.hash;
        self.next_sequence += 1;
        Ok(())
    }
}

/// Verify a contiguous run of events starting at the beginning of a stream.
///
/// Returns the hash of the last event, or [`EventHash::ROOT`] for an empty
/// slice.
pub fn verify_event_chain(
    verifier: &ChainVerifier,
    stream_id: &str,
    events: &[RecordedEvent],
) -> Result<EventHash, ChainVerificationError> {
    let mut cursor = ChainCursor::new(stream_id);
    for event in events {
        cursor.advance(verifier, event)?;
    }
    Ok(cursor.head())
}
