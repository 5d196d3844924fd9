//! Ticket payload codecs.
//!
//! Registries never store [`AnyTicket`] values directly. A [`TicketCodec`]
//! turns a ticket into an [`EncodedTicket`]: an opaque storage key, the
//! ticket kind and creation time in clear (for counts and collision checks),
//! and a byte payload. The plain [`JsonTicketCodec`] keeps ids and JSON
//! payloads readable; [`EncryptedTicketCodec`] digests ids with SHA-512 and
//! seals payloads with AES-256-GCM.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use sha2::{Digest, Sha512};
use time::OffsetDateTime;

use crate::config::CryptoConfig;
use crate::error::{TicketError, TicketResult};
use crate::ticket::{AnyTicket, Ticket, TicketKind};

/// Nonce size for AES-256-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Key size for AES-256 (256 bits)
const KEY_SIZE: usize = 32;

/// Storage representation of a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTicket {
    /// Storage key derived from the ticket id.
    pub id: String,
    pub kind: TicketKind,
    pub created_at: OffsetDateTime,
    pub payload: Vec<u8>,
}

impl EncodedTicket {
    /// Same storage key, kind and creation time: the same issued ticket.
    #[must_use]
    pub fn is_same_logical_ticket(&self, other: &EncodedTicket) -> bool {
        self.id == other.id && self.kind == other.kind && self.created_at == other.created_at
    }
}

/// Encoding shared by every registry backend.
pub trait TicketCodec: Send + Sync + fmt::Debug {
    /// Maps a ticket id to its storage key. Must be deterministic.
    fn encode_id(&self, ticket_id: &str) -> String;

    /// Encodes a ticket for storage.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if serialization or encryption fails.
    fn encode(&self, ticket: &AnyTicket) -> TicketResult<EncodedTicket>;

    /// Restores a ticket from storage.
    ///
    /// # Errors
    ///
    /// Returns `Codec` if the payload is corrupt or cannot be decrypted.
    fn decode(&self, encoded: &EncodedTicket) -> TicketResult<AnyTicket>;
}

// =============================================================================
// JSON Codec
// =============================================================================

/// Plain JSON payloads with ids used as storage keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTicketCodec;

impl TicketCodec for JsonTicketCodec {
    fn encode_id(&self, ticket_id: &str) -> String {
        ticket_id.to_string()
    }

    fn encode(&self, ticket: &AnyTicket) -> TicketResult<EncodedTicket> {
        Ok(EncodedTicket {
            id: ticket.id().to_string(),
            kind: ticket.kind(),
            created_at: ticket.creation_time(),
            payload: serde_json::to_vec(ticket)?,
        })
    }

    fn decode(&self, encoded: &EncodedTicket) -> TicketResult<AnyTicket> {
        Ok(serde_json::from_slice(&encoded.payload)?)
    }
}

// =============================================================================
// Encrypted Codec
// =============================================================================

/// SHA-512 digested ids and AES-256-GCM sealed payloads.
///
/// Payload layout is `nonce || ciphertext`.
pub struct EncryptedTicketCodec {
    cipher: Aes256Gcm,
    key_id: String,
}

impl fmt::Debug for EncryptedTicketCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedTicketCodec")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl EncryptedTicketCodec {
    /// Creates a codec from a raw 256-bit key.
    #[must_use]
    pub fn new(key: &[u8; KEY_SIZE], key_id: impl Into<String>) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
            key_id: key_id.into(),
        }
    }

    /// Creates a codec from a hex or base64 encoded key.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the key does not decode to 32 bytes.
    pub fn from_encoded_key(key: &str, key_id: impl Into<String>) -> TicketResult<Self> {
        Ok(Self::new(&parse_key(key)?, key_id))
    }

    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

impl TicketCodec for EncryptedTicketCodec {
    fn encode_id(&self, ticket_id: &str) -> String {
        hex::encode(Sha512::digest(ticket_id.as_bytes()))
    }

    fn encode(&self, ticket: &AnyTicket) -> TicketResult<EncodedTicket> {
        let plaintext = serde_json::to_vec(ticket)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| TicketError::codec(format!("Encryption failed: {e}")))?;

        let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);

        Ok(EncodedTicket {
            id: self.encode_id(ticket.id()),
            kind: ticket.kind(),
            created_at: ticket.creation_time(),
            payload,
        })
    }

    fn decode(&self, encoded: &EncodedTicket) -> TicketResult<AnyTicket> {
        if encoded.payload.len() <= NONCE_SIZE {
            return Err(TicketError::codec("Encrypted payload is too short"));
        }
        let (nonce_bytes, ciphertext) = encoded.payload.split_at(NONCE_SIZE);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| TicketError::codec(format!("Decryption failed: {e}")))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

/// Builds the codec selected by configuration.
///
/// # Errors
///
/// Returns `Configuration` if encryption is enabled with a missing or
/// malformed key.
pub fn codec_from_config(config: &CryptoConfig) -> TicketResult<std::sync::Arc<dyn TicketCodec>> {
    if !config.enabled {
        return Ok(std::sync::Arc::new(JsonTicketCodec));
    }
    let key = config
        .key
        .as_deref()
        .ok_or_else(|| TicketError::configuration("tickets.crypto.key is required"))?;
    Ok(std::sync::Arc::new(EncryptedTicketCodec::from_encoded_key(
        key,
        config.key_id.clone(),
    )?))
}

/// Parses a 256-bit key from hex or base64.
fn parse_key(key_str: &str) -> TicketResult<[u8; KEY_SIZE]> {
    let key_str = key_str.trim();

    // Try hex first
    if key_str.len() == KEY_SIZE * 2 {
        if let Ok(bytes) = hex::decode(key_str) {
            let mut key = [0u8; KEY_SIZE];
            key.copy_from_slice(&bytes);
            return Ok(key);
        }
    }

    let bytes = BASE64
        .decode(key_str)
        .map_err(|e| TicketError::configuration(format!("Invalid base64 key: {e}")))?;

    if bytes.len() != KEY_SIZE {
        return Err(TicketError::configuration(format!(
            "Key must be {} bytes, got {}",
            KEY_SIZE,
            bytes.len()
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}
