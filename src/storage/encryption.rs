//! Application-level encryption for storage at rest
//!
//! Optional authenticated encryption of the sensitive memory fields
//! (`text` and `metadata`) before they reach SQLite. The cipher is
//! HMAC-SHA256 in counter mode for confidentiality plus an
//! encrypt-then-MAC HMAC-SHA256 tag for integrity; keys are derived from
//! a passphrase with PBKDF2-HMAC-SHA256.
//!
//! This protects database files against casual inspection at rest. It is
//! not a substitute for full-disk encryption.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, Connection};
use sha2::Sha256;
use std::path::Path;

use super::store::MemoryStore;
use crate::error::{MemoryMeshError, Result};
use crate::types::{FieldChange, Memory, MemoryPatch, Metadata, META_ENCRYPTED};

type HmacSha256 = Hmac<Sha256>;

const SALT_LENGTH: usize = 16;
const KEY_LENGTH: usize = 32;
const IV_LENGTH: usize = 16;
const TAG_LENGTH: usize = 32;
/// OWASP-recommended minimum for PBKDF2-SHA256
const PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_KEY: &str = "encryption_salt";

/// Derive a 256-bit encryption key from a passphrase and salt.
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LENGTH] {
    let mut key = [0u8; KEY_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

fn mac(key: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(key).expect("HMAC accepts any key length")
}

/// Keystream block i = HMAC-SHA256(key, IV || BE32(i)).
fn keystream_block(key: &[u8], iv: &[u8], counter: u32) -> [u8; 32] {
    let mut h = mac(key);
    h.update(iv);
    h.update(&counter.to_be_bytes());
    h.finalize().into_bytes().into()
}

fn apply_keystream(key: &[u8], iv: &[u8], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (counter, chunk) in data.chunks(32).enumerate() {
        let block = keystream_block(key, iv, counter as u32);
        out.extend(chunk.iter().zip(block.iter()).map(|(a, b)| a ^ b));
    }
    out
}

/// Encrypt a string field, returning `base64(IV || ciphertext || tag)`.
pub fn encrypt_field(plaintext: &str, key: &[u8; KEY_LENGTH]) -> String {
    let mut iv = [0u8; IV_LENGTH];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = apply_keystream(key, &iv, plaintext.as_bytes());

    let mut tag_mac = mac(key);
    tag_mac.update(&iv);
    tag_mac.update(&ciphertext);
    let tag = tag_mac.finalize().into_bytes();

    let mut raw = Vec::with_capacity(IV_LENGTH + ciphertext.len() + TAG_LENGTH);
    raw.extend_from_slice(&iv);
    raw.extend_from_slice(&ciphertext);
    raw.extend_from_slice(&tag);
    BASE64.encode(raw)
}

/// Decrypt a field produced by [`encrypt_field`]. The authentication tag
/// is verified in constant time before any plaintext is produced.
pub fn decrypt_field(ciphertext_b64: &str, key: &[u8; KEY_LENGTH]) -> Result<String> {
    let raw = BASE64
        .decode(ciphertext_b64)
        .map_err(|e| MemoryMeshError::Encryption(format!("Invalid base64 ciphertext: {}", e)))?;

    if raw.len() < IV_LENGTH + TAG_LENGTH {
        return Err(MemoryMeshError::Encryption(
            "Ciphertext too short to contain IV and authentication tag".to_string(),
        ));
    }

    let iv = &raw[..IV_LENGTH];
    let tag = &raw[raw.len() - TAG_LENGTH..];
    let ciphertext = &raw[IV_LENGTH..raw.len() - TAG_LENGTH];

    let mut tag_mac = mac(key);
    tag_mac.update(iv);
    tag_mac.update(ciphertext);
    tag_mac.verify_slice(tag).map_err(|_| {
        MemoryMeshError::Encryption(
            "Authentication failed: ciphertext has been tampered with or key is wrong".to_string(),
        )
    })?;

    let plaintext = apply_keystream(key, iv, ciphertext);
    String::from_utf8(plaintext)
        .map_err(|e| MemoryMeshError::Encryption(format!("Decrypted data is not UTF-8: {}", e)))
}

/// Fetch the per-database salt, generating and persisting one on first
/// use.
pub(crate) fn get_or_create_salt(conn: &mut Connection) -> Result<Vec<u8>> {
    let tx = conn.transaction()?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS memorymesh_meta (
            key   TEXT PRIMARY KEY,
            value BLOB NOT NULL
        )",
        [],
    )?;

    let existing: Option<Vec<u8>> = tx
        .query_row(
            "SELECT value FROM memorymesh_meta WHERE key = ?1",
            params![SALT_KEY],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    let salt = match existing {
        Some(salt) => salt,
        None => {
            let mut salt = vec![0u8; SALT_LENGTH];
            OsRng.fill_bytes(&mut salt);
            tx.execute(
                "INSERT INTO memorymesh_meta (key, value) VALUES (?1, ?2)",
                params![SALT_KEY, salt],
            )?;
            salt
        }
    };
    tx.commit()?;
    Ok(salt)
}

/// A wrapper around [`MemoryStore`] that encrypts fields at rest.
///
/// `text` and the JSON-serialized `metadata` are encrypted before
/// writing; other columns (id, timestamps, importance, decay_rate,
/// access_count, session_id, embedding) stay in plaintext so indexes and
/// vector search keep working. Encrypted metadata is stored as
/// `{"_encrypted": "<base64>"}`.
pub struct EncryptedMemoryStore {
    store: MemoryStore,
    key: [u8; KEY_LENGTH],
}

impl EncryptedMemoryStore {
    /// Wrap `store`, deriving the key from `password` and the database's
    /// persisted salt.
    pub fn new(store: MemoryStore, password: &str) -> Result<Self> {
        let salt = store.pool().with_conn(get_or_create_salt)?;
        let key = derive_key(password, &salt);
        Ok(Self { store, key })
    }

    pub(crate) fn inner(&self) -> &MemoryStore {
        &self.store
    }

    pub(crate) fn encrypt_memory(&self, memory: &Memory) -> Result<Memory> {
        let mut encrypted = memory.clone();
        encrypted.text = encrypt_field(&memory.text, &self.key);
        let metadata_json = serde_json::to_string(&memory.metadata)?;
        let mut envelope = Metadata::new();
        envelope.insert(
            META_ENCRYPTED.to_string(),
            serde_json::Value::String(encrypt_field(&metadata_json, &self.key)),
        );
        encrypted.metadata = envelope;
        Ok(encrypted)
    }

    pub(crate) fn decrypt_memory(&self, memory: Memory) -> Result<Memory> {
        let mut decrypted = memory;
        match decrypted
            .metadata
            .get(META_ENCRYPTED)
            .and_then(|v| v.as_str())
            .map(String::from)
        {
            Some(envelope) => {
                decrypted.text = decrypt_field(&decrypted.text, &self.key)?;
                let metadata_json = decrypt_field(&envelope, &self.key)?;
                decrypted.metadata = serde_json::from_str(&metadata_json)?;
            }
            // Row written before encryption was enabled; pass through.
            None => {}
        }
        Ok(decrypted)
    }

    pub(crate) fn decrypt_all(&self, memories: Vec<Memory>) -> Result<Vec<Memory>> {
        memories
            .into_iter()
            .map(|m| self.decrypt_memory(m))
            .collect()
    }

    pub(crate) fn encrypt_patch(&self, patch: &MemoryPatch) -> Result<MemoryPatch> {
        let mut encrypted = patch.clone();
        if let FieldChange::Set(text) = &patch.text {
            encrypted.text = FieldChange::Set(encrypt_field(text, &self.key));
        }
        if let FieldChange::Set(metadata) = &patch.metadata {
            let metadata_json = serde_json::to_string(metadata)?;
            let mut envelope = Metadata::new();
            envelope.insert(
                META_ENCRYPTED.to_string(),
                serde_json::Value::String(encrypt_field(&metadata_json, &self.key)),
            );
            encrypted.metadata = FieldChange::Set(envelope);
        }
        Ok(encrypted)
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryScope;
    use pretty_assertions::assert_eq;

    fn test_key() -> [u8; KEY_LENGTH] {
        derive_key("correct horse battery staple", b"0123456789abcdef")
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = test_key();
        for plaintext in ["", "short", "a much longer plaintext spanning multiple keystream blocks, repeated to make sure: the quick brown fox jumps over the lazy dog"] {
            let ciphertext = encrypt_field(plaintext, &key);
            assert_eq!(decrypt_field(&ciphertext, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn distinct_ivs_produce_distinct_ciphertexts() {
        let key = test_key();
        let a = encrypt_field("same input", &key);
        let b = encrypt_field("same input", &key);
        assert_ne!(a, b);
    }

    #[test]
    fn tamper_is_detected() {
        let key = test_key();
        let ciphertext = encrypt_field("sensitive", &key);
        let raw = BASE64.decode(&ciphertext).unwrap();

        // Flip one byte in every region: IV, ciphertext body, tag.
        for idx in [0, IV_LENGTH, raw.len() - 1] {
            let mut tampered = raw.clone();
            tampered[idx] ^= 0x01;
            let tampered_b64 = BASE64.encode(&tampered);
            let err = decrypt_field(&tampered_b64, &key).unwrap_err();
            assert!(matches!(err, MemoryMeshError::Encryption(_)));
        }
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let key = test_key();
        let other = derive_key("wrong passphrase", b"0123456789abcdef");
        let ciphertext = encrypt_field("sensitive", &key);
        assert!(decrypt_field(&ciphertext, &other).is_err());
    }

    #[test]
    fn short_ciphertext_rejected() {
        let key = test_key();
        let too_short = BASE64.encode([0u8; IV_LENGTH + TAG_LENGTH - 1]);
        let err = decrypt_field(&too_short, &key).unwrap_err();
        assert!(matches!(err, MemoryMeshError::Encryption(_)));
    }

    #[test]
    fn key_derivation_is_deterministic_per_salt() {
        let salt_a = b"aaaaaaaaaaaaaaaa";
        let salt_b = b"bbbbbbbbbbbbbbbb";
        assert_eq!(derive_key("pw", salt_a), derive_key("pw", salt_a));
        assert_ne!(derive_key("pw", salt_a), derive_key("pw", salt_b));
        assert_ne!(derive_key("pw", salt_a), derive_key("pw2", salt_a));
    }

    #[test]
    fn salt_persists_per_database() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(dir.path().join("enc.db"), MemoryScope::Global).unwrap();
        let first = store.pool().with_conn(get_or_create_salt).unwrap();
        let second = store.pool().with_conn(get_or_create_salt).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), SALT_LENGTH);
    }

    #[test]
    fn plaintext_never_hits_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enc.db");
        let store = MemoryStore::open(&path, MemoryScope::Global).unwrap();
        let enc = EncryptedMemoryStore::new(store, "hunter2").unwrap();

        let mut mem = Memory::new("the launch code is 0000").unwrap();
        mem.metadata
            .insert("topic".to_string(), serde_json::json!("launch"));
        let stored = enc.encrypt_memory(&mem).unwrap();
        enc.inner().save(&stored).unwrap();
        enc.inner().close();

        let bytes = std::fs::read(&path).unwrap();
        let haystack = String::from_utf8_lossy(&bytes);
        assert!(!haystack.contains("launch code"));
        assert!(!haystack.contains("\"topic\""));

        // And the round trip restores both fields.
        let store = MemoryStore::open(&path, MemoryScope::Global).unwrap();
        let enc = EncryptedMemoryStore::new(store, "hunter2").unwrap();
        let loaded = enc.inner().get(&mem.id).unwrap().unwrap();
        let decrypted = enc.decrypt_memory(loaded).unwrap();
        assert_eq!(decrypted.text, mem.text);
        assert_eq!(decrypted.metadata, mem.metadata);
    }
}
