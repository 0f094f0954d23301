//! Credential Vault (spec §4.1): authenticated encryption of connection
//! secrets. `seal`/`open` wrap `ring::aead::AES_256_GCM`, the same "modern
//! AEAD, never the deprecated APIs the source mixes" guidance §9 calls for.
//!
//! The blob format is self-describing: `[version:u8][nonce:12][ciphertext||tag]`.
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use ring::aead::{self, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM, NONCE_LEN};
use thiserror::Error;

const BLOB_VERSION: u8 = 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("ciphertext is truncated or malformed")]
    Malformed,
    #[error("unsupported blob version {0}")]
    UnsupportedVersion(u8),
    #[error("authentication failed: ciphertext was tampered with or the key is wrong")]
    AuthenticationFailed,
    #[error("invalid master key material")]
    InvalidKey,
}

impl From<CryptoError> for pgai_common::ErrorKind {
    fn from(_: CryptoError) -> Self {
        pgai_common::ErrorKind::CryptoError
    }
}

/// A single-use nonce sequence: holds exactly one nonce and yields it once,
/// since every `seal`/`open` call constructs a fresh `SealingKey`/`OpeningKey`.
struct OnceNonce(Option<[u8; NONCE_LEN]>);

impl NonceSequence for OnceNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// Holds the process-wide AEAD key. Constructed once at startup from
/// `Settings.vault.master_key` (32 raw bytes derived via
/// `pgai_common::hkdf_expand_32` from an operator-supplied passphrase, so the
/// config surface is a string rather than raw key bytes on disk).
#[derive(Clone)]
pub struct Vault {
    key_bytes: [u8; 32],
}

impl Vault {
    pub fn new(key_bytes: [u8; 32]) -> Self {
        Self { key_bytes }
    }

    /// Derives vault key material from an operator passphrase. Mirrors the
    /// teacher's `Secrets::new` deriving a Hawk signing secret from a single
    /// configured master string.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CryptoError> {
        let key_bytes = pgai_common::hkdf_expand_32(
            b"pgai.platform/vault/v1/seal",
            None,
            passphrase.as_bytes(),
        )
        .map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self::new(key_bytes))
    }

    fn unbound_key(&self) -> Result<UnboundKey, CryptoError> {
        UnboundKey::new(&AES_256_GCM, &self.key_bytes).map_err(|_| CryptoError::InvalidKey)
    }

    /// Encrypts `plaintext` under a fresh random nonce, returning a
    /// self-describing opaque blob suitable for storage in
    /// `ConnectionConfig.secret_blob`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let unbound = self.unbound_key()?;
        let mut sealing_key = SealingKey::new(unbound, OnceNonce(Some(nonce_bytes)));

        let mut in_out = plaintext.to_vec();
        sealing_key
            .seal_in_place_append_tag(aead::Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + in_out.len());
        blob.push(BLOB_VERSION);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);
        Ok(blob)
    }

    /// Same as [`seal`](Self::seal) but base64-encodes the blob, for contexts
    /// (JSON columns, HTTP bodies) that need a text-safe representation.
    pub fn seal_to_string(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        Ok(STANDARD.encode(self.seal(plaintext)?))
    }

    /// Decrypts a blob produced by [`seal`](Self::seal). Fails with
    /// `CryptoError::AuthenticationFailed` on tampering or wrong key, per
    /// §4.1.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < 1 + NONCE_LEN {
            return Err(CryptoError::Malformed);
        }
        let version = blob[0];
        if version != BLOB_VERSION {
            return Err(CryptoError::UnsupportedVersion(version));
        }
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(&blob[1..1 + NONCE_LEN]);
        let ciphertext = &blob[1 + NONCE_LEN..];

        let unbound = self.unbound_key()?;
        let mut opening_key = OpeningKey::new(unbound, OnceNonce(Some(nonce_bytes)));

        let mut in_out = ciphertext.to_vec();
        let plaintext = opening_key
            .open_in_place(aead::Aad::empty(), &mut in_out)
            .map_err(|_| CryptoError::AuthenticationFailed)?;
        Ok(plaintext.to_vec())
    }

    pub fn open_from_string(&self, blob: &str) -> Result<Vec<u8>, CryptoError> {
        let raw = STANDARD.decode(blob).map_err(|_| CryptoError::Malformed)?;
        self.open(&raw)
    }
}

/// Returns `first4···last4` for log contexts (§4.1): plaintext secrets are
/// never logged, only this masked form.
pub fn mask(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let first: String = chars[..4].iter().collect();
    let last: String = chars[chars.len() - 4..].iter().collect();
    format!("{}···{}", first, last)
}

#[cfg(test)]
mod test {
    use super::*;

    fn vault() -> Vault {
        Vault::from_passphrase("unit-test-passphrase").unwrap()
    }

    #[test]
    fn round_trips() {
        let v = vault();
        let plaintext = b"hunter2-db-password";
        let blob = v.seal(plaintext).unwrap();
        assert_eq!(v.open(&blob).unwrap(), plaintext);
    }

    #[test]
    fn distinct_nonces_produce_distinct_blobs() {
        let v = vault();
        let a = v.seal(b"same-secret").unwrap();
        let b = v.seal(b"same-secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampering_fails_authentication() {
        let v = vault();
        let mut blob = v.seal(b"tamper-me").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert_eq!(v.open(&blob).unwrap_err(), CryptoError::AuthenticationFailed);
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let sealed = vault().seal(b"secret").unwrap();
        let other = Vault::from_passphrase("a-different-passphrase").unwrap();
        assert_eq!(
            other.open(&sealed).unwrap_err(),
            CryptoError::AuthenticationFailed
        );
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let v = vault();
        assert_eq!(v.open(&[1, 2, 3]).unwrap_err(), CryptoError::Malformed);
    }

    #[test]
    fn mask_keeps_only_edges() {
        assert_eq!(mask("supersecretpassword"), "supe···word");
        assert_eq!(mask("short"), "***");
    }
}
