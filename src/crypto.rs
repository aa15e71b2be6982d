//! The OpenPGP capability the engine is constructed over.
//!
//! Key material never enters this crate: the backend owns the
//! keystore, and the engine refers to keys by their 40-hexdigit
//! fingerprints only.

use std::fmt;

use crate::constants::CommType;
use crate::error::Result;
use crate::identity::Identity;

/// Output of a decrypt-and-verify operation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecryptOutput {
    pub plaintext: String,
    /// Fingerprint of the verified signer, if the signature checked
    /// out.
    pub signer: Option<String>,
    /// Fingerprints the ciphertext was encrypted to.
    pub recipients: Vec<String>,
    /// Original filename, when the ciphertext carried one.
    pub filename: Option<String>,
}

impl DecryptOutput {
    pub fn is_verified(&self) -> bool {
        self.signer.is_some()
    }

    /// Effective keylist: signer fingerprint (or empty) first, the
    /// encryption recipients after it.
    pub fn keylist(&self) -> Vec<String> {
        let mut list = vec![self.signer.clone().unwrap_or_default()];
        list.extend(self.recipients.iter().cloned());
        list
    }
}

/// OpenPGP primitives, injected at session construction.
///
/// `keys[0]` of the encrypting operations is the signing key.
/// Operations touching secret keys take the session's current
/// passphrase; they fail with `PassphraseRequired`/`WrongPassphrase`
/// when the keystore needs one.
pub trait CryptoBackend: Send + Sync + fmt::Debug {
    fn encrypt_and_sign(
        &self,
        keys: &[String],
        plaintext: &str,
        passphrase: Option<&str>,
    ) -> Result<String>;

    fn encrypt_only(&self, keys: &[String], plaintext: &str) -> Result<String>;

    fn sign_only(&self, fpr: &str, data: &[u8], passphrase: Option<&str>) -> Result<String>;

    /// Decrypts `ctext` and verifies the embedded signature, or the
    /// detached signature `sig` when given.
    fn decrypt_and_verify(
        &self,
        ctext: &str,
        sig: Option<&str>,
        passphrase: Option<&str>,
    ) -> Result<DecryptOutput>;

    /// Verifies a detached signature; returns the signer fingerprints.
    fn verify_text(&self, data: &[u8], sig: &str) -> Result<Vec<String>>;

    /// Imports key material; returns one identity per private key
    /// found in the blob.
    fn import_key(&self, key_data: &[u8]) -> Result<Vec<Identity>>;

    /// Exports the key as ASCII armor; the secret part when `secret`
    /// is set.
    fn export_key(&self, fpr: &str, secret: bool) -> Result<String>;

    /// Generates a fresh keypair for the identity; returns the new
    /// fingerprint.
    fn generate_keypair(
        &self,
        address: &str,
        user_id: &str,
        passphrase: Option<&str>,
    ) -> Result<String>;

    fn renew_key(&self, fpr: &str, expiration: i64, passphrase: Option<&str>) -> Result<()>;

    fn revoke_key(&self, fpr: &str, reason: Option<&str>, passphrase: Option<&str>)
        -> Result<()>;

    fn key_expired(&self, fpr: &str, when: i64) -> Result<bool>;

    fn key_revoked(&self, fpr: &str) -> Result<bool>;

    /// Key creation time, epoch seconds.
    fn key_created(&self, fpr: &str) -> Result<i64>;

    /// Fingerprints of public keys matching the pattern (usually an
    /// address).
    fn find_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Fingerprints of keys with a private component matching the
    /// pattern.
    fn find_private_keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// Intrinsic quality of the key as a comm-type (key length,
    /// algorithm, brokenness).
    fn get_key_rating(&self, fpr: &str) -> Result<CommType>;

    fn contains_priv_key(&self, fpr: &str) -> Result<bool>;
}
