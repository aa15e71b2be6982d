//! Utilities to help writing tests.
//!
//! This module is only compiled for test runs. It provides
//! [`TestSession`], a tempdir-backed session wired to deterministic
//! doubles of the injected capabilities: an in-memory OpenPGP
//! backend, and JSON-shaped MIME and wire codecs whose encode/decode
//! are exact inverses.

use std::collections::BTreeMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::constants::CommType;
use crate::context::Session;
use crate::crypto::{CryptoBackend, DecryptOutput};
use crate::error::{Result, Status};
use crate::identity::Identity;
use crate::keymanagement::{myself, update_identity};
use crate::message::{Message, MessageDirection};
use crate::mime::MimeCodec;
use crate::sync::SyncNotify;
use crate::tools::time;
use crate::wire::{Distribution, WireCodec};

pub(crate) const ALICE_ADDR: &str = "alice@example.org";
pub(crate) const BOB_ADDR: &str = "bob@example.net";
pub(crate) const DAVE_ADDR: &str = "dave@example.com";

/// A session over a temporary directory, with handles on the doubles
/// and on everything the session sent or signalled.
pub(crate) struct TestSession {
    pub session: Session,
    pub dir: TempDir,
    crypto: FakeCrypto,
    sent: Arc<Mutex<Vec<Message>>>,
    signals: Arc<Mutex<Vec<SyncNotify>>>,
    passphrase_on_request: Arc<Mutex<Option<String>>>,
    own_address: Mutex<Option<(String, String)>>,
}

impl Deref for TestSession {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl TestSession {
    /// A fresh session with send and handshake recorders installed.
    pub fn new() -> Self {
        let t = Self::bare();
        let sent = Arc::clone(&t.sent);
        let passphrase_slot = Arc::clone(&t.passphrase_on_request);
        let session = t.session.clone();
        t.session
            .register_send_callback(Box::new(move |msg: Option<Message>| {
                match msg {
                    Some(msg) => sent.lock().unwrap().push(msg),
                    None => {
                        // The engine asks for a passphrase.
                        if let Some(pass) = passphrase_slot.lock().unwrap().clone() {
                            session.config_passphrase(Some(pass));
                        }
                    }
                }
                Ok(())
            }));
        let signals = Arc::clone(&t.signals);
        t.session.callbacks.lock().unwrap().notify_handshake =
            Some(Box::new(move |_me, _partner, signal| {
                signals.lock().unwrap().push(signal);
                Ok(())
            }));
        t
    }

    /// A session without any callbacks registered.
    pub fn bare() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let dbfile = dir.path().join("management.db");
        let crypto = FakeCrypto::new();
        let session = Session::new(
            &dbfile,
            Box::new(crypto.clone()),
            Box::new(JsonMimeCodec),
            Box::new(JsonWireCodec),
        )
        .unwrap();
        TestSession {
            session,
            dir,
            crypto,
            sent: Arc::new(Mutex::new(Vec::new())),
            signals: Arc::new(Mutex::new(Vec::new())),
            passphrase_on_request: Arc::new(Mutex::new(None)),
            own_address: Mutex::new(None),
        }
    }

    /// A session configured as alice, with a generated own key.
    pub fn alice() -> Self {
        let t = Self::new();
        t.become_own("Alice", ALICE_ADDR, "alice-uid");
        t
    }

    /// A session configured as bob.
    pub fn bob() -> Self {
        let t = Self::new();
        t.become_own("Bob", BOB_ADDR, "bob-uid");
        t
    }

    fn become_own(&self, name: &str, address: &str, user_id: &str) {
        let mut me = Identity::new(address, user_id);
        me.username = name.to_string();
        myself(&self.session, &mut me).expect("failed to set up own identity");
        *self.own_address.lock().unwrap() = Some((address.to_string(), user_id.to_string()));
    }

    pub fn dbfile(&self) -> PathBuf {
        self.session.get_dbfile().to_path_buf()
    }

    /// Opens a second session over an existing database file.
    pub fn try_open(path: &Path) -> Result<Session> {
        Session::new(
            path,
            Box::new(FakeCrypto::new()),
            Box::new(JsonMimeCodec),
            Box::new(JsonWireCodec),
        )
    }

    pub fn open_existing(path: &Path) -> Session {
        Self::try_open(path).expect("failed to reopen database")
    }

    pub fn crypto_backend(&self) -> &FakeCrypto {
        &self.crypto
    }

    /// The current own identity, freshly completed.
    pub fn own_identity(&self) -> Identity {
        let (address, user_id) = self
            .own_address
            .lock()
            .unwrap()
            .clone()
            .expect("session has no own identity");
        let mut me = Identity::new(&address, &user_id);
        myself(&self.session, &mut me).unwrap();
        me
    }

    pub fn alice_identity(&self) -> Identity {
        self.own_identity()
    }

    pub fn own_fpr(&self) -> String {
        self.own_identity().fpr
    }

    /// Registers a public-only peer key in the backend keystore.
    pub fn import_peer_key(&self, address: &str) -> String {
        self.import_peer_key_rated(address, CommType::OpenPgpUnconfirmed)
    }

    pub fn import_peer_key_rated(&self, address: &str, rating: CommType) -> String {
        self.crypto.add_key(address, false, rating)
    }

    /// Generates a keypair in the backend without binding it to any
    /// identity.
    pub fn generate_own_key(&self, address: &str) -> String {
        self.crypto.generate_keypair(address, "", None).unwrap()
    }

    /// Makes `address` a known peer-protocol user with a stored key.
    pub fn make_pep_peer(&self, address: &str, user_id: &str) -> String {
        if self.crypto.find_keys(address).unwrap().is_empty() {
            self.import_peer_key(address);
        }
        let mut peer = Identity::new(address, user_id);
        update_identity(&self.session, &mut peer).unwrap();
        crate::identity::set_as_pep_user(&self.session, user_id).unwrap();
        // Re-election now promotes the comm-type into the pEp band.
        let mut peer = Identity::new(address, user_id);
        update_identity(&self.session, &mut peer).unwrap();
        peer.fpr
    }

    /// Makes both sessions know each other's public key, as a first
    /// mail exchange would.
    pub fn exchange_keys(&self, other: &TestSession) {
        let own = self.own_identity();
        let other_own = other.own_identity();
        let own_key = self.crypto.export_key(&own.fpr, false).unwrap();
        let other_key = other.crypto.export_key(&other_own.fpr, false).unwrap();
        other.crypto.import_key(own_key.as_bytes()).unwrap();
        self.crypto.import_key(other_key.as_bytes()).unwrap();
    }

    /// An outgoing text message from the own identity.
    pub fn outgoing_text(&self, to_addr: &str, to_uid: &str, subject: &str) -> Message {
        let mut msg = Message::new(MessageDirection::Outgoing);
        msg.from = self.own_identity();
        msg.to = vec![Identity::new(to_addr, to_uid)];
        msg.shortmsg = subject.to_string();
        msg.longmsg = "body text\n".to_string();
        msg
    }

    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear_sent_messages(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn handshake_signals(&self) -> Vec<SyncNotify> {
        self.signals.lock().unwrap().clone()
    }

    /// Arms the send callback to configure this passphrase when the
    /// engine asks for one.
    pub fn on_passphrase_request(&self, passphrase: &str) {
        *self.passphrase_on_request.lock().unwrap() = Some(passphrase.to_string());
    }
}

impl std::fmt::Debug for TestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSession")
            .field("dbfile", &self.session.get_dbfile())
            .finish()
    }
}

// The deterministic OpenPGP double. Key material is a table of
// fingerprints; "armor" blobs are JSON between PGP-style markers so
// that format detection in the pipeline sees realistic headers.

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FakeKey {
    fpr: String,
    address: String,
    created: i64,
    /// 0 means "never expires".
    expires: i64,
    revoked: bool,
    has_private: bool,
    rating: CommType,
}

#[derive(Debug, Default)]
struct FakeState {
    keys: BTreeMap<String, FakeKey>,
    counter: u64,
    required_passphrase: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeCrypto {
    state: Arc<Mutex<FakeState>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CipherBlob {
    keys: Vec<String>,
    signer: String,
    payload: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SignatureBlob {
    signer: String,
    digest: u64,
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in data {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100_0000_01b3);
    }
    hash
}

fn armored(kind: &str, json: &str) -> String {
    format!("-----BEGIN PGP {kind}-----\n{json}\n-----END PGP {kind}-----\n")
}

fn unarmor(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    text.get(start..=end)
}

impl FakeCrypto {
    pub fn new() -> Self {
        FakeCrypto::default()
    }

    pub fn add_key(&self, address: &str, has_private: bool, rating: CommType) -> String {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let mut raw = [0u8; 20];
        raw[12..].copy_from_slice(&state.counter.to_be_bytes());
        let fpr = hex::encode_upper(raw);
        let key = FakeKey {
            fpr: fpr.clone(),
            address: address.to_string(),
            created: time() + state.counter as i64,
            expires: 0,
            revoked: false,
            has_private,
            rating,
        };
        state.keys.insert(fpr.clone(), key);
        fpr
    }

    pub fn set_key_expiry(&self, fpr: &str, expires: i64) {
        let mut state = self.state.lock().unwrap();
        if let Some(key) = state.keys.get_mut(fpr) {
            key.expires = expires;
        }
    }

    pub fn require_passphrase(&self, passphrase: &str) {
        self.state.lock().unwrap().required_passphrase = Some(passphrase.to_string());
    }

    /// Recipient fingerprints of a ciphertext blob.
    pub fn recipients_of(&self, ctext: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(ctext);
        unarmor(&text)
            .and_then(|json| serde_json::from_str::<CipherBlob>(json).ok())
            .map(|blob| blob.keys)
            .unwrap_or_default()
    }

    /// Raw payload of a ciphertext blob, ignoring key possession.
    pub fn decrypt_for_test(&self, ctext: &str) -> Option<String> {
        unarmor(ctext)
            .and_then(|json| serde_json::from_str::<CipherBlob>(json).ok())
            .map(|blob| blob.payload)
    }

    fn passphrase_gate(&self, passphrase: Option<&str>) -> Result<()> {
        let state = self.state.lock().unwrap();
        match &state.required_passphrase {
            None => Ok(()),
            Some(required) => match passphrase {
                None => Err(Status::PassphraseRequired),
                Some(given) if given == required => Ok(()),
                Some(_) => Err(Status::WrongPassphrase),
            },
        }
    }
}

impl CryptoBackend for FakeCrypto {
    fn encrypt_and_sign(
        &self,
        keys: &[String],
        plaintext: &str,
        passphrase: Option<&str>,
    ) -> Result<String> {
        self.passphrase_gate(passphrase)?;
        let signer = keys.first().cloned().unwrap_or_default();
        let blob = CipherBlob {
            keys: keys.to_vec(),
            signer,
            payload: plaintext.to_string(),
        };
        Ok(armored("MESSAGE", &serde_json::to_string(&blob).unwrap()))
    }

    fn encrypt_only(&self, keys: &[String], plaintext: &str) -> Result<String> {
        let blob = CipherBlob {
            keys: keys.to_vec(),
            signer: String::new(),
            payload: plaintext.to_string(),
        };
        Ok(armored("MESSAGE", &serde_json::to_string(&blob).unwrap()))
    }

    fn sign_only(&self, fpr: &str, data: &[u8], passphrase: Option<&str>) -> Result<String> {
        self.passphrase_gate(passphrase)?;
        if !self.contains_priv_key(fpr)? {
            return Err(Status::KeyNotFound);
        }
        let blob = SignatureBlob {
            signer: fpr.to_string(),
            digest: fnv1a(data),
        };
        Ok(armored("SIGNATURE", &serde_json::to_string(&blob).unwrap()))
    }

    fn decrypt_and_verify(
        &self,
        ctext: &str,
        sig: Option<&str>,
        passphrase: Option<&str>,
    ) -> Result<DecryptOutput> {
        let json = unarmor(ctext).ok_or(Status::DecryptWrongFormat)?;
        let blob: CipherBlob =
            serde_json::from_str(json).map_err(|_| Status::DecryptWrongFormat)?;
        {
            let state = self.state.lock().unwrap();
            if !blob
                .keys
                .iter()
                .any(|fpr| state.keys.get(fpr).map(|k| k.has_private).unwrap_or(false))
            {
                return Err(Status::DecryptNoKey);
            }
        }
        self.passphrase_gate(passphrase)?;
        let mut signer = None;
        if !blob.signer.is_empty() && self.state.lock().unwrap().keys.contains_key(&blob.signer) {
            signer = Some(blob.signer.clone());
        }
        if signer.is_none() {
            if let Some(sig) = sig {
                signer = self
                    .verify_text(blob.payload.as_bytes(), sig)?
                    .first()
                    .cloned();
            }
        }
        Ok(DecryptOutput {
            plaintext: blob.payload,
            signer,
            recipients: blob.keys,
            filename: None,
        })
    }

    fn verify_text(&self, data: &[u8], sig: &str) -> Result<Vec<String>> {
        let Some(json) = unarmor(sig) else {
            return Ok(Vec::new());
        };
        let Ok(blob) = serde_json::from_str::<SignatureBlob>(json) else {
            return Ok(Vec::new());
        };
        if blob.digest != fnv1a(data) {
            return Ok(Vec::new());
        }
        if !self.state.lock().unwrap().keys.contains_key(&blob.signer) {
            return Ok(Vec::new());
        }
        Ok(vec![blob.signer])
    }

    fn import_key(&self, key_data: &[u8]) -> Result<Vec<Identity>> {
        let text = String::from_utf8_lossy(key_data);
        let json = unarmor(&text).ok_or(Status::IllegalValue)?;
        let key: FakeKey = serde_json::from_str(json).map_err(|_| Status::IllegalValue)?;
        let mut state = self.state.lock().unwrap();
        let mut private_identities = Vec::new();
        if key.has_private {
            let mut ident = Identity::new(&key.address, "");
            ident.fpr = key.fpr.clone();
            private_identities.push(ident);
        }
        let has_private = key.has_private;
        state
            .keys
            .entry(key.fpr.clone())
            .and_modify(|existing| existing.has_private |= has_private)
            .or_insert(key);
        Ok(private_identities)
    }

    fn export_key(&self, fpr: &str, secret: bool) -> Result<String> {
        let state = self.state.lock().unwrap();
        let key = state.keys.get(fpr).ok_or(Status::KeyNotFound)?;
        if secret && !key.has_private {
            return Err(Status::KeyNotFound);
        }
        let mut exported = key.clone();
        exported.has_private = secret;
        let kind = if secret {
            "PRIVATE KEY BLOCK"
        } else {
            "PUBLIC KEY BLOCK"
        };
        Ok(armored(kind, &serde_json::to_string(&exported).unwrap()))
    }

    fn generate_keypair(
        &self,
        address: &str,
        _user_id: &str,
        _passphrase: Option<&str>,
    ) -> Result<String> {
        Ok(self.add_key(address, true, CommType::OpenPgpUnconfirmed))
    }

    fn renew_key(&self, fpr: &str, expiration: i64, passphrase: Option<&str>) -> Result<()> {
        self.passphrase_gate(passphrase)?;
        let mut state = self.state.lock().unwrap();
        let key = state.keys.get_mut(fpr).ok_or(Status::KeyNotFound)?;
        key.expires = expiration;
        Ok(())
    }

    fn revoke_key(
        &self,
        fpr: &str,
        _reason: Option<&str>,
        passphrase: Option<&str>,
    ) -> Result<()> {
        self.passphrase_gate(passphrase)?;
        let mut state = self.state.lock().unwrap();
        let key = state.keys.get_mut(fpr).ok_or(Status::KeyNotFound)?;
        key.revoked = true;
        Ok(())
    }

    fn key_expired(&self, fpr: &str, when: i64) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let key = state.keys.get(fpr).ok_or(Status::KeyNotFound)?;
        Ok(key.expires != 0 && key.expires <= when)
    }

    fn key_revoked(&self, fpr: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let key = state.keys.get(fpr).ok_or(Status::KeyNotFound)?;
        Ok(key.revoked)
    }

    fn key_created(&self, fpr: &str) -> Result<i64> {
        let state = self.state.lock().unwrap();
        let key = state.keys.get(fpr).ok_or(Status::KeyNotFound)?;
        Ok(key.created)
    }

    fn find_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .keys
            .values()
            .filter(|key| key.address.eq_ignore_ascii_case(pattern))
            .map(|key| key.fpr.clone())
            .collect())
    }

    fn find_private_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .keys
            .values()
            .filter(|key| key.has_private && key.address.eq_ignore_ascii_case(pattern))
            .map(|key| key.fpr.clone())
            .collect())
    }

    fn get_key_rating(&self, fpr: &str) -> Result<CommType> {
        let state = self.state.lock().unwrap();
        let key = state.keys.get(fpr).ok_or(Status::KeyNotFound)?;
        if key.revoked {
            return Ok(CommType::KeyRevoked);
        }
        if key.expires != 0 && key.expires <= time() {
            return Ok(CommType::KeyExpired);
        }
        Ok(key.rating)
    }

    fn contains_priv_key(&self, fpr: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.keys.get(fpr).map(|k| k.has_private).unwrap_or(false))
    }
}

/// MIME codec double: JSON with an exact decode(encode(m)) == m
/// round-trip.
#[derive(Debug)]
pub(crate) struct JsonMimeCodec;

impl MimeCodec for JsonMimeCodec {
    fn encode(&self, msg: &Message, _omit_fields: bool) -> Result<Vec<u8>> {
        serde_json::to_vec(msg).map_err(|_| Status::IllegalValue)
    }

    fn decode(&self, bytes: &[u8]) -> Result<(Message, bool)> {
        let msg: Message =
            serde_json::from_slice(bytes).map_err(|_| Status::DecryptWrongFormat)?;
        let has_inner = msg
            .attachments
            .first()
            .map(|a| a.mime_type.eq_ignore_ascii_case("message/rfc822"))
            .unwrap_or(false);
        Ok((msg, has_inner))
    }
}

/// Wire codec double for the Distribution frames.
#[derive(Debug)]
pub(crate) struct JsonWireCodec;

impl WireCodec for JsonWireCodec {
    fn encode_distribution(&self, msg: &Distribution) -> Result<Vec<u8>> {
        serde_json::to_vec(msg).map_err(|_| Status::IllegalValue)
    }

    fn decode_distribution(&self, bytes: &[u8]) -> Result<Distribution> {
        serde_json::from_slice(bytes).map_err(|_| Status::DistributionIllegalMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fake_crypto_roundtrip() {
        let crypto = FakeCrypto::new();
        let fpr = crypto.generate_keypair("me@example.org", "", None).unwrap();
        let ctext = crypto
            .encrypt_and_sign(&[fpr.clone()], "secret", None)
            .unwrap();
        assert!(ctext.starts_with("-----BEGIN PGP MESSAGE-----"));
        let output = crypto.decrypt_and_verify(&ctext, None, None).unwrap();
        assert_eq!(output.plaintext, "secret");
        assert_eq!(output.signer.as_deref(), Some(fpr.as_str()));
    }

    #[test]
    fn test_fake_crypto_no_key() {
        let crypto = FakeCrypto::new();
        let other = FakeCrypto::new();
        let fpr = other.generate_keypair("me@example.org", "", None).unwrap();
        let ctext = other.encrypt_and_sign(&[fpr], "secret", None).unwrap();
        assert_eq!(
            crypto.decrypt_and_verify(&ctext, None, None),
            Err(Status::DecryptNoKey)
        );
    }

    #[test]
    fn test_fake_key_export_import() {
        let a = FakeCrypto::new();
        let b = FakeCrypto::new();
        let fpr = a.generate_keypair("me@example.org", "", None).unwrap();
        let armored = a.export_key(&fpr, false).unwrap();
        let private = b.import_key(armored.as_bytes()).unwrap();
        assert!(private.is_empty());
        assert_eq!(b.find_keys("me@example.org").unwrap(), vec![fpr.clone()]);
        // Public import does not leak the private part.
        assert!(!b.contains_priv_key(&fpr).unwrap());

        let armored = a.export_key(&fpr, true).unwrap();
        let private = b.import_key(armored.as_bytes()).unwrap();
        assert_eq!(private.len(), 1);
        assert!(b.contains_priv_key(&fpr).unwrap());
    }

    #[test]
    fn test_mime_codec_roundtrip() {
        let codec = JsonMimeCodec;
        let mut msg = Message::new(MessageDirection::Outgoing);
        msg.shortmsg = "subject".to_string();
        msg.longmsg = "body".to_string();
        let bytes = codec.encode(&msg, false).unwrap();
        let (decoded, has_inner) = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert!(!has_inner);
    }
}
