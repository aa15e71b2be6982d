//! Inner-protocol frames and the ASN.1 codec capability.
//!
//! Distribution messages are carried as attachments on ordinary mail
//! (see [`crate::baseprotocol`]); the PER encoding itself is done by
//! the injected [`WireCodec`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Size of an Echo challenge/response blob.
pub const CHALLENGE_SIZE: usize = 16;

/// A Distribution protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distribution {
    Echo(Echo),
    ManagedGroup(ManagedGroup),
}

/// The Echo challenge/response sub-protocol (§ key discovery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Echo {
    Ping { challenge: [u8; CHALLENGE_SIZE] },
    Pong { challenge: [u8; CHALLENGE_SIZE] },
}

/// Group-management frames; the engine uses the key-reset
/// announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManagedGroup {
    KeyReset {
        revoked_fpr: String,
        replacement_fpr: String,
    },
}

/// ASN.1 PER encoder/decoder for the inner protocol frames, injected
/// at session construction.
pub trait WireCodec: Send + Sync + fmt::Debug {
    fn encode_distribution(&self, msg: &Distribution) -> Result<Vec<u8>>;

    fn decode_distribution(&self, bytes: &[u8]) -> Result<Distribution>;
}
