//! # pEp engine core
//!
//! The message-processing core of a peer-to-peer end-to-end email
//! encryption engine. Applications hand RFC 5322 messages to a
//! [`Session`](context::Session); the engine transforms outgoing
//! plaintext into signed/encrypted wire form, decrypts incoming
//! messages, and maintains a persistent trust model over the keys it
//! observes along the way.
//!
//! The OpenPGP backend, the MIME codec and the ASN.1 wire codec are
//! not part of this crate; they are injected at session construction
//! as the [`CryptoBackend`](crypto::CryptoBackend),
//! [`MimeCodec`](mime::MimeCodec) and [`WireCodec`](wire::WireCodec)
//! capabilities.

#![forbid(unsafe_code)]

#[macro_use]
mod log;

pub mod baseprotocol;
pub mod blacklist;
pub mod config;
pub mod constants;
pub mod context;
pub mod crypto;
pub mod decrypt;
pub mod e2ee;
pub mod echo;
pub mod error;
pub mod events;
pub mod headerdef;
pub mod identity;
pub mod keymanagement;
pub mod keyreset;
pub mod message;
pub mod mime;
pub mod rating;
pub mod sql;
pub mod sync;
pub(crate) mod tools;
pub mod wire;
pub mod wrapping;

#[cfg(test)]
pub(crate) mod test_utils;

pub use crate::context::Session;
pub use crate::error::{Result, Status};
