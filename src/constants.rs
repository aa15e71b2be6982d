//! # Constants
#![allow(dead_code)]

use num_derive::{FromPrimitive, ToPrimitive};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

pub static PEP_ENGINE_VERSION_STR: Lazy<String> =
    Lazy::new(|| env!("CARGO_PKG_VERSION").to_string());

/// Value of the `X-pEp-Version` opt-field and upper bound for
/// negotiated per-identity protocol versions.
pub const PEP_VERSION: &str = "2.1";
pub const PEP_PROTOCOL_VERSION_MAJOR: u32 = 2;
pub const PEP_PROTOCOL_VERSION_MINOR: u32 = 1;

/// User id used for own identities when the caller does not supply one.
pub const PEP_OWN_USERID: &str = "pEp_own_userId";

/// Prefix for user ids synthesized on first contact, before the
/// application reconciles them with a real user id.
pub const TOFU_PREFIX: &str = "TOFU_";

/// The subject marker placed on wrapped and subject-hidden messages:
/// "p≡p" (the bytes `70 E2 89 A1 70`).
pub const PEP_SUBJECT: &str = "p\u{2261}p";

/// Renewal delta for soon-to-expire own keys: one year.
pub const KEY_EXPIRE_DELTA: i64 = 365 * 24 * 60 * 60;

/// Grace period within which an own key is renewed before it actually
/// expires, and within which a freshly revoked own key is still
/// attached to outgoing mail.
pub const KEY_GRACE_PERIOD: i64 = 7 * 24 * 60 * 60;

/// Comm-type: the ordinal quality of a communication channel or key on
/// the trust lattice. Numeric values are wire- and store-stable; the
/// ranges are meaningful (see the band helpers below).
#[derive(
    Debug,
    Display,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    FromPrimitive,
    ToPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(i32)]
pub enum CommType {
    Unknown = 0x00,

    // range 0x01 to 0x09: no encryption
    NoEncryption = 0x01,
    NoEncryptedChannel = 0x02,
    KeyNotFound = 0x03,
    KeyExpired = 0x04,
    KeyRevoked = 0x05,
    KeyBroken = 0x06,
    /// Not carrying the confirmed bit; retains the fact of an earlier
    /// confirmation across key renewal.
    KeyExpiredButConfirmed = 0x07,
    MyKeyNotIncluded = 0x09,

    SecurityByObscurity = 0x0a,
    BrokenCrypto = 0x0b,
    KeyTooShort = 0x0c,

    Compromised = 0x0e,
    Mistrusted = 0x0f,

    // range 0x10 to 0x3f: unconfirmed encryption
    UnconfirmedEncryption = 0x10,
    OpenPgpWeakUnconfirmed = 0x11,

    ToBeChecked = 0x20,
    SmimeUnconfirmed = 0x21,

    StrongButUnconfirmed = 0x30,
    OpenPgpUnconfirmed = 0x38,

    // range 0x40 to 0x7f: unconfirmed encryption and anonymization
    UnconfirmedEncAnon = 0x40,
    PepUnconfirmed = 0x7f,

    /// The confirmed bit. Not a comm-type of its own; `0x80` is
    /// overlaid on the unconfirmed bands.
    Confirmed = 0x80,

    // range 0x90 to 0xbf: confirmed encryption
    ConfirmedEncryption = 0x90,
    OpenPgpWeak = 0x91,

    ToBeCheckedConfirmed = 0xa0,
    Smime = 0xa1,

    StrongEncryption = 0xb0,
    OpenPgp = 0xb8,

    // range 0xc0 to 0xff: confirmed encryption and anonymization
    ConfirmedEncAnon = 0xc0,
    Pep = 0xff,
}

/// Numeric distance between the OpenPGP and the peer-protocol bands;
/// used when promoting comm-types for identities known to run this
/// protocol (`0x38 + 0x47 == 0x7f`, `0xb8 + 0x47 == 0xff`).
pub const PEP_BAND_OFFSET: i32 = 0x47;

pub const COMM_TYPE_CONFIRMED_BIT: i32 = 0x80;

impl Default for CommType {
    fn default() -> Self {
        CommType::Unknown
    }
}

impl CommType {
    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn from_value(value: i32) -> CommType {
        num_traits::FromPrimitive::from_i32(value).unwrap_or(CommType::Unknown)
    }

    pub fn is_confirmed(self) -> bool {
        self.value() & COMM_TYPE_CONFIRMED_BIT != 0
    }

    /// The comm-type with the confirmed bit set, when the result is a
    /// defined lattice point; `self` otherwise.
    pub fn confirmed(self) -> CommType {
        if self == CommType::Unknown {
            return self;
        }
        match num_traits::FromPrimitive::from_i32(self.value() | COMM_TYPE_CONFIRMED_BIT) {
            Some(ct) => ct,
            None => self,
        }
    }

    /// The comm-type with the confirmed bit stripped, when the result
    /// is a defined lattice point; `self` otherwise.
    pub fn unconfirmed(self) -> CommType {
        match num_traits::FromPrimitive::from_i32(self.value() & !COMM_TYPE_CONFIRMED_BIT) {
            Some(ct) => ct,
            None => self,
        }
    }

    /// True for OpenPGP comm-types, the only band that is promoted for
    /// peer-protocol users.
    pub fn is_open_pgp(self) -> bool {
        matches!(self, CommType::OpenPgpUnconfirmed | CommType::OpenPgp)
    }

    /// Promotes OpenPGP comm-types into the peer-protocol band,
    /// preserving the confirmed bit. Other comm-types are unchanged.
    pub fn promoted_for_pep_user(self) -> CommType {
        match self {
            CommType::OpenPgpUnconfirmed => CommType::PepUnconfirmed,
            CommType::OpenPgp => CommType::Pep,
            other => other,
        }
    }

    /// Componentwise "worst recipient" combination: the minimum of the
    /// two comm-types, saturated at the `Compromised`/`Mistrusted`
    /// floors which win immediately.
    pub fn combine_worst(self, other: CommType) -> CommType {
        if self == CommType::Compromised || other == CommType::Compromised {
            return CommType::Compromised;
        }
        if self == CommType::Mistrusted || other == CommType::Mistrusted {
            return CommType::Mistrusted;
        }
        std::cmp::min(self, other)
    }
}

/// Per-identity flag bits. The lower application-defined bits 0..15
/// are preserved verbatim by the store.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct IdentityFlags(pub u32);

impl IdentityFlags {
    pub const NOT_FOR_SYNC: u32 = 0x0001;
    pub const LIST: u32 = 0x0002;
    pub const DEVICE_GROUP: u32 = 0x0100;

    pub fn has(self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    pub fn set(&mut self, bits: u32) {
        self.0 |= bits;
    }

    pub fn unset(&mut self, bits: u32) {
        self.0 &= !bits;
    }
}
