//! Status codes and the crate-wide result type.
//!
//! The engine reports everything through the closed [`Status`] enum:
//! failures travel as `Err(Status)`, while the handful of
//! "successful, but..." codes (`Unencrypted`, `Decrypted`, ...) are
//! returned as values next to the affected message.

pub type Result<T> = std::result::Result<T, Status>;

/// The closed set of status codes used by the engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Status {
    #[default]
    #[error("ok")]
    Ok,
    #[error("message was not encrypted")]
    Unencrypted,
    #[error("message decrypted but signature could not be verified")]
    Decrypted,
    #[error("message decrypted and verified")]
    DecryptedAndVerified,
    #[error("no key available to decrypt this message")]
    DecryptNoKey,
    #[error("message has no recognisable encryption format")]
    DecryptWrongFormat,
    #[error("signature verified")]
    Verified,
    #[error("signature verified, signer trusted")]
    VerifiedAndTrusted,
    #[error("key not found")]
    KeyNotFound,
    #[error("key unsuitable")]
    KeyUnsuitable,
    #[error("key is blacklisted")]
    KeyBlacklisted,
    #[error("cannot retrieve key")]
    GetKeyFailed,
    #[error("identity not found")]
    CannotFindIdentity,
    #[error("user id alias not found")]
    CannotFindAlias,
    #[error("cannot write identity")]
    CannotSetIdentity,
    #[error("cannot write trust record")]
    CannotSetTrust,
    #[error("cannot write person record")]
    CannotSetPerson,
    #[error("cannot increase sequence value")]
    CannotIncreaseSequence,
    #[error("illegal parameter value")]
    IllegalValue,
    #[error("buffer too small")]
    BufferTooSmall,
    #[error("out of memory")]
    OutOfMemory,
    #[error("record not found")]
    RecordNotFound,
    #[error("unknown database error")]
    UnknownDbError,
    #[error("database commit failed")]
    CommitFailed,
    #[error("refusing to open a database from a newer engine")]
    DbDowngradeViolation,
    #[error("cannot re-encrypt message")]
    CannotReencrypt,
    #[error("passphrase required")]
    PassphraseRequired,
    #[error("wrong passphrase")]
    WrongPassphrase,
    #[error("malformed distribution message")]
    DistributionIllegalMessage,
    #[error("sync cannot start without an own identity")]
    SyncCannotStart,
    #[error("no notifyHandshake callback registered")]
    SyncNoNotifyCallback,
    #[error("no messageToSend callback registered")]
    SyncNoMessageSendCallback,
}

impl Status {
    /// True for codes that describe a successful decryption.
    pub fn is_decrypted(self) -> bool {
        matches!(self, Status::Decrypted | Status::DecryptedAndVerified)
    }

    /// True for the caller-fault codes which must never mutate state.
    pub fn is_caller_fault(self) -> bool {
        matches!(self, Status::IllegalValue | Status::BufferTooSmall)
    }
}

impl From<rusqlite::Error> for Status {
    fn from(err: rusqlite::Error) -> Status {
        match err {
            rusqlite::Error::QueryReturnedNoRows => Status::RecordNotFound,
            _ => Status::UnknownDbError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_error_mapping() {
        assert_eq!(
            Status::from(rusqlite::Error::QueryReturnedNoRows),
            Status::RecordNotFound
        );
        assert_eq!(
            Status::from(rusqlite::Error::InvalidQuery),
            Status::UnknownDbError
        );
    }

    #[test]
    fn test_caller_fault() {
        assert!(Status::IllegalValue.is_caller_fault());
        assert!(!Status::UnknownDbError.is_caller_fault());
    }
}
