//! Names of the opt-fields written and read by the engine. The
//! spellings are part of the wire protocol and must not change.

use strum_macros::{AsRefStr, Display, EnumString};

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, AsRefStr, EnumString)]
pub enum HeaderDef {
    #[strum(serialize = "X-pEp-Version")]
    PepVersion,

    /// `INNER`, `OUTER`, `KEY_RESET` or `TRANSPORT`; the ≥2.1
    /// replacement for the in-body wrap sentinel line.
    #[strum(serialize = "X-pEp-Wrapped-Message-Info")]
    WrappedMessageInfo,

    #[strum(serialize = "X-pEp-Sender-FPR")]
    SenderFpr,

    /// Rating of the decrypted message, as written on the output.
    #[strum(serialize = "X-EncStatus")]
    EncStatus,

    /// Effective keylist of the decrypted message.
    #[strum(serialize = "X-KeyList")]
    KeyList,

    /// Autocrypt header; its `keydata=` value is parsed for
    /// opportunistic key import.
    #[strum(serialize = "Autocrypt")]
    Autocrypt,

    /// Marks synthesized protocol messages so clients hide them.
    #[strum(serialize = "pEp-auto-consume")]
    AutoConsume,
}

impl HeaderDef {
    pub fn get_headername(&self) -> &str {
        self.as_ref()
    }
}
