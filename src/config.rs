//! # Key-value configuration management

use strum::EnumProperty as _;
use strum_macros::{AsRefStr, Display, EnumProperty, EnumString};

use crate::context::Session;
use crate::error::Result;

/// The available runtime configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, AsRefStr, EnumProperty)]
#[strum(serialize_all = "snake_case")]
pub enum Config {
    /// Keep the original subject on the wire instead of hiding it
    /// behind the "p≡p" marker.
    #[strum(props(default = "0"))]
    UnencryptedSubject,

    /// Do not attach the own public key to unencrypted outgoing mail
    /// unless a peer-protocol user is among the recipients.
    #[strum(props(default = "0"))]
    PassiveMode,

    /// Master switch for the Echo ping/pong protocol.
    #[strum(props(default = "1"))]
    EnableEchoProtocol,

    /// Restrict incoming-message pings to addresses already known to
    /// run the peer protocol.
    #[strum(props(default = "0"))]
    EchoPingOnlyKnownPeers,
}

impl Session {
    /// Gets a configuration key. `None` when no value is set and the
    /// key has no default.
    pub fn get_config(&self, key: Config) -> Result<Option<String>> {
        let value = self.sql.get_raw_config(key.as_ref())?;
        if value.is_some() {
            return Ok(value);
        }
        Ok(key.get_str("default").map(|s| s.to_string()))
    }

    pub fn get_config_int(&self, key: Config) -> Result<i32> {
        Ok(self
            .get_config(key)?
            .and_then(|s| s.parse().ok())
            .unwrap_or_default())
    }

    pub fn get_config_bool(&self, key: Config) -> Result<bool> {
        Ok(self.get_config_int(key)? != 0)
    }

    /// Sets the given config key. Passing `None` clears the value,
    /// falling back to the default if there is one.
    pub fn set_config(&self, key: Config, value: Option<&str>) -> Result<()> {
        self.sql.set_raw_config(key.as_ref(), value)
    }

    pub fn set_config_bool(&self, key: Config, value: bool) -> Result<()> {
        self.set_config(key, Some(if value { "1" } else { "0" }))
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;
    use crate::test_utils::TestSession;

    #[test]
    fn test_to_string() {
        assert_eq!(Config::PassiveMode.to_string(), "passive_mode");
        assert_eq!(
            Config::from_str("passive_mode"),
            Ok(Config::PassiveMode)
        );
    }

    #[test]
    fn test_default_prop() {
        let t = TestSession::new();
        assert!(t.get_config_bool(Config::EnableEchoProtocol).unwrap());
        assert!(!t.get_config_bool(Config::PassiveMode).unwrap());
    }

    #[test]
    fn test_set_and_clear() {
        let t = TestSession::new();
        t.set_config_bool(Config::UnencryptedSubject, true).unwrap();
        assert!(t.get_config_bool(Config::UnencryptedSubject).unwrap());
        t.set_config(Config::UnencryptedSubject, None).unwrap();
        assert!(!t.get_config_bool(Config::UnencryptedSubject).unwrap());
    }
}
