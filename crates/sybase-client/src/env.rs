//! Session environment: an ordered mapping of well-known keys.
//!
//! The environment always reflects the last accepted value, whether it
//! came from the caller's configuration or from a server environment
//! change. [`crate::Connection::disconnect`] hands it back so a caller
//! can reconnect with identical parameters.

use tds5_protocol::token::EnvChangeKind;

use crate::config::Config;

/// Well-known environment keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKey {
    /// Server host.
    Host,
    /// Server port.
    Port,
    /// Login user name.
    User,
    /// Login password.
    Password,
    /// Current database.
    Database,
    /// Application name.
    AppName,
    /// Client library name.
    LibName,
    /// Session language.
    Language,
    /// Session character set.
    CharSet,
    /// Negotiated packet size.
    PacketSize,
}

impl EnvKey {
    /// The key's canonical name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Port => "port",
            Self::User => "user",
            Self::Password => "password",
            Self::Database => "database",
            Self::AppName => "app_name",
            Self::LibName => "lib_name",
            Self::Language => "language",
            Self::CharSet => "char_set",
            Self::PacketSize => "packet_size",
        }
    }

    /// Map a server environment change kind onto an environment key.
    /// Changes outside the recognized set return `None`.
    #[must_use]
    pub fn from_change(kind: EnvChangeKind) -> Option<Self> {
        match kind {
            EnvChangeKind::Database => Some(Self::Database),
            EnvChangeKind::Language => Some(Self::Language),
            EnvChangeKind::CharSet => Some(Self::CharSet),
            EnvChangeKind::PacketSize => Some(Self::PacketSize),
            EnvChangeKind::Other(_) => None,
        }
    }
}

impl std::fmt::Display for EnvKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered key/value session environment.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    entries: Vec<(EnvKey, String)>,
}

impl Environment {
    pub(crate) fn from_config(config: &Config) -> Self {
        let mut env = Self::default();
        env.set(EnvKey::Host, config.host.clone());
        env.set(EnvKey::Port, config.port.to_string());
        env.set(EnvKey::User, config.user.clone());
        env.set(EnvKey::Password, config.password.clone());
        if let Some(database) = &config.database {
            env.set(EnvKey::Database, database.clone());
        }
        env.set(EnvKey::AppName, config.app_name.clone());
        env.set(EnvKey::LibName, config.lib_name.clone());
        env.set(EnvKey::Language, config.language.clone());
        env.set(EnvKey::CharSet, config.char_set.clone());
        env.set(EnvKey::PacketSize, config.packet_size.to_string());
        env
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: EnvKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or update a key, preserving first-insertion order.
    pub fn set(&mut self, key: EnvKey, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Iterate over entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (EnvKey, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the environment is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_upserts_in_place() {
        let mut env = Environment::default();
        env.set(EnvKey::Database, "master".to_string());
        env.set(EnvKey::Language, "us_english".to_string());
        env.set(EnvKey::Database, "pubs2".to_string());

        assert_eq!(env.get(EnvKey::Database), Some("pubs2"));
        assert_eq!(env.len(), 2);
        let keys: Vec<_> = env.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![EnvKey::Database, EnvKey::Language]);
    }

    #[test]
    fn from_config_captures_connection_parameters() {
        let config = Config::new("db1").with_port(4100).with_database("pubs2");
        let env = Environment::from_config(&config);

        assert_eq!(env.get(EnvKey::Host), Some("db1"));
        assert_eq!(env.get(EnvKey::Port), Some("4100"));
        assert_eq!(env.get(EnvKey::Database), Some("pubs2"));
        assert_eq!(env.get(EnvKey::PacketSize), Some("512"));
    }

    #[test]
    fn change_kind_mapping() {
        assert_eq!(
            EnvKey::from_change(EnvChangeKind::PacketSize),
            Some(EnvKey::PacketSize)
        );
        assert_eq!(EnvKey::from_change(EnvChangeKind::Other(9)), None);
    }
}
