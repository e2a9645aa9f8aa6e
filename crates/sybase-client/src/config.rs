//! Client configuration.

use std::time::Duration;

use tds5_protocol::packet::DEFAULT_PACKET_SIZE;

/// Timeout configuration for connection phases.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Time to establish the TCP connection and complete login
    /// (default: 15s).
    pub connect_timeout: Duration,
    /// Default timeout applied to each receive while reading a reply
    /// (default: 30s).
    pub command_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            command_timeout: Duration::from_secs(30),
        }
    }
}

impl TimeoutConfig {
    /// Create a new timeout configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-receive command timeout.
    #[must_use]
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }
}

/// Connection configuration.
///
/// Every field here is carried into the connection's environment, so a
/// reconnect after a dropped session reuses the same values.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// Database selected with `use <database>` right after login.
    pub database: Option<String>,
    /// Application name reported in the login record.
    pub app_name: String,
    /// Client library name reported in the login record.
    pub lib_name: String,
    /// Session language.
    pub language: String,
    /// Session character set.
    pub char_set: String,
    /// Initial TDS packet size; the server may renegotiate it.
    pub packet_size: u32,
    /// Timeout knobs.
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
            user: "sa".to_string(),
            password: String::new(),
            database: None,
            app_name: "sybase-client".to_string(),
            lib_name: "tds5".to_string(),
            language: "us_english".to_string(),
            char_set: "utf8".to_string(),
            packet_size: DEFAULT_PACKET_SIZE as u32,
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Create a configuration for the given host with defaults for
    /// everything else.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Set the server host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Set the database selected after login.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Set the session language.
    #[must_use]
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Set the initial packet size.
    #[must_use]
    pub fn with_packet_size(mut self, packet_size: u32) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Set the timeout configuration.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new("db1.internal")
            .with_port(4100)
            .with_credentials("app_user", "pw")
            .with_database("pubs2")
            .with_packet_size(2048);

        assert_eq!(config.host, "db1.internal");
        assert_eq!(config.port, 4100);
        assert_eq!(config.user, "app_user");
        assert_eq!(config.database.as_deref(), Some("pubs2"));
        assert_eq!(config.packet_size, 2048);
        assert_eq!(config.language, "us_english");
    }
}
