//! Connection settings for the Redis store.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the store lives and how to authenticate.
///
/// The defaults match a local development Redis: `localhost:6379`, no
/// password, database 0, 5 second connect timeout.
///
/// ```rust
/// use courier_transport::RedisConfig;
///
/// let config = RedisConfig::default()
///     .host("cache.internal")
///     .password("s3cret")
///     .db(2);
/// assert!(config.should_authenticate());
/// assert_eq!(config.connection_url(), "redis://:***@cache.internal:6379/2");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    /// `None` or a blank string disables AUTH.
    pub password: Option<String>,
    /// Logical database index (`SELECT n`).
    pub db: i64,
    /// Upper bound on establishing a connection.
    pub connect_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            db: 0,
            connect_timeout: Duration::from_millis(5000),
        }
    }
}

impl RedisConfig {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Returns `true` if a non-blank password is configured.
    pub fn should_authenticate(&self) -> bool {
        self.password
            .as_deref()
            .is_some_and(|password| !password.trim().is_empty())
    }

    /// A `redis://` URL describing the settings, with the password masked.
    ///
    /// Meant for logs and error messages. Connections are opened from
    /// [`connection_info`](Self::connection_info), which passes the password
    /// through untouched whatever characters it contains.
    pub fn connection_url(&self) -> String {
        let auth = if self.should_authenticate() { ":***@" } else { "" };
        format!("redis://{auth}{}:{}/{}", self.host, self.port, self.db)
    }

    /// Connection parameters for the `redis` client.
    #[cfg(feature = "redis")]
    pub fn connection_info(&self) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                db: self.db,
                password: self
                    .password
                    .clone()
                    .filter(|_| self.should_authenticate()),
                ..Default::default()
            },
        }
    }
}
