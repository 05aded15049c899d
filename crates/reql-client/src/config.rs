//! Connection configuration.

use std::str::FromStr;
use std::time::Duration;

use reql_protocol::DEFAULT_MAX_FRAME_SIZE;

use crate::error::Error;

/// Default server address.
pub const DEFAULT_ADDRESS: &str = "localhost:28015";

/// Default capacity of the queue between the reader and processor loops.
pub const DEFAULT_HANDOFF_CAPACITY: usize = 64;

/// Options for opening a [`Connection`](crate::Connection).
///
/// Use the builder methods or [`ConnectOpts::from_connection_string()`] to
/// construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ConnectOpts {
    /// Server address as `host:port`.
    pub address: String,

    /// Database injected into queries that do not name one.
    pub database: Option<String>,

    /// Time allowed to establish the TCP connection.
    pub connect_timeout: Duration,

    /// Largest frame payload accepted or sent.
    pub max_frame_size: usize,

    /// Frames buffered between the reader and processor loops before the
    /// reader stops pulling from the socket.
    pub handoff_capacity: usize,
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            database: None,
            connect_timeout: Duration::from_secs(20),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handoff_capacity: DEFAULT_HANDOFF_CAPACITY,
        }
    }
}

impl ConnectOpts {
    /// Create options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `Key=Value;` connection string.
    ///
    /// Recognized keys (case-insensitive): `Address` (or `Server`/`Host`),
    /// `Database` (or `Db`), `Connect Timeout` (seconds), `Max Frame Size`
    /// (bytes) and `Handoff Capacity`. Unknown keys are ignored with a
    /// warning.
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut opts = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "address" | "server" | "host" => {
                    if value.is_empty() {
                        return Err(Error::Config("address must not be empty".into()));
                    }
                    opts.address = if value.contains(':') {
                        value.to_string()
                    } else {
                        format!("{value}:28015")
                    };
                }
                "database" | "db" => {
                    opts.database = (!value.is_empty()).then(|| value.to_string());
                }
                "connect timeout" | "connection timeout" | "timeout" => {
                    let secs: u64 = value.parse().map_err(|_| {
                        Error::Config(format!("invalid connect timeout: {value}"))
                    })?;
                    opts.connect_timeout = Duration::from_secs(secs);
                }
                "max frame size" => {
                    opts.max_frame_size = value.parse().map_err(|_| {
                        Error::Config(format!("invalid max frame size: {value}"))
                    })?;
                }
                "handoff capacity" => {
                    opts.handoff_capacity = value.parse().map_err(|_| {
                        Error::Config(format!("invalid handoff capacity: {value}"))
                    })?;
                }
                _ => {
                    tracing::warn!(key = %key, "ignoring unknown connection string key");
                }
            }
        }

        opts.validate()?;
        Ok(opts)
    }

    /// Set the server address.
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the default database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the TCP connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum frame payload size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the reader to processor queue capacity.
    #[must_use]
    pub fn handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = capacity;
        self
    }

    /// Check that the options can be used to open a connection.
    pub fn validate(&self) -> Result<(), Error> {
        if self.address.is_empty() {
            return Err(Error::Config("address must not be empty".into()));
        }
        if self.max_frame_size == 0 {
            return Err(Error::Config("max frame size must be positive".into()));
        }
        if self.handoff_capacity == 0 {
            return Err(Error::Config("handoff capacity must be positive".into()));
        }
        Ok(())
    }
}

impl FromStr for ConnectOpts {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_connection_string(s)
    }
}
