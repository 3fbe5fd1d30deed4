/*!
Client configuration.
*/

use crate::error::{Result, SnpxError};
use crate::protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection and session settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Controller host name or IP address
    pub host: String,

    /// Controller TCP port
    pub port: u16,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Maximum wait for a complete reply in milliseconds
    pub read_timeout_ms: u64,

    /// Number of robot axes in motion group 1
    pub axis_count: usize,

    /// Position variable registered as one block for both position readers
    pub position_variable: String,

    /// Send CLRASG during the handshake
    pub clear_assignments_on_connect: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout_ms: 3000,
            read_timeout_ms: 2000,
            axis_count: 6,
            position_variable: "POS[G1:0]".to_string(),
            clear_assignments_on_connect: true,
        }
    }
}

impl ClientConfig {
    /// Default settings for the given controller address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Reject settings no session could work with
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(SnpxError::config("host must not be empty"));
        }
        if self.port == 0 {
            return Err(SnpxError::config("port must not be 0"));
        }
        if self.connect_timeout_ms == 0 || self.read_timeout_ms == 0 {
            return Err(SnpxError::config("timeouts must be greater than 0 ms"));
        }
        if !(1..=9).contains(&self.axis_count) {
            return Err(SnpxError::config(format!(
                "axis_count {} outside 1..=9",
                self.axis_count
            )));
        }
        if self.position_variable.trim().is_empty() {
            return Err(SnpxError::config("position_variable must not be empty"));
        }
        Ok(())
    }
}
