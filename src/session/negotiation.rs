//! Client configuration negotiation policy.
//!
//! Loaded from a JSON settings file. With `auto_negotiate` off the server
//! limits are surfaced and the operator picks a [`ClientConfig`]; with it
//! on the policy answers the server immediately.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::{ClientConfig, ClientRecord, Level, ServerConfig};

pub const DEFAULT_AVERAGE_POINTS: u32 = 100;
pub const DEFAULT_PERIOD: u16 = 200;
pub const DEFAULT_ROWS: u32 = 200;

/// Locally preferred client configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfigDefaults {
    pub average_points: u32,
    /// Sampling period in milliseconds.
    pub period: u16,
    pub max_level: Level,
    pub rows: u32,
    /// Take the server's row limit as-is.
    pub rows_is_debug_server: bool,
    /// Take the server's minimum period as-is.
    pub period_is_debug_server: bool,
    pub enable_recording: bool,
}

impl Default for ClientConfigDefaults {
    fn default() -> Self {
        Self {
            average_points: DEFAULT_AVERAGE_POINTS,
            period: DEFAULT_PERIOD,
            max_level: Level::Info,
            rows: DEFAULT_ROWS,
            rows_is_debug_server: false,
            period_is_debug_server: false,
            enable_recording: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationPolicy {
    pub auto_negotiate: bool,
    pub defaults: ClientConfigDefaults,
}

impl NegotiationPolicy {
    /// Parse a policy from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// The configuration the policy would send for `server`.
    pub fn derive(&self, server: &ServerConfig) -> ClientConfig {
        let d = &self.defaults;
        let rows = if d.rows_is_debug_server {
            server.max_rows
        } else {
            d.rows.min(server.max_rows)
        };
        let period = if d.period_is_debug_server {
            server.min_period
        } else {
            d.period.max(server.min_period)
        };
        ClientConfig {
            max_average_points: d.average_points,
            max_level: d.max_level,
            record: ClientRecord {
                max_rows: rows,
                enable: d.enable_recording,
            },
            period,
        }
    }

    /// `Some` iff auto-negotiation is on.
    pub fn negotiate(&self, server: &ServerConfig) -> Option<ClientConfig> {
        self.auto_negotiate.then(|| self.derive(server))
    }
}
