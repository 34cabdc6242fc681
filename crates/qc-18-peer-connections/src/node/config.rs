use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::authorization::AuthorizationConfig;
use crate::codec::EnvelopeConfig;
use crate::domain::{Address, Capability, NetworkId, TransportType, LOCALHOST};

/// Default listening port.
pub const DEFAULT_LISTEN_PORT: u16 = 7480;

// ============================================================================
// NodeConfig
// ============================================================================

/// Node configuration.
///
/// Every field has a default, so a config file only needs the values it
/// changes.
///
/// # Config File Format
///
/// ```toml
/// network_id = "quantum-chain-dev"
/// listen_host = "127.0.0.1"
/// listen_port = 7480
/// transport_types = ["Clear"]
/// peers = ["127.0.0.1:7481"]
/// connect_timeout_ms = 5000
/// handshake_timeout_ms = 10000
/// load_update_interval_secs = 30
/// difficulty_adjustment_factor = 1.0
/// log_level = "info"
///
/// [envelope]
/// receive_buffer_size = 8192
/// max_envelope_size = 10485760
///
/// [authorization]
/// target_difficulty = 65536.0
/// min_difficulty = 128.0
/// max_difficulty = 1048576.0
/// tolerance = 0.1
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network_id: String,
    pub listen_host: String,
    /// `0` binds an ephemeral port; the advertised capability uses the
    /// port actually bound.
    pub listen_port: u16,
    pub transport_types: Vec<TransportType>,
    /// Peers to dial on startup, as `host:port`.
    pub peers: Vec<String>,
    pub envelope: EnvelopeConfig,
    pub authorization: AuthorizationConfig,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    /// `0` disables periodic load recalculation.
    pub load_update_interval_secs: u64,
    pub difficulty_adjustment_factor: f64,
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network_id: "quantum-chain-dev".to_string(),
            listen_host: LOCALHOST.to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            transport_types: vec![TransportType::Clear],
            peers: Vec::new(),
            envelope: EnvelopeConfig::default(),
            authorization: AuthorizationConfig::default(),
            connect_timeout_ms: 5_000,
            handshake_timeout_ms: 10_000,
            load_update_interval_secs: 30,
            difficulty_adjustment_factor: 1.0,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Ephemeral port, cheap proofs of work, short timeouts.
    pub fn for_testing() -> Self {
        Self {
            network_id: "quantum-chain-test".to_string(),
            listen_port: 0,
            authorization: AuthorizationConfig::for_testing(),
            connect_timeout_ms: 2_000,
            handshake_timeout_ms: 5_000,
            load_update_interval_secs: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    #[must_use]
    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let auth = &self.authorization;
        if !(auth.min_difficulty > 0.0 && auth.min_difficulty <= auth.max_difficulty) {
            return Err(ConfigError::Invalid(format!(
                "difficulty bounds [{}, {}] are not ordered",
                auth.min_difficulty, auth.max_difficulty
            )));
        }
        if !(0.0..1.0).contains(&auth.tolerance) {
            return Err(ConfigError::Invalid(format!(
                "tolerance {} is outside [0, 1)",
                auth.tolerance
            )));
        }
        if self.envelope.receive_buffer_size == 0 || self.envelope.max_envelope_size == 0 {
            return Err(ConfigError::Invalid(
                "envelope buffer sizes must be positive".to_string(),
            ));
        }
        if self.transport_types.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one transport type is required".to_string(),
            ));
        }
        self.peer_addresses().map(|_| ())
    }

    pub fn network_id(&self) -> NetworkId {
        NetworkId::new(self.network_id.clone())
    }

    pub fn listen_address(&self) -> Address {
        Address::new(self.listen_host.clone(), self.listen_port)
    }

    /// Capability advertised once bound to `port`.
    pub fn capability(&self, port: u16) -> Capability {
        Capability::new(
            Address::new(self.listen_host.clone(), port),
            self.transport_types.iter().copied(),
        )
    }

    pub fn peer_addresses(&self) -> Result<Vec<Address>, ConfigError> {
        self.peers
            .iter()
            .map(|peer| {
                peer.parse::<Address>().map_err(|e| ConfigError::InvalidPeer {
                    peer: peer.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn load_update_interval(&self) -> Option<Duration> {
        (self.load_update_interval_secs > 0)
            .then(|| Duration::from_secs(self.load_update_interval_secs))
    }
}

/// Errors that can occur during config loading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {error}")]
    Io { path: String, error: String },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("invalid peer '{peer}': {reason}")]
    InvalidPeer { peer: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}
