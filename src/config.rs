//! Configuration types for the call service

use serde::{Deserialize, Serialize};

/// Main configuration for a [`CallSession`](crate::CallSession)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// ICE servers used when building a peer connection (at least one STUN
    /// reflexive-address resolver is required for NAT traversal)
    pub ice_servers: Vec<IceServerConfig>,
}

/// A single STUN or TURN server entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs (stun:, turn: or turns: scheme)
    pub urls: Vec<String>,

    /// Username for TURN authentication (empty for STUN)
    #[serde(default)]
    pub username: String,

    /// Credential for TURN authentication (empty for STUN)
    #[serde(default)]
    pub credential: String,
}

impl IceServerConfig {
    /// Create a STUN-only entry from a single URL
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: String::new(),
            credential: String::new(),
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServerConfig::stun("stun:stun.l.google.com:19302"),
                IceServerConfig::stun("stun:stun1.l.google.com:19302"),
            ],
        }
    }
}
