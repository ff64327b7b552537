//! Session configuration.
//!
//! Deserialisable from TOML or JSON; every field has a default so partial
//! documents are accepted.

use serde::{Deserialize, Serialize};

use crate::error::ConsultError;
use crate::media::MediaProfile;

/// One STUN/TURN server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls: vec![url.into()],
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Media bundling policy handed to the transport engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BundlePolicy {
    Balanced,
    MaxCompat,
    #[default]
    MaxBundle,
}

/// Side-channel transport settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataChannelConfig {
    pub label: String,
    pub ordered: bool,
    /// Bounded retransmission: trade a little reliability for latency.
    pub max_retransmits: Option<u16>,
}

impl Default for DataChannelConfig {
    fn default() -> Self {
        Self {
            label: "consult".into(),
            ordered: true,
            max_retransmits: Some(3),
        }
    }
}

/// Options accepted by `Session::initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ice_servers: Vec<IceServer>,
    pub candidate_pool_size: u8,
    pub bundle_policy: BundlePolicy,
    pub media_profile: MediaProfile,
    pub data_channel: DataChannelConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun("stun:stun.l.google.com:19302"),
                IceServer::stun("stun:stun1.l.google.com:19302"),
            ],
            candidate_pool_size: 10,
            bundle_policy: BundlePolicy::MaxBundle,
            media_profile: MediaProfile::Auto,
            data_channel: DataChannelConfig::default(),
        }
    }
}

impl SessionConfig {
    /// Reject configurations the transport engine could never use.
    pub fn validate(&self) -> Result<(), ConsultError> {
        if self.ice_servers.is_empty() {
            return Err(ConsultError::init("no ICE servers configured"));
        }
        for server in &self.ice_servers {
            if server.urls.is_empty() {
                return Err(ConsultError::init("ICE server without URLs"));
            }
            for url in &server.urls {
                let scheme_ok = ["stun:", "turn:", "turns:"]
                    .iter()
                    .any(|scheme| url.starts_with(scheme));
                if !scheme_ok {
                    return Err(ConsultError::init(format!(
                        "unsupported ICE server url: {url}"
                    )));
                }
                if url.starts_with("turn") && server.username.is_none() {
                    return Err(ConsultError::init(format!(
                        "TURN server {url} needs credentials"
                    )));
                }
            }
        }
        if self.data_channel.label.is_empty() {
            return Err(ConsultError::init("empty data channel label"));
        }
        Ok(())
    }
}
