use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Context;
use notes_auth::{GoogleConfig, TokenConfig};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// TCP socket address to listen for incoming connections.
    ///
    /// Default: `0.0.0.0:8000`
    pub listen_addr: SocketAddr,

    /// Identity provider settings. Credentials come from [`ApiSecrets`].
    pub oauth: GoogleConfig,

    pub token: TokenConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: (Ipv4Addr::UNSPECIFIED, 8000).into(),
            oauth: GoogleConfig {
                redirect_url: "http://localhost:8000/auth/callback".to_owned(),
                ..Default::default()
            },
            token: TokenConfig::default(),
        }
    }
}

/// Sensitive credentials, loaded exclusively from environment variables.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct ApiSecrets {
    pub jwt_secret: String,
    pub client_id: String,
    pub client_secret: String,
}

impl ApiSecrets {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            jwt_secret: std::env::var("JWT_SECRET").context("JWT_SECRET not set")?,
            client_id: std::env::var("CLIENT_ID").context("CLIENT_ID not set")?,
            client_secret: std::env::var("CLIENT_SECRET").context("CLIENT_SECRET not set")?,
        })
    }

    /// Provider config from file settings plus these credentials.
    pub fn oauth_config(&self, settings: &GoogleConfig) -> GoogleConfig {
        GoogleConfig {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            ..settings.clone()
        }
    }
}

impl fmt::Debug for ApiSecrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSecrets")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}
