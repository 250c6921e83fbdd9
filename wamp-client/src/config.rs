use crate::error::{Result, WampError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use wamp_proto::{Codec, Dict, JsonCodec};

/// File-loadable session parameters (realm, router endpoint, timeouts,
/// auth method names). The challenge responder and codec are supplied
/// programmatically via [`SessionConfig`] since they are capabilities,
/// not data.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    pub realm: String,
    pub router_addr: String,
    pub router_port: u16,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub timeouts: TimeoutSettings,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u32,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthSettings {
    /// Authentication methods offered in HELLO, e.g. "wampcra", "ticket".
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub authid: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            close_timeout_secs: default_close_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_close_timeout() -> u64 {
    5
}

fn default_max_frame_bytes() -> u32 {
    wamp_proto::framing::DEFAULT_MAX_FRAME_SIZE
}

impl SessionSettings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WampError::Configuration(format!("cannot read settings: {}", e)))?;
        let settings: SessionSettings = toml::from_str(&contents)
            .map_err(|e| WampError::Configuration(format!("invalid settings: {}", e)))?;
        Ok(settings)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.router_addr, self.router_port)
    }
}

/// Invoked when the router issues a CHALLENGE: given the auth method
/// name and the challenge extra dict, produces the AUTHENTICATE
/// signature. The engine carries the messages; the cryptography (or
/// ticket lookup) belongs to the caller.
pub type ChallengeResponder = Arc<dyn Fn(&str, &Dict) -> Result<String> + Send + Sync>;

/// Everything `Session::connect` needs beyond an established transport
/// link.
#[derive(Clone)]
pub struct SessionConfig {
    pub realm: String,
    pub auth_methods: Vec<String>,
    pub authid: Option<String>,
    pub on_challenge: Option<ChallengeResponder>,
    pub codec: Arc<dyn Codec>,
}

impl SessionConfig {
    pub fn new(realm: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            auth_methods: Vec::new(),
            authid: None,
            on_challenge: None,
            codec: Arc::new(JsonCodec),
        }
    }

    pub fn from_settings(settings: &SessionSettings) -> Self {
        let mut config = Self::new(settings.realm.clone());
        config.auth_methods = settings.auth.methods.clone();
        config.authid = settings.auth.authid.clone();
        config
    }

    pub fn with_challenge_responder(mut self, responder: ChallengeResponder) -> Self {
        self.on_challenge = Some(responder);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("realm", &self.realm)
            .field("auth_methods", &self.auth_methods)
            .field("authid", &self.authid)
            .field("on_challenge", &self.on_challenge.is_some())
            .finish()
    }
}
