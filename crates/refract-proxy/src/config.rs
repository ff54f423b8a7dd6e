//! Configuration types for the Refract proxy.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// TLS material for the internal MITM listener, supplied as opaque PEM
/// bytes by the caller. Refract never issues or signs certificates.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SslConfig {
    /// Server private key (PEM)
    pub key: Vec<u8>,
    /// Server certificate (PEM)
    pub cert: Vec<u8>,
    /// CA certificate chain (PEM), appended to the presented chain
    #[serde(default)]
    pub ca: Vec<u8>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Hostname to bind the plaintext listener to
    #[serde(default = "default_host")]
    pub host: String,
    /// TLS material (required when `mitm` is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl: Option<SslConfig>,
    /// Terminate TLS locally for CONNECT traffic
    #[serde(default)]
    pub mitm: bool,
    /// Record live exchanges to the fixture store
    #[serde(default)]
    pub record: bool,
    /// Replay exchanges from the fixture store
    #[serde(default)]
    pub replay: bool,
    /// Fixture store root (holds `meta/` and `data/`)
    #[serde(default = "default_fixtures_path")]
    pub fixtures_path: PathBuf,
    /// Force cache revalidation on proxied traffic
    #[serde(default)]
    pub no_cache: bool,
    /// Fall through to live proxying when a fixture is missing.
    /// Positive polarity, on by default.
    #[serde(default = "default_true")]
    pub enable_network: bool,
    /// Bypass record/replay for loopback targets
    #[serde(default)]
    pub ignore_local: bool,
    /// Idle outbound sockets kept per host, per pool
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,
}

fn default_port() -> u16 {
    8989
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_fixtures_path() -> PathBuf {
    PathBuf::from("fixtures")
}

fn default_true() -> bool {
    true
}

fn default_max_sockets() -> usize {
    8
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            ssl: None,
            mitm: false,
            record: false,
            replay: false,
            fixtures_path: default_fixtures_path(),
            no_cache: false,
            enable_network: default_true(),
            ignore_local: false,
            max_sockets: default_max_sockets(),
        }
    }
}

/// Immutable snapshot of the instance mode flags, passed explicitly to
/// every pass invocation and classification decision.
#[derive(Debug, Clone, Copy)]
pub struct Flags {
    pub mitm: bool,
    pub record: bool,
    pub replay: bool,
    pub no_cache: bool,
    pub enable_network: bool,
    pub ignore_local: bool,
}

impl ProxyConfig {
    pub fn flags(&self) -> Flags {
        Flags {
            mitm: self.mitm,
            record: self.record,
            replay: self.replay,
            no_cache: self.no_cache,
            enable_network: self.enable_network,
            ignore_local: self.ignore_local,
        }
    }
}
