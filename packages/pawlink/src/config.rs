use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / pawlink.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   pawlink.toml:    [reconnect]
//                    base_delay_ms = 500
//
//   env var:         PAW_RECONNECT__BASE_DELAY_MS=500   (double underscore = nesting)
//
//   (single underscore stays within field names: PAW_HISTORY__PAGE_SIZE)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub reconnect: ReconnectFileConfig,
    #[serde(default)]
    pub send: SendFileConfig,
    #[serde(default)]
    pub history: HistoryFileConfig,
}

/// Endpoint locations (lives under `[server]` in pawlink.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ws_url: default_ws_url(),
        }
    }
}

/// Reconnect backoff tunables (lives under `[reconnect]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconnectFileConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,
    /// 0 = retry forever, surfaced via connection state.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectFileConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_secs: default_max_delay_secs(),
            max_attempts: 0,
        }
    }
}

/// Optimistic-send tunables (lives under `[send]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SendFileConfig {
    /// Echo-match window: an echo's timestamp may differ from the local
    /// send time by at most this much, in either direction.
    #[serde(default = "default_echo_window_secs")]
    pub echo_window_secs: u64,
    /// A pending message without an echo fails after this long.
    #[serde(default = "default_fail_timeout_secs")]
    pub fail_timeout_secs: u64,
}

impl Default for SendFileConfig {
    fn default() -> Self {
        Self {
            echo_window_secs: default_echo_window_secs(),
            fail_timeout_secs: default_fail_timeout_secs(),
        }
    }
}

/// History pagination tunables (lives under `[history]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryFileConfig {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for HistoryFileConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_ws_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_secs() -> u64 {
    30
}
fn default_echo_window_secs() -> u64 {
    5
}
fn default_fail_timeout_secs() -> u64 {
    10
}
fn default_page_size() -> u32 {
    40
}

/// Build a figment that layers: defaults → pawlink.toml → PAW_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `PAW_SERVER__BASE_URL=https://api.example.org`  →  `server.base_url`
///   `PAW_RECONNECT__MAX_ATTEMPTS=5`  →  `reconnect.max_attempts = 5`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("pawlink.toml")))
        .merge(Env::prefixed("PAW_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the client)
// =============================================================================

/// Reconnect policy (runtime view).
#[derive(Clone, Debug)]
pub struct ReconnectConfig {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

/// Optimistic-send policy (runtime view).
#[derive(Clone, Debug)]
pub struct SendConfig {
    pub echo_window: Duration,
    pub fail_timeout: Duration,
}

/// History pagination policy (runtime view).
#[derive(Clone, Debug)]
pub struct HistoryConfig {
    pub page_size: u32,
}

/// Resolved client configuration.
#[derive(Clone, Debug)]
pub struct PawConfig {
    pub base_url: String,
    pub ws_url: String,
    pub reconnect: ReconnectConfig,
    pub send: SendConfig,
    pub history: HistoryConfig,
}

impl PawConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            base_url: fc.server.base_url.clone(),
            ws_url: fc.server.ws_url.clone(),
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(fc.reconnect.base_delay_ms),
                max_delay: Duration::from_secs(fc.reconnect.max_delay_secs),
                max_attempts: match fc.reconnect.max_attempts {
                    0 => None,
                    n => Some(n),
                },
            },
            send: SendConfig {
                echo_window: Duration::from_secs(fc.send.echo_window_secs),
                fail_timeout: Duration::from_secs(fc.send.fail_timeout_secs),
            },
            history: HistoryConfig {
                page_size: fc.history.page_size,
            },
        }
    }
}

impl Default for PawConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}
