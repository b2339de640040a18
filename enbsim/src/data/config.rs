use anyhow::Result;
use rrc::PlmnIdentity;
use serde::Deserialize;
use slog::{Logger, error, info};
use std::fs;
use std::time::Duration;

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub enb: EnbConfig,
    pub ue: UeConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EnbConfig {
    // How many times the eNB waits for RrcConnectionSetupComplete, resending RrcConnectionSetup
    // between waits, before giving up on the UE.
    pub max_retries: u32,

    // Length of each wait.
    pub setup_complete_timeout_ms: u64,

    // Uplink grant signaled in RandomAccessResponse and recorded in the UE context.
    pub uplink_grant: u32,
}

impl Default for EnbConfig {
    fn default() -> Self {
        EnbConfig {
            max_retries: 3,
            setup_complete_timeout_ms: 500,
            uplink_grant: 34,
        }
    }
}

impl EnbConfig {
    pub fn setup_complete_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_complete_timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UeConfig {
    // Retry budget shared by the random access and connection setup timers.
    pub max_retries: u32,
    pub random_access_response_timeout_ms: u64,
    pub connection_setup_timeout_ms: u64,

    // Bound on the whole attempt, whatever the retry budgets allow.
    pub watchdog_timeout_ms: u64,

    pub selected_plmn_identity: u32,
}

impl Default for UeConfig {
    fn default() -> Self {
        UeConfig {
            max_retries: 5,
            random_access_response_timeout_ms: 700,
            connection_setup_timeout_ms: 500,
            watchdog_timeout_ms: 2000,
            selected_plmn_identity: 2801,
        }
    }
}

impl UeConfig {
    pub fn random_access_response_timeout(&self) -> Duration {
        Duration::from_millis(self.random_access_response_timeout_ms)
    }

    pub fn connection_setup_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_setup_timeout_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn selected_plmn_identity(&self) -> PlmnIdentity {
        PlmnIdentity(self.selected_plmn_identity)
    }
}

/// Load timer and retry settings from a TOML file.  Settings missing from the file keep their
/// defaults.
pub fn load_config_file(filename: &str, logger: &Logger) -> Result<Config> {
    let path = std::env::current_dir()?;
    let contents = fs::read_to_string(filename).inspect_err(|e| {
        error!(
            logger,
            "Failed to load config file {filename} (current directory {}) with error code {e}",
            path.display()
        )
    })?;
    let config: Config = toml::from_str(&contents)?;
    info!(logger, "Loaded config from {filename}: {:?}", config);
    Ok(config)
}
