use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parse `KEY=value` lines, skipping blanks and comments. Surrounding quotes
/// are stripped from values.
fn parse_dotenv(content: &str) -> Vec<(&str, &str)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim(), unquoted)
        })
        .collect()
}

/// Load variables from a `.env` file in the working directory.
///
/// Variables already set in the environment take precedence.
pub fn load_dotenv() {
    let Ok(content) = fs::read_to_string(Path::new(".env")) else {
        return;
    };
    for (key, value) in parse_dotenv(&content) {
        if std::env::var(key).is_err() {
            // SAFETY: called from main before the runtime starts any thread
            unsafe { std::env::set_var(key, value) };
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub engine: EngineConfig,
    /// Location of the persisted settings document.
    pub settings_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Root of the hub topic tree.
    pub topic_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Debounce delay between a topology change and the reload.
    pub reload_delay_ms: u64,
    /// Number of entries kept in the persisted log history.
    pub log_history_limit: usize,
    /// Only manage devices of this driver, when set.
    pub managed_driver_id: Option<String>,
}

impl EngineConfig {
    pub fn reload_delay(&self) -> Duration {
        Duration::from_millis(self.reload_delay_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reload_delay_ms: 1000,
            log_history_limit: 100,
            managed_driver_id: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mqtt: MqttConfig {
                broker_host: "10.0.0.2".to_string(),
                broker_port: 1883,
                client_id: "cooling-auto-adjust".to_string(),
                username: None,
                password: None,
                topic_prefix: "hub".to_string(),
            },
            engine: EngineConfig::default(),
            settings_path: default_settings_path(),
        }
    }
}

fn default_settings_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cooling-auto-adjust")
        .join("settings.json")
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        // MQTT configuration
        if let Some(host) = lookup("MQTT_BROKER_HOST") {
            config.mqtt.broker_host = host;
        }
        if let Some(port) = lookup("MQTT_BROKER_PORT")
            && let Ok(p) = port.parse()
        {
            config.mqtt.broker_port = p;
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID") {
            config.mqtt.client_id = client_id;
        }
        if let Some(username) = lookup("MQTT_USERNAME") {
            config.mqtt.username = Some(username);
        }
        if let Some(password) = lookup("MQTT_PASSWORD") {
            config.mqtt.password = Some(password);
        }
        if let Some(prefix) = lookup("HUB_TOPIC_PREFIX") {
            config.mqtt.topic_prefix = prefix.trim_end_matches('/').to_string();
        }

        // Engine configuration
        if let Some(path) = lookup("COOLING_SETTINGS_PATH") {
            config.settings_path = PathBuf::from(path);
        }
        if let Some(delay) = lookup("COOLING_RELOAD_DELAY_MS")
            && let Ok(d) = delay.parse()
        {
            config.engine.reload_delay_ms = d;
        }
        if let Some(limit) = lookup("COOLING_LOG_HISTORY")
            && let Ok(l) = limit.parse()
        {
            config.engine.log_history_limit = l;
        }
        if let Some(driver) = lookup("COOLING_MANAGED_DRIVER")
            && !driver.is_empty()
        {
            config.engine.managed_driver_id = Some(driver);
        }

        config
    }
}
