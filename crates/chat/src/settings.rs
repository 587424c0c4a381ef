use std::path::{Path, PathBuf};
use std::time::Duration;

use snafu::{ResultExt, Snafu};

use glimmer_provider::ProviderConfig;

pub const DEFAULT_STATE_PATH: &str = ".glimmer/state.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Settings that persist across app restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    /// Proxy base URL; empty means remote tiers are unreachable.
    pub proxy_base_url: String,
    /// Forces the local generator even when a proxy URL is set.
    pub offline_mode: bool,
    pub request_timeout_secs: u64,
    /// Where the conversation snapshot lives.
    pub state_path: String,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            proxy_base_url: String::new(),
            offline_mode: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            state_path: DEFAULT_STATE_PATH.to_string(),
        }
    }
}

impl ChatSettings {
    /// True when turns must resolve locally, whether by choice or because
    /// no proxy is configured.
    pub fn effective_offline(&self) -> bool {
        self.offline_mode || self.proxy_base_url.trim().is_empty()
    }

    pub fn to_provider_config(&self) -> ProviderConfig {
        if self.effective_offline() {
            return ProviderConfig::offline();
        }
        ProviderConfig::new(&self.proxy_base_url)
            .with_timeout(Duration::from_secs(self.request_timeout_secs))
    }
}

#[derive(Debug, Snafu)]
pub enum SettingsError {
    #[snafu(display("failed to create config directory at '{path}': {source}"))]
    CreateConfigDirectory {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
    #[snafu(display("failed to write settings file to '{path}': {source}"))]
    WriteConfigFile {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
}

pub type SettingsResult<T> = Result<T, SettingsError>;

/// Settings persistence layer using a simple line-based format. A missing
/// or unreadable file yields defaults; unknown keys are ignored so old
/// builds can read newer files.
pub struct SettingsStore {
    settings: ChatSettings,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_path() -> PathBuf {
        PathBuf::from(".glimmer").join("settings.conf")
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = Self::load_from_disk(&config_path);
        Self {
            settings,
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Updates settings and persists to disk.
    pub fn update(&mut self, settings: ChatSettings) -> SettingsResult<()> {
        self.persist(&settings)?;
        self.settings = settings;
        Ok(())
    }

    fn load_from_disk(path: &Path) -> ChatSettings {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => {
                tracing::info!(path = %path.display(), "settings file not found, using defaults");
                return ChatSettings::default();
            }
        };

        Self::parse_settings(&content)
    }

    fn parse_settings(content: &str) -> ChatSettings {
        let mut settings = ChatSettings::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                match key {
                    "proxy_base_url" => settings.proxy_base_url = value.to_string(),
                    "offline_mode" => settings.offline_mode = parse_bool(value),
                    "request_timeout_secs" => {
                        if let Ok(parsed) = value.parse() {
                            settings.request_timeout_secs = parsed;
                        }
                    }
                    "state_path" => settings.state_path = value.to_string(),
                    _ => {}
                }
            }
        }

        settings
    }

    fn format_settings(settings: &ChatSettings) -> String {
        format!(
            "# Glimmer settings\n\
             proxy_base_url={}\n\
             offline_mode={}\n\
             request_timeout_secs={}\n\
             state_path={}\n",
            settings.proxy_base_url,
            settings.offline_mode,
            settings.request_timeout_secs,
            settings.state_path,
        )
    }

    fn persist(&self, settings: &ChatSettings) -> SettingsResult<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateConfigDirectorySnafu {
                stage: "settings-create-dir",
                path: parent.display().to_string(),
            })?;
        }

        let content = Self::format_settings(settings);
        std::fs::write(&self.config_path, content).context(WriteConfigFileSnafu {
            stage: "settings-write-file",
            path: self.config_path.display().to_string(),
        })?;

        tracing::info!(path = %self.config_path.display(), "saved settings");
        Ok(())
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
