use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::generation_client::ApiStyle;
use crate::Language;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub endpoint: String,
    pub api_style: ApiStyle,
    /// Cascade order: the first model is tried first.
    pub models: Vec<String>,
    pub timeout_ms: u64,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://open.bigmodel.cn/api/anthropic/v1/messages".to_string(),
            api_style: ApiStyle::Anthropic,
            models: vec![
                "glm-4.7".to_string(),
                "glm-4.6".to_string(),
                "glm-4-flash".to_string(),
            ],
            timeout_ms: 120_000,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplatesConfig {
    pub dir: PathBuf,
}

impl Default for TemplatesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("prompts"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Same-origin endpoint answering `{"apiKey": "..."}`.
    pub endpoint: Option<String>,
    pub env_var: String,
    pub store_path: PathBuf,
    pub interactive: bool,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            env_var: "ZHIPU_API_KEY".to_string(),
            store_path: PathBuf::from(".shiling/api_key"),
            interactive: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub term_table: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub language: Language,
    pub location: String,
    pub weather: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            language: Language::Zh,
            location: "未知地点".to_string(),
            weather: "未知天气".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShilingConfig {
    pub generation: GenerationConfig,
    pub templates: TemplatesConfig,
    pub credentials: CredentialsConfig,
    pub calendar: CalendarConfig,
    pub defaults: DefaultsConfig,
}

impl ShilingConfig {
    pub fn load(path: Option<PathBuf>) -> Result<(Self, Option<PathBuf>), String> {
        let config_path = path.or_else(default_config_path);
        let mut config = if let Some(path) = config_path.as_ref() {
            if path.exists() {
                let contents = std::fs::read_to_string(path)
                    .map_err(|err| format!("failed to read config: {}", err))?;
                toml::from_str(&contents)
                    .map_err(|err| format!("failed to parse config: {}", err))?
            } else {
                ShilingConfig::default()
            }
        } else {
            ShilingConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok((config, config_path))
    }

    pub fn write(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|err| format!("failed to create config dir: {}", err))?;
            }
        }
        let payload = toml::to_string_pretty(self)
            .map_err(|err| format!("failed to serialize config: {}", err))?;
        std::fs::write(path, payload)
            .map_err(|err| format!("failed to write config: {}", err))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.generation.models.is_empty() {
            return Err("generation.models must list at least one model".to_string());
        }
        if self.generation.timeout_ms == 0 {
            return Err("generation.timeout_ms must be positive".to_string());
        }
        if self.generation.endpoint.trim().is_empty() {
            return Err("generation.endpoint must not be empty".to_string());
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = env::var("SHILING_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.generation.endpoint = endpoint.trim().to_string();
            }
        }
        if let Ok(style) = env::var("SHILING_API_STYLE") {
            if let Some(style) = ApiStyle::from_str(&style) {
                self.generation.api_style = style;
            }
        }
        if let Ok(models) = env::var("SHILING_MODELS") {
            let models: Vec<String> = models
                .split(',')
                .map(|model| model.trim().to_string())
                .filter(|model| !model.is_empty())
                .collect();
            if !models.is_empty() {
                self.generation.models = models;
            }
        }
        if let Ok(timeout) = env::var("SHILING_TIMEOUT_MS") {
            if let Ok(value) = timeout.parse::<u64>() {
                self.generation.timeout_ms = value;
            }
        }
        if let Ok(dir) = env::var("SHILING_TEMPLATE_DIR") {
            if !dir.trim().is_empty() {
                self.templates.dir = PathBuf::from(dir);
            }
        }
        if let Ok(table) = env::var("SHILING_TERM_TABLE") {
            if !table.trim().is_empty() {
                self.calendar.term_table = Some(PathBuf::from(table));
            }
        }
        if let Ok(language) = env::var("SHILING_LANGUAGE") {
            if let Some(language) = Language::from_str(&language) {
                self.defaults.language = language;
            }
        }
    }
}

fn default_config_path() -> Option<PathBuf> {
    env::var("SHILING_CONFIG_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| Some(PathBuf::from("config/shiling.toml")))
}
