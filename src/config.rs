use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // WebDriver endpoint driving the browser session
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,

    // Platform under observation
    #[serde(default = "default_platform_url")]
    pub platform_base_url: String,
    #[serde(default = "default_profile_handle")]
    pub profile_handle: String,

    // LLM configuration (OpenAI-compatible endpoint)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_creation_model")]
    pub creation_model: String,
    #[serde(default = "default_reflective_model")]
    pub reflective_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    // Strategic parameters
    #[serde(default = "default_core_topics")]
    pub core_topics: Vec<String>,
    #[serde(default = "default_research_categories")]
    pub research_categories: HashMap<String, f64>,
    #[serde(default = "default_reflection_interval_hours")]
    pub reflection_interval_hours: f64,
    #[serde(default = "default_mentions_check_interval_hours")]
    pub mentions_check_interval_hours: f64,
    #[serde(default = "default_post_cooldown_mins")]
    pub post_cooldown_mins: u64,
    #[serde(default = "default_vetting_daily_limit")]
    pub vetting_daily_limit: u32,
    #[serde(default = "default_like_chance")]
    pub like_chance: f64,

    // Inter-cycle pacing
    #[serde(default = "default_min_sleep_secs")]
    pub min_sleep_secs: u64,
    #[serde(default = "default_max_sleep_secs")]
    pub max_sleep_secs: u64,

    // Prompt templates. The persona template takes {observed_subject} and
    // {successful_examples}; the reply template takes {conversation_history},
    // {user_reply_text}, {strategy} and {shill_level}.
    #[serde(default = "default_persona_template")]
    pub persona_template: String,
    #[serde(default = "default_reply_template")]
    pub reply_template: String,

    // Durable state
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_memory_path")]
    pub memory_path: String,
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_platform_url() -> String {
    "https://x.com".to_string()
}

fn default_profile_handle() -> String {
    "vantage_agent".to_string()
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_creation_model() -> String {
    "gpt-4-turbo".to_string()
}

fn default_reflective_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_core_topics() -> Vec<String> {
    vec![
        "onchain analytics".to_string(),
        "market structure".to_string(),
        "protocol design".to_string(),
    ]
}

fn default_research_categories() -> HashMap<String, f64> {
    let mut categories = HashMap::new();
    categories.insert("defi".to_string(), 0.4);
    categories.insert("infrastructure".to_string(), 0.3);
    categories.insert("market structure".to_string(), 0.3);
    categories
}

fn default_reflection_interval_hours() -> f64 {
    24.0
}

fn default_mentions_check_interval_hours() -> f64 {
    0.25
}

fn default_post_cooldown_mins() -> u64 {
    240
}

fn default_vetting_daily_limit() -> u32 {
    2
}

fn default_like_chance() -> f64 {
    0.8
}

fn default_min_sleep_secs() -> u64 {
    300
}

fn default_max_sleep_secs() -> u64 {
    900
}

fn default_persona_template() -> String {
    "You are a measured, data-driven market strategist. Write a single post \
     about {observed_subject}. Draw on the following context where it is \
     relevant:\n{successful_examples}\nStay under 280 characters. Output only \
     the post text."
        .to_string()
}

fn default_reply_template() -> String {
    "You are a measured, data-driven market strategist. You are replying in \
     this conversation:\n{conversation_history}\n\nThe message you are \
     answering: {user_reply_text}\n\nReply strategy: {strategy}. Promotional \
     intensity: {shill_level}. Stay under 240 characters. Output only the \
     reply text."
        .to_string()
}

fn default_database_path() -> String {
    "vantage_state.db".to_string()
}

fn default_memory_path() -> String {
    "vantage_memory.db".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            webdriver_url: default_webdriver_url(),
            platform_base_url: default_platform_url(),
            profile_handle: default_profile_handle(),
            llm_api_url: default_llm_url(),
            llm_api_key: None,
            creation_model: default_creation_model(),
            reflective_model: default_reflective_model(),
            embedding_model: default_embedding_model(),
            core_topics: default_core_topics(),
            research_categories: default_research_categories(),
            reflection_interval_hours: default_reflection_interval_hours(),
            mentions_check_interval_hours: default_mentions_check_interval_hours(),
            post_cooldown_mins: default_post_cooldown_mins(),
            vetting_daily_limit: default_vetting_daily_limit(),
            like_chance: default_like_chance(),
            min_sleep_secs: default_min_sleep_secs(),
            max_sleep_secs: default_max_sleep_secs(),
            persona_template: default_persona_template(),
            reply_template: default_reply_template(),
            database_path: default_database_path(),
            memory_path: default_memory_path(),
        }
    }
}

impl AgentConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Path to the config file (next to the executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("vantage.toml")
    }

    /// Load config from vantage.toml, falling back to env vars + defaults
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<AgentConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.normalized();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env().normalized()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("VANTAGE_WEBDRIVER_URL") {
            config.webdriver_url = url;
        }
        if let Ok(url) = env::var("VANTAGE_PLATFORM_URL") {
            config.platform_base_url = url;
        }
        if let Ok(handle) = env::var("VANTAGE_PROFILE_HANDLE") {
            config.profile_handle = handle;
        }
        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm_api_url = url;
        }
        if let Ok(key) = env::var("LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }
        if let Ok(model) = env::var("VANTAGE_CREATION_MODEL") {
            config.creation_model = model;
        }
        if let Ok(model) = env::var("VANTAGE_REFLECTIVE_MODEL") {
            config.reflective_model = model;
        }
        if let Ok(topics) = env::var("VANTAGE_CORE_TOPICS") {
            if let Ok(parsed) = serde_json::from_str::<Vec<String>>(&topics) {
                config.core_topics = parsed;
            }
        }
        if let Ok(categories) = env::var("VANTAGE_RESEARCH_CATEGORIES") {
            if let Ok(parsed) = serde_json::from_str::<HashMap<String, f64>>(&categories) {
                config.research_categories = parsed;
            }
        }
        if let Ok(hours) = env::var("VANTAGE_REFLECTION_HOURS") {
            if let Ok(parsed) = hours.parse() {
                config.reflection_interval_hours = parsed;
            }
        }
        if let Ok(hours) = env::var("VANTAGE_MENTIONS_CHECK_HOURS") {
            if let Ok(parsed) = hours.parse() {
                config.mentions_check_interval_hours = parsed;
            }
        }
        if let Ok(mins) = env::var("VANTAGE_POST_COOLDOWN_MINS") {
            if let Ok(parsed) = mins.parse() {
                config.post_cooldown_mins = parsed;
            }
        }
        if let Ok(limit) = env::var("VANTAGE_VETTING_DAILY_LIMIT") {
            if let Ok(parsed) = limit.parse() {
                config.vetting_daily_limit = parsed;
            }
        }
        if let Ok(secs) = env::var("VANTAGE_MIN_SLEEP_SECS") {
            if let Ok(parsed) = secs.parse() {
                config.min_sleep_secs = parsed;
            }
        }
        if let Ok(secs) = env::var("VANTAGE_MAX_SLEEP_SECS") {
            if let Ok(parsed) = secs.parse() {
                config.max_sleep_secs = parsed;
            }
        }
        if let Ok(template) = env::var("VANTAGE_PERSONA_TEMPLATE") {
            if !template.trim().is_empty() {
                config.persona_template = template;
            }
        }
        if let Ok(template) = env::var("VANTAGE_REPLY_TEMPLATE") {
            if !template.trim().is_empty() {
                config.reply_template = template;
            }
        }
        if let Ok(path) = env::var("VANTAGE_DATABASE_PATH") {
            config.database_path = path;
        }
        if let Ok(path) = env::var("VANTAGE_MEMORY_PATH") {
            config.memory_path = path;
        }

        config
    }

    // Clamp pacing so a bad config cannot invert the sleep range.
    fn normalized(mut self) -> Self {
        if self.max_sleep_secs < self.min_sleep_secs {
            self.max_sleep_secs = self.min_sleep_secs;
        }
        self
    }

    /// Profile handle without the leading @
    pub fn bare_handle(&self) -> &str {
        self.profile_handle.trim_start_matches('@')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AgentConfig::default();
        assert!(config.min_sleep_secs <= config.max_sleep_secs);
        assert!(!config.core_topics.is_empty());
        assert!(config.persona_template.contains("{observed_subject}"));
        assert!(config.reply_template.contains("{conversation_history}"));
    }

    #[test]
    fn normalized_repairs_inverted_sleep_range() {
        let config = AgentConfig {
            min_sleep_secs: 600,
            max_sleep_secs: 60,
            ..AgentConfig::default()
        }
        .normalized();
        assert_eq!(config.max_sleep_secs, 600);
    }

    #[test]
    fn bare_handle_strips_at_sign() {
        let config = AgentConfig {
            profile_handle: "@observer".to_string(),
            ..AgentConfig::default()
        };
        assert_eq!(config.bare_handle(), "observer");
    }
}
