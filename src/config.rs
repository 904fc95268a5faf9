//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! The config is grouped into logical sections: `server` (bind address),
//! `audio` (capture format and limits), `providers` (language and model
//! hints passed to the external STT/LLM/TTS services), `recording`
//! (the optional PCM/WAV archival side channel), and `performance`
//! (connection limits).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub providers: ProvidersConfig,
    pub recording: RecordingConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// - `host = "127.0.0.1"`: only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Capture audio format and limits.
///
/// The format fields describe the PCM stream the client captures and are
/// what the WAV archival header is built from. `max_capture_bytes` caps one
/// utterance's capture buffer so a stuck voice-activity detector cannot grow
/// memory without bound; appends past the cap fail with an observable error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub max_capture_bytes: usize,
}

/// Hints handed to the external providers on each call.
///
/// The providers themselves are opaque; these are the only knobs this
/// service passes through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Language tag passed to the transcription provider (e.g. "en")
    pub language: String,
    /// System prompt seeded as the first history entry of every session
    pub system_prompt: String,
}

/// Optional archival of completed captures as paired .pcm + .wav files.
///
/// Debugging/archival side channel only; sessions work with it disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub directory: String,
}

/// Connection limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            audio: AudioConfig::default(),
            providers: ProvidersConfig::default(),
            recording: RecordingConfig::default(),
            performance: PerformanceConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // matches the web client's AudioContext rate
            channels: 1,
            bit_depth: 16,
            max_capture_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            system_prompt: "You are a helpful voice assistant. Keep replies short \
                            and conversational."
                .to_string(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: "recordings".to_string(),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 10,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config.toml, and environment.
    ///
    /// `HOST`/`PORT` (no prefix) are honored as a special case because
    /// deployment platforms commonly inject them.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// gives a clear message about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio channel count must be greater than 0"));
        }

        if self.audio.bit_depth % 8 != 0 || self.audio.bit_depth == 0 {
            return Err(anyhow::anyhow!("Audio bit depth must be a positive multiple of 8"));
        }

        if self.audio.max_capture_bytes == 0 {
            return Err(anyhow::anyhow!("Max capture bytes must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.recording.enabled && self.recording.directory.is_empty() {
            return Err(anyhow::anyhow!("Recording directory cannot be empty when enabled"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (runtime config updates).
    ///
    /// Allows partial updates: sending `{"server": {"port": 9000}}` changes
    /// only the port. The updated configuration is re-validated before it is
    /// accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                self.audio.sample_rate = rate as u32;
            }
            if let Some(channels) = audio.get("channels").and_then(|v| v.as_u64()) {
                self.audio.channels = channels as u16;
            }
            if let Some(depth) = audio.get("bit_depth").and_then(|v| v.as_u64()) {
                self.audio.bit_depth = depth as u16;
            }
            if let Some(cap) = audio.get("max_capture_bytes").and_then(|v| v.as_u64()) {
                self.audio.max_capture_bytes = cap as usize;
            }
        }

        if let Some(providers) = partial_config.get("providers") {
            if let Some(language) = providers.get("language").and_then(|v| v.as_str()) {
                self.providers.language = language.to_string();
            }
            if let Some(prompt) = providers.get("system_prompt").and_then(|v| v.as_str()) {
                self.providers.system_prompt = prompt.to_string();
            }
        }

        if let Some(recording) = partial_config.get("recording") {
            if let Some(enabled) = recording.get("enabled").and_then(|v| v.as_bool()) {
                self.recording.enabled = enabled;
            }
            if let Some(directory) = recording.get("directory").and_then(|v| v.as_str()) {
                self.recording.directory = directory.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.sample_rate, 16000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.bit_depth = 12; // not byte-aligned
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recording.enabled = true;
        config.recording.directory = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "providers": {"language": "de"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.providers.language, "de");
        // Untouched fields keep their values
        assert_eq!(config.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = AppConfig::default();
        let rendered = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.audio.max_capture_bytes, config.audio.max_capture_bytes);
        assert_eq!(parsed.providers.language, config.providers.language);
    }
}
