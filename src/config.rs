use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::audio::player::ControllerSettings;
use crate::audio::transcode::Pacing;
use crate::sources::ResolverRegistration;

/// Backends conocidos y su prioridad por defecto (menor se prueba antes).
pub const DEFAULT_PRIORITIES: [(&str, i32); 5] = [
    ("direct", 0),
    ("soundcloud", 1),
    ("cobalt", 97),
    ("youtube", 98),
    ("ytdlp", 99),
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ResolverSetting {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Reproducción
    pub default_volume: f32,
    pub inactivity_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub max_playlist_size: usize,

    // Fuentes
    pub http_timeout_secs: u64,
    pub cobalt_url: Option<String>,
    pub cobalt_api_key: Option<String>,
    pub invidious_instances: Vec<String>,
    pub ytdlp_path: String,
    pub ytdlp_cookies: Option<PathBuf>,
    pub ytdlp_timeout_secs: u64,
    pub direct_allow_files: bool,
    pub prefetch_limit_bytes: u64,
    pub resolvers: Vec<ResolverSetting>,

    // Rendimiento
    pub worker_threads: usize,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Valor inválido para {}", key))
}

fn optional(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_lookup(|key| std::env::var(key).ok())?;
        if config.discord_token.is_empty() {
            anyhow::bail!("DISCORD_TOKEN es obligatorio");
        }

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Construye la configuración desde cualquier fuente clave → valor.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let cobalt_url = optional(&lookup, "COBALT_URL");

        let resolvers = DEFAULT_PRIORITIES
            .iter()
            .map(|(name, default_priority)| -> Result<ResolverSetting> {
                let upper = name.to_ascii_uppercase();
                let default_enabled = *name != "cobalt" || cobalt_url.is_some();
                Ok(ResolverSetting {
                    name: name.to_string(),
                    priority: parse_or(
                        &lookup,
                        &format!("RESOLVER_{}_PRIORITY", upper),
                        &default_priority.to_string(),
                    )?,
                    enabled: parse_or(
                        &lookup,
                        &format!("RESOLVER_{}_ENABLED", upper),
                        &default_enabled.to_string(),
                    )?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            // Discord
            discord_token: optional(&lookup, "DISCORD_TOKEN").unwrap_or_default(),
            command_prefix: optional(&lookup, "COMMAND_PREFIX").unwrap_or_else(|| "!".to_string()),

            // Reproducción
            default_volume: parse_or(&lookup, "DEFAULT_VOLUME", "0.5")?,
            inactivity_timeout_secs: parse_or(&lookup, "INACTIVITY_TIMEOUT_SECS", "600")?,
            shutdown_timeout_secs: parse_or(&lookup, "SHUTDOWN_TIMEOUT_SECS", "10")?,
            max_playlist_size: parse_or(&lookup, "MAX_PLAYLIST_SIZE", "100")?,

            // Fuentes
            http_timeout_secs: parse_or(&lookup, "HTTP_TIMEOUT_SECS", "30")?,
            cobalt_url,
            cobalt_api_key: optional(&lookup, "COBALT_API_KEY"),
            invidious_instances: optional(&lookup, "INVIDIOUS_INSTANCES")
                .map(|list| {
                    list.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            ytdlp_path: optional(&lookup, "YTDLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),
            ytdlp_cookies: optional(&lookup, "YTDLP_COOKIES").map(PathBuf::from),
            ytdlp_timeout_secs: parse_or(&lookup, "YTDLP_TIMEOUT_SECS", "60")?,
            direct_allow_files: parse_or(&lookup, "DIRECT_ALLOW_FILES", "false")?,
            prefetch_limit_bytes: parse_or(&lookup, "PREFETCH_LIMIT_BYTES", "67108864")?,
            resolvers,

            // Rendimiento
            worker_threads: match optional(&lookup, "WORKER_THREADS") {
                Some(val) => val.parse().context("Valor inválido para WORKER_THREADS")?,
                None => num_cpus::get(),
            },
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Volume must be between 0.0 and 2.0
    /// - Timeouts, playlist size and prefetch limit must be > 0
    /// - URLs (Cobalt, Invidious) must parse
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        if self.inactivity_timeout_secs == 0 || self.shutdown_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be greater than 0");
        }

        if self.http_timeout_secs == 0 || self.ytdlp_timeout_secs == 0 {
            anyhow::bail!("HTTP and yt-dlp timeouts must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.prefetch_limit_bytes == 0 {
            anyhow::bail!("Prefetch limit must be greater than 0");
        }

        if self.worker_threads == 0 {
            anyhow::bail!("Worker threads must be greater than 0");
        }

        if let Some(url) = &self.cobalt_url {
            url::Url::parse(url).with_context(|| format!("COBALT_URL inválida: {}", url))?;
        }

        for instance in &self.invidious_instances {
            url::Url::parse(instance)
                .with_context(|| format!("Instancia de Invidious inválida: {}", instance))?;
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Excludes tokens and API keys.
    pub fn summary(&self) -> String {
        let resolvers = self
            .resolvers
            .iter()
            .filter(|r| r.enabled)
            .map(|r| format!("{}({})", r.name, r.priority))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Config Summary:\n  \
            Discord: prefix `{}`\n  \
            Playback: {}% vol, {}s idle, {}s shutdown, {} max playlist\n  \
            Sources: [{}], {}s HTTP timeout, {}s yt-dlp timeout, {} Invidious instances\n  \
            Local files: {}\n  \
            Cobalt: {}\n  \
            Workers: {}",
            self.command_prefix,
            (self.default_volume * 100.0) as u32,
            self.inactivity_timeout_secs,
            self.shutdown_timeout_secs,
            self.max_playlist_size,
            resolvers,
            self.http_timeout_secs,
            self.ytdlp_timeout_secs,
            if self.invidious_instances.is_empty() {
                "default".to_string()
            } else {
                self.invidious_instances.len().to_string()
            },
            if self.direct_allow_files { "enabled" } else { "disabled" },
            self.cobalt_url.as_deref().unwrap_or("disabled"),
            self.worker_threads
        )
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn ytdlp_timeout(&self) -> Duration {
        Duration::from_secs(self.ytdlp_timeout_secs)
    }

    /// Registro para la cadena; un nombre desconocido queda desactivado.
    pub fn registration_for(&self, name: &str) -> ResolverRegistration {
        match self.resolvers.iter().find(|r| r.name == name) {
            Some(r) => ResolverRegistration::new(r.name.clone(), r.priority, r.enabled),
            None => ResolverRegistration::new(name, i32::MAX, false),
        }
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            inactivity_timeout: Duration::from_secs(self.inactivity_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            default_volume: self.default_volume,
            pacing: Pacing::RealTime,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            default_volume: 0.5,
            inactivity_timeout_secs: 600,
            shutdown_timeout_secs: 10,
            max_playlist_size: 100,

            http_timeout_secs: 30,
            cobalt_url: None,
            cobalt_api_key: None,
            invidious_instances: Vec::new(),
            ytdlp_path: "yt-dlp".to_string(),
            ytdlp_cookies: None,
            ytdlp_timeout_secs: 60,
            direct_allow_files: false,
            prefetch_limit_bytes: 64 * 1024 * 1024,
            resolvers: DEFAULT_PRIORITIES
                .iter()
                .map(|(name, priority)| ResolverSetting {
                    name: name.to_string(),
                    priority: *priority,
                    enabled: *name != "cobalt",
                })
                .collect(),

            worker_threads: num_cpus::get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_match_empty_environment() {
        let loaded = from_pairs(&[]).unwrap();
        let default = Config::default();
        assert_eq!(loaded.resolvers, default.resolvers);
        assert_eq!(loaded.default_volume, default.default_volume);
        assert_eq!(loaded.prefetch_limit_bytes, default.prefetch_limit_bytes);
        assert_eq!(loaded.command_prefix, "!");
        assert_eq!(loaded.ytdlp_timeout_secs, default.ytdlp_timeout_secs);
        assert!(!loaded.direct_allow_files);
        assert!(default.validate().is_ok());
    }

    #[test]
    fn test_cobalt_enabled_only_with_url() {
        let without = from_pairs(&[]).unwrap();
        assert!(!without.registration_for("cobalt").enabled);

        let with = from_pairs(&[("COBALT_URL", "https://cobalt.example.com/")]).unwrap();
        let cobalt = with.registration_for("cobalt");
        assert!(cobalt.enabled);
        assert_eq!(cobalt.priority, 97);
    }

    #[test]
    fn test_resolver_overrides() {
        let config = from_pairs(&[
            ("RESOLVER_YTDLP_ENABLED", "false"),
            ("RESOLVER_YOUTUBE_PRIORITY", "-5"),
            ("INVIDIOUS_INSTANCES", "https://a.example, ,https://b.example"),
        ])
        .unwrap();
        assert!(!config.registration_for("ytdlp").enabled);
        assert_eq!(config.registration_for("youtube").priority, -5);
        assert!(!config.registration_for("unknown").enabled);
        assert_eq!(
            config.invidious_instances,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = from_pairs(&[("DEFAULT_VOLUME", "loud")]).unwrap_err();
        assert!(err.to_string().contains("DEFAULT_VOLUME"));

        let config = from_pairs(&[("DEFAULT_VOLUME", "3.5")]).unwrap();
        assert!(config.validate().is_err());

        let config = from_pairs(&[("COBALT_URL", "not a url")]).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_hides_secrets() {
        let mut config = Config::default();
        config.discord_token = "super-secret-token".to_string();
        config.cobalt_api_key = Some("secret-key".to_string());
        let summary = config.summary();
        assert!(!summary.contains("super-secret-token"));
        assert!(!summary.contains("secret-key"));
        assert!(summary.contains("direct(0)"));
    }

    #[test]
    fn test_local_files_and_ytdlp_timeout() {
        let config = from_pairs(&[("DIRECT_ALLOW_FILES", "true"), ("YTDLP_TIMEOUT_SECS", "15")]).unwrap();
        assert!(config.direct_allow_files);
        assert_eq!(config.ytdlp_timeout(), Duration::from_secs(15));

        let config = from_pairs(&[("YTDLP_TIMEOUT_SECS", "0")]).unwrap();
        assert!(config.validate().is_err());

        let err = from_pairs(&[("DIRECT_ALLOW_FILES", "yes")]).unwrap_err();
        assert!(err.to_string().contains("DIRECT_ALLOW_FILES"));
    }
}
