use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::audio::{ControllerOptions, PipelineSettings, PipelineStrategy};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub command_prefix: String,

    // Herramientas externas
    pub fetch_tool: String,
    pub transcode_tool: String,
    pub pipeline_strategy: PipelineStrategy,
    pub temp_dir: PathBuf,

    // Tiempos
    pub voice_connect_timeout: u64, // En segundos
    pub fetch_timeout: u64,         // En segundos
    pub first_audio_timeout: u64,   // En segundos
    pub teardown_grace_ms: u64,

    // Límites
    pub max_queue_size: usize,
    pub max_consecutive_failures: u32,

    // Health check HTTP (0 = desactivado)
    pub health_port: u16,
}

/// Lee `key` o devuelve `default` si no está definida o está vacía.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .with_context(|| format!("valor inválido para {}: {:?}", key, val)),
        _ => Ok(default),
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN no definido")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("APPLICATION_ID no definido")?
                .parse()
                .context("APPLICATION_ID inválido")?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),
            command_prefix: env_or("COMMAND_PREFIX", defaults.command_prefix)?,

            fetch_tool: env_or("FETCH_TOOL", defaults.fetch_tool)?,
            transcode_tool: env_or("TRANSCODE_TOOL", defaults.transcode_tool)?,
            pipeline_strategy: match std::env::var("PIPELINE_STRATEGY") {
                Ok(val) if !val.trim().is_empty() => val.parse()?,
                _ => defaults.pipeline_strategy,
            },
            temp_dir: env_or("TEMP_DIR", defaults.temp_dir)?,

            voice_connect_timeout: env_or("VOICE_CONNECT_TIMEOUT", defaults.voice_connect_timeout)?,
            fetch_timeout: env_or("FETCH_TIMEOUT", defaults.fetch_timeout)?,
            first_audio_timeout: env_or("FIRST_AUDIO_TIMEOUT", defaults.first_audio_timeout)?,
            teardown_grace_ms: env_or("TEARDOWN_GRACE_MS", defaults.teardown_grace_ms)?,

            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            max_consecutive_failures: env_or("MAX_CONSECUTIVE_FAILURES", defaults.max_consecutive_failures)?,

            // PORT para plataformas que lo inyectan
            health_port: match std::env::var("HEALTH_PORT") {
                Ok(_) => env_or("HEALTH_PORT", defaults.health_port)?,
                Err(_) => env_or("PORT", defaults.health_port)?,
            },
        };

        config.validate()?;

        // El directorio temporal debe existir antes de la primera descarga
        std::fs::create_dir_all(&config.temp_dir)
            .with_context(|| format!("no se pudo crear {}", config.temp_dir.display()))?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Tool names must not be empty
    /// - The command prefix must not be empty
    /// - Timeouts and limits must be greater than 0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN está vacío");
        }

        if self.fetch_tool.trim().is_empty() || self.transcode_tool.trim().is_empty() {
            anyhow::bail!("FETCH_TOOL y TRANSCODE_TOOL no pueden estar vacíos");
        }

        if self.command_prefix.is_empty() {
            anyhow::bail!("COMMAND_PREFIX no puede estar vacío");
        }

        if self.voice_connect_timeout == 0 || self.fetch_timeout == 0 || self.first_audio_timeout == 0 {
            anyhow::bail!("Los timeouts deben ser mayores que 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_consecutive_failures == 0 {
            anyhow::bail!("MAX_CONSECUTIVE_FAILURES must be greater than 0");
        }

        Ok(())
    }

    pub fn voice_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.voice_connect_timeout)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            fetch_tool: self.fetch_tool.clone(),
            transcode_tool: self.transcode_tool.clone(),
            strategy: self.pipeline_strategy,
            temp_dir: self.temp_dir.clone(),
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            first_audio_timeout: Duration::from_secs(self.first_audio_timeout),
            teardown_grace: Duration::from_millis(self.teardown_grace_ms),
        }
    }

    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            max_queue_size: self.max_queue_size,
            max_consecutive_failures: self.max_consecutive_failures,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {}), prefijo '{}'\n  \
            Pipeline: {} + {} ({}), temp {}\n  \
            Timeouts: voz {}s, fetch {}s, primer audio {}s, gracia {}ms\n  \
            Limits: {} queue, {} fallos seguidos\n  \
            Health: {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.command_prefix,
            self.fetch_tool,
            self.transcode_tool,
            self.pipeline_strategy.as_str(),
            self.temp_dir.display(),
            self.voice_connect_timeout,
            self.fetch_timeout,
            self.first_audio_timeout,
            self.teardown_grace_ms,
            self.max_queue_size,
            self.max_consecutive_failures,
            if self.health_port == 0 {
                "desactivado".to_string()
            } else {
                format!("puerto {}", self.health_port)
            },
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        let pipeline = PipelineSettings::default();

        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            command_prefix: "!".to_string(),

            fetch_tool: pipeline.fetch_tool,
            transcode_tool: pipeline.transcode_tool,
            pipeline_strategy: pipeline.strategy,
            temp_dir: pipeline.temp_dir,

            voice_connect_timeout: 15,
            fetch_timeout: pipeline.fetch_timeout.as_secs(),
            first_audio_timeout: pipeline.first_audio_timeout.as_secs(),
            teardown_grace_ms: 2000,

            max_queue_size: 500,
            max_consecutive_failures: 5,

            health_port: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> Config {
        Config {
            discord_token: "token".into(),
            application_id: 1,
            ..Config::default()
        }
    }

    #[test]
    fn defaults_are_valid() {
        valid().validate().unwrap();
    }

    #[test]
    fn rejects_zero_limits() {
        let config = Config {
            max_queue_size: 0,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_consecutive_failures: 0,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = Config {
            voice_connect_timeout: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_empty_tools() {
        let config = Config {
            transcode_tool: " ".into(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn pipeline_settings_carry_durations() {
        let config = Config {
            fetch_timeout: 60,
            first_audio_timeout: 10,
            teardown_grace_ms: 500,
            pipeline_strategy: PipelineStrategy::Download,
            ..valid()
        };
        let settings = config.pipeline_settings();
        assert_eq!(settings.fetch_timeout, Duration::from_secs(60));
        assert_eq!(settings.first_audio_timeout, Duration::from_secs(10));
        assert_eq!(settings.teardown_grace, Duration::from_millis(500));
        assert_eq!(settings.strategy, PipelineStrategy::Download);
    }

    #[test]
    fn summary_hides_token() {
        let config = Config {
            discord_token: "super-secret".into(),
            ..valid()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("stream"));
    }
}
