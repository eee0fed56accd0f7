//! # Bot Module
//!
//! Discord surface of Guild Player.
//!
//! This module contains:
//! - Command registration and handling (slash and prefixed text)
//! - Voice connection management with a bounded connect time
//! - Event handling (ready, interactions, messages, voice state updates)
//!
//! ## Architecture
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`] trait. It owns no
//! playback state itself: every guild's queue lives in the
//! [`SessionRegistry`], and a session is created the first time the bot
//! joins a voice channel in that guild.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Message, Ready, UserId, VoiceState},
    async_trait,
};
use songbird::Call;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;

pub use notifier::ChannelNotifier;

use crate::{
    audio::{sink::PlaybackSink, SessionHandle, SessionRegistry, SongbirdSink},
    config::Config,
    error::{PlaybackError, PlaybackResult},
    sources::TrackResolver,
};

/// Main Discord bot handler.
///
/// ## Fields
///
/// - `config`: Bot configuration (token, prefix, limits)
/// - `registry`: Per-guild playback sessions
/// - `resolver`: Query/URL to [`Track`](crate::sources::Track)
/// - `notifier`: Posts playback notices to text channels
pub struct MusicBot {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    resolver: TrackResolver,
    notifier: Arc<ChannelNotifier>,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        resolver: TrackResolver,
        notifier: Arc<ChannelNotifier>,
    ) -> Self {
        Self {
            config,
            registry,
            resolver,
            notifier,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands go to a single guild when `GUILD_ID` is set (fast
    /// propagation, for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::new(guild_id);

                // Verificar que el bot esté en la guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }

    /// Canal de voz en el que está el usuario, según la caché
    pub fn user_voice_channel(&self, ctx: &Context, guild_id: GuildId, user_id: UserId) -> PlaybackResult<ChannelId> {
        let guild = guild_id
            .to_guild_cached(&ctx.cache)
            .ok_or(PlaybackError::NotInVoiceChannel)?;

        guild
            .voice_states
            .get(&user_id)
            .and_then(|voice_state| voice_state.channel_id)
            .ok_or(PlaybackError::NotInVoiceChannel)
    }

    /// Connects to a voice channel and makes sure the guild has a session.
    ///
    /// The connection attempt is bounded by `VOICE_CONNECT_TIMEOUT`. On
    /// timeout or error the half-open call is removed from Songbird and no
    /// session is created. Joining while already connected moves the bot to
    /// `channel_id` and keeps the existing session.
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<SessionHandle> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;

        let limit = self.config.voice_connect_timeout();
        let call = match tokio::time::timeout(limit, manager.join(guild_id, channel_id)).await {
            Ok(Ok(call)) => call,
            Ok(Err(e)) => {
                error!("Error al conectar al canal de voz en guild {}: {:?}", guild_id, e);
                let _ = manager.remove(guild_id).await;
                // Una sesión previa quedaría ligada a la llamada eliminada
                self.release_session(guild_id).await;
                return Err(PlaybackError::ConnectionTimeout.into());
            }
            Err(_) => {
                warn!("⏱️ Timeout de {:?} conectando en guild {}", limit, guild_id);
                let _ = manager.remove(guild_id).await;
                self.release_session(guild_id).await;
                return Err(PlaybackError::ConnectionTimeout.into());
            }
        };

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);
        Ok(self.session_for_call(guild_id, call).await)
    }

    async fn session_for_call(&self, guild_id: GuildId, call: Arc<Mutex<Call>>) -> SessionHandle {
        self.registry
            .get_or_create(guild_id, |events| async move {
                Arc::new(SongbirdSink::attach(guild_id, call, events).await) as Arc<dyn PlaybackSink>
            })
            .await
    }

    /// Cierra la sesión del guild, si había una, y olvida su canal de avisos.
    async fn release_session(&self, guild_id: GuildId) {
        self.notifier.forget(guild_id);
        match self.registry.remove(guild_id).await {
            Ok(()) | Err(PlaybackError::NotConnected) => {}
            Err(e) => error!("Error al cerrar la sesión de guild {}: {:?}", guild_id, e),
        }
    }

    /// Sesión existente, o conecta al canal del usuario y crea una.
    pub async fn ensure_session(&self, ctx: &Context, guild_id: GuildId, user_id: UserId) -> Result<SessionHandle> {
        if let Some(session) = self.registry.get(guild_id) {
            return Ok(session);
        }

        let channel_id = self.user_voice_channel(ctx, guild_id, user_id)?;
        self.join_voice_channel(ctx, guild_id, channel_id).await
    }

    /// Cierra la sesión (deteniendo cualquier pipeline) y sale del canal.
    pub async fn leave_voice_channel(&self, ctx: &Context, guild_id: GuildId) -> Result<()> {
        self.registry.remove(guild_id).await?;
        self.notifier.forget(guild_id);

        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird no inicializado"))?;
        if let Err(e) = manager.remove(guild_id).await {
            debug!("Llamada de guild {} ya cerrada: {:?}", guild_id, e);
        }

        info!("👋 Desconectado del canal de voz en guild {}", guild_id);
        Ok(())
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    async fn message(&self, ctx: Context, message: Message) {
        if let Err(e) = handlers::handle_message(&ctx, message, self).await {
            error!("Error manejando mensaje: {:?}", e);
        }
    }

    /// Cleans up the session when the bot is disconnected from voice by
    /// something other than `leave` (kicked, channel deleted).
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || old.is_none() || new.channel_id.is_some() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("🔌 Bot desconectado en guild {}", guild_id);
            self.release_session(guild_id).await;

            // La llamada vieja no se reutiliza en el próximo join
            if let Some(manager) = songbird::get(&ctx).await {
                if let Err(e) = manager.remove(guild_id).await {
                    debug!("Llamada de guild {} ya cerrada: {:?}", guild_id, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            controller::tests::{FakePipeline, FakeSink, RecordingNotifier},
            ControllerOptions,
        },
        sources::MockMusicSource,
    };
    use serenity::http::Http;
    use tempfile::TempDir;

    fn bot(dir: &TempDir) -> MusicBot {
        let registry = Arc::new(SessionRegistry::new(
            Arc::new(FakePipeline::new(dir.path())),
            Arc::new(RecordingNotifier::default()),
            ControllerOptions::default(),
        ));
        MusicBot::new(
            Arc::new(Config::default()),
            registry,
            TrackResolver::new(Arc::new(MockMusicSource::new())),
            Arc::new(ChannelNotifier::new(Arc::new(Http::new("")))),
        )
    }

    #[tokio::test]
    async fn release_session_drops_session_and_notice_channel() {
        let dir = TempDir::new().unwrap();
        let bot = bot(&dir);
        let guild_id = GuildId::new(3);
        let session = bot
            .registry
            .get_or_create(guild_id, |events| async move {
                Arc::new(FakeSink::new(events)) as Arc<dyn PlaybackSink>
            })
            .await;
        bot.notifier.remember(guild_id, ChannelId::new(30));

        bot.release_session(guild_id).await;

        assert!(bot.registry.get(guild_id).is_none());
        assert!(bot.notifier.channel_for(guild_id).is_none());
        assert!(matches!(session.snapshot().await, Err(PlaybackError::SessionClosed)));
    }

    #[tokio::test]
    async fn release_session_without_session_is_quiet() {
        let dir = TempDir::new().unwrap();
        let bot = bot(&dir);

        bot.release_session(GuildId::new(4)).await;
        assert!(bot.registry.is_empty());
    }
}
