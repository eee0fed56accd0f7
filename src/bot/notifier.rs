use async_trait::async_trait;
use dashmap::DashMap;
use serenity::{
    all::{ChannelId, CreateEmbed, CreateMessage, GuildId},
    http::Http,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    audio::{Notifier, PlaybackNotice},
    ui::embeds,
};

/// Publica los avisos del controlador en el último canal de texto donde se
/// usó `play` en cada guild.
pub struct ChannelNotifier {
    http: Arc<Http>,
    channels: DashMap<GuildId, ChannelId>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            channels: DashMap::new(),
        }
    }

    pub fn remember(&self, guild_id: GuildId, channel_id: ChannelId) {
        self.channels.insert(guild_id, channel_id);
    }

    pub fn forget(&self, guild_id: GuildId) {
        self.channels.remove(&guild_id);
    }

    pub fn channel_for(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.channels.get(&guild_id).map(|c| *c)
    }

    fn embed_for(notice: &PlaybackNotice) -> CreateEmbed {
        match notice {
            PlaybackNotice::NowPlaying(track) => embeds::create_now_playing_embed(track),
            PlaybackNotice::TrackFailed { track, reason } => embeds::create_warning_embed(
                "No se pudo reproducir",
                &format!("**{}**\n{}\n\n⏭️ Pasando a la siguiente", track.title(), reason),
            ),
            PlaybackNotice::QueueFinished => {
                embeds::create_info_embed("Cola terminada", "No quedan más canciones en la cola")
            }
            PlaybackNotice::GaveUp { failures, dropped } => embeds::create_error_embed(
                "Reproducción abandonada",
                &format!(
                    "{} canciones fallaron seguidas; se descartaron {} de la cola",
                    failures, dropped
                ),
            ),
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, guild_id: GuildId, notice: PlaybackNotice) {
        let Some(channel_id) = self.channel_for(guild_id) else {
            debug!("📣 Guild {} sin canal para avisos: {:?}", guild_id, notice);
            return;
        };

        let message = CreateMessage::new().embed(Self::embed_for(&notice));
        if let Err(e) = channel_id.send_message(&self.http, message).await {
            warn!("⚠️ No se pudo enviar aviso a {} en guild {}: {:?}", channel_id, guild_id, e);
        }
    }
}
