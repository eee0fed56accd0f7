use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use songbird::{
    input::{AudioStream, Input, LiveInput},
    tracks::TrackHandle,
    Call, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent,
};
use std::sync::Arc;
use symphonia::core::{
    io::{MediaSource, ReadOnlySource},
    probe::Hint,
};
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

use super::pipeline::{EncodedStream, CONTAINER};
use crate::error::PlaybackResult;

/// Identifica cada arranque de pista dentro de una sesión.
pub type PlaybackToken = u64;

/// Terminal events reported by a sink for the stream tagged with `token`.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Finished(PlaybackToken),
    Failed(PlaybackToken, String),
}

impl SinkEvent {
    pub fn token(&self) -> PlaybackToken {
        match self {
            Self::Finished(token) | Self::Failed(token, _) => *token,
        }
    }
}

pub type SinkEventSender = mpsc::UnboundedSender<SinkEvent>;
pub type SinkEventReceiver = mpsc::UnboundedReceiver<SinkEvent>;

/// Destination of the encoded audio. One stream at a time: `play` replaces
/// whatever was playing before.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn play(&self, token: PlaybackToken, stream: EncodedStream) -> PlaybackResult<()>;

    /// Corta la reproducción actual. Nunca falla.
    async fn stop(&self);
}

type TrackedHandles = Arc<Mutex<Vec<(TrackHandle, PlaybackToken)>>>;

/// Sink sobre una llamada de voz de Songbird
pub struct SongbirdSink {
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    tracks: TrackedHandles,
}

impl SongbirdSink {
    /// Se suscribe a los eventos globales de pista de la llamada. Debe
    /// llamarse una sola vez por sesión; los reenviadores de una sesión
    /// anterior sobre la misma llamada se descartan.
    pub async fn attach(guild_id: GuildId, call: Arc<tokio::sync::Mutex<Call>>, events: SinkEventSender) -> Self {
        let tracks: TrackedHandles = Arc::new(Mutex::new(Vec::new()));

        {
            let mut handler = call.lock().await;
            handler.remove_all_global_events();
            handler.add_global_event(
                Event::Track(TrackEvent::End),
                TrackEventForwarder {
                    guild_id,
                    tracks: tracks.clone(),
                    events: events.clone(),
                    failed: false,
                },
            );
            handler.add_global_event(
                Event::Track(TrackEvent::Error),
                TrackEventForwarder {
                    guild_id,
                    tracks: tracks.clone(),
                    events,
                    failed: true,
                },
            );
        }

        debug!("🔗 Sink de voz enlazado para guild {}", guild_id);
        Self { guild_id, call, tracks }
    }

    fn into_input(stream: EncodedStream) -> Input {
        // Songbird lee desde hilos propios: el puente bloqueante usa el runtime actual
        let reader = SyncIoBridge::new(stream);
        let source: Box<dyn MediaSource> = Box::new(ReadOnlySource::new(reader));

        let mut hint = Hint::new();
        hint.with_extension(CONTAINER);

        Input::Live(
            LiveInput::Raw(AudioStream {
                input: source,
                hint: Some(hint),
            }),
            None,
        )
    }
}

#[async_trait]
impl PlaybackSink for SongbirdSink {
    async fn play(&self, token: PlaybackToken, stream: EncodedStream) -> PlaybackResult<()> {
        let input = Self::into_input(stream);

        let handle = {
            let mut handler = self.call.lock().await;
            handler.play_only_input(input)
        };

        self.tracks.lock().push((handle, token));
        info!("▶️ Guild {}: stream #{} enviado al canal de voz", self.guild_id, token);
        Ok(())
    }

    async fn stop(&self) {
        self.call.lock().await.stop();
        debug!("⏹️ Guild {}: sink detenido", self.guild_id);
    }
}

/// Traduce eventos de pista de Songbird a [`SinkEvent`]
struct TrackEventForwarder {
    guild_id: GuildId,
    tracks: TrackedHandles,
    events: SinkEventSender,
    failed: bool,
}

impl TrackEventForwarder {
    fn take_token(&self, handle: &TrackHandle) -> Option<PlaybackToken> {
        let mut tracks = self.tracks.lock();
        let index = tracks.iter().position(|(tracked, _)| tracked.uuid() == handle.uuid())?;
        Some(tracks.swap_remove(index).1)
    }
}

#[async_trait]
impl VoiceEventHandler for TrackEventForwarder {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(track_list) = ctx {
            for (state, handle) in *track_list {
                let Some(token) = self.take_token(handle) else {
                    continue;
                };

                let event = if self.failed {
                    warn!(
                        "❌ Error en stream #{} para guild {}: {:?}",
                        token, self.guild_id, state.playing
                    );
                    SinkEvent::Failed(token, format!("{:?}", state.playing))
                } else {
                    debug!("🏁 Stream #{} terminado en guild {}", token, self.guild_id);
                    SinkEvent::Finished(token)
                };

                // La sesión puede haberse cerrado ya
                let _ = self.events.send(event);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serenity::model::id::UserId;
    use std::time::Duration;

    #[tokio::test]
    async fn reattach_drops_previous_forwarders() {
        let guild_id = GuildId::new(5);
        let call = Arc::new(tokio::sync::Mutex::new(Call::standalone(guild_id, UserId::new(1))));

        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let _first = SongbirdSink::attach(guild_id, call.clone(), first_tx).await;
        let (second_tx, _second_rx) = mpsc::unbounded_channel();
        let _second = SongbirdSink::attach(guild_id, call, second_tx).await;

        // Cerrado cuando la llamada suelta los reenviadores viejos
        let closed = tokio::time::timeout(Duration::from_secs(5), first_rx.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }
}
