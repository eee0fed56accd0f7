use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::{future::Future, sync::Arc};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use super::{
    controller::{ControllerOptions, PlaybackController, SessionHandle},
    pipeline::MediaPipeline,
    session::Notifier,
    sink::{PlaybackSink, SinkEventSender},
};
use crate::error::{PlaybackError, PlaybackResult};

/// Mapa de guild a su sesión de reproducción
pub struct SessionRegistry {
    sessions: DashMap<GuildId, SessionHandle>,
    // Serializa la creación para que el sink se suscriba una sola vez
    create_lock: Mutex<()>,
    pipeline: Arc<dyn MediaPipeline>,
    notifier: Arc<dyn Notifier>,
    options: ControllerOptions,
}

impl SessionRegistry {
    pub fn new(pipeline: Arc<dyn MediaPipeline>, notifier: Arc<dyn Notifier>, options: ControllerOptions) -> Self {
        Self {
            sessions: DashMap::new(),
            create_lock: Mutex::new(()),
            pipeline,
            notifier,
            options,
        }
    }

    /// Returns the guild's session, creating it on first use.
    ///
    /// `make_sink` runs only when a new session is created. It receives the
    /// sender its events must go to; this is the only place a sink gets
    /// subscribed to the session.
    pub async fn get_or_create<F, Fut>(&self, guild_id: GuildId, make_sink: F) -> SessionHandle
    where
        F: FnOnce(SinkEventSender) -> Fut,
        Fut: Future<Output = Arc<dyn PlaybackSink>>,
    {
        if let Some(handle) = self.live(guild_id) {
            return handle;
        }

        let _guard = self.create_lock.lock().await;
        if let Some(handle) = self.live(guild_id) {
            return handle;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sink = make_sink(events_tx).await;
        let handle = PlaybackController::spawn(
            guild_id,
            self.pipeline.clone(),
            sink,
            self.notifier.clone(),
            events_rx,
            self.options,
        );

        self.sessions.insert(guild_id, handle.clone());
        info!("🆕 Sesión creada para guild {}", guild_id);
        handle
    }

    fn live(&self, guild_id: GuildId) -> Option<SessionHandle> {
        let handle = self.sessions.get(&guild_id)?.clone();
        if handle.is_closed() {
            self.sessions.remove(&guild_id);
            return None;
        }
        Some(handle)
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SessionHandle> {
        self.live(guild_id)
    }

    /// Cierra la sesión del guild y libera todo lo que tenga.
    pub async fn remove(&self, guild_id: GuildId) -> PlaybackResult<()> {
        let (_, handle) = self.sessions.remove(&guild_id).ok_or(PlaybackError::NotConnected)?;

        match handle.shutdown().await {
            Ok(()) => info!("🗑️ Sesión cerrada para guild {}", guild_id),
            // Ya estaba cerrada: nada que liberar
            Err(e) => warn!("⚠️ Sesión de guild {} ya cerrada: {}", guild_id, e),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn guild_ids(&self) -> Vec<GuildId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub async fn shutdown_all(&self) {
        let guilds = self.guild_ids();
        info!("🧹 Cerrando {} sesiones", guilds.len());

        // Cada sesión desmonta su pipeline en paralelo
        join_all(guilds.into_iter().map(|guild_id| self.remove(guild_id))).await;
    }
}
