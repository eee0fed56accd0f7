use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::collections::VecDeque;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{pipeline::PipelineHandle, sink::PlaybackToken};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::Track,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Loading,
    Playing,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Playing => "playing",
        }
    }
}

/// Vista inmutable de una sesión para comandos y la UI
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub state: PlaybackState,
    pub playing: Option<Track>,
    pub queue: Vec<Track>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// La sesión estaba libre y la pista empezó a cargar
    Started,
    /// Posición (1 = siguiente) dentro de la cola
    Queued { position: usize },
}

/// Notificaciones best-effort que emite el controlador
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackNotice {
    NowPlaying(Track),
    TrackFailed { track: Track, reason: String },
    QueueFinished,
    GaveUp { failures: u32, dropped: usize },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, guild_id: GuildId, notice: PlaybackNotice);
}

/// Carga en curso: la tarea que ejecuta `MediaPipeline::start`.
pub struct LoadingTask {
    pub cancel: CancellationToken,
    pub join: JoinHandle<()>,
}

/// The pipeline a session currently owns.
pub enum ActivePipeline {
    Loading(LoadingTask),
    Running(PipelineHandle),
}

/// Per-guild mutable record. Only the session's controller task touches it.
///
/// `playing` is set exactly when `active` is (apart from the moment between
/// [`begin_loading`](Self::begin_loading) and
/// [`attach_loading`](Self::attach_loading)), and at most one pipeline is
/// owned at any time.
pub struct GuildSession {
    guild_id: GuildId,
    queue: VecDeque<Track>,
    playing: Option<Track>,
    state: PlaybackState,
    active: Option<ActivePipeline>,
    token: PlaybackToken,
    consecutive_failures: u32,
    max_queue_size: usize,
}

impl GuildSession {
    pub fn new(guild_id: GuildId, max_queue_size: usize) -> Self {
        Self {
            guild_id,
            queue: VecDeque::new(),
            playing: None,
            state: PlaybackState::Idle,
            active: None,
            token: 0,
            consecutive_failures: 0,
            max_queue_size,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn playing(&self) -> Option<&Track> {
        self.playing.as_ref()
    }

    pub fn token(&self) -> PlaybackToken {
        self.token
    }

    #[cfg(test)]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.state == PlaybackState::Idle && self.playing.is_none()
    }

    /// Agrega al final de la cola y devuelve la posición (1-based)
    pub fn enqueue(&mut self, track: Track) -> PlaybackResult<usize> {
        if self.queue.len() >= self.max_queue_size {
            return Err(PlaybackError::QueueFull {
                max: self.max_queue_size,
            });
        }

        info!("➕ Guild {}: agregado a la cola: {}", self.guild_id, track.title());
        self.queue.push_back(track);
        Ok(self.queue.len())
    }

    pub fn next_track(&mut self) -> Option<Track> {
        self.queue.pop_front()
    }

    pub fn clear_queue(&mut self) -> usize {
        let cleared = self.queue.len();
        self.queue.clear();
        cleared
    }

    /// Marca `track` como la pista en curso y entrega un token nuevo.
    pub fn begin_loading(&mut self, track: Track) -> PlaybackToken {
        debug_assert!(self.active.is_none(), "pipeline anterior sin desmontar");
        self.token += 1;
        self.playing = Some(track);
        self.state = PlaybackState::Loading;
        debug!("⏳ Guild {}: idle -> loading (#{})", self.guild_id, self.token);
        self.token
    }

    pub fn attach_loading(&mut self, task: LoadingTask) {
        self.active = Some(ActivePipeline::Loading(task));
    }

    /// La tarea de carga ya terminó por sí misma; sólo se olvida.
    pub fn loading_finished(&mut self) {
        if let Some(ActivePipeline::Loading(_)) = self.active {
            self.active = None;
        }
    }

    pub fn mark_playing(&mut self, handle: PipelineHandle) {
        self.active = Some(ActivePipeline::Running(handle));
        self.state = PlaybackState::Playing;
        self.consecutive_failures = 0;
        debug!("🎶 Guild {}: loading -> playing (#{})", self.guild_id, self.token);
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    pub fn reset_failures(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Desmonta el pipeline (si hay) y vuelve a `Idle`. Devuelve la pista
    /// que estaba en curso.
    pub async fn finish_current(&mut self) -> Option<Track> {
        self.teardown().await;
        if self.state != PlaybackState::Idle {
            debug!("⏹️ Guild {}: {} -> idle", self.guild_id, self.state.as_str());
        }
        self.state = PlaybackState::Idle;
        self.playing.take()
    }

    /// Cancels a load in progress or stops a running pipeline and waits
    /// until its resources are gone.
    pub async fn teardown(&mut self) {
        match self.active.take() {
            Some(ActivePipeline::Loading(task)) => {
                task.cancel.cancel();
                // El futuro cancelado se suelta dentro de la tarea: procesos y
                // archivos quedan liberados cuando termina
                let _ = task.join.await;
                debug!("🛑 Guild {}: carga #{} cancelada", self.guild_id, self.token);
            }
            Some(ActivePipeline::Running(mut handle)) => handle.stop().await,
            None => {}
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            state: self.state,
            playing: self.playing.clone(),
            queue: self.queue.iter().cloned().collect(),
            consecutive_failures: self.consecutive_failures,
        }
    }
}
