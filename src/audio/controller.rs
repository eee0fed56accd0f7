use futures::FutureExt;
use serenity::model::id::GuildId;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    pipeline::{MediaPipeline, PreparedTrack},
    session::{EnqueueOutcome, GuildSession, LoadingTask, Notifier, PlaybackNotice, PlaybackState, QueueSnapshot},
    sink::{PlaybackSink, PlaybackToken, SinkEvent, SinkEventReceiver},
};
use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::Track,
};

const COMMAND_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub max_queue_size: usize,
    pub max_consecutive_failures: u32,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            max_queue_size: 500,
            max_consecutive_failures: 5,
        }
    }
}

pub enum SessionCommand {
    Enqueue {
        track: Track,
        reply: oneshot::Sender<PlaybackResult<EnqueueOutcome>>,
    },
    Skip {
        reply: oneshot::Sender<PlaybackResult<Track>>,
    },
    Stop {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<QueueSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Resultado de la tarea de carga, etiquetado con su token
struct Loaded {
    token: PlaybackToken,
    result: PlaybackResult<PreparedTrack>,
}

/// Cheap, cloneable front door to one guild's controller task.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SessionCommand) -> PlaybackResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| PlaybackError::SessionClosed)?;
        response.await.map_err(|_| PlaybackError::SessionClosed)
    }

    /// Encola la pista; si la sesión estaba libre empieza a cargarla.
    pub async fn enqueue(&self, track: Track) -> PlaybackResult<EnqueueOutcome> {
        self.request(|reply| SessionCommand::Enqueue { track, reply }).await?
    }

    /// Salta la pista actual y devuelve cuál era.
    pub async fn skip(&self) -> PlaybackResult<Track> {
        self.request(|reply| SessionCommand::Skip { reply }).await?
    }

    /// Detiene todo y vacía la cola. Devuelve cuántas pistas se descartaron.
    pub async fn stop(&self) -> PlaybackResult<usize> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn snapshot(&self) -> PlaybackResult<QueueSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    pub(crate) async fn shutdown(&self) -> PlaybackResult<()> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }
}

/// The per-guild state machine.
///
/// Runs as one task per guild. Commands from users, pipeline load results
/// and sink events all land in the same `select!` loop, so every mutation
/// of the [`GuildSession`] is serialized and teardown always completes
/// before the next pipeline starts.
///
/// ```text
/// Idle --enqueue--> Loading --ready--> Playing --finished/error--> Idle -> next
///          Loading|Playing --failure--> Idle -> next (until the streak cap)
///          Loading|Playing --skip--> Idle -> next
///          Loading|Playing --stop--> Idle (queue cleared)
/// ```
pub struct PlaybackController {
    session: GuildSession,
    pipeline: Arc<dyn MediaPipeline>,
    sink: Arc<dyn PlaybackSink>,
    // Un único consumidor: los avisos llegan en el orden en que se emiten
    notices: mpsc::UnboundedSender<PlaybackNotice>,
    options: ControllerOptions,
    loaded_tx: mpsc::UnboundedSender<Loaded>,
}

impl PlaybackController {
    /// Lanza la tarea del controlador y devuelve su handle.
    pub fn spawn(
        guild_id: GuildId,
        pipeline: Arc<dyn MediaPipeline>,
        sink: Arc<dyn PlaybackSink>,
        notifier: Arc<dyn Notifier>,
        sink_events: SinkEventReceiver,
        options: ControllerOptions,
    ) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (loaded_tx, loaded_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let controller = Self {
            session: GuildSession::new(guild_id, options.max_queue_size),
            pipeline,
            sink,
            notices: notices_tx,
            options,
            loaded_tx,
        };

        tokio::spawn(deliver_notices(guild_id, notifier, notices_rx));

        tokio::spawn(controller.run(commands_rx, sink_events, loaded_rx));

        SessionHandle { commands: commands_tx }
    }

    fn guild_id(&self) -> GuildId {
        self.session.guild_id()
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut sink_events: SinkEventReceiver,
        mut loaded: mpsc::UnboundedReceiver<Loaded>,
    ) {
        info!("🎛️ Controlador iniciado para guild {}", self.guild_id());

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        // Todos los handles se soltaron
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = sink_events.recv() => self.handle_sink_event(event).await,
                Some(result) = loaded.recv() => self.handle_loaded(result).await,
            }
        }

        info!("👋 Controlador terminado para guild {}", self.guild_id());
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Enqueue { track, reply } => {
                let outcome = self.enqueue(track).await;
                let _ = reply.send(outcome);
            }
            SessionCommand::Skip { reply } => {
                let skipped = self.skip().await;
                let _ = reply.send(skipped);
            }
            SessionCommand::Stop { reply } => {
                let cleared = self.stop().await;
                let _ = reply.send(cleared);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot());
            }
            SessionCommand::Shutdown { reply } => {
                // Manejado en run()
                let _ = reply.send(());
            }
        }
    }

    async fn enqueue(&mut self, track: Track) -> PlaybackResult<EnqueueOutcome> {
        let idle = self.session.is_idle();
        let position = self.session.enqueue(track)?;

        if idle {
            self.play_next().await;
            Ok(EnqueueOutcome::Started)
        } else {
            Ok(EnqueueOutcome::Queued { position })
        }
    }

    async fn skip(&mut self) -> PlaybackResult<Track> {
        if self.session.playing().is_none() {
            return Err(PlaybackError::NothingPlaying);
        }

        self.sink.stop().await;
        let skipped = self
            .session
            .finish_current()
            .await
            .ok_or(PlaybackError::NothingPlaying)?;
        info!("⏭️ Guild {}: saltada '{}'", self.guild_id(), skipped.title());

        self.play_next().await;
        Ok(skipped)
    }

    async fn stop(&mut self) -> usize {
        let cleared = self.session.clear_queue();
        self.sink.stop().await;
        self.session.finish_current().await;
        self.session.reset_failures();
        info!("⏹️ Guild {}: reproducción detenida, {} pistas descartadas", self.guild_id(), cleared);
        cleared
    }

    async fn shutdown(&mut self) {
        self.session.clear_queue();
        self.sink.stop().await;
        self.session.finish_current().await;
    }

    /// Desmonta lo que haya y arranca la siguiente pista de la cola.
    /// Devuelve `false` si la cola estaba vacía.
    async fn play_next(&mut self) -> bool {
        self.session.teardown().await;

        let Some(track) = self.session.next_track() else {
            debug!("📭 Cola vacía para guild {}", self.guild_id());
            return false;
        };

        info!("🎵 Guild {}: cargando '{}'", self.guild_id(), track.title());
        let token = self.session.begin_loading(track.clone());

        let cancel = CancellationToken::new();
        let cancelled = cancel.clone();
        let pipeline = self.pipeline.clone();
        let loaded_tx = self.loaded_tx.clone();
        let guild_id = self.guild_id();

        let join = tokio::spawn(async move {
            let start = AssertUnwindSafe(pipeline.start(guild_id, &track)).catch_unwind();
            let result = tokio::select! {
                // Soltar el futuro de start mata lo que ya se lanzó
                _ = cancelled.cancelled() => return,
                result = start => result.unwrap_or_else(|panic| Err(load_panicked(panic))),
            };
            let _ = loaded_tx.send(Loaded { token, result });
        });

        self.session.attach_loading(LoadingTask { cancel, join });
        true
    }

    async fn handle_loaded(&mut self, loaded: Loaded) {
        let Loaded { token, result } = loaded;

        if token != self.session.token() || self.session.state() != PlaybackState::Loading {
            debug!("🗑️ Guild {}: resultado de carga #{} obsoleto", self.guild_id(), token);
            if let Ok(mut prepared) = result {
                prepared.handle.stop().await;
            }
            return;
        }

        self.session.loading_finished();

        let PreparedTrack { mut handle, stream } = match result {
            Ok(prepared) => prepared,
            Err(e) => return self.on_failure(e).await,
        };

        if let Err(e) = self.sink.play(token, stream).await {
            handle.stop().await;
            return self.on_failure(e).await;
        }

        self.session.mark_playing(handle);
        if let Some(track) = self.session.playing().cloned() {
            info!("▶️ Guild {}: reproduciendo '{}'", self.guild_id(), track.title());
            self.notify(PlaybackNotice::NowPlaying(track));
        }
    }

    async fn on_failure(&mut self, error: PlaybackError) {
        let failures = self.session.record_failure();
        let Some(track) = self.session.finish_current().await else {
            return;
        };

        warn!(
            "⚠️ Guild {}: falló '{}' ({} seguidas): {}",
            self.guild_id(),
            track.title(),
            failures,
            error
        );
        if !error.is_pipeline_failure() {
            error!("❌ Guild {}: fallo fuera del pipeline: {:?}", self.guild_id(), error);
        }
        if let Some(stderr) = error.diagnostics() {
            debug!("stderr de '{}':\n{}", track.title(), stderr);
        }

        self.notify(PlaybackNotice::TrackFailed {
            track,
            reason: error.user_message(),
        });

        if failures >= self.options.max_consecutive_failures {
            let dropped = self.session.clear_queue();
            self.session.reset_failures();
            error!(
                "🚫 Guild {}: {} fallos seguidos, se descartan {} pistas",
                self.guild_id(),
                failures,
                dropped
            );
            self.notify(PlaybackNotice::GaveUp { failures, dropped });
            return;
        }

        self.play_next().await;
    }

    async fn handle_sink_event(&mut self, event: SinkEvent) {
        if event.token() != self.session.token() || self.session.state() != PlaybackState::Playing {
            debug!("🗑️ Guild {}: evento de sink obsoleto {:?}", self.guild_id(), event);
            return;
        }

        if let SinkEvent::Failed(_, reason) = &event {
            warn!("❌ Guild {}: el sink reportó error: {}", self.guild_id(), reason);
        }

        self.session.finish_current().await;
        if !self.play_next().await {
            self.notify(PlaybackNotice::QueueFinished);
        }
    }

    fn notify(&self, notice: PlaybackNotice) {
        if self.notices.send(notice).is_err() {
            debug!("📪 Guild {}: avisos cerrados", self.guild_id());
        }
    }
}

/// Entrega los avisos de una sesión uno detrás de otro.
async fn deliver_notices(
    guild_id: GuildId,
    notifier: Arc<dyn Notifier>,
    mut notices: mpsc::UnboundedReceiver<PlaybackNotice>,
) {
    while let Some(notice) = notices.recv().await {
        notifier.notify(guild_id, notice).await;
    }
}

fn load_panicked(panic: Box<dyn Any + Send>) -> PlaybackError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "pánico sin mensaje".to_string());
    PlaybackError::LoadAborted(message)
}
