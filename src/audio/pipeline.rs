//! Fetch + transcode subprocess chain.
//!
//! [`ProcessPipeline`] turns a [`Track`] into an Ogg/Opus byte stream by
//! running the fetch tool (yt-dlp) and the transcode tool (ffmpeg). Every
//! process and temporary file it creates is owned by a [`PipelineHandle`],
//! whose [`PipelineHandle::stop`] is the single teardown entry point.
//!
//! Two strategies are supported:
//!
//! - [`PipelineStrategy::Stream`]: `yt-dlp -g` resolves a direct media URL
//!   and ffmpeg reads it over HTTP. Lowest latency; the default.
//! - [`PipelineStrategy::Download`]: yt-dlp writes the media to a uniquely
//!   named temp file which ffmpeg then reads.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::{
    collections::VecDeque,
    io::Cursor,
    path::{Path, PathBuf},
    process::Stdio,
    str::FromStr,
    sync::Arc,
    time::Duration,
};
use tempfile::TempPath;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::{Child, ChildStderr, Command},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    error::{PlaybackError, PlaybackResult},
    sources::Track,
};

/// Formato preferido: m4a primero, es el que ffmpeg abre más rápido por HTTP
const YTDLP_FORMAT: &str = "bestaudio[ext=m4a]/bestaudio[acodec^=mp4a]/bestaudio[ext=mp4]/bestaudio/best";

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";

// Parámetros fijos de salida
pub const OPUS_BITRATE: &str = "128k";
pub const SAMPLE_RATE: &str = "48000";
pub const CHANNELS: &str = "2";
pub const CONTAINER: &str = "ogg";

const FIRST_CHUNK_SIZE: usize = 16 * 1024;
const STDERR_TAIL_LINES: usize = 20;

/// Stream codificado listo para el sink.
pub type EncodedStream = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Resultado de un arranque exitoso: los recursos y el audio que producen.
pub struct PreparedTrack {
    pub handle: PipelineHandle,
    pub stream: EncodedStream,
}

impl std::fmt::Debug for PreparedTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedTrack")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Suspends until the stream produces audio or a stage fails. Dropping
    /// the returned future kills whatever it already spawned.
    async fn start(&self, guild_id: GuildId, track: &Track) -> PlaybackResult<PreparedTrack>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStrategy {
    Stream,
    Download,
}

impl FromStr for PipelineStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stream" | "direct" => Ok(Self::Stream),
            "download" | "file" => Ok(Self::Download),
            other => anyhow::bail!("Estrategia de pipeline desconocida: {}", other),
        }
    }
}

impl PipelineStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Download => "download",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub fetch_tool: String,
    pub transcode_tool: String,
    pub strategy: PipelineStrategy,
    pub temp_dir: PathBuf,
    pub fetch_timeout: Duration,
    pub first_audio_timeout: Duration,
    pub teardown_grace: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            fetch_tool: "yt-dlp".to_string(),
            transcode_tool: "ffmpeg".to_string(),
            strategy: PipelineStrategy::Stream,
            temp_dir: std::env::temp_dir().join("guild-player"),
            fetch_timeout: Duration::from_secs(120),
            first_audio_timeout: Duration::from_secs(30),
            teardown_grace: Duration::from_secs(2),
        }
    }
}

/// Últimas líneas de stderr de un proceso, drenadas en segundo plano.
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    task: Option<JoinHandle<()>>,
}

impl StderrTail {
    fn spawn(guild_id: GuildId, label: &'static str, stderr: ChildStderr) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let sink = lines.clone();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                debug!("[{}] guild {}: {}", label, guild_id, line);
                let mut tail = sink.lock();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });

        Self { lines, task: Some(task) }
    }

    fn snapshot(&self) -> String {
        self.lines.lock().iter().cloned().collect::<Vec<_>>().join("\n")
    }

    /// Espera (acotado) a que el proceso cierre stderr y devuelve la cola.
    /// Llamadas posteriores sólo devuelven lo ya leído.
    async fn drain(&mut self, grace: Duration) -> String {
        if let Some(mut task) = self.task.take() {
            if timeout(grace, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.snapshot()
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Owns every resource of one in-flight pipeline.
///
/// [`stop`](Self::stop) kills the processes, waits at most the grace
/// period for them to be reaped and deletes the temp file. It is safe to
/// call any number of times; `Drop` performs the same cleanup without
/// waiting if `stop` was never reached.
pub struct PipelineHandle {
    guild_id: GuildId,
    fetch: Option<Child>,
    transcode: Option<Child>,
    temp_file: Option<TempPath>,
    stderr: Option<StderrTail>,
    grace: Duration,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("guild_id", &self.guild_id)
            .field("fetch", &self.fetch.as_ref().and_then(Child::id))
            .field("transcode", &self.transcode.as_ref().and_then(Child::id))
            .field("temp_file", &self.temp_path())
            .finish()
    }
}

impl PipelineHandle {
    pub fn new(guild_id: GuildId, grace: Duration) -> Self {
        Self {
            guild_id,
            fetch: None,
            transcode: None,
            temp_file: None,
            stderr: None,
            grace,
        }
    }

    pub fn with_temp_file(mut self, path: TempPath) -> Self {
        self.temp_file = Some(path);
        self
    }

    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_file.as_deref()
    }

    /// True once nothing is owned any more.
    #[cfg(test)]
    pub fn is_released(&self) -> bool {
        self.fetch.is_none() && self.transcode.is_none() && self.temp_file.is_none()
    }

    pub async fn stop(&mut self) {
        if let Some(child) = self.fetch.take() {
            reap(self.guild_id, "fetch", child, self.grace).await;
        }

        if let Some(mut child) = self.transcode.take() {
            // Si ya terminó por su cuenta con error, sólo queda registrarlo
            if let Ok(Some(status)) = child.try_wait() {
                if !status.success() {
                    let stderr = match self.stderr.as_mut() {
                        Some(tail) => tail.drain(self.grace).await,
                        None => String::new(),
                    };
                    let err = PlaybackError::transcode_failed(Some(status), stderr);
                    warn!("🎛️ Guild {}: {} {:?}", self.guild_id, err, err.diagnostics());
                }
            }
            reap(self.guild_id, "transcode", child, self.grace).await;
        }

        if let Some(mut tail) = self.stderr.take() {
            tail.abort();
        }

        if let Some(path) = self.temp_file.take() {
            let shown = path.display().to_string();
            match path.close() {
                Ok(()) => debug!("🗑️ Guild {}: eliminado {}", self.guild_id, shown),
                Err(e) => debug!("🗑️ Guild {}: {} ya no existía ({})", self.guild_id, shown, e),
            }
        }
    }
}

impl Drop for PipelineHandle {
    fn drop(&mut self) {
        for child in [self.fetch.as_mut(), self.transcode.as_mut()].into_iter().flatten() {
            let _ = child.start_kill();
        }
        if let Some(mut tail) = self.stderr.take() {
            tail.abort();
        }
        // TempPath borra el archivo al soltarse
        self.temp_file.take();
    }
}

async fn reap(guild_id: GuildId, label: &str, mut child: Child, grace: Duration) {
    // Errores aquí son carreras esperadas (proceso ya muerto)
    let _ = child.start_kill();
    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("🔪 Guild {}: {} terminado ({})", guild_id, label, status),
        Ok(Err(e)) => debug!("🔪 Guild {}: {} sin estado de salida: {}", guild_id, label, e),
        Err(_) => debug!(
            "🔪 Guild {}: {} no terminó en {:?}, queda en manos de tokio",
            guild_id, label, grace
        ),
    }
}

enum TranscodeInput {
    Url(String),
    File(PathBuf),
}

impl TranscodeInput {
    fn as_arg(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

fn transcode_args(input: &TranscodeInput) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning"]
        .into_iter()
        .map(String::from)
        .collect();

    if let TranscodeInput::Url(_) = input {
        args.extend(
            [
                "-reconnect",
                "1",
                "-reconnect_streamed",
                "1",
                "-reconnect_delay_max",
                "5",
                "-user_agent",
                USER_AGENT,
            ]
            .into_iter()
            .map(String::from),
        );
    }

    args.push("-i".to_string());
    args.push(input.as_arg());
    args.extend(
        [
            "-vn", "-acodec", "libopus", "-b:a", OPUS_BITRATE, "-ar", SAMPLE_RATE, "-ac", CHANNELS, "-f",
            CONTAINER, "pipe:1",
        ]
        .into_iter()
        .map(String::from),
    );
    args
}

/// Última línea no vacía de la salida de `yt-dlp -g`.
fn parse_direct_url(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(String::from)
}

/// yt-dlp + ffmpeg como subprocesos.
pub struct ProcessPipeline {
    settings: PipelineSettings,
}

impl ProcessPipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }

    async fn run_stages(&self, handle: &mut PipelineHandle, track: &Track) -> PlaybackResult<EncodedStream> {
        let input = match self.settings.strategy {
            PipelineStrategy::Stream => TranscodeInput::Url(self.resolve_direct_url(track.locator()).await?),
            PipelineStrategy::Download => TranscodeInput::File(self.download(handle, track.locator()).await?),
        };
        self.spawn_transcode(handle, &input).await
    }

    /// `yt-dlp -g`: la URL directa (temporal) del audio.
    async fn resolve_direct_url(&self, locator: &str) -> PlaybackResult<String> {
        let tool = &self.settings.fetch_tool;
        let child = Command::new(tool)
            .args(["--no-playlist", "-f", YTDLP_FORMAT, "-g", locator])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::from_spawn(tool, e))?;

        let output = timeout(self.settings.fetch_timeout, child.wait_with_output())
            .await
            .map_err(|_| PlaybackError::fetch_failed(format!("{} excedió {:?}", tool, self.settings.fetch_timeout), ""))??;

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(PlaybackError::fetch_failed(
                format!("{} terminó con {}", tool, output.status),
                stderr,
            ));
        }

        parse_direct_url(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| PlaybackError::fetch_failed(format!("{} devolvió una URL vacía", tool), stderr))
    }

    /// Descarga a un archivo temporal propiedad del handle.
    async fn download(&self, handle: &mut PipelineHandle, locator: &str) -> PlaybackResult<PathBuf> {
        let tool = &self.settings.fetch_tool;
        tokio::fs::create_dir_all(&self.settings.temp_dir).await?;

        let prefix = format!("{}-{}-", handle.guild_id, Utc::now().timestamp_millis());
        let temp = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".media")
            .tempfile_in(&self.settings.temp_dir)?
            .into_temp_path();
        let path = temp.to_path_buf();
        handle.temp_file = Some(temp);

        let mut child = Command::new(tool)
            .args(["--no-playlist", "-f", YTDLP_FORMAT, "--force-overwrites", "--no-part", "-o"])
            .arg(&path)
            .arg(locator)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::from_spawn(tool, e))?;

        let mut stderr_pipe = child.stderr.take();
        let fetch = handle.fetch.insert(child);

        let read_stderr = async {
            let mut buf = String::new();
            if let Some(pipe) = stderr_pipe.as_mut() {
                let _ = pipe.read_to_string(&mut buf).await;
            }
            buf
        };

        let (status, stderr) = match timeout(self.settings.fetch_timeout, async {
            tokio::join!(fetch.wait(), read_stderr)
        })
        .await
        {
            Ok((status, stderr)) => (status?, stderr.trim().to_string()),
            Err(_) => {
                return Err(PlaybackError::fetch_failed(
                    format!("{} excedió {:?}", tool, self.settings.fetch_timeout),
                    "",
                ))
            }
        };
        // Ya terminó y fue cosechado
        handle.fetch = None;

        if !status.success() {
            return Err(PlaybackError::fetch_failed(format!("{} terminó con {}", tool, status), stderr));
        }

        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size == 0 {
            return Err(PlaybackError::fetch_failed(
                format!("{} no produjo ningún archivo", tool),
                stderr,
            ));
        }

        debug!("📥 Guild {}: {} bytes en {}", handle.guild_id, size, path.display());
        Ok(path)
    }

    async fn spawn_transcode(&self, handle: &mut PipelineHandle, input: &TranscodeInput) -> PlaybackResult<EncodedStream> {
        let tool = &self.settings.transcode_tool;
        let mut child = Command::new(tool)
            .args(transcode_args(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::from_spawn(tool, e))?;

        let stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            handle.stderr = Some(StderrTail::spawn(handle.guild_id, "ffmpeg", stderr));
        }
        let transcode = handle.transcode.insert(child);

        let mut stdout = stdout.ok_or_else(|| PlaybackError::transcode_failed(None, "stdout no disponible"))?;

        let mut first = vec![0u8; FIRST_CHUNK_SIZE];
        let read = match timeout(self.settings.first_audio_timeout, stdout.read(&mut first)).await {
            Ok(read) => read?,
            Err(_) => {
                let stderr = handle.stderr.as_ref().map(StderrTail::snapshot).unwrap_or_default();
                return Err(PlaybackError::transcode_failed(None, format!(
                    "sin audio tras {:?}\n{}",
                    self.settings.first_audio_timeout, stderr
                )));
            }
        };

        if read == 0 {
            let status = timeout(self.settings.teardown_grace, transcode.wait())
                .await
                .ok()
                .and_then(Result::ok);
            if status.is_some() {
                // Ya cosechado: stop no debe volver a reportarlo
                handle.transcode = None;
            }
            let stderr = match handle.stderr.as_mut() {
                Some(tail) => tail.drain(self.settings.teardown_grace).await,
                None => String::new(),
            };
            return Err(PlaybackError::transcode_failed(status, stderr));
        }

        first.truncate(read);
        Ok(Box::new(Cursor::new(first).chain(stdout)))
    }
}

#[async_trait]
impl MediaPipeline for ProcessPipeline {
    async fn start(&self, guild_id: GuildId, track: &Track) -> PlaybackResult<PreparedTrack> {
        info!(
            "🎬 Guild {}: preparando '{}' ({})",
            guild_id,
            track.title(),
            self.settings.strategy.as_str()
        );

        let mut handle = PipelineHandle::new(guild_id, self.settings.teardown_grace);
        match self.run_stages(&mut handle, track).await {
            Ok(stream) => Ok(PreparedTrack { handle, stream }),
            Err(e) => {
                handle.stop().await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn guild() -> GuildId {
        GuildId::new(42)
    }

    fn settings(fetch: &str, transcode: &str, temp_dir: &Path) -> PipelineSettings {
        PipelineSettings {
            fetch_tool: fetch.to_string(),
            transcode_tool: transcode.to_string(),
            strategy: PipelineStrategy::Stream,
            temp_dir: temp_dir.to_path_buf(),
            fetch_timeout: Duration::from_secs(10),
            first_audio_timeout: Duration::from_secs(10),
            teardown_grace: Duration::from_millis(500),
        }
    }

    fn track() -> Track {
        Track::new("https://youtu.be/abc", "abc", "tester")
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn direct_url_is_last_non_empty_line() {
        assert_eq!(
            parse_direct_url("https://a/video\nhttps://b/audio\n\n"),
            Some("https://b/audio".to_string())
        );
        assert_eq!(parse_direct_url("  \n\n"), None);
    }

    #[test]
    fn transcode_parameters_are_fixed() {
        let args = transcode_args(&TranscodeInput::File(PathBuf::from("/tmp/x.media")));
        let joined = args.join(" ");
        assert!(joined.contains("-i /tmp/x.media -vn -acodec libopus -b:a 128k -ar 48000 -ac 2 -f ogg pipe:1"));
        assert!(!joined.contains("-reconnect"));

        let args = transcode_args(&TranscodeInput::Url("https://cdn/audio".into()));
        assert!(args.iter().any(|a| a == "-reconnect_streamed"));
        assert_eq!(args.last().map(String::as_str), Some("pipe:1"));
    }

    #[test]
    fn strategy_parses_from_env_values() {
        assert_eq!("stream".parse::<PipelineStrategy>().unwrap(), PipelineStrategy::Stream);
        assert_eq!(" Download ".parse::<PipelineStrategy>().unwrap(), PipelineStrategy::Download);
        assert!("torrent".parse::<PipelineStrategy>().is_err());
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_removes_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = tempfile::Builder::new()
            .tempfile_in(dir.path())
            .unwrap()
            .into_temp_path();
        let mut handle = PipelineHandle::new(guild(), Duration::from_millis(200)).with_temp_file(path);
        assert_eq!(entries(dir.path()), 1);

        handle.stop().await;
        handle.stop().await;

        assert!(handle.is_released());
        assert_eq!(entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn stop_kills_running_processes() {
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut handle = PipelineHandle::new(guild(), Duration::from_secs(2));
        handle.transcode = Some(child);

        let started = std::time::Instant::now();
        handle.stop().await;
        handle.stop().await;

        assert!(handle.is_released());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_fetch_tool_is_distinct() {
        let dir = TempDir::new().unwrap();
        let pipeline = ProcessPipeline::new(settings("guild-player-no-such-ytdlp", "ffmpeg", dir.path()));
        let err = pipeline.start(guild(), &track()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ToolMissing { ref tool } if tool == "guild-player-no-such-ytdlp"));
    }

    #[tokio::test]
    async fn fetch_non_zero_exit_is_fetch_failed() {
        let dir = TempDir::new().unwrap();
        let pipeline = ProcessPipeline::new(settings("false", "ffmpeg", dir.path()));
        let err = pipeline.start(guild(), &track()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn fetch_empty_output_is_fetch_failed() {
        let dir = TempDir::new().unwrap();
        let pipeline = ProcessPipeline::new(settings("true", "ffmpeg", dir.path()));
        let err = pipeline.start(guild(), &track()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::FetchFailed { .. }));
    }

    #[tokio::test]
    async fn missing_transcode_tool_is_distinct() {
        let dir = TempDir::new().unwrap();
        // echo imprime sus argumentos: sirve como "URL directa"
        let pipeline = ProcessPipeline::new(settings("echo", "guild-player-no-such-ffmpeg", dir.path()));
        let err = pipeline.start(guild(), &track()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ToolMissing { ref tool } if tool == "guild-player-no-such-ffmpeg"));
    }

    #[tokio::test]
    async fn transcode_without_output_is_transcode_failed() {
        let dir = TempDir::new().unwrap();
        let pipeline = ProcessPipeline::new(settings("echo", "false", dir.path()));
        let err = pipeline.start(guild(), &track()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::TranscodeFailed { .. }));
    }

    #[tokio::test]
    async fn first_chunk_is_replayed_into_stream() {
        let dir = TempDir::new().unwrap();
        let pipeline = ProcessPipeline::new(settings("echo", "echo", dir.path()));
        let PreparedTrack { mut handle, mut stream } = pipeline.start(guild(), &track()).await.unwrap();

        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        assert!(out.contains("libopus"));
        assert!(out.ends_with("pipe:1\n"));

        handle.stop().await;
        assert!(handle.is_released());
    }

    #[tokio::test]
    async fn failed_download_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings("false", "ffmpeg", dir.path());
        settings.strategy = PipelineStrategy::Download;
        let pipeline = ProcessPipeline::new(settings);

        let err = pipeline.start(guild(), &track()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::FetchFailed { .. }));
        assert_eq!(entries(dir.path()), 0);
    }

    /// Script ejecutable en `dir`, usado como herramienta externa.
    pub(crate) fn script(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    /// Vivo y no zombie, según /proc.
    fn process_running(pid: &str) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .map_or(false, |(_, rest)| !rest.starts_with('Z') && !rest.starts_with('X')),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn cancelled_download_kills_fetch_and_removes_temp_file() {
        let tools = TempDir::new().unwrap();
        let media = TempDir::new().unwrap();
        let pid_file = tools.path().join("fetch.pid");
        let fetch = script(
            tools.path(),
            "slow-fetch",
            &format!("echo $$ > {}\nexec sleep 30", pid_file.display()),
        );

        let mut settings = settings(&fetch, "ffmpeg", media.path());
        settings.strategy = PipelineStrategy::Download;
        let pipeline = ProcessPipeline::new(settings);

        let cancelled = timeout(Duration::from_millis(500), pipeline.start(guild(), &track())).await;
        assert!(cancelled.is_err(), "la descarga no debía terminar");
        assert_eq!(entries(media.path()), 0);

        let pid = std::fs::read_to_string(&pid_file).unwrap().trim().to_string();
        for _ in 0..200 {
            if !process_running(&pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("el proceso de descarga {} sigue vivo", pid);
    }

    #[tokio::test]
    async fn early_transcode_exit_reports_stderr_once() {
        let tools = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        let transcode = script(tools.path(), "broken-ffmpeg", "echo 'Connection refused' >&2\nexit 1");
        let pipeline = ProcessPipeline::new(settings("echo", &transcode, dir.path()));

        for _ in 0..2 {
            let err = pipeline.start(guild(), &track()).await.unwrap_err();
            assert!(matches!(err, PlaybackError::TranscodeFailed { ref stderr, .. } if stderr.contains("Connection refused")));
        }
    }

    #[tokio::test]
    async fn empty_download_is_fetch_failed() {
        let dir = TempDir::new().unwrap();
        let mut settings = settings("true", "ffmpeg", dir.path());
        settings.strategy = PipelineStrategy::Download;
        let pipeline = ProcessPipeline::new(settings);

        let err = pipeline.start(guild(), &track()).await.unwrap_err();
        assert!(matches!(err, PlaybackError::FetchFailed { ref reason, .. } if reason.contains("archivo")));
        assert_eq!(entries(dir.path()), 0);
    }
}
