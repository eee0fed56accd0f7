use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::{process::Stdio, sync::LazyLock, time::Duration};
use tokio::{process::Command, sync::Semaphore, time::timeout};
use tracing::{debug, info};
use url::Url;

use super::{MusicSource, TrackMetadata};
use crate::error::{PlaybackError, PlaybackResult};

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.)?(youtube\.com/(watch\?v=|embed/|v/|shorts/)|youtu\.be/|music\.youtube\.com/)")
        .expect("regex de YouTube válida")
});

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(20);

/// Cliente de metadata de YouTube respaldado por yt-dlp
pub struct YouTubeClient {
    tool: String,
    // Limitar requests concurrentes para evitar rate limiting
    rate_limiter: Semaphore,
}

/// Información extraída de yt-dlp (`--dump-json`)
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    webpage_url: Option<String>,
    url: Option<String>,
}

impl YtDlpInfo {
    fn into_metadata(self) -> TrackMetadata {
        // En modo --flat-playlist las entradas sólo traen `url`
        let url = self
            .webpage_url
            .or(self.url)
            .or_else(|| self.id.map(|id| format!("https://www.youtube.com/watch?v={}", id)));

        TrackMetadata {
            title: self.title.unwrap_or_default(),
            url,
            duration: self
                .duration
                .filter(|d| d.is_finite() && *d >= 0.0)
                .map(Duration::from_secs_f64),
        }
    }
}

impl YouTubeClient {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            rate_limiter: Semaphore::new(3),
        }
    }

    /// Verifica si una URL es válida para YouTube
    pub fn is_youtube_url(url: &str) -> bool {
        if !YOUTUBE_URL.is_match(url) {
            return false;
        }
        let candidate = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("https://{}", url)
        };
        Url::parse(&candidate).is_ok()
    }

    async fn run(&self, args: &[&str]) -> PlaybackResult<String> {
        let _permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| PlaybackError::fetch_failed("limitador cerrado", ""))?;

        let child = Command::new(&self.tool)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PlaybackError::from_spawn(&self.tool, e))?;

        let output = timeout(LOOKUP_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| PlaybackError::fetch_failed("búsqueda excedió el tiempo límite", ""))??;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(PlaybackError::fetch_failed(
                format!("{} terminó con {}", self.tool, output.status),
                error,
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn parse_lines(stdout: &str) -> Vec<TrackMetadata> {
        stdout
            .lines()
            .filter_map(|line| serde_json::from_str::<YtDlpInfo>(line).ok())
            .map(YtDlpInfo::into_metadata)
            .collect()
    }
}

#[async_trait]
impl MusicSource for YouTubeClient {
    async fn search(&self, query: &str, limit: usize) -> PlaybackResult<Vec<TrackMetadata>> {
        info!("🔍 Buscando en YouTube: {}", query);

        let search_query = format!("ytsearch{}:{}", limit.max(1), query);
        let stdout = self
            .run(&[
                "--no-playlist",
                "--dump-json",
                "--flat-playlist",
                "--skip-download",
                "--no-warnings",
                &search_query,
            ])
            .await?;

        let results = Self::parse_lines(&stdout);
        debug!("📋 {} resultados para: {}", results.len(), query);
        Ok(results)
    }

    async fn get_info(&self, url: &str) -> PlaybackResult<TrackMetadata> {
        debug!("📊 Obteniendo info de: {}", url);

        let stdout = self
            .run(&["--no-playlist", "--dump-json", "--skip-download", "--no-warnings", url])
            .await?;

        Self::parse_lines(&stdout)
            .into_iter()
            .next()
            .ok_or_else(|| PlaybackError::fetch_failed("yt-dlp no devolvió metadata", ""))
    }

    fn is_valid_url(&self, url: &str) -> bool {
        Self::is_youtube_url(url)
    }

    fn source_name(&self) -> &'static str {
        "YouTube"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_youtube_url_detection() {
        assert!(YouTubeClient::is_youtube_url(
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        ));
        assert!(YouTubeClient::is_youtube_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(YouTubeClient::is_youtube_url(
            "https://music.youtube.com/watch?v=test"
        ));
        assert!(!YouTubeClient::is_youtube_url("https://example.com/video"));
        assert!(!YouTubeClient::is_youtube_url("lofi beats"));
    }

    #[test]
    fn flat_entries_use_url_field() {
        let stdout = concat!(
            r#"{"id":"abc","title":"lofi beats","url":"https://www.youtube.com/watch?v=abc","duration":120.0}"#,
            "\n",
            "not json\n",
            r#"{"id":"xyz","title":"solo id"}"#,
        );

        let results = YouTubeClient::parse_lines(stdout);
        assert_eq!(
            results,
            vec![
                TrackMetadata {
                    title: "lofi beats".into(),
                    url: Some("https://www.youtube.com/watch?v=abc".into()),
                    duration: Some(Duration::from_secs(120)),
                },
                TrackMetadata {
                    title: "solo id".into(),
                    url: Some("https://www.youtube.com/watch?v=xyz".into()),
                    duration: None,
                },
            ]
        );
    }

    #[tokio::test]
    async fn missing_binary_is_tool_missing() {
        let client = YouTubeClient::new("guild-player-no-such-binary");
        let err = client.search("lofi beats", 1).await.unwrap_err();
        assert!(matches!(err, PlaybackError::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn failing_lookup_carries_exit_status() {
        let client = YouTubeClient::new("false");
        let err = client.get_info("https://youtu.be/abc").await.unwrap_err();
        assert!(matches!(err, PlaybackError::FetchFailed { .. }));
    }
}
