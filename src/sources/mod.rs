pub mod youtube;

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::error::{PlaybackError, PlaybackResult};

pub use youtube::YouTubeClient;

/// Metadata devuelta por una fuente de búsqueda
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub url: Option<String>,
    pub duration: Option<Duration>,
}

/// Servicio externo que traduce texto libre o URLs a metadata
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicSource: Send + Sync {
    /// Busca tracks en la fuente
    async fn search(&self, query: &str, limit: usize) -> PlaybackResult<Vec<TrackMetadata>>;

    /// Obtiene información de una URL específica
    async fn get_info(&self, url: &str) -> PlaybackResult<TrackMetadata>;

    /// Verifica si la URL es válida para esta fuente
    fn is_valid_url(&self, url: &str) -> bool;

    /// Nombre de la fuente
    fn source_name(&self) -> &'static str;
}

/// Pista resuelta y lista para encolarse. Inmutable una vez creada.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    locator: String,
    title: String,
    requested_by: String,
    duration: Option<Duration>,
}

impl Track {
    pub fn new(locator: impl Into<String>, title: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            title: title.into(),
            requested_by: requested_by.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    // Getters
    pub fn locator(&self) -> &str {
        &self.locator
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn requested_by(&self) -> &str {
        &self.requested_by
    }
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

const UNKNOWN_TITLE: &str = "Título desconocido";

/// Convierte una consulta del usuario en un [`Track`].
///
/// URLs reconocidas por la fuente nunca fallan: si la metadata no se puede
/// obtener se usa la propia URL como título. Las búsquedas toman el primer
/// resultado y fallan con [`PlaybackError::ResolutionFailed`] si no hay
/// ninguno utilizable.
#[derive(Clone)]
pub struct TrackResolver {
    source: Arc<dyn MusicSource>,
}

impl TrackResolver {
    pub fn new(source: Arc<dyn MusicSource>) -> Self {
        Self { source }
    }

    pub async fn resolve(&self, query: &str, requester: &str) -> PlaybackResult<Track> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlaybackError::ResolutionFailed {
                query: String::new(),
            });
        }

        if self.source.is_valid_url(query) {
            return Ok(self.resolve_url(query, requester).await);
        }

        info!("🔍 Buscando en {}: {}", self.source.source_name(), query);

        let results = match self.source.search(query, 1).await {
            Ok(results) => results,
            Err(e @ PlaybackError::ToolMissing { .. }) => return Err(e),
            Err(e) => {
                warn!("⚠️ Búsqueda falló para '{}': {}", query, e);
                return Err(PlaybackError::ResolutionFailed {
                    query: query.to_string(),
                });
            }
        };

        let first = results.into_iter().next().ok_or_else(|| PlaybackError::ResolutionFailed {
            query: query.to_string(),
        })?;

        let locator = first
            .url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| PlaybackError::ResolutionFailed {
                query: query.to_string(),
            })?;

        let title = if first.title.trim().is_empty() {
            UNKNOWN_TITLE.to_string()
        } else {
            first.title
        };

        let mut track = Track::new(locator, title, requester);
        if let Some(duration) = first.duration {
            track = track.with_duration(duration);
        }

        debug!("✅ Resuelto '{}' -> {}", query, track.locator());
        Ok(track)
    }

    async fn resolve_url(&self, url: &str, requester: &str) -> Track {
        match self.source.get_info(url).await {
            Ok(meta) => {
                let title = if meta.title.trim().is_empty() {
                    url.to_string()
                } else {
                    meta.title
                };
                let mut track = Track::new(url, title, requester);
                if let Some(duration) = meta.duration {
                    track = track.with_duration(duration);
                }
                track
            }
            Err(e) => {
                // Metadata best-effort: la URL sigue siendo reproducible
                warn!("⚠️ Sin metadata para {}: {}", url, e);
                Track::new(url, url, requester)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;

    const VIDEO_URL: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    fn url_source() -> MockMusicSource {
        let mut source = MockMusicSource::new();
        source
            .expect_is_valid_url()
            .returning(|url| url.starts_with("https://"));
        source.expect_source_name().return_const("YouTube");
        source
    }

    #[tokio::test]
    async fn search_takes_first_result() {
        let mut source = url_source();
        source
            .expect_search()
            .with(eq("lofi beats"), eq(1))
            .times(1)
            .returning(|_, _| {
                Ok(vec![
                    TrackMetadata {
                        title: "lofi hip hop radio".into(),
                        url: Some(VIDEO_URL.into()),
                        duration: Some(Duration::from_secs(180)),
                    },
                    TrackMetadata {
                        title: "otra".into(),
                        url: Some("https://youtu.be/otra".into()),
                        duration: None,
                    },
                ])
            });

        let resolver = TrackResolver::new(Arc::new(source));
        let track = resolver.resolve("lofi beats", "alice").await.unwrap();

        assert_eq!(track.title(), "lofi hip hop radio");
        assert_eq!(track.locator(), VIDEO_URL);
        assert_eq!(track.requested_by(), "alice");
        assert_eq!(track.duration(), Some(Duration::from_secs(180)));
    }

    #[tokio::test]
    async fn empty_search_is_resolution_failure() {
        let mut source = url_source();
        source.expect_search().returning(|_, _| Ok(Vec::new()));

        let resolver = TrackResolver::new(Arc::new(source));
        let err = resolver.resolve("nada de nada", "bob").await.unwrap_err();
        assert!(matches!(err, PlaybackError::ResolutionFailed { ref query } if query == "nada de nada"));
    }

    #[tokio::test]
    async fn top_result_without_locator_fails() {
        let mut source = url_source();
        source.expect_search().returning(|_, _| {
            Ok(vec![TrackMetadata {
                title: "sin url".into(),
                url: Some("   ".into()),
                duration: None,
            }])
        });

        let resolver = TrackResolver::new(Arc::new(source));
        assert!(matches!(
            resolver.resolve("algo", "bob").await,
            Err(PlaybackError::ResolutionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn url_metadata_failure_falls_back_to_query_title() {
        let mut source = url_source();
        source
            .expect_get_info()
            .returning(|_| Err(PlaybackError::fetch_failed("exit 1", "ERROR: private video")));
        source.expect_search().never();

        let resolver = TrackResolver::new(Arc::new(source));
        let track = resolver.resolve(VIDEO_URL, "carol").await.unwrap();

        assert_eq!(track.title(), VIDEO_URL);
        assert_eq!(track.locator(), VIDEO_URL);
    }

    #[tokio::test]
    async fn url_uses_looked_up_title() {
        let mut source = url_source();
        source.expect_get_info().with(eq(VIDEO_URL)).returning(|_| {
            Ok(TrackMetadata {
                title: "Never Gonna Give You Up".into(),
                url: Some(VIDEO_URL.into()),
                duration: None,
            })
        });

        let resolver = TrackResolver::new(Arc::new(source));
        let track = resolver.resolve(&format!("  {}  ", VIDEO_URL), "dave").await.unwrap();
        assert_eq!(track.title(), "Never Gonna Give You Up");
        assert_eq!(track.locator(), VIDEO_URL);
    }

    #[tokio::test]
    async fn missing_lookup_tool_is_reported() {
        let mut source = url_source();
        source.expect_search().returning(|_, _| {
            Err(PlaybackError::ToolMissing {
                tool: "yt-dlp".into(),
            })
        });

        let resolver = TrackResolver::new(Arc::new(source));
        assert!(matches!(
            resolver.resolve("lofi beats", "erin").await,
            Err(PlaybackError::ToolMissing { .. })
        ));
    }

    #[tokio::test]
    async fn blank_query_never_hits_the_source() {
        let source = MockMusicSource::new();
        let resolver = TrackResolver::new(Arc::new(source));
        assert!(matches!(
            resolver.resolve("   ", "erin").await,
            Err(PlaybackError::ResolutionFailed { .. })
        ));
    }
}
