//! Error taxonomy for the playback core.
//!
//! Resolution and connection errors surface straight to the command that
//! triggered them. Pipeline errors ([`PlaybackError::FetchFailed`],
//! [`PlaybackError::TranscodeFailed`], [`PlaybackError::ToolMissing`]) are
//! absorbed by the controller and only reach users as notifications.

use std::process::ExitStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no se encontró ninguna pista para `{query}`")]
    ResolutionFailed { query: String },

    #[error("no se encontró el ejecutable `{tool}`")]
    ToolMissing { tool: String },

    #[error("la etapa de descarga falló: {reason}")]
    FetchFailed { reason: String, stderr: String },

    #[error("la etapa de transcodificación falló ({status})")]
    TranscodeFailed { status: String, stderr: String },

    #[error("el canal de voz no estuvo listo a tiempo")]
    ConnectionTimeout,

    #[error("no hay sesión de voz activa en este servidor")]
    NotConnected,

    #[error("no hay nada reproduciéndose")]
    NothingPlaying,

    #[error("el usuario no está en un canal de voz")]
    NotInVoiceChannel,

    #[error("la cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error("la sesión de reproducción ya terminó")]
    SessionClosed,

    #[error("la carga de la pista se interrumpió: {0}")]
    LoadAborted(String),

    #[error("error de E/S en el pipeline: {0}")]
    Io(#[from] std::io::Error),
}

impl PlaybackError {
    pub fn fetch_failed(reason: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::FetchFailed {
            reason: reason.into(),
            stderr: stderr.into(),
        }
    }

    pub fn transcode_failed(status: Option<ExitStatus>, stderr: impl Into<String>) -> Self {
        Self::TranscodeFailed {
            status: status.map_or_else(|| "sin código de salida".to_string(), |s| s.to_string()),
            stderr: stderr.into(),
        }
    }

    /// Maps a spawn error to [`PlaybackError::ToolMissing`] when the binary
    /// is not on `PATH`, keeping every other I/O failure distinct.
    pub fn from_spawn(tool: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::ToolMissing {
                tool: tool.to_string(),
            }
        } else {
            Self::Io(err)
        }
    }

    /// True for the errors the controller absorbs and skips past.
    pub fn is_pipeline_failure(&self) -> bool {
        matches!(
            self,
            Self::FetchFailed { .. } | Self::TranscodeFailed { .. } | Self::ToolMissing { .. } | Self::Io(_) | Self::LoadAborted(_)
        )
    }

    /// Captured standard error of the failing stage, if any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            Self::FetchFailed { stderr, .. } | Self::TranscodeFailed { stderr, .. } if !stderr.is_empty() => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }

    /// Concise text shown to the user who triggered the action.
    pub fn user_message(&self) -> String {
        match self {
            Self::ResolutionFailed { .. } => "🔍 No pude encontrar esa canción, prueba con otra búsqueda".to_string(),
            Self::ToolMissing { tool } => format!(
                "🛠️ El servidor no encuentra `{}` (revisa que esté instalado en la imagen)",
                tool
            ),
            Self::FetchFailed { .. } => "📥 No se pudo obtener el audio de esa pista".to_string(),
            Self::TranscodeFailed { .. } => "🎛️ No se pudo convertir el audio de esa pista".to_string(),
            Self::ConnectionTimeout => {
                "⏱️ No pude entrar al canal de voz a tiempo (revisa los permisos Connect/Speak)".to_string()
            }
            Self::NotConnected => "🔇 El bot no está en ningún canal de voz".to_string(),
            Self::NothingPlaying => "📭 No hay nada reproduciéndose".to_string(),
            Self::NotInVoiceChannel => "🎧 Debes estar en un canal de voz primero".to_string(),
            Self::QueueFull { max } => format!("📛 La cola está llena (máximo {} canciones)", max),
            Self::SessionClosed => "🔇 La sesión de reproducción ya terminó".to_string(),
            Self::Io(_) | Self::LoadAborted(_) => "❌ Error interno al preparar el audio".to_string(),
        }
    }
}

pub type PlaybackResult<T> = std::result::Result<T, PlaybackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_not_found_is_tool_missing() {
        let err = PlaybackError::from_spawn(
            "yt-dlp",
            std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        );
        assert!(matches!(err, PlaybackError::ToolMissing { ref tool } if tool == "yt-dlp"));
        assert!(err.user_message().contains("yt-dlp"));
    }

    #[test]
    fn other_spawn_errors_stay_io() {
        let err = PlaybackError::from_spawn(
            "ffmpeg",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, PlaybackError::Io(_)));
        assert!(err.is_pipeline_failure());
    }

    #[test]
    fn user_messages_are_distinct() {
        let messages = [
            PlaybackError::NotInVoiceChannel.user_message(),
            PlaybackError::NothingPlaying.user_message(),
            PlaybackError::ToolMissing { tool: "ffmpeg".into() }.user_message(),
            PlaybackError::ResolutionFailed { query: "x".into() }.user_message(),
            PlaybackError::NotConnected.user_message(),
        ];
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn diagnostics_only_when_captured() {
        assert_eq!(
            PlaybackError::fetch_failed("exit 1", "ERROR: video unavailable").diagnostics(),
            Some("ERROR: video unavailable")
        );
        assert_eq!(PlaybackError::fetch_failed("salida vacía", "").diagnostics(), None);
        assert!(!PlaybackError::NotConnected.is_pipeline_failure());
    }
}
