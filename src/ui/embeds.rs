use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{PlaybackState, QueueSnapshot},
    sources::Track,
};

/// Cuántas pistas de la cola se muestran en `/queue`
pub const QUEUE_PREVIEW: usize = 10;

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Guild Player";

fn duration_label(track: &Track) -> String {
    match track.duration() {
        Some(duration) => format_duration(duration),
        None => "🔴 En vivo".to_string(),
    }
}

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title()))
        .color(colors::SUCCESS_GREEN)
        .field("⏱️ Duración", duration_label(track), true)
        .field("👤 Solicitado por", track.requested_by(), true);

    if track.locator().starts_with("http") {
        embed = embed.url(track.locator());
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Respuesta a `play`: empieza ya o queda en la posición `position`
pub fn create_track_added_embed(track: &Track, position: Option<usize>) -> CreateEmbed {
    let (title, color) = match position {
        None => ("▶️ Iniciando reproducción", colors::SUCCESS_GREEN),
        Some(_) => ("➕ Agregado a la cola", colors::MUSIC_PURPLE),
    };

    let mut embed = CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", track.title()))
        .color(color)
        .field("⏱️ Duración", duration_label(track), true);

    if let Some(position) = position {
        embed = embed.field("📍 Posición", position.to_string(), true);
    }

    embed
        .field("👤 Solicitado por", track.requested_by(), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn queue_lines(queue: &[Track]) -> String {
    let mut description = String::new();

    for (i, item) in queue.iter().take(QUEUE_PREVIEW).enumerate() {
        let duration = item
            .duration()
            .map(|d| format!(" `[{}]`", format_duration(d)))
            .unwrap_or_default();

        description.push_str(&format!(
            "**{}**. {}{} • {}\n",
            i + 1,
            item.title(),
            duration,
            item.requested_by()
        ));
    }

    if queue.len() > QUEUE_PREVIEW {
        description.push_str(&format!("… y {} más", queue.len() - QUEUE_PREVIEW));
    }

    description
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(snapshot: &QueueSnapshot) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if snapshot.playing.is_none() && snapshot.queue.is_empty() {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = &snapshot.playing {
        let status = match snapshot.state {
            PlaybackState::Loading => "⏳ Cargando",
            _ => "▶️ Reproduciendo",
        };
        embed = embed.field(
            status,
            format!("**{}** • {}", current.title(), current.requested_by()),
            false,
        );
    }

    if !snapshot.queue.is_empty() {
        embed = embed.field("Próximas canciones", queue_lines(&snapshot.queue), false);
    }

    embed
        .field("Información", format!("**Total:** {} en cola", snapshot.queue.len()), false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed de ayuda general
pub fn create_help_embed(prefix: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Guild Player - Comandos")
        .color(colors::INFO_BLUE)
        .description(format!(
            "Todos los comandos funcionan como `/comando` o `{}comando`",
            prefix
        ))
        .field(
            "🎵 Reproducción",
            "• `/play <canción o URL>` - Reproduce o agrega a la cola\n\
            • `/skip` - Salta a la siguiente canción\n\
            • `/stop` - Detiene y limpia la cola\n\
            • `/queue` - Muestra la cola",
            false,
        )
        .field(
            "🔊 Conexión",
            "• `/join` - Conecta a tu canal de voz\n\
            • `/leave` - Desconecta del canal",
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_warning_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("⚠️ {}", title))
        .description(description)
        .color(colors::WARNING_ORANGE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de información
pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn durations_format_like_a_player() {
        assert_eq!(format_duration(Duration::from_secs(59)), "0:59");
        assert_eq!(format_duration(Duration::from_secs(3 * 60 + 5)), "3:05");
        assert_eq!(format_duration(Duration::from_secs(3600 + 61)), "1:01:01");
    }

    #[test]
    fn queue_preview_is_capped() {
        let queue: Vec<Track> = (1..=12)
            .map(|i| Track::new(format!("url-{}", i), format!("song {}", i), "alice"))
            .collect();

        let lines = queue_lines(&queue);
        assert!(lines.starts_with("**1**. song 1 • alice\n"));
        assert!(lines.contains("**10**. song 10"));
        assert!(!lines.contains("song 11"));
        assert!(lines.ends_with("… y 2 más"));
    }

    #[test]
    fn queue_lines_show_known_durations() {
        let queue = vec![Track::new("u", "lofi", "bob").with_duration(Duration::from_secs(125))];
        assert_eq!(queue_lines(&queue), "**1**. lofi `[2:05]` • bob\n");
    }
}
