use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::{sync::Arc, time::Duration};

use crate::{
    audio::{PlaybackStatus, SessionPhase, TerminationReason},
    sources::Track,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Open Music Stream";

/// Máximo de filas en el listado de la cola.
pub const QUEUE_PAGE: usize = 10;

fn track_embed(track: &Track, title: &str) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title(title)
        .description(format!("**{}**", track.title))
        .color(colors::SUCCESS_GREEN)
        .field(
            "🎤 Artista",
            track.artist.as_deref().unwrap_or("Desconocido"),
            true,
        )
        .field("⏱️ Duración", format_duration(track.duration), true)
        .field("🔗 Fuente", track.kind.as_str(), true);

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }
    if track.url.starts_with("http") {
        embed = embed.url(&track.url);
    }

    embed
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    track_embed(track, "🎵 Reproduciendo Ahora")
}

/// Un solo track se muestra completo; varios, como resumen.
pub fn create_tracks_added_embed(tracks: &[Arc<Track>], insert_next: bool) -> CreateEmbed {
    let position = if insert_next {
        "al frente de la cola"
    } else {
        "a la cola"
    };

    match tracks {
        [single] => track_embed(single, "✅ Canción Agregada")
            .footer(CreateEmbedFooter::new(format!("Agregada {}", position))),
        many => {
            let total: Duration = many.iter().filter_map(|t| t.duration).sum();
            CreateEmbed::default()
                .title("📋 Playlist Agregada")
                .description(format!("**{}** canciones agregadas {}", many.len(), position))
                .field("⏱️ Duración total", format_duration(Some(total)), true)
                .color(colors::SUCCESS_GREEN)
                .timestamp(Timestamp::now())
                .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        }
    }
}

pub fn create_status_embed(status: &PlaybackStatus) -> CreateEmbed {
    let Some(current) = &status.current else {
        return create_info_embed(
            "Sin reproducción",
            &format!("No hay nada sonando ({})", phase_label(status.phase)),
        );
    };

    let progress = match status.duration {
        Some(total) => format!(
            "{} {} / {}",
            progress_bar(status.position, total),
            format_duration(Some(status.position)),
            format_duration(Some(total))
        ),
        None => format!("{} / 🔴 En vivo", format_duration(Some(status.position))),
    };

    track_embed(current, "🎵 Reproduciendo Ahora")
        .field("📊 Progreso", progress, false)
        .field("🔊 Volumen", format!("{}%", (status.volume * 100.0).round()), true)
        .field("🔁 Repetición", if status.looping { "Activa" } else { "Inactiva" }, true)
        .field("📋 En cola", status.queued.to_string(), true)
}

pub fn create_queue_embed(upcoming: &[Arc<Track>], total: usize) -> CreateEmbed {
    let embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER));

    if upcoming.is_empty() {
        return embed
            .description("😴 **La cola está vacía**")
            .color(colors::NEUTRAL_GRAY);
    }

    let mut lines: Vec<String> = upcoming
        .iter()
        .enumerate()
        .map(|(i, track)| {
            format!(
                "`{}.` {} `[{}]`",
                i + 1,
                track.display_name(),
                format_duration(track.duration)
            )
        })
        .collect();
    if total > upcoming.len() {
        lines.push(format!("... y {} más", total - upcoming.len()));
    }

    embed.description(lines.join("\n")).color(colors::INFO_BLUE)
}

pub fn create_track_failed_embed(track: &Track, cause: &str) -> CreateEmbed {
    create_error_embed(
        "No se pudo reproducir",
        &format!("**{}**\n{}", track.display_name(), cause),
    )
}

pub fn create_queue_finished_embed(inactivity: Duration) -> CreateEmbed {
    create_info_embed(
        "Cola terminada",
        &format!(
            "Saldré del canal tras {} sin actividad",
            humantime::format_duration(inactivity)
        ),
    )
}

pub fn create_terminated_embed(reason: &TerminationReason) -> CreateEmbed {
    let color = match reason {
        TerminationReason::Failed(_) => colors::ERROR_RED,
        TerminationReason::Disconnected => colors::WARNING_ORANGE,
        _ => colors::NEUTRAL_GRAY,
    };
    CreateEmbed::default()
        .title("👋 Sesión terminada")
        .description(format!("Motivo: {}", reason))
        .color(color)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Idle => "esperando",
        SessionPhase::Running => "reproduciendo",
        SessionPhase::InactiveWait => "cola vacía",
        SessionPhase::Terminating => "cerrando",
        SessionPhase::Terminated => "terminada",
    }
}

fn progress_bar(position: Duration, total: Duration) -> String {
    let segments = 15;
    let ratio = if total.is_zero() {
        0.0
    } else {
        (position.as_secs_f64() / total.as_secs_f64()).clamp(0.0, 1.0)
    };
    let filled = (ratio * segments as f64).round() as usize;
    format!("`[{}{}]`", "█".repeat(filled), "▒".repeat(segments - filled))
}

/// Formatea una duración en formato legible
fn format_duration(duration: Option<Duration>) -> String {
    let Some(duration) = duration else {
        return "🔴 En vivo".to_string();
    };
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

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Some(Duration::from_secs(65))), "1:05");
        assert_eq!(format_duration(Some(Duration::from_secs(3_725))), "1:02:05");
        assert_eq!(format_duration(None), "🔴 En vivo");
    }

    #[test]
    fn test_progress_bar_bounds() {
        let total = Duration::from_secs(100);
        assert_eq!(progress_bar(Duration::ZERO, total), format!("`[{}]`", "▒".repeat(15)));
        assert_eq!(
            progress_bar(Duration::from_secs(500), total),
            format!("`[{}]`", "█".repeat(15))
        );
        assert_eq!(
            progress_bar(Duration::from_secs(5), Duration::ZERO),
            format!("`[{}]`", "▒".repeat(15))
        );
    }
}
