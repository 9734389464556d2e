use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    duration_from_secs, open_http_stream, parse_url, url_host_matches, MediaResolver, SourceKind,
    Track,
};
use crate::audio::transcode::MediaInput;

pub const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

/// Instancias públicas usadas si no se configura ninguna.
pub const DEFAULT_INSTANCES: &[&str] = &[
    "https://yewtu.be",
    "https://inv.nadeko.net",
    "https://invidious.nerdvpn.de",
    "https://invidious.protokolla.fi",
    "https://invidious.privacydev.net",
];

static VIDEO_ID: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(
        r"(?:youtube\.com/watch\?(?:.*&)?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([a-zA-Z0-9_-]{11})",
    )
});

static PLAYLIST_ID: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[?&]list=([a-zA-Z0-9_-]+)"));

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
    #[serde(default)]
    width: u32,
}

#[derive(Debug, Deserialize)]
struct VideoSummary {
    #[serde(rename = "videoId")]
    video_id: String,
    title: String,
    #[serde(rename = "lengthSeconds", default)]
    length_seconds: Option<u64>,
    author: Option<String>,
    #[serde(rename = "videoThumbnails", default)]
    video_thumbnails: Vec<Thumbnail>,
}

#[derive(Debug, Deserialize)]
struct VideoDetails {
    #[serde(flatten)]
    summary: VideoSummary,
    #[serde(rename = "adaptiveFormats", default)]
    adaptive_formats: Vec<AdaptiveFormat>,
}

#[derive(Debug, Deserialize)]
struct AdaptiveFormat {
    url: String,
    #[serde(rename = "type")]
    format_type: String,
    #[serde(default, deserialize_with = "bitrate_from_any")]
    bitrate: u64,
}

#[derive(Debug, Deserialize)]
struct Playlist {
    #[serde(default)]
    videos: Vec<VideoSummary>,
}

/// Invidious devuelve el bitrate como número o como cadena según la versión.
fn bitrate_from_any<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(n) => n.as_u64().unwrap_or(0),
        serde_json::Value::String(s) => s.parse().unwrap_or(0),
        _ => 0,
    })
}

/// YouTube a través de la API de Invidious, rotando instancias.
///
/// También acepta texto libre como búsqueda y reproduce el primer resultado.
pub struct InvidiousResolver {
    http: reqwest::Client,
    instances: Vec<String>,
    current_instance: AtomicUsize,
    timeout: Duration,
}

impl InvidiousResolver {
    pub fn new(http: reqwest::Client, instances: Vec<String>, timeout: Duration) -> Self {
        let instances = if instances.is_empty() {
            DEFAULT_INSTANCES.iter().map(|s| s.to_string()).collect()
        } else {
            instances
                .into_iter()
                .map(|s| s.trim_end_matches('/').to_string())
                .collect()
        };
        Self {
            http,
            instances,
            current_instance: AtomicUsize::new(0),
            timeout,
        }
    }

    pub fn extract_video_id(url: &str) -> Option<String> {
        VIDEO_ID
            .as_ref()
            .ok()?
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Id de playlist solo si la URL no apunta también a un video concreto.
    pub fn extract_playlist_id(url: &str) -> Option<String> {
        if Self::extract_video_id(url).is_some() && !url.contains("/playlist") {
            return None;
        }
        PLAYLIST_ID
            .as_ref()
            .ok()?
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    fn is_youtube_url(query: &str) -> bool {
        url_host_matches(query, YOUTUBE_HOSTS)
    }

    /// Orden de instancias para una petición, empezando por la siguiente en turno.
    fn rotation(&self) -> impl Iterator<Item = &str> {
        let start = self.current_instance.fetch_add(1, Ordering::Relaxed);
        let len = self.instances.len();
        (0..len).map(move |i| self.instances[(start + i) % len].as_str())
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut last_error = None;
        for instance in self.rotation() {
            let url = format!("{}{}", instance, path);
            let attempt = async {
                let response = self
                    .http
                    .get(&url)
                    .query(query)
                    .timeout(self.timeout)
                    .send()
                    .await
                    .context("Error en request a Invidious")?
                    .error_for_status()?;
                response
                    .json::<T>()
                    .await
                    .context("Error parseando respuesta JSON")
            };
            match attempt.await {
                Ok(value) => {
                    debug!("✅ Respuesta de {}", instance);
                    return Ok(value);
                }
                Err(e) => {
                    warn!("❌ Falló {} en {}: {:#}", path, instance, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No hay instancias de Invidious")))
    }

    fn to_track(query: &str, video: VideoSummary) -> Track {
        let url = format!("https://www.youtube.com/watch?v={}", video.video_id);
        let mut track = Track::new(query, url, video.title, SourceKind::YouTube);
        if let Some(author) = video.author {
            track = track.with_artist(author);
        }
        if let Some(duration) = video.length_seconds.and_then(|s| duration_from_secs(s as f64)) {
            track = track.with_duration(duration);
        }
        let thumbnail = video
            .video_thumbnails
            .into_iter()
            .find(|t| t.width >= 320)
            .map(|t| t.url);
        if let Some(thumbnail) = thumbnail {
            track = track.with_thumbnail(thumbnail);
        }
        track
    }

    async fn search(&self, query: &str) -> Result<Vec<Track>> {
        info!("🔍 Buscando en Invidious: {}", query);
        let results: Vec<VideoSummary> = self
            .get_json("/api/v1/search", &[("q", query), ("type", "video")])
            .await?;
        Ok(results
            .into_iter()
            .next()
            .map(|v| Self::to_track(query, v))
            .into_iter()
            .collect())
    }

    /// Mejor formato solo-audio, prefiriendo audio/mp4 y luego mayor bitrate.
    fn pick_audio_format(formats: Vec<AdaptiveFormat>) -> Option<AdaptiveFormat> {
        formats
            .into_iter()
            .filter(|f| f.format_type.starts_with("audio/"))
            .max_by_key(|f| (f.format_type.starts_with("audio/mp4"), f.bitrate))
    }
}

#[async_trait]
impl MediaResolver for InvidiousResolver {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn can_resolve(&self, query: &str) -> bool {
        Self::is_youtube_url(query) || parse_url(query).is_none()
    }

    async fn resolve(&self, query: &str) -> Result<Vec<Track>> {
        if !Self::is_youtube_url(query) {
            return self.search(query).await;
        }

        if let Some(list) = Self::extract_playlist_id(query) {
            info!("📜 Cargando playlist de YouTube {}", list);
            let playlist: Playlist = self
                .get_json(&format!("/api/v1/playlists/{}", list), &[])
                .await?;
            return Ok(playlist
                .videos
                .into_iter()
                .map(|v| Self::to_track(query, v))
                .collect());
        }

        let Some(id) = Self::extract_video_id(query) else {
            return Ok(Vec::new());
        };
        let video: VideoDetails = self.get_json(&format!("/api/v1/videos/{}", id), &[]).await?;
        Ok(vec![Self::to_track(query, video.summary)])
    }

    fn can_get_stream(&self, track: &Track) -> bool {
        track.kind == SourceKind::YouTube
    }

    async fn get_stream(&self, track: &Track) -> Result<Box<dyn MediaInput>> {
        let id = Self::extract_video_id(&track.url)
            .with_context(|| format!("No se pudo extraer video ID de la URL: {}", track.url))?;
        let video: VideoDetails = self.get_json(&format!("/api/v1/videos/{}", id), &[]).await?;
        let format = Self::pick_audio_format(video.adaptive_formats)
            .context("No se encontró formato de audio válido")?;
        debug!("🎧 Formato elegido: {} ({} bps)", format.format_type, format.bitrate);

        Ok(Box::new(open_http_stream(&self.http, &format.url).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> InvidiousResolver {
        InvidiousResolver::new(reqwest::Client::new(), Vec::new(), Duration::from_secs(5))
    }

    #[test]
    fn test_youtube_url_detection() {
        let r = resolver();
        assert!(r.can_resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(r.can_resolve("https://youtu.be/dQw4w9WgXcQ"));
        assert!(r.can_resolve("https://music.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(r.can_resolve("lofi hip hop"));
        assert!(!r.can_resolve("https://example.com/video"));
    }

    #[test]
    fn test_video_and_playlist_ids() {
        assert_eq!(
            InvidiousResolver::extract_video_id("https://www.youtube.com/watch?feature=x&v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            InvidiousResolver::extract_playlist_id("https://www.youtube.com/playlist?list=PLabc_123").as_deref(),
            Some("PLabc_123")
        );
        assert_eq!(
            InvidiousResolver::extract_playlist_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ&list=PLabc"),
            None
        );
    }

    #[test]
    fn test_rotation_covers_every_instance() {
        let r = InvidiousResolver::new(
            reqwest::Client::new(),
            vec!["https://a/".into(), "https://b".into(), "https://c".into()],
            Duration::from_secs(5),
        );
        let first: Vec<&str> = r.rotation().collect();
        let second: Vec<&str> = r.rotation().collect();
        assert_eq!(first, vec!["https://a", "https://b", "https://c"]);
        assert_eq!(second, vec!["https://b", "https://c", "https://a"]);
    }

    #[test]
    fn test_prefers_mp4_audio() {
        let formats: Vec<AdaptiveFormat> = serde_json::from_str(
            r#"[
                {"url": "v", "type": "video/mp4; codecs=\"avc1\"", "bitrate": "900000"},
                {"url": "webm", "type": "audio/webm; codecs=\"opus\"", "bitrate": 160000},
                {"url": "m4a-low", "type": "audio/mp4; codecs=\"mp4a.40.5\"", "bitrate": "48000"},
                {"url": "m4a", "type": "audio/mp4; codecs=\"mp4a.40.2\"", "bitrate": 128000}
            ]"#,
        )
        .unwrap();
        let best = InvidiousResolver::pick_audio_format(formats).unwrap();
        assert_eq!(best.url, "m4a");
    }
}
